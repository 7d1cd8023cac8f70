//! Serialization of outgoing requests
//!
//! This is a state machine over the connection's output buffer. The
//! request machinery drives it strictly in order, so state violations
//! are bugs and panic, except for the header checks that keep a caller
//! from smuggling in a second body length.

use std::io::Write;

use netbuf::Buf;

use version::Version;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
    }
}

#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent.
    RequestStart,
    /// Request line is already in the buffer.
    Headers,
    /// The message contains a fixed size body.
    FixedHeaders { content_length: u64 },
    /// Headers are finished, the body is being written.
    FixedBody { content_length: u64 },
    /// A message in final state.
    Done,
}

impl MessageState {
    /// Write request line.
    ///
    /// This puts request line into a buffer immediately. If you don't
    /// continue with request it will be sent to the network shortly.
    ///
    /// # Panics
    ///
    /// When request line is already written.
    pub fn request_line(&mut self, buf: &mut Buf,
        method: &str, path: &str, version: Version)
    {
        use self::MessageState::*;
        match *self {
            RequestStart => {
                write!(buf, "{} {} {}\r\n", method, path, version).unwrap();
                *self = Headers;
            }
            ref state => {
                panic!("Called request_line() method on request in state \
                    {:?}", state)
            }
        }
    }

    /// Add a header to the message.
    ///
    /// `Content-Length` must be set using the `add_length` method, and
    /// a transfer encoding can't be set at all: request bodies are
    /// always sent with an explicit length.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            Headers | FixedHeaders { .. } => {
                buf.write_all(name.as_bytes()).unwrap();
                buf.write_all(b": ").unwrap();
                buf.write_all(value).unwrap();
                buf.write_all(b"\r\n").unwrap();
                Ok(())
            }
            ref state => {
                panic!("Called add_header() method on a message in state \
                    {:?}", state)
            }
        }
    }

    /// Add a content length to the message.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Buf, n: u64)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } => Err(HeaderError::DuplicateContentLength),
            Headers => {
                write!(buf, "Content-Length: {}\r\n", n).unwrap();
                *self = FixedHeaders { content_length: n };
                Ok(())
            }
            ref state => {
                panic!("Called add_length() method on message in state \
                    {:?}", state)
            }
        }
    }

    /// Closes the HTTP header
    ///
    /// A request without `add_length` simply has no body.
    ///
    /// # Panics
    ///
    /// Panics when the request is in a wrong state.
    pub fn done_headers(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        let content_length = match *self {
            Headers => 0,
            FixedHeaders { content_length } => content_length,
            ref state => {
                panic!("Called done_headers() method on message in state \
                    {:?}", state)
            }
        };
        buf.write_all(b"\r\n").unwrap();
        *self = FixedBody { content_length: content_length };
    }

    /// Write a chunk of the message body.
    ///
    /// # Panics
    ///
    /// When the data is longer than the length that was declared, or the
    /// message is in the wrong state.
    pub fn write_body(&mut self, buf: &mut Buf, data: &[u8]) {
        use self::MessageState::*;
        match *self {
            FixedBody { ref mut content_length } => {
                if data.len() as u64 > *content_length {
                    panic!("Fixed size request error. \
                        Bytes left {} but got additional {}",
                        content_length, data.len());
                }
                buf.write(data).unwrap();
                *content_length -= data.len() as u64;
            }
            ref state => {
                panic!("Called write_body() method on message \
                    in state {:?}", state)
            }
        }
    }

    /// Asserts that the whole declared body has been written.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the body is not
    /// finished.
    pub fn done(&mut self, _buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            FixedBody { content_length: 0 } => *self = Done,
            FixedBody { content_length } => {
                panic!("Tried to close message with {} bytes remaining.",
                       content_length)
            }
            Done => {}  // multiple invocations are okay.
            ref state => {
                panic!("Called done() method on request in state {:?}",
                       state);
            }
        }
    }
}
