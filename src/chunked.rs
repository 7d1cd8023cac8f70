use std::str::from_utf8;

use httparse::{self, parse_chunk_size};
use tk_bufstream::Buf;

use errors::Error;

/// Trailers are a header block, but a short one
const MAX_TRAILERS: usize = 64;


/// Incremental state of chunked transfer decoding
///
/// Decoded chunk data is compacted in place at the front of the buffer:
/// `buffered` bytes are ready for the caller, `pending` bytes of the
/// current chunk have not arrived yet. After the zero chunk the trailer
/// block (possibly empty) is consumed and kept for the caller to merge.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    buffered: usize,
    pending: usize,
    body_done: bool,
    done: bool,
    trailers: Vec<(String, String)>,
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            pending: 0,
            body_done: false,
            done: false,
            trailers: Vec::new(),
        }
    }
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), Error> {
        if self.done {
            return Ok(());
        }
        while self.buffered < buf.len() {
            if self.body_done {
                let consumed = match parse_trailers(&buf[self.buffered..])? {
                    Some((bytes, trailers)) => {
                        self.trailers = trailers;
                        bytes
                    }
                    None => return Ok(()),
                };
                buf.remove_range(self.buffered..self.buffered + consumed);
                self.done = true;
                return Ok(());
            }
            if self.pending == 0 {
                use httparse::Status::*;
                match parse_chunk_size(&buf[self.buffered..])
                    .map_err(Error::ChunkSize)?
                {
                    Complete((bytes, 0)) => {
                        buf.remove_range(
                            self.buffered..self.buffered+bytes);
                        self.body_done = true;
                    }
                    Complete((bytes, chunk_size)) => {
                        buf.remove_range(
                            self.buffered..self.buffered+bytes);
                        // TODO(tailhook) check that chunk_size < u32
                        self.pending = chunk_size as usize;
                    }
                    Partial => {
                        return Ok(());
                    }
                }
            } else {
                if self.buffered + self.pending + 2 <= buf.len() {
                    self.buffered += self.pending;
                    self.pending = 0;
                    buf.remove_range(self.buffered..self.buffered+2);
                } else {
                    self.pending -= buf.len() - self.buffered;
                    self.buffered = buf.len();
                }
            }
        }
        Ok(())
    }
    pub fn buffered(&self) -> usize {
        self.buffered
    }
    pub fn is_done(&self) -> bool {
        self.done
    }
    /// Trailing headers received after the zero chunk
    pub fn take_trailers(&mut self) -> Vec<(String, String)> {
        ::std::mem::replace(&mut self.trailers, Vec::new())
    }
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}

/// Parse the trailer section after the zero chunk
///
/// Returns the number of bytes the section occupies and the headers in
/// it, or None if more data is needed.
fn parse_trailers(data: &[u8])
    -> Result<Option<(usize, Vec<(String, String)>)>, Error>
{
    if data.starts_with(b"\r\n") {
        return Ok(Some((2, Vec::new())));
    }
    let end = match find_block_end(data) {
        Some(end) => end,
        None => return Ok(None),
    };
    let mut headers = [httparse::EMPTY_HEADER; MAX_TRAILERS];
    match httparse::parse_headers(&data[..end], &mut headers) {
        Ok(httparse::Status::Complete((bytes, headers))) => {
            let mut result = Vec::with_capacity(headers.len());
            for header in headers {
                let value = from_utf8(header.value)
                    .map_err(|_| Error::BadTrailers)?;
                result.push((header.name.to_string(), value.to_string()));
            }
            Ok(Some((bytes, result)))
        }
        Ok(httparse::Status::Partial) => Err(Error::BadTrailers),
        Err(_) => Err(Error::BadTrailers),
    }
}

fn find_block_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
