use std::io;

use httparse::Error as HttpError;
use httparse::InvalidChunkSize;
use abstract_ns::Error as NsError;
use native_tls::Error as TlsError;
use url::ParseError as UrlError;


/// Request phase used to tag timeouts with the right status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resolving, connecting, or proxy handshake
    Connect,
    /// Writing the request or reading the response head
    Send,
    /// Reading the response body
    Body,
}

quick_error! {
    #[derive(Debug)]
    /// Client request error
    ///
    /// Errors never surface through a separate channel: each one maps to
    /// a synthetic response status (see `Error::code`) and the request
    /// future resolves with that response.
    pub enum Error {
        /// Scheme of this url is not supported
        UnsupportedScheme {
            description("scheme of this url is not supported")
            display("URL unsupported")
        }
        /// The url (or a redirect target) can't be parsed
        BadUrl(err: UrlError) {
            description("invalid url")
            display("invalid URL: {}", err)
            from()
        }
        /// Redirect budget has been exhausted
        TooManyRedirects {
            description("too many redirects")
            display("too many redirects")
        }
        /// Redirect target is unusable (bad syntax or non-http scheme)
        BadRedirect(location: String) {
            description("unsupported redirect target")
            display("unsupported redirect target: {:?}", location)
        }
        /// Name resolution error
        Name(err: NsError) {
            description("name resolution error")
            display("name resolution error: {}", err)
            from()
        }
        /// Establishing a TCP connection failed
        Connect(err: io::Error) {
            description("connection error")
            display("connection error: {}", err)
        }
        /// Proxy refused the CONNECT request
        Proxy(code: u16) {
            description("proxy CONNECT failed")
            display("proxy CONNECT failed with status {}", code)
        }
        /// Proxy answered CONNECT with something unparseable
        ProxyHandshake {
            description("malformed proxy CONNECT response")
            display("malformed proxy CONNECT response")
        }
        /// TLS handshake failure
        Tls(err: TlsError) {
            description("TLS handshake error")
            display("TLS handshake error: {}", err)
            from()
        }
        /// I/O error while writing the request
        Send(err: io::Error) {
            description("request write error")
            display("request write error: {}", err)
        }
        /// Bad response headers received
        Header(err: HttpError) {
            description("bad headers")
            display("bad headers: {}", err)
            from()
        }
        /// Connection reset by peer when reading response headers
        ResetOnResponseHeaders {
            description("connection closed prematurely while reading headers")
            display("connection closed prematurely while reading headers")
        }
        /// Bad `Content-Length` header
        BadContentLength {
            description("bad content length")
            display("bad content length")
        }
        /// I/O error while reading the response body
        Body(err: io::Error) {
            description("response read error")
            display("response read error: {}", err)
        }
        /// Connection reset by peer when reading response body
        ResetOnResponseBody {
            description("connection closed prematurely while reading body")
            display("connection closed prematurely while reading body")
        }
        /// Bad chunk size received
        ChunkSize(err: InvalidChunkSize) {
            description("invalid chunk size")
            display("invalid chunk size: {}", err)
            from()
        }
        /// Bad trailing headers after the last chunk
        BadTrailers {
            description("invalid trailing headers")
            display("invalid trailing headers")
        }
        /// Response body is larger than the configured limit
        ResponseBodyTooLong {
            description("response body too long")
            display("response body too long")
        }
        /// The `on_header` or `on_body` callback asked to abort
        Abort {
            description("user abort")
            display("user abort")
        }
        /// Inactivity timeout fired
        Timeout(phase: Phase) {
            description("request timed out")
            display("request timed out during {:?}", phase)
        }
    }
}

impl Error {
    /// The synthetic status code reported for this error
    ///
    /// 595 covers everything up to an established stream, 596 the
    /// request write and response head, 597 the response body, 598 a
    /// user abort from a callback, 599 logical errors that never
    /// touched the network.
    pub fn code(&self) -> u16 {
        use self::Error::*;
        match *self {
            UnsupportedScheme | BadUrl(..) => 599,
            TooManyRedirects | BadRedirect(..) => 599,
            Name(..) | Connect(..) | Proxy(..) | ProxyHandshake => 595,
            Timeout(Phase::Connect) => 595,
            Tls(..) | Send(..) | Header(..) => 596,
            ResetOnResponseHeaders | BadContentLength => 596,
            Timeout(Phase::Send) => 596,
            Body(..) | ResetOnResponseBody | ChunkSize(..) => 597,
            BadTrailers | ResponseBodyTooLong => 597,
            Timeout(Phase::Body) => 597,
            Abort => 598,
        }
    }
    /// The reason string paired with `code()`
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
