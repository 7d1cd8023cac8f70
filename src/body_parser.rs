use netbuf::Buf;

use chunked;
use errors::Error;

// TODO(tailhook) review usizes here, probaby we may accept u64
#[derive(Debug, Clone)]
pub enum BodyProgress {
    Fixed(usize), // bytes left
    Eof,
    Chunked(chunked::State),
}

impl BodyProgress {
    /// Returns useful number of bytes in buffer and "end" ("done") flag
    pub fn check_buf(&self, buf: &Buf, eof: bool) -> (usize, bool) {
        use self::BodyProgress::*;
        match *self {
            Fixed(x) if x <= buf.len() => (x, true),
            Fixed(_) => (buf.len(), false),
            Chunked(ref s) => (s.buffered(), s.is_done()),
            Eof => (buf.len(), eof),
        }
    }
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), Error> {
        use self::BodyProgress::*;
        match *self {
            Fixed(_) => {}
            Chunked(ref mut s) => s.parse(buf)?,
            Eof => {}
        }
        Ok(())
    }
    pub fn consume(&mut self, buf: &mut Buf, n: usize) {
        use self::BodyProgress::*;
        buf.consume(n);
        match *self {
            Fixed(ref mut x) => {
                assert!(*x >= n);
                *x -= n;
            }
            Chunked(ref mut s) => s.consume(n),
            Eof => {}
        }
    }
    /// Trailing headers, only ever non-empty for a finished chunked body
    pub fn take_trailers(&mut self) -> Vec<(String, String)> {
        use self::BodyProgress::*;
        match *self {
            Chunked(ref mut s) => s.take_trailers(),
            Fixed(_) | Eof => Vec::new(),
        }
    }
}
