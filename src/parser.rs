//! Incremental parsing of the response head
use std::str::from_utf8;

use httparse;
use netbuf::Buf;

use errors::Error;
use headers::{is_chunked, is_close};
use response::Headers;
use version::Version;


/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;


#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Fixed(u64),
    Chunked,
    Eof,
}

/// A fully parsed (and owned) response head
#[derive(Debug)]
pub struct Head {
    pub version: Version,
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: BodyKind,
    pub close: bool,
}

fn find_block_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn is_folded(block: &[u8]) -> bool {
    block.windows(3).any(|w| {
        w[0] == b'\r' && w[1] == b'\n' && (w[2] == b' ' || w[2] == b'\t')
    })
}

/// Rewrite obs-fold continuation lines into single space separators
fn unfold(block: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(block.len());
    let mut idx = 0;
    while idx < block.len() {
        if block[idx] == b'\r' && idx + 2 < block.len()
            && block[idx+1] == b'\n'
            && (block[idx+2] == b' ' || block[idx+2] == b'\t')
        {
            result.push(b' ');
            idx += 2;
            while idx < block.len()
                && (block[idx] == b' ' || block[idx] == b'\t')
            {
                idx += 1;
            }
        } else {
            result.push(block[idx]);
            idx += 1;
        }
    }
    result
}

/// Implements the body length algorithm for responses:
/// http://httpwg.github.io/specs/rfc7230.html#message.body.length
///
/// Algorithm:
///
/// 1. For HEAD, 1xx, 204, 304 -- no body
/// 2. If last transfer encoding is chunked -> Chunked
/// 3. If Content-Length -> Fixed
/// 4. Else Eof
fn scan_headers(is_head: bool, code: u16, headers: &[httparse::Header])
    -> Result<(BodyKind, bool), Error>
{
    use self::BodyKind::*;
    let mut close = false;
    if is_head || (code >= 100 && code < 200) || code == 204 || code == 304 {
        for header in headers.iter() {
            if header.name.eq_ignore_ascii_case("Connection") {
                if header.value.split(|&x| x == b',').any(is_close) {
                    close = true;
                }
            }
        }
        return Ok((Fixed(0), close));
    }
    let mut has_content_length = false;
    let mut result = Eof;
    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if let Some(enc) = header.value.split(|&x| x == b',').last() {
                if is_chunked(enc) {
                    if has_content_length {
                        // override but don't allow keep-alive
                        close = true;
                    }
                    result = Chunked;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if has_content_length {
                // duplicate content_length
                return Err(Error::BadContentLength);
            }
            has_content_length = true;
            if result != Chunked {
                let s = from_utf8(header.value)
                    .map_err(|_| Error::BadContentLength)?;
                let len = s.trim().parse()
                    .map_err(|_| Error::BadContentLength)?;
                result = Fixed(len);
            } else {
                // transfer-encoding has preference and don't allow
                // keep-alive
                close = true;
            }
        } else if header.name.eq_ignore_ascii_case("Connection") {
            if header.value.split(|&x| x == b',').any(is_close) {
                close = true;
            }
        }
    }
    Ok((result, close))
}

fn parse_block(block: &[u8], is_head: bool) -> Result<Head, Error> {
    let mut vec;
    let mut stack_headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let (ver, code, reason, raw_headers) = {
        let mut raw = httparse::Response::new(&mut stack_headers);
        let mut result = raw.parse(block);
        if matches!(result, Err(httparse::Error::TooManyHeaders)) {
            vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            raw = httparse::Response::new(&mut vec);
            result = raw.parse(block);
        }
        match result.map_err(Error::Header)? {
            httparse::Status::Complete(_) => {
                (raw.version.unwrap(), raw.code.unwrap(),
                 raw.reason.unwrap_or("").to_string(), raw.headers)
            }
            // we only parse blocks that end in an empty line
            httparse::Status::Partial => {
                return Err(Error::ResetOnResponseHeaders);
            }
        }
    };
    let (body, close) = scan_headers(is_head, code, raw_headers)?;
    let mut headers = Headers::new();
    for header in raw_headers.iter() {
        headers.add(header.name,
            &String::from_utf8_lossy(header.value));
    }
    Ok(Head {
        version: if ver == 1 { Version::Http11 } else { Version::Http10 },
        code: code,
        reason: reason,
        headers: headers,
        body: body,
        // For HTTP/1.0 we could implement Connection: Keep-Alive
        // but hopefully it's rare enough to ignore nowadays
        close: close || ver == 0,
        })
}

/// Try to parse a response head out of the input buffer
///
/// Returns None until the whole head (terminated by an empty line) has
/// been buffered; the head bytes are consumed on success. Folded
/// continuation lines are joined with a single space before parsing.
pub fn parse_response(buf: &mut Buf, is_head: bool)
    -> Result<Option<Head>, Error>
{
    let (head, end) = {
        let end = match find_block_end(&buf[..]) {
            Some(end) => end,
            None => return Ok(None),
        };
        let block = &buf[..end];
        let head = if is_folded(block) {
            parse_block(&unfold(block), is_head)?
        } else {
            parse_block(block, is_head)?
        };
        (head, end)
    };
    buf.consume(end);
    Ok(Some(head))
}

/// Parse the status line a proxy sends in response to CONNECT
///
/// The whole (possibly header-carrying) response head is consumed, only
/// the status code matters.
pub fn parse_proxy_status(buf: &mut Buf) -> Result<Option<u16>, Error> {
    let (code, end) = {
        let end = match find_block_end(&buf[..]) {
            Some(end) => end,
            None => return Ok(None),
        };
        let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
        let mut vec;
        let mut raw = httparse::Response::new(&mut headers);
        let mut result = raw.parse(&buf[..end]);
        if matches!(result, Err(httparse::Error::TooManyHeaders)) {
            vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            raw = httparse::Response::new(&mut vec);
            result = raw.parse(&buf[..end]);
        }
        match result.map_err(|_| Error::ProxyHandshake)? {
            httparse::Status::Complete(_) => {
                (raw.code.ok_or(Error::ProxyHandshake)?, end)
            }
            httparse::Status::Partial => return Err(Error::ProxyHandshake),
        }
    };
    buf.consume(end);
    Ok(Some(code))
}
