//! Response data as it is handed to the caller
use std::fmt;
use std::slice;

use url::Url;

use errors::Error;
use pool::BodyHandle;
use version::Version;


/// Response headers with lowercased names
///
/// A header that occurs several times is stored once, with the values
/// joined by a comma in the order they were received.
#[derive(Debug, Clone)]
pub struct Headers {
    items: Vec<(String, String)>,
}

impl Headers {
    /// An empty header map
    pub fn new() -> Headers {
        Headers { items: Vec::new() }
    }

    /// Add a header value, joining it to an earlier one of the same name
    pub fn add(&mut self, name: &str, value: &str) {
        let name = name.to_lowercase();
        match self.items.iter_mut().find(|&&mut (ref n, _)| *n == name) {
            Some(&mut (_, ref mut old)) => {
                old.push(',');
                old.push_str(value);
                return;
            }
            None => {}
        }
        self.items.push((name, value.to_string()));
    }

    /// Get a header value, the name is matched case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.items.iter()
            .find(|&&(ref n, _)| *n == name)
            .map(|&(_, ref v)| &v[..])
    }

    /// Iterate over `(name, value)` pairs in received order
    pub fn iter(&self) -> slice::Iter<(String, String)> {
        self.items.iter()
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when no headers were received
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A response as delivered to the completion of a request
///
/// Engine failures are ordinary responses too: they carry a synthetic
/// status in the 595..=599 range, an explanatory reason and no body.
/// This mirrors how the rest of the crate treats errors, there is no
/// second channel to watch.
pub struct Response {
    status: u16,
    reason: String,
    version: Version,
    url: Url,
    headers: Headers,
    body: Option<Vec<u8>>,
    redirect: Option<Box<Response>>,
    orig_status: Option<(u16, String)>,
    handle: Option<BodyHandle>,
}

impl Response {
    /// Status code, either from the server or synthetic 595..=599
    pub fn status(&self) -> u16 {
        self.status
    }
    /// Reason string paired with the status
    pub fn reason(&self) -> &str {
        &self.reason
    }
    /// HTTP version of the response, 1.1 for synthetic responses
    pub fn version(&self) -> Version {
        self.version
    }
    /// The final url, after any redirects
    pub fn url(&self) -> &Url {
        &self.url
    }
    /// Response headers (without the synthetic fields)
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
    /// Response body
    ///
    /// `None` when the request failed before a body could be read. An
    /// aborted or `on_body`-streamed response has an empty body instead.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(|b| &b[..])
    }
    /// Consume the response, returning the body
    pub fn into_body(self) -> Option<Vec<u8>> {
        self.body
    }
    /// The response this response was redirected from, if any
    ///
    /// The prior response carries its own (possibly empty) body, and may
    /// chain further back through its own `redirect()`.
    pub fn redirect(&self) -> Option<&Response> {
        self.redirect.as_ref().map(|b| &**b)
    }
    /// Original status when a failure happened after headers were
    /// already delivered
    pub fn orig_status(&self) -> Option<(u16, &str)> {
        self.orig_status.as_ref().map(|&(code, ref reason)| {
            (code, &reason[..])
        })
    }
    /// Take the live body stream of a `want_body_handle` request
    ///
    /// Present only when the request asked for the hand-off and headers
    /// arrived cleanly. Once taken, reading the body and releasing the
    /// connection slot are the caller's business.
    pub fn take_handle(&mut self) -> Option<BodyHandle> {
        self.handle.take()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers.len())
            .field("body", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

pub fn new(url: &Url, version: Version, status: u16, reason: &str,
    headers: Headers)
    -> Response
{
    Response {
        status: status,
        reason: reason.to_string(),
        version: version,
        url: url.clone(),
        headers: headers,
        body: None,
        redirect: None,
        orig_status: None,
        handle: None,
    }
}

/// A response that never got past the engine
pub fn synthetic(url: &Url, err: &Error) -> Response {
    Response {
        status: err.code(),
        reason: err.reason(),
        version: Version::Http11,
        url: url.clone(),
        headers: Headers::new(),
        body: None,
        redirect: None,
        orig_status: None,
        handle: None,
    }
}

/// Convert a delivered response into a late failure
///
/// The server status moves into `orig_status` and the synthetic code
/// takes its place. A user abort keeps an empty body (the headers were
/// real), any other late failure has none.
pub fn fail_late(resp: &mut Response, err: &Error) {
    resp.orig_status = Some((resp.status, resp.reason.clone()));
    resp.status = err.code();
    resp.reason = err.reason();
    resp.body = if resp.status == 598 { Some(Vec::new()) } else { None };
}

pub fn finish_body(resp: &mut Response, body: Vec<u8>) {
    resp.body = Some(body);
}

/// Merge a late header (a chunked trailer) into the response
pub fn add_header(resp: &mut Response, name: &str, value: &str) {
    resp.headers.add(name, value);
}

pub fn chain_redirect(resp: &mut Response, prior: Response) {
    resp.redirect = Some(Box::new(prior));
}

pub fn attach_handle(resp: &mut Response, handle: BodyHandle) {
    resp.handle = Some(handle);
}
