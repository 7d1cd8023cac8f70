//! The request state machine
//!
//! One `HttpFuture` drives a single logical request from admission
//! through completion, including any redirect hops. Suspension points
//! are the usual ones: waiting for a host slot, name resolution, the
//! connect/proxy/TLS chain, socket readiness and the inactivity timer.
//! The future never errors: every failure is delivered as a response
//! with a synthetic 595..=599 status. Dropping the future before
//! completion cancels the request and releases whatever it held.
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use abstract_ns::Resolver;
use futures::{Async, Future, Poll};
use tokio_core::reactor::{Handle, Timeout};
use url::Url;

use body_parser::BodyProgress;
use chunked;
use connection::{Conn, Connector, ConnectFn, Key, PrepareFn, TlsProfile};
use cookies::CookieJar;
use encoder::MessageState;
use errors::{Error, Phase};
use parser::{self, BodyKind};
use pool::{self, Grant, Lease, Pool};
use response::{self, Response};
use urlparts::{Scheme, UrlParts};
use version::Version;


/// Methods that are safe to retry on a broken idle connection
pub fn is_idempotent(method: &str) -> bool {
    matches!(method,
        "GET" | "HEAD" | "OPTIONS" | "DELETE" | "PUT" | "TRACE")
}

/// Is this status a redirect, and does the method survive it?
///
/// Returns None for non-redirect statuses. 307 and 308 always keep the
/// method and body; the older codes turn anything but GET/HEAD into a
/// bodyless GET.
fn redirect_keeps_method(code: u16, method: &str) -> Option<bool> {
    match code {
        301 | 302 | 303 => Some(method == "GET" || method == "HEAD"),
        307 | 308 => Some(true),
        _ => None,
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Everything a dispatched request carries, see `RequestBuilder`
pub struct ReqData {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub suppress: Vec<String>,
    pub body: Vec<u8>,
    pub timeout: Duration,
    pub recurse: u32,
    pub proxy: Option<(String, u16)>,
    pub jar: Option<CookieJar>,
    pub tls: TlsProfile,
    pub session: String,
    pub persistent: Option<bool>,
    pub keepalive: Option<bool>,
    pub connect_fn: Option<Rc<ConnectFn>>,
    pub prepare: Option<Box<PrepareFn>>,
    pub on_header: Option<Box<FnMut(&Response) -> bool>>,
    pub on_body: Option<Box<FnMut(&[u8]) -> bool>>,
    pub want_body_handle: bool,
    pub max_body: usize,
    pub user_agent: String,
}

fn make_key(parts: &UrlParts, session: &str, proxy: &Option<(String, u16)>)
    -> Key
{
    Key {
        scheme: parts.scheme,
        host: parts.key_host(),
        port: parts.port,
        session: session.to_string(),
        proxy: proxy.clone(),
    }
}

enum State {
    Failed(Option<Error>),
    Lease(Lease),
    Connecting(Connector),
    Sending { conn: Conn },
    Receiving { conn: Conn },
    Body {
        conn: Conn,
        resp: Response,
        progress: BodyProgress,
        body: Vec<u8>,
        close: bool,
        /// This response is a redirect hop: its body is kept for the
        /// chain and never shown to `on_body`
        redirecting: bool,
    },
    Void,
}

struct Machine {
    pool: Pool,
    handle: Handle,
    resolver: Rc<Resolver>,
    data: ReqData,
    parts: Option<UrlParts>,
    key: Key,
    state: State,
    timeout: Option<Timeout>,
    referer: Option<String>,
    prior: Option<Response>,
    reused: bool,
    wrote: bool,
    got: bool,
    retried: bool,
}

/// A request in flight; also its cancellation handle
///
/// The future resolves with the final `Response` exactly once. Dropping
/// it beforehand cancels the request: no callback fires anymore, a
/// half-used connection is destroyed, an untouched reused one goes back
/// to the idle pool and a queued waiter simply leaves the line.
pub struct HttpFuture {
    machine: Option<Machine>,
}

pub fn new_request(handle: &Handle, pool: &Pool, resolver: &Rc<Resolver>,
    data: ReqData)
    -> HttpFuture
{
    let mut data = data;
    let parts = match UrlParts::split(&data.url) {
        Ok(parts) => parts,
        Err(e) => return failed_request(handle, pool, resolver, data, e),
    };
    if data.recurse == 0 {
        return failed_request(handle, pool, resolver, data,
            Error::TooManyRedirects);
    }
    let key = make_key(&parts, &data.session, &data.proxy);
    let timeout = Timeout::new(data.timeout, handle).ok();
    let lease = pool.lease(&key);
    data.method = data.method.to_uppercase();
    HttpFuture {
        machine: Some(Machine {
            pool: pool.clone(),
            handle: handle.clone(),
            resolver: resolver.clone(),
            data: data,
            parts: Some(parts),
            key: key,
            state: State::Lease(lease),
            timeout: timeout,
            referer: None,
            prior: None,
            reused: false,
            wrote: false,
            got: false,
            retried: false,
        }),
    }
}

/// A request that never passed validation
pub fn failed_request(handle: &Handle, pool: &Pool,
    resolver: &Rc<Resolver>, data: ReqData, err: Error)
    -> HttpFuture
{
    HttpFuture {
        machine: Some(Machine {
            pool: pool.clone(),
            handle: handle.clone(),
            resolver: resolver.clone(),
            key: Key {
                scheme: Scheme::Http,
                host: String::new(),
                port: 0,
                session: String::new(),
                proxy: None,
            },
            data: data,
            parts: None,
            state: State::Failed(Some(err)),
            timeout: None,
            referer: None,
            prior: None,
            reused: false,
            wrote: false,
            got: false,
            retried: false,
        }),
    }
}

enum RedirectCheck {
    No,
    Fail(Error),
    Follow { url: Url, keep_method: bool },
}

impl Machine {
    fn parts(&self) -> &UrlParts {
        self.parts.as_ref().expect("url was validated")
    }

    fn reset_timer(&mut self) {
        let deadline = Instant::now() + self.data.timeout;
        if let Some(ref mut timeout) = self.timeout {
            timeout.reset(deadline);
        }
    }

    fn persistent(&self) -> bool {
        self.data.persistent
            .unwrap_or_else(|| is_idempotent(&self.data.method))
    }

    fn keepalive_requested(&self) -> bool {
        self.persistent() || self.data.keepalive.unwrap_or(false)
    }

    fn retry_ok(&self) -> bool {
        self.reused && !self.got && !self.retried &&
            (is_idempotent(&self.data.method) ||
             self.data.persistent == Some(true))
    }

    fn caller_set(&self, name: &str) -> bool {
        self.data.headers.iter()
            .any(|&(ref n, _)| n.eq_ignore_ascii_case(name))
    }

    fn suppressed(&self, name: &str) -> bool {
        self.data.suppress.iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Should the engine emit this header itself?
    fn engine_owns(&self, name: &str) -> bool {
        !self.caller_set(name) && !self.suppressed(name)
    }

    /// Serialize the request into the connection's output buffer
    fn build_request(&self, conn: &mut Conn) {
        let mut msg = MessageState::RequestStart;
        let out = &mut conn.io.out_buf;
        let has_body = self.data.body.len() > 0 ||
            matches!(&self.data.method[..], "POST" | "PUT" | "PATCH");
        {
            let parts = self.parts();
            let absolute;
            let target = if self.data.proxy.is_some() &&
                parts.scheme == Scheme::Http
            {
                // a plain forward proxy needs the absolute form
                absolute = format!("http://{}{}",
                    parts.authority(), parts.path);
                &absolute[..]
            } else {
                &parts.path[..]
            };
            msg.request_line(out, &self.data.method, target,
                Version::Http11);
            if !self.caller_set("host") && !self.suppressed("host") {
                msg.add_header(out, "Host",
                    parts.authority().as_bytes()).unwrap();
            }
        }
        if self.engine_owns("connection") {
            let value: &[u8] = if self.keepalive_requested() {
                b"keep-alive"
            } else {
                b"close"
            };
            msg.add_header(out, "Connection", value).unwrap();
        }
        if self.engine_owns("cookie") {
            if let Some(ref jar) = self.data.jar {
                let parts = self.parts();
                if let Some(cookies) = jar.cookie_header(parts.scheme,
                    &parts.key_host(), &parts.path, unix_now())
                {
                    msg.add_header(out, "Cookie",
                        cookies.as_bytes()).unwrap();
                }
            }
        }
        if self.engine_owns("user-agent") {
            msg.add_header(out, "User-Agent",
                self.data.user_agent.as_bytes()).unwrap();
        }
        if self.engine_owns("referer") {
            if let Some(ref referer) = self.referer {
                msg.add_header(out, "Referer",
                    referer.as_bytes()).unwrap();
            }
        }
        if self.engine_owns("te") {
            msg.add_header(out, "TE", b"trailers").unwrap();
        }
        for &(ref name, ref value) in &self.data.headers {
            match msg.add_header(out, name, value.as_bytes()) {
                Ok(()) => {}
                Err(_) => {
                    // body framing stays under engine control
                    warn!("dropping unsafe header {:?}", name);
                }
            }
        }
        if has_body {
            msg.add_length(out, self.data.body.len() as u64).unwrap();
        }
        msg.done_headers(out);
        if has_body {
            msg.write_body(out, &self.data.body);
        }
        msg.done(out);
    }

    fn make_connector(&mut self) -> Result<Connector, Error> {
        let (connect_to, proxy_connect, tls) = {
            let parts = self.parts();
            let connect_to = match self.data.proxy {
                Some((ref host, port)) => format!("{}:{}", host, port),
                None => format!("{}:{}", parts.host, parts.port),
            };
            let proxy_connect = if self.data.proxy.is_some() &&
                parts.scheme == Scheme::Https
            {
                Some(format!("{}:{}", parts.host, parts.port))
            } else {
                None
            };
            let tls = if parts.scheme == Scheme::Https {
                Some((self.data.tls.connector()?, parts.host.clone()))
            } else {
                None
            };
            (connect_to, proxy_connect, tls)
        };
        Ok(Connector::new(&self.handle, &self.resolver, self.key.clone(),
            &connect_to, proxy_connect, tls,
            self.data.connect_fn.clone(), self.data.prepare.take()))
    }

    /// Add this hop's response to the front of the redirect chain
    fn push_prior(&mut self, resp: Response) {
        let mut resp = resp;
        if let Some(older) = self.prior.take() {
            response::chain_redirect(&mut resp, older);
        }
        self.prior = Some(resp);
    }

    /// Attach the redirect chain and hand the response out
    fn finish(&mut self, resp: Response) -> Response {
        let mut resp = resp;
        if let Some(prior) = self.prior.take() {
            response::chain_redirect(&mut resp, prior);
        }
        resp
    }

    fn simple_fail(&mut self, err: Error) -> Response {
        let resp = response::synthetic(&self.data.url, &err);
        self.finish(resp)
    }

    fn late_fail(&mut self, mut resp: Response, err: &Error) -> Response {
        response::fail_late(&mut resp, err);
        self.finish(resp)
    }

    fn check_redirect(&self, resp: &Response) -> RedirectCheck {
        let keep_method = match redirect_keeps_method(resp.status(),
            &self.data.method)
        {
            Some(keep) => keep,
            None => return RedirectCheck::No,
        };
        let location = match resp.headers().get("location") {
            Some(location) => location,
            None => return RedirectCheck::No,
        };
        if self.data.recurse <= 1 {
            return RedirectCheck::Fail(Error::TooManyRedirects);
        }
        let url = match self.data.url.join(location) {
            Ok(url) => url,
            Err(_) => {
                return RedirectCheck::Fail(
                    Error::BadRedirect(location.to_string()));
            }
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return RedirectCheck::Fail(
                Error::BadRedirect(location.to_string()));
        }
        RedirectCheck::Follow { url: url, keep_method: keep_method }
    }

    /// Mutate the request for the next hop
    fn apply_redirect(&mut self, url: Url, keep_method: bool)
        -> Result<(), Error>
    {
        self.data.recurse -= 1;
        if !keep_method {
            self.data.method = "GET".to_string();
            self.data.body = Vec::new();
            // payload headers don't survive the method change
            self.data.headers.retain(|&(ref name, _)| {
                !name.eq_ignore_ascii_case("Content-Type")
            });
        }
        self.referer = Some(self.data.url.as_str().to_string());
        let parts = UrlParts::split(&url)?;
        self.key = make_key(&parts, &self.data.session, &self.data.proxy);
        self.data.url = url;
        self.parts = Some(parts);
        self.reused = false;
        self.wrote = false;
        self.got = false;
        self.retried = false;
        Ok(())
    }

    fn phase(&self) -> Phase {
        match self.state {
            State::Failed(..) | State::Lease(..) |
            State::Connecting(..) => Phase::Connect,
            State::Sending { .. } | State::Receiving { .. } => Phase::Send,
            State::Body { .. } => Phase::Body,
            State::Void => Phase::Body,
        }
    }

    fn on_timeout(&mut self) -> Response {
        let phase = self.phase();
        match mem::replace(&mut self.state, State::Void) {
            State::Failed(mut err) => {
                let err = err.take().expect("failure not yet delivered");
                self.simple_fail(err)
            }
            State::Lease(lease) => {
                // dropping the lease gives the grant back
                drop(lease);
                self.simple_fail(Error::Timeout(phase))
            }
            State::Connecting(connector) => {
                drop(connector);
                self.pool.connect_failed(&self.key.host);
                self.simple_fail(Error::Timeout(phase))
            }
            State::Sending { conn } | State::Receiving { conn } => {
                self.pool.destroy(conn);
                self.simple_fail(Error::Timeout(phase))
            }
            State::Body { conn, resp, .. } => {
                self.pool.destroy(conn);
                self.late_fail(resp, &Error::Timeout(phase))
            }
            State::Void => unreachable!(),
        }
    }

    fn step(&mut self) -> Async<Response> {
        let fired = match self.timeout {
            Some(ref mut timeout) => {
                match timeout.poll() {
                    Ok(Async::NotReady) => false,
                    Ok(Async::Ready(())) | Err(_) => true,
                }
            }
            None => false,
        };
        if fired && !matches!(self.state, State::Failed(..)) {
            debug!("request to {} timed out", self.key.host);
            return Async::Ready(self.on_timeout());
        }
        'outer: loop {
            match mem::replace(&mut self.state, State::Void) {
                State::Failed(mut err) => {
                    let err = err.take().expect("failure not yet delivered");
                    return Async::Ready(self.simple_fail(err));
                }
                State::Lease(mut lease) => match lease.poll() {
                    Ok(Async::Ready(Grant::Reused(mut conn))) => {
                        self.reused = true;
                        self.reset_timer();
                        self.build_request(&mut conn);
                        self.state = State::Sending { conn: conn };
                    }
                    Ok(Async::Ready(Grant::Fresh)) => {
                        self.reused = false;
                        self.reset_timer();
                        match self.make_connector() {
                            Ok(connector) => {
                                self.state = State::Connecting(connector);
                            }
                            Err(e) => {
                                self.pool.connect_failed(&self.key.host);
                                return Async::Ready(self.simple_fail(e));
                            }
                        }
                    }
                    Ok(Async::NotReady) => {
                        self.state = State::Lease(lease);
                        return Async::NotReady;
                    }
                    Err(e) => {
                        return Async::Ready(self.simple_fail(e));
                    }
                },
                State::Connecting(mut connector) => match connector.poll() {
                    Ok(Async::Ready(mut conn)) => {
                        self.reset_timer();
                        self.build_request(&mut conn);
                        self.state = State::Sending { conn: conn };
                    }
                    Ok(Async::NotReady) => {
                        self.state = State::Connecting(connector);
                        return Async::NotReady;
                    }
                    Err(e) => {
                        self.pool.connect_failed(&self.key.host);
                        return Async::Ready(self.simple_fail(e));
                    }
                },
                State::Sending { mut conn } => {
                    let before = conn.io.out_buf.len();
                    match conn.io.flush() {
                        Ok(()) => {}
                        Err(e) => {
                            self.pool.destroy(conn);
                            if self.retry_ok() {
                                debug!("retrying {} on a fresh connection",
                                    self.data.method);
                                self.retried = true;
                                self.state = State::Lease(
                                    self.pool.lease_fresh(&self.key));
                                continue 'outer;
                            }
                            return Async::Ready(
                                self.simple_fail(Error::Send(e)));
                        }
                    }
                    if conn.io.out_buf.len() < before {
                        self.wrote = true;
                        self.reset_timer();
                    }
                    if conn.io.out_buf.len() == 0 {
                        self.state = State::Receiving { conn: conn };
                    } else {
                        self.state = State::Sending { conn: conn };
                        return Async::NotReady;
                    }
                }
                State::Receiving { mut conn } => {
                    let is_head = self.data.method == "HEAD";
                    let head = loop {
                        match parser::parse_response(
                            &mut conn.io.in_buf, is_head)
                        {
                            Ok(Some(head)) => break head,
                            Ok(None) => {}
                            Err(e) => {
                                self.pool.destroy(conn);
                                return Async::Ready(self.simple_fail(e));
                            }
                        }
                        match conn.io.read() {
                            Ok(0) => {
                                if conn.io.done() {
                                    self.pool.destroy(conn);
                                    if self.retry_ok() {
                                        debug!("idle connection was dead, \
                                            retrying");
                                        self.retried = true;
                                        self.state = State::Lease(
                                            self.pool.lease_fresh(&self.key));
                                        continue 'outer;
                                    }
                                    return Async::Ready(self.simple_fail(
                                        Error::ResetOnResponseHeaders));
                                }
                                self.state = State::Receiving { conn: conn };
                                return Async::NotReady;
                            }
                            Ok(_) => {
                                self.got = true;
                                self.reset_timer();
                            }
                            Err(e) => {
                                self.pool.destroy(conn);
                                if self.retry_ok() {
                                    self.retried = true;
                                    self.state = State::Lease(
                                        self.pool.lease_fresh(&self.key));
                                    continue 'outer;
                                }
                                return Async::Ready(
                                    self.simple_fail(Error::Send(e)));
                            }
                        }
                    };
                    if let Some(ref jar) = self.data.jar {
                        if let Some(value) = head.headers.get("set-cookie") {
                            let parts = self.parts();
                            jar.set_cookie(&parts.key_host(), &parts.path,
                                value, unix_now());
                        }
                    }
                    let close = head.close;
                    let body_kind = head.body;
                    let mut resp = response::new(&self.data.url,
                        head.version, head.code, &head.reason,
                        head.headers);
                    if let Some(ref mut on_header) = self.data.on_header {
                        if !on_header(&resp) {
                            self.pool.destroy(conn);
                            response::fail_late(&mut resp, &Error::Abort);
                            return Async::Ready(self.finish(resp));
                        }
                    }
                    let redirecting = matches!(self.check_redirect(&resp),
                        RedirectCheck::Follow { .. } | RedirectCheck::Fail(..));
                    if self.data.want_body_handle && !redirecting {
                        let handle = pool::new_body_handle(conn, &self.pool);
                        response::attach_handle(&mut resp, handle);
                        return Async::Ready(self.finish(resp));
                    }
                    let progress = match body_kind {
                        BodyKind::Fixed(n) => {
                            if (self.data.on_body.is_none() || redirecting)
                                && n > self.data.max_body as u64
                            {
                                self.pool.destroy(conn);
                                response::fail_late(&mut resp,
                                    &Error::ResponseBodyTooLong);
                                return Async::Ready(self.finish(resp));
                            }
                            BodyProgress::Fixed(n as usize)
                        }
                        BodyKind::Chunked => {
                            BodyProgress::Chunked(chunked::State::new())
                        }
                        BodyKind::Eof => BodyProgress::Eof,
                    };
                    self.state = State::Body {
                        conn: conn,
                        resp: resp,
                        progress: progress,
                        body: Vec::new(),
                        close: close,
                        redirecting: redirecting,
                    };
                }
                State::Body { mut conn, mut resp, mut progress,
                              mut body, close, redirecting } =>
                {
                    loop {
                        if let Err(e) = progress.parse(&mut conn.io.in_buf) {
                            self.pool.destroy(conn);
                            return Async::Ready(self.late_fail(resp, &e));
                        }
                        let (bytes, done) = progress.check_buf(
                            &conn.io.in_buf, conn.io.done());
                        if bytes > 0 {
                            let aborted = match self.data.on_body {
                                Some(ref mut on_body) if !redirecting => {
                                    !on_body(&conn.io.in_buf[..bytes])
                                }
                                _ => {
                                    body.extend_from_slice(
                                        &conn.io.in_buf[..bytes]);
                                    false
                                }
                            };
                            progress.consume(&mut conn.io.in_buf, bytes);
                            if aborted {
                                self.pool.destroy(conn);
                                return Async::Ready(
                                    self.late_fail(resp, &Error::Abort));
                            }
                            if (self.data.on_body.is_none() || redirecting)
                                && body.len() > self.data.max_body
                            {
                                self.pool.destroy(conn);
                                return Async::Ready(self.late_fail(resp,
                                    &Error::ResponseBodyTooLong));
                            }
                        }
                        if done {
                            for (name, value) in progress.take_trailers() {
                                response::add_header(&mut resp,
                                    &name, &value);
                            }
                            response::finish_body(&mut resp, body);
                            let reusable = !close && self.persistent();
                            match self.check_redirect(&resp) {
                                RedirectCheck::No => {
                                    if reusable {
                                        self.pool.release(conn);
                                    } else {
                                        self.pool.destroy(conn);
                                    }
                                    return Async::Ready(self.finish(resp));
                                }
                                RedirectCheck::Fail(err) => {
                                    if reusable {
                                        self.pool.release(conn);
                                    } else {
                                        self.pool.destroy(conn);
                                    }
                                    self.push_prior(resp);
                                    return Async::Ready(
                                        self.simple_fail(err));
                                }
                                RedirectCheck::Follow { url, keep_method } =>
                                {
                                    debug!("following redirect to {}", url);
                                    if reusable {
                                        self.pool.release(conn);
                                    } else {
                                        self.pool.destroy(conn);
                                    }
                                    self.push_prior(resp);
                                    match self.apply_redirect(
                                        url, keep_method)
                                    {
                                        Ok(()) => {}
                                        Err(e) => {
                                            return Async::Ready(
                                                self.simple_fail(e));
                                        }
                                    }
                                    self.reset_timer();
                                    self.state = State::Lease(
                                        self.pool.lease(&self.key));
                                    continue 'outer;
                                }
                            }
                        }
                        match conn.io.read() {
                            Ok(0) => {
                                if conn.io.done() {
                                    if matches!(progress,
                                                BodyProgress::Eof)
                                    {
                                        // eof is how this body ends,
                                        // the next check_buf sees it
                                        continue;
                                    }
                                    self.pool.destroy(conn);
                                    return Async::Ready(self.late_fail(
                                        resp, &Error::ResetOnResponseBody));
                                }
                                self.state = State::Body {
                                    conn: conn,
                                    resp: resp,
                                    progress: progress,
                                    body: body,
                                    close: close,
                                    redirecting: redirecting,
                                };
                                return Async::NotReady;
                            }
                            Ok(_) => {
                                self.reset_timer();
                            }
                            Err(e) => {
                                self.pool.destroy(conn);
                                return Async::Ready(self.late_fail(
                                    resp, &Error::Body(e)));
                            }
                        }
                    }
                }
                State::Void => unreachable!("request polled after \
                    completion"),
            }
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        match mem::replace(&mut self.state, State::Void) {
            State::Failed(..) | State::Void => {}
            // the lease hands its grant back by itself
            State::Lease(_) => {}
            State::Connecting(connector) => {
                drop(connector);
                self.pool.connect_failed(&self.key.host);
            }
            State::Sending { mut conn } => {
                if self.reused && !self.wrote {
                    // nothing hit the wire, the connection is untouched
                    // once the unsent request is scrubbed
                    let pending = conn.io.out_buf.len();
                    conn.io.out_buf.consume(pending);
                    self.pool.release(conn);
                } else {
                    self.pool.destroy(conn);
                }
            }
            State::Receiving { conn } | State::Body { conn, .. } => {
                self.pool.destroy(conn);
            }
        }
    }
}

impl Future for HttpFuture {
    type Item = Response;
    type Error = Error;
    fn poll(&mut self) -> Poll<Response, Error> {
        let result = self.machine.as_mut()
            .expect("request future polled after completion")
            .step();
        match result {
            Async::Ready(resp) => {
                self.machine.take();
                Ok(Async::Ready(resp))
            }
            Async::NotReady => Ok(Async::NotReady),
        }
    }
}
