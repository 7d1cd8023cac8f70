//! The user facing surface: a client object, per-request options and
//! the convenience free functions
//!
//! An `HttpClient` owns the idle pool, the per-host counters, the name
//! resolver and the configured defaults. It is cheap to clone and all
//! clones share the same pool. The free functions (`get`, `head`,
//! `post`, `request`) bind to one default client per thread, created
//! on first use.
use std::cell::RefCell;
use std::env;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use abstract_ns::Resolver;
use futures::Future;
use futures_cpupool::CpuPool;
use ns_std_threaded::ThreadedResolver;
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use url::Url;

use connection::{ConnectFn, IoBox, TlsProfile};
use cookies::CookieJar;
use errors::Error;
use pool::Pool;
use request::{self, HttpFuture, ReqData};
use response::Response;


/// Default redirect budget of a request
pub const MAX_RECURSE: u32 = 10;
/// Default inactivity timeout, in seconds
pub const TIMEOUT: u64 = 300;
/// Default cap on concurrent connections per host
pub const MAX_PER_HOST: usize = 4;
/// Default lifetime of an idle persistent connection, in seconds
pub const PERSISTENT_TIMEOUT: u64 = 3;
/// Default response body limit, in bytes
pub const MAX_BODY: usize = 10_485_760;
/// The `User-Agent` sent when the caller doesn't override it
pub const DEFAULT_USER_AGENT: &'static str =
    concat!("tk-fetch/", env!("CARGO_PKG_VERSION"));


/// Fine-grained configuration of a client
#[derive(Debug, Clone)]
pub struct Config {
    max_per_host: usize,
    persistent_timeout: Duration,
    timeout: Duration,
    max_recurse: u32,
    max_body: usize,
    user_agent: String,
    proxy: Option<(String, u16)>,
    proxy_from_env: bool,
}

impl Config {
    /// Create a config with defaults
    ///
    /// Unless a proxy is set explicitly (or disabled with `no_proxy`)
    /// the default one is read from the `http_proxy` environment
    /// variable when the client is created.
    pub fn new() -> Config {
        Config {
            max_per_host: MAX_PER_HOST,
            persistent_timeout: Duration::from_secs(PERSISTENT_TIMEOUT),
            timeout: Duration::from_secs(TIMEOUT),
            max_recurse: MAX_RECURSE,
            max_body: MAX_BODY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            proxy_from_env: true,
        }
    }
    /// Cap on concurrent connections to a single host
    pub fn max_per_host(&mut self, value: usize) -> &mut Self {
        self.max_per_host = value;
        self
    }
    /// How long an idle connection is kept around
    pub fn persistent_timeout(&mut self, value: Duration) -> &mut Self {
        self.persistent_timeout = value;
        self
    }
    /// Inactivity timeout of a request
    pub fn timeout(&mut self, value: Duration) -> &mut Self {
        self.timeout = value;
        self
    }
    /// Redirect budget of a request
    pub fn max_recurse(&mut self, value: u32) -> &mut Self {
        self.max_recurse = value;
        self
    }
    /// Response body limit for buffered responses
    pub fn max_body(&mut self, value: usize) -> &mut Self {
        self.max_body = value;
        self
    }
    /// The default `User-Agent` header
    pub fn user_agent<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.user_agent = value.into();
        self
    }
    /// Use this proxy for every request that doesn't override it
    pub fn proxy<S: Into<String>>(&mut self, host: S, port: u16)
        -> &mut Self
    {
        self.proxy = Some((host.into(), port));
        self.proxy_from_env = false;
        self
    }
    /// Never use a proxy by default, regardless of the environment
    pub fn no_proxy(&mut self) -> &mut Self {
        self.proxy = None;
        self.proxy_from_env = false;
        self
    }
}

fn proxy_from_env() -> Option<(String, u16)> {
    let value = match env::var("http_proxy") {
        Ok(ref value) if value.len() > 0 => value.clone(),
        _ => return None,
    };
    let url = match Url::parse(&value) {
        Ok(url) => url,
        Err(e) => {
            warn!("unusable http_proxy value {:?}: {}", value, e);
            return None;
        }
    };
    let host = match url.host_str() {
        Some(host) => host.to_string(),
        None => return None,
    };
    Some((host, url.port().unwrap_or(80)))
}

struct ClientInner {
    handle: Handle,
    pool: Pool,
    resolver: Rc<Resolver>,
    config: Config,
}

/// An HTTP client: idle pool, host counters and defaults
///
/// Clones share everything. One client per reactor is the intended
/// shape, more of them simply means separate pools.
#[derive(Clone)]
pub struct HttpClient(Rc<ClientInner>);

impl HttpClient {
    /// A client with default configuration
    pub fn new(handle: &Handle) -> HttpClient {
        HttpClient::with_config(handle, &Config::new())
    }

    /// A client with the given configuration and the default
    /// (thread-pool backed) name resolver
    pub fn with_config(handle: &Handle, config: &Config) -> HttpClient {
        let resolver = Rc::new(ThreadedResolver::new(CpuPool::new(1)));
        HttpClient::create(handle, config, resolver)
    }

    /// A client using a custom name resolver
    pub fn with_resolver<R: Resolver + 'static>(handle: &Handle,
        config: &Config, resolver: R)
        -> HttpClient
    {
        HttpClient::create(handle, config, Rc::new(resolver))
    }

    fn create(handle: &Handle, config: &Config, resolver: Rc<Resolver>)
        -> HttpClient
    {
        let mut config = config.clone();
        if config.proxy_from_env {
            config.proxy = proxy_from_env();
        }
        HttpClient(Rc::new(ClientInner {
            handle: handle.clone(),
            pool: Pool::new(handle, config.max_per_host,
                config.persistent_timeout),
            resolver: resolver,
            config: config,
        }))
    }

    /// Start building a request
    pub fn request(&self, method: &str, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url)
    }

    /// Fetch a url with default options
    pub fn get(&self, url: &str) -> HttpFuture {
        self.request("GET", url).send()
    }

    /// Like `get` but only the headers are fetched
    pub fn head(&self, url: &str) -> HttpFuture {
        self.request("HEAD", url).send()
    }

    /// Post a body to a url with default options
    pub fn post<B: Into<Vec<u8>>>(&self, url: &str, body: B) -> HttpFuture {
        self.request("POST", url).body(body).send()
    }

    /// Number of connections currently attached to requests
    pub fn active(&self) -> usize {
        self.0.pool.active()
    }

    /// Live connections of one host, idle ones included
    pub fn active_per_host(&self, host: &str) -> usize {
        self.0.pool.active_per_host(host)
    }
}

/// Per-request options, with the defaults taken from the client
///
/// This is the full options surface; everything a request can carry is
/// an explicit method here, there is no open-ended options bag.
pub struct RequestBuilder {
    client: HttpClient,
    method: String,
    url: Result<Url, Error>,
    headers: Vec<(String, String)>,
    suppress: Vec<String>,
    body: Vec<u8>,
    timeout: Duration,
    recurse: u32,
    proxy: Option<Option<(String, u16)>>,
    jar: Option<CookieJar>,
    tls: TlsProfile,
    session: String,
    persistent: Option<bool>,
    keepalive: Option<bool>,
    connect_fn: Option<Rc<ConnectFn>>,
    prepare: Option<Box<FnMut(&TcpStream) -> io::Result<()>>>,
    on_header: Option<Box<FnMut(&Response) -> bool>>,
    on_body: Option<Box<FnMut(&[u8]) -> bool>>,
    want_body_handle: bool,
    max_body: usize,
}

impl RequestBuilder {
    fn new(client: HttpClient, method: &str, url: &str) -> RequestBuilder {
        let parsed = Url::parse(url).map_err(Error::BadUrl);
        let config = &client.0.config;
        RequestBuilder {
            method: method.to_string(),
            url: parsed,
            headers: Vec::new(),
            suppress: Vec::new(),
            body: Vec::new(),
            timeout: config.timeout,
            recurse: config.max_recurse,
            proxy: None,
            jar: None,
            tls: TlsProfile::Low,
            session: String::new(),
            persistent: None,
            keepalive: None,
            connect_fn: None,
            prepare: None,
            on_header: None,
            on_body: None,
            want_body_handle: false,
            max_body: config.max_body,
            client: client,
        }
    }

    /// Add a header; repeating a name sends the header twice
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
        where K: Into<String>, V: Into<String>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Don't send this header even if the engine has a default for it
    pub fn suppress<K: Into<String>>(mut self, name: K) -> Self {
        self.suppress.push(name.into());
        self
    }

    /// The request body; `Content-Length` is handled by the engine
    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Inactivity timeout for this request
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Redirect budget for this request
    pub fn recurse(mut self, value: u32) -> Self {
        self.recurse = value;
        self
    }

    /// Use this proxy instead of the client default
    pub fn proxy<S: Into<String>>(mut self, host: S, port: u16) -> Self {
        self.proxy = Some(Some((host.into(), port)));
        self
    }

    /// Connect directly even when the client has a default proxy
    pub fn no_proxy(mut self) -> Self {
        self.proxy = Some(None);
        self
    }

    /// Store and send cookies through this jar
    pub fn cookie_jar(mut self, jar: &CookieJar) -> Self {
        self.jar = Some(jar.clone());
        self
    }

    /// TLS verification profile for https requests
    pub fn tls(mut self, profile: TlsProfile) -> Self {
        self.tls = profile;
        self
    }

    /// Opaque tag partitioning the idle pool
    pub fn session<S: Into<String>>(mut self, value: S) -> Self {
        self.session = value.into();
        self
    }

    /// Whether the connection may be reused across requests
    ///
    /// Unset, this defaults to the idempotence of the method. Setting
    /// it explicitly also makes the request eligible for the one-shot
    /// retry on a dead idle connection.
    pub fn persistent(mut self, value: bool) -> Self {
        self.persistent = Some(value);
        self
    }

    /// Ask for `Connection: keep-alive` even on one-shot requests
    pub fn keepalive(mut self, value: bool) -> Self {
        self.keepalive = Some(value);
        self
    }

    /// Replace the TCP connect step
    pub fn connect_with<F>(mut self, f: F) -> Self
        where F: Fn(&SocketAddr, &Handle)
            -> Box<Future<Item=IoBox, Error=io::Error>> + 'static,
    {
        self.connect_fn = Some(Rc::new(f));
        self
    }

    /// Called with the socket right after the default connect
    pub fn prepare_socket<F>(mut self, f: F) -> Self
        where F: FnMut(&TcpStream) -> io::Result<()> + 'static,
    {
        self.prepare = Some(Box::new(f));
        self
    }

    /// Called once per response (including redirect hops) when its
    /// headers are in; returning false aborts with status 598
    pub fn on_header<F>(mut self, f: F) -> Self
        where F: FnMut(&Response) -> bool + 'static,
    {
        self.on_header = Some(Box::new(f));
        self
    }

    /// Called with every decoded body fragment; returning false aborts
    /// with status 598
    ///
    /// When set, the completion response carries an empty body.
    pub fn on_body<F>(mut self, f: F) -> Self
        where F: FnMut(&[u8]) -> bool + 'static,
    {
        self.on_body = Some(Box::new(f));
        self
    }

    /// Hand the live body stream over instead of reading the body
    pub fn want_body_handle(mut self) -> Self {
        self.want_body_handle = true;
        self
    }

    /// Body size limit for this request
    pub fn max_body(mut self, value: usize) -> Self {
        self.max_body = value;
        self
    }

    /// Dispatch the request
    ///
    /// The returned future is also the cancellation handle: drop it
    /// and the request is gone without the completion ever firing.
    pub fn send(self) -> HttpFuture {
        let client = self.client;
        let (url, url_error) = match self.url {
            Ok(url) => (url, None),
            Err(e) => {
                // a placeholder so the synthetic response has some url
                (Url::parse("http://invalid./").unwrap(), Some(e))
            }
        };
        let data = ReqData {
            method: self.method,
            url: url,
            headers: self.headers,
            suppress: self.suppress,
            body: self.body,
            timeout: self.timeout,
            recurse: self.recurse,
            proxy: match self.proxy {
                Some(over) => over,
                None => client.0.config.proxy.clone(),
            },
            jar: self.jar,
            tls: self.tls,
            session: self.session,
            persistent: self.persistent,
            keepalive: self.keepalive,
            connect_fn: self.connect_fn,
            prepare: self.prepare,
            on_header: self.on_header,
            on_body: self.on_body,
            want_body_handle: self.want_body_handle,
            max_body: self.max_body,
            user_agent: client.0.config.user_agent.clone(),
        };
        match url_error {
            Some(e) => request::failed_request(&client.0.handle,
                &client.0.pool, &client.0.resolver, data, e),
            None => request::new_request(&client.0.handle,
                &client.0.pool, &client.0.resolver, data),
        }
    }
}

thread_local! {
    static DEFAULT_CLIENT: RefCell<Option<HttpClient>> =
        RefCell::new(None);
}

fn default_client(handle: &Handle) -> HttpClient {
    DEFAULT_CLIENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(HttpClient::new(handle));
        }
        slot.as_ref().unwrap().clone()
    })
}

/// Build a request on the per-thread default client
pub fn request(method: &str, url: &str, handle: &Handle)
    -> RequestBuilder
{
    default_client(handle).request(method, url)
}

/// Fetch a url on the per-thread default client
pub fn get(url: &str, handle: &Handle) -> HttpFuture {
    default_client(handle).get(url)
}

/// Fetch headers of a url on the per-thread default client
pub fn head(url: &str, handle: &Handle) -> HttpFuture {
    default_client(handle).head(url)
}

/// Post a body on the per-thread default client
pub fn post<B: Into<Vec<u8>>>(url: &str, body: B, handle: &Handle)
    -> HttpFuture
{
    default_client(handle).post(url, body)
}

/// Attached connections of the per-thread default client
///
/// Zero when no default client exists yet on this thread.
pub fn active() -> usize {
    DEFAULT_CLIENT.with(|cell| {
        cell.borrow().as_ref().map_or(0, |client| client.active())
    })
}
