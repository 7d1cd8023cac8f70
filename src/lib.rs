//! HTTP/1.x client engine based on `tokio` tools
//!
//! The crate drives individual HTTP requests over plain or TLS
//! transports, optionally through a forward or CONNECT proxy, with a
//! per-host connection cap (FIFO admission), idle connection reuse,
//! cookies, redirects, and streaming body delivery. All of it runs
//! cooperatively on one `tokio-core` reactor; the returned future is
//! the cancellation handle of its request.
#![warn(missing_docs)]

extern crate abstract_ns;
extern crate futures;
extern crate futures_cpupool;
extern crate httparse;
extern crate native_tls;
extern crate netbuf;
extern crate ns_std_threaded;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_tls;
extern crate url;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;


pub mod httpdate;
mod body_parser;
mod chunked;
mod client;
mod connection;
mod cookies;
mod encoder;
mod errors;
mod headers;
mod parser;
mod pool;
mod request;
mod response;
mod urlparts;
mod version;

pub use client::{Config, HttpClient, RequestBuilder};
pub use client::{active, get, head, post, request};
pub use client::{DEFAULT_USER_AGENT, MAX_BODY, MAX_PER_HOST};
pub use client::{MAX_RECURSE, PERSISTENT_TIMEOUT, TIMEOUT};
pub use connection::{ConnectFn, IoBox, PrepareFn, TlsProfile, Transport};
pub use cookies::CookieJar;
pub use errors::{Error, Phase};
pub use pool::BodyHandle;
pub use request::HttpFuture;
pub use response::{Headers, Response};
pub use urlparts::{Scheme, UrlParts};
pub use version::Version;
