//! A single client connection and the machinery to establish one
//!
//! Establishing a connection is a small state machine of its own: name
//! resolution, TCP connect (possibly through a caller supplied
//! function), the `CONNECT` exchange when tunneling https through a
//! proxy, and the TLS handshake. The request state machine treats the
//! whole chain as one future.
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::rc::Rc;

use abstract_ns::{Address, Resolver, Error as NsError};
use futures::{Async, Future, Poll};
use native_tls;
use netbuf::Buf;
use tk_bufstream::IoBuf;
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};
use tokio_tls::{Connect as TlsConnect, TlsConnector};

use errors::Error;
use parser;
use urlparts::Scheme;


/// Object-safe bound for the byte streams a connection can run over
pub trait Transport: AsyncRead + AsyncWrite + 'static {}
impl<T: AsyncRead + AsyncWrite + 'static> Transport for T {}

/// A boxed transport
///
/// Boxing erases the difference between a plain socket, a TLS stream
/// and whatever a connect override produces, so connections of all
/// flavors can share one idle pool.
pub struct IoBox(Box<Transport>);

impl IoBox {
    /// Box up any transport
    pub fn new<T: Transport>(stream: T) -> IoBox {
        IoBox(Box::new(stream))
    }
}

impl Read for IoBox {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for IoBox {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl AsyncRead for IoBox {}

impl AsyncWrite for IoBox {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.0.shutdown()
    }
}

impl fmt::Debug for IoBox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("IoBox")
    }
}

/// Connection identity, the idle pool key
///
/// Two connections are interchangeable iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub session: String,
    pub proxy: Option<(String, u16)>,
}

/// An established connection with its buffers
pub struct Conn {
    pub io: IoBuf<IoBox>,
    key: Key,
}

impl Conn {
    pub fn new(io: IoBuf<IoBox>, key: Key) -> Conn {
        Conn { io: io, key: key }
    }
    pub fn key(&self) -> &Key {
        &self.key
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Conn({:?}, {}:{})",
            self.key.scheme, self.key.host, self.key.port)
    }
}

/// Per-request replacement for the default TCP connect
pub type ConnectFn = Fn(&SocketAddr, &Handle)
    -> Box<Future<Item=IoBox, Error=io::Error>>;

/// Called on the freshly connected socket (default connect path only)
pub type PrepareFn = FnMut(&TcpStream) -> io::Result<()>;

/// How to treat the server certificate on https connections
///
/// The default is `Low`: no peer verification at all, which is what
/// ad-hoc tooling usually wants. `High` verifies the CA chain and the
/// hostname through the platform TLS stack. A caller-built connector
/// is used verbatim.
pub enum TlsProfile {
    /// Accept any certificate for any host
    Low,
    /// Verify the certificate chain and the hostname
    High,
    /// Use this connector as it is
    Connector(native_tls::TlsConnector),
}

impl TlsProfile {
    /// The `native_tls` connector realizing this profile
    pub fn connector(&self) -> Result<native_tls::TlsConnector, Error> {
        match *self {
            TlsProfile::Low => {
                Ok(native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()?)
            }
            TlsProfile::High => Ok(native_tls::TlsConnector::new()?),
            TlsProfile::Connector(ref connector) => Ok(connector.clone()),
        }
    }
}


fn write_connect_request(target: &str) -> Buf {
    let mut buf = Buf::new();
    write!(buf, "CONNECT {0} HTTP/1.0\r\nHost: {0}\r\n\r\n", target)
        .unwrap();
    buf
}

enum State {
    Resolve(Box<Future<Item=Address, Error=NsError>>),
    Connect(Box<Future<Item=IoBox, Error=io::Error>>),
    ProxyConnect {
        stream: IoBox,
        out: Buf,
        inbuf: Buf,
    },
    Tls(TlsConnect<IoBox>),
    Void,
}

/// Future resolving to an established `Conn`
///
/// Covers the Connecting, ProxyCONNECT and TLSHandshake phases of the
/// connection lifecycle; errors carry the phase through their status
/// code (595 up to the proxy handshake, 596 for TLS).
pub struct Connector {
    state: State,
    handle: Handle,
    key: Key,
    proxy_connect: Option<String>,
    tls: Option<(native_tls::TlsConnector, String)>,
    connect_fn: Option<Rc<ConnectFn>>,
    prepare: Option<Box<PrepareFn>>,
}

impl Connector {
    /// Start establishing a connection
    ///
    /// `connect_to` is the `host:port` name handed to the resolver (the
    /// proxy when one is in use). `proxy_connect` carries the origin
    /// authority when https is tunneled with `CONNECT`. `tls` holds the
    /// connector and the SNI name when the origin is https.
    pub fn new(handle: &Handle, resolver: &Rc<Resolver>, key: Key,
        connect_to: &str,
        proxy_connect: Option<String>,
        tls: Option<(native_tls::TlsConnector, String)>,
        connect_fn: Option<Rc<ConnectFn>>,
        prepare: Option<Box<PrepareFn>>)
        -> Connector
    {
        let resolve: Box<Future<Item=Address, Error=NsError>> =
            resolver.resolve(connect_to);
        Connector {
            state: State::Resolve(resolve),
            handle: handle.clone(),
            key: key,
            proxy_connect: proxy_connect,
            tls: tls,
            connect_fn: connect_fn,
            prepare: prepare,
        }
    }

    fn start_connect(&mut self, addr: SocketAddr)
        -> Box<Future<Item=IoBox, Error=io::Error>>
    {
        match self.connect_fn {
            Some(ref custom) => custom(&addr, &self.handle),
            None => {
                let mut prepare = self.prepare.take();
                Box::new(TcpStream::connect(&addr, &self.handle)
                    .and_then(move |sock| {
                        if let Some(ref mut prepare) = prepare {
                            prepare(&sock)?;
                        }
                        Ok(IoBox::new(sock))
                    }))
            }
        }
    }

    /// Proxy handshake done (or not needed): hand over to TLS or finish
    fn upgrade(&mut self, stream: IoBox) -> Result<Async<Conn>, Error> {
        match self.tls.take() {
            Some((connector, domain)) => {
                let connector = TlsConnector::from(connector);
                self.state = State::Tls(connector.connect(&domain, stream));
                Ok(Async::NotReady)
            }
            None => {
                Ok(Async::Ready(
                    Conn::new(IoBuf::new(stream), self.key.clone())))
            }
        }
    }
}

fn is_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl Future for Connector {
    type Item = Conn;
    type Error = Error;
    fn poll(&mut self) -> Poll<Conn, Error> {
        loop {
            let next = match mem::replace(&mut self.state, State::Void) {
                State::Resolve(mut fut) => {
                    match fut.poll().map_err(Error::Name)? {
                        Async::Ready(address) => {
                            let addr = address.pick_one()
                                .ok_or(Error::Name(NsError::NameNotFound))?;
                            debug!("connecting to {}", addr);
                            let fut = self.start_connect(addr);
                            State::Connect(fut)
                        }
                        Async::NotReady => {
                            self.state = State::Resolve(fut);
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::Connect(mut fut) => {
                    match fut.poll().map_err(Error::Connect)? {
                        Async::Ready(stream) => {
                            match self.proxy_connect.take() {
                                Some(target) => {
                                    State::ProxyConnect {
                                        stream: stream,
                                        out: write_connect_request(&target),
                                        inbuf: Buf::new(),
                                    }
                                }
                                None => match self.upgrade(stream)? {
                                    Async::Ready(conn) => {
                                        return Ok(Async::Ready(conn));
                                    }
                                    Async::NotReady => {
                                        continue;
                                    }
                                },
                            }
                        }
                        Async::NotReady => {
                            self.state = State::Connect(fut);
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::ProxyConnect { mut stream, mut out, mut inbuf } => {
                    while out.len() > 0 {
                        match out.write_to(&mut stream) {
                            Ok(_) => {}
                            Err(ref e) if is_block(e) => break,
                            Err(e) => return Err(Error::Connect(e)),
                        }
                    }
                    let mut status = None;
                    while status.is_none() {
                        match parser::parse_proxy_status(&mut inbuf)? {
                            Some(code) => {
                                status = Some(code);
                                break;
                            }
                            None => {}
                        }
                        match inbuf.read_from(&mut stream) {
                            Ok(0) => return Err(Error::ProxyHandshake),
                            Ok(_) => {}
                            Err(ref e) if is_block(e) => {
                                self.state = State::ProxyConnect {
                                    stream: stream,
                                    out: out,
                                    inbuf: inbuf,
                                };
                                return Ok(Async::NotReady);
                            }
                            Err(e) => return Err(Error::Connect(e)),
                        }
                    }
                    match status {
                        Some(code) if code >= 200 && code < 300 => {
                            debug!("proxy tunnel established");
                            match self.upgrade(stream)? {
                                Async::Ready(conn) => {
                                    return Ok(Async::Ready(conn));
                                }
                                Async::NotReady => continue,
                            }
                        }
                        Some(code) => return Err(Error::Proxy(code)),
                        None => unreachable!(),
                    }
                }
                State::Tls(mut fut) => {
                    match fut.poll()? {
                        Async::Ready(stream) => {
                            return Ok(Async::Ready(Conn::new(
                                IoBuf::new(IoBox::new(stream)),
                                self.key.clone())));
                        }
                        Async::NotReady => {
                            self.state = State::Tls(fut);
                            return Ok(Async::NotReady);
                        }
                    }
                }
                State::Void => unreachable!(),
            };
            self.state = next;
        }
    }
}
