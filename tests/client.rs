extern crate futures;
extern crate tk_fetch;
extern crate tokio_core;
extern crate tokio_io;

use std::cell::{Cell, RefCell};
use std::cmp;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use futures::{Future, Poll};
use futures::future::{join_all, ok};
use tokio_core::reactor::{Core, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};
use tk_fetch::{Config, CookieJar, HttpClient, IoBox, RequestBuilder};

/// A scripted connection: replays canned response bytes and captures
/// whatever the engine writes
struct Script {
    response: Vec<u8>,
    pos: usize,
    written: Rc<RefCell<Vec<u8>>>,
    silent: bool,
}

impl Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.silent {
            return Err(io::Error::new(io::ErrorKind::WouldBlock,
                                      "server stays silent"));
        }
        if self.pos >= self.response.len() {
            return Ok(0);
        }
        let n = cmp::min(buf.len(), self.response.len() - self.pos);
        buf[..n].copy_from_slice(&self.response[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for Script {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for Script {}

impl AsyncWrite for Script {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        Ok(().into())
    }
}

/// A fake server: one scripted connection per accepted connect
struct Server {
    connects: Rc<Cell<usize>>,
    written: Rc<RefCell<Vec<u8>>>,
    scripts: Rc<RefCell<Vec<Vec<u8>>>>,
    silent: bool,
}

impl Server {
    fn new(scripts: Vec<Vec<u8>>) -> Server {
        Server {
            connects: Rc::new(Cell::new(0)),
            written: Rc::new(RefCell::new(Vec::new())),
            scripts: Rc::new(RefCell::new(scripts)),
            silent: false,
        }
    }
    fn silent() -> Server {
        let mut server = Server::new(vec![Vec::new()]);
        server.silent = true;
        server
    }
    fn connects(&self) -> usize {
        self.connects.get()
    }
    fn written(&self) -> String {
        String::from_utf8_lossy(&self.written.borrow()).into_owned()
    }
    /// Wire the fake server into a request
    fn connect(&self, builder: RequestBuilder) -> RequestBuilder {
        let connects = self.connects.clone();
        let written = self.written.clone();
        let scripts = self.scripts.clone();
        let silent = self.silent;
        builder.connect_with(move |_addr, _handle| {
            connects.set(connects.get() + 1);
            let response = if scripts.borrow().len() > 1 {
                scripts.borrow_mut().remove(0)
            } else {
                scripts.borrow()[0].clone()
            };
            Box::new(ok(IoBox::new(Script {
                response: response,
                pos: 0,
                written: written.clone(),
                silent: silent,
            })))
        })
    }
}

fn client(lp: &Core) -> HttpClient {
    let mut config = Config::new();
    config.no_proxy()
        .persistent_timeout(Duration::from_millis(50));
    HttpClient::with_config(&lp.handle(), &config)
}

#[test]
fn simple_get() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.reason(), "OK");
    assert_eq!(resp.body(), Some(&b"hello"[..]));
    assert_eq!(resp.headers().get("content-length"), Some("5"));
    assert_eq!(resp.url().as_str(), "http://localhost:8080/");
    assert!(resp.redirect().is_none());
    assert_eq!(server.connects(), 1);
    let written = server.written();
    assert!(written.starts_with("GET / HTTP/1.1\r\n"), "{}", written);
    assert!(written.contains("Host: localhost:8080\r\n"), "{}", written);
    assert!(written.contains("Connection: keep-alive\r\n"), "{}", written);
    assert!(written.contains("User-Agent: tk-fetch/"), "{}", written);
}

#[test]
fn chunked_body() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n0\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/x"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), Some(&b"hello"[..]));
}

#[test]
fn chunked_trailers_are_merged() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n0\r\nX-Extra: 1\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.body(), Some(&b"hello"[..]));
    assert_eq!(resp.headers().get("x-extra"), Some("1"));
}

#[test]
fn post_redirect_becomes_get() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("POST", "http://localhost:8080/a"))
            .body(&b"x=1"[..])
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), Some(&b"done"[..]));
    assert_eq!(resp.url().as_str(), "http://localhost:8080/b");
    {
        let prior = resp.redirect().expect("redirect chain present");
        assert_eq!(prior.status(), 302);
        assert_eq!(prior.body(), Some(&b""[..]));
        assert_eq!(prior.url().as_str(), "http://localhost:8080/a");
    }
    let written = server.written();
    assert!(written.starts_with("POST /a HTTP/1.1\r\n"), "{}", written);
    assert!(written.contains("Content-Length: 3\r\n"), "{}", written);
    assert!(written.contains("x=1GET /b HTTP/1.1\r\n"), "{}", written);
    let followup = &written[written.find("GET /b").unwrap()..];
    assert!(!followup.contains("Content-Length"), "{}", followup);
    assert!(followup.contains("Referer: http://localhost:8080/a\r\n"),
            "{}", followup);
}

#[test]
fn preserves_method_on_307() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 307 Temporary Redirect\r\nLocation: /next\r\n\
          Content-Length: 0\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("POST", "http://localhost:8080/a"))
            .body(&b"x=1"[..])
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    let written = server.written();
    let followup = &written[written.find("POST /next").expect("resent")..];
    assert!(followup.contains("Content-Length: 3\r\n"), "{}", followup);
    assert!(followup.contains("x=1"), "{}", followup);
}

#[test]
fn redirect_budget_is_bounded() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    // every response redirects to itself
    let server = Server::new(vec![
        b"HTTP/1.1 302 Found\r\nLocation: /loop\r\n\
          Content-Length: 0\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/loop"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 599);
    assert_eq!(resp.reason(), "too many redirects");
    // the whole chain is preserved behind the failure
    let mut hops = 0;
    let mut current = resp.redirect();
    while let Some(prior) = current {
        assert_eq!(prior.status(), 302);
        hops += 1;
        current = prior.redirect();
    }
    assert!(hops <= 10, "{} hops", hops);
    assert!(hops > 0);
}

#[test]
fn per_host_cap_limits_connects() {
    let mut lp = Core::new().unwrap();
    let mut config = Config::new();
    config.no_proxy().max_per_host(2);
    let client = HttpClient::with_config(&lp.handle(), &config);
    // each connection serves two responses back to back
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello\
           HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello\
           HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec()]);
    let requests: Vec<_> = (0..4).map(|i| {
        server.connect(client.request("GET",
            &format!("http://localhost:8080/{}", i)))
            .send()
    }).collect();
    let responses = lp.run(join_all(requests)).unwrap();
    assert_eq!(responses.len(), 4);
    for resp in &responses {
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), Some(&b"hello"[..]));
    }
    // the third and fourth request reused the first two connections
    assert_eq!(server.connects(), 2);
}

#[test]
fn persistent_reuse_and_revalidation() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    // one response per connection: the second request finds the idle
    // connection dead and must reconnect transparently
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nfirst".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecond".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.body(), Some(&b"first"[..]));
    assert_eq!(server.connects(), 1);
    assert_eq!(client.active(), 0);
    assert_eq!(client.active_per_host("localhost"), 1);

    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), Some(&b"second"[..]));
    // reuse was attempted, found dead, and retried on a new connection
    assert_eq!(server.connects(), 2);

    // after the persistent timeout the idle connection is closed
    let wait = Timeout::new(Duration::from_millis(200), &lp.handle())
        .unwrap();
    lp.run(wait).unwrap();
    assert_eq!(client.active(), 0);
    assert_eq!(client.active_per_host("localhost"), 0);
}

#[test]
fn clean_reuse_on_one_connection() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\na\
           HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb".to_vec()]);
    let first = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    let second = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(first.body(), Some(&b"a"[..]));
    assert_eq!(second.body(), Some(&b"b"[..]));
    assert_eq!(server.connects(), 1);
}

#[test]
fn connection_close_is_not_reused() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\
          Connection: close\r\n\r\nok".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(client.active_per_host("localhost"), 0);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.connects(), 2);
}

#[test]
fn on_header_abort() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\
          Content-Length: 100\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/big"))
            .on_header(|resp| resp.headers().get("content-type")
                == Some("text/plain"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 598);
    assert_eq!(resp.reason(), "user abort");
    assert_eq!(resp.orig_status(), Some((200, "OK")));
    assert_eq!(resp.headers().get("content-type"), Some("image/png"));
    assert_eq!(resp.body(), Some(&b""[..]));
    // aborted connections never go back to the pool
    assert_eq!(client.active_per_host("localhost"), 0);
}

#[test]
fn on_body_streams_fragments() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n".to_vec()]);
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = collected.clone();
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .on_body(move |data| {
                sink.borrow_mut().extend_from_slice(data);
                true
            })
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    // streamed responses have an empty body in the completion
    assert_eq!(resp.body(), Some(&b""[..]));
    assert_eq!(&collected.borrow()[..], &b"abcdef"[..]);
}

#[test]
fn on_body_never_sees_redirect_hops() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    // the 302 carries a body of its own, which belongs to the chain
    let server = Server::new(vec![
        b"HTTP/1.1 302 Found\r\nLocation: /real\r\n\
          Content-Length: 5\r\n\r\ngone!".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nfinal".to_vec()]);
    let collected = Rc::new(RefCell::new(Vec::new()));
    let sink = collected.clone();
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/old"))
            .on_body(move |data| {
                sink.borrow_mut().extend_from_slice(data);
                true
            })
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.url().as_str(), "http://localhost:8080/real");
    // only the final response was streamed
    assert_eq!(&collected.borrow()[..], &b"final"[..]);
    assert_eq!(resp.body(), Some(&b""[..]));
    // the hop kept its body for the chain instead
    let prior = resp.redirect().expect("redirect chain present");
    assert_eq!(prior.status(), 302);
    assert_eq!(prior.body(), Some(&b"gone!"[..]));
}

#[test]
fn on_body_abort() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabcdef".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .on_body(|_data| false)
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 598);
    assert_eq!(resp.reason(), "user abort");
    assert_eq!(resp.orig_status(), Some((200, "OK")));
    assert_eq!(client.active_per_host("localhost"), 0);
}

#[test]
fn cookies_round_trip() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let jar = CookieJar::new();
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=abc; Path=/\r\n\
          Content-Length: 0\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()]);
    lp.run(
        server.connect(client.request("GET", "http://localhost:8080/login"))
            .cookie_jar(&jar)
            .send()
    ).unwrap();
    assert_eq!(jar.len(), 1);
    lp.run(
        server.connect(client.request("GET", "http://localhost:8080/data"))
            .cookie_jar(&jar)
            .send()
    ).unwrap();
    let written = server.written();
    let followup = &written[written.find("GET /data").unwrap()..];
    assert!(followup.contains("Cookie: sid=abc\r\n"), "{}", followup);
}

#[test]
fn head_request_has_no_body() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("HEAD", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), Some(&b""[..]));
    assert_eq!(resp.headers().get("content-length"), Some("100"));
}

#[test]
fn bad_url_is_a_599() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let resp = lp.run(client.get("not a url")).unwrap();
    assert_eq!(resp.status(), 599);
    let resp = lp.run(client.get("ftp://example.com/file")).unwrap();
    assert_eq!(resp.status(), 599);
    assert_eq!(resp.reason(), "URL unsupported");
}

#[test]
fn malformed_status_line_is_a_596() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![b"NOT HTTP AT ALL\r\n\r\n".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 596);
}

#[test]
fn timeout_fires_with_phase_code() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::silent();
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .timeout(Duration::from_millis(50))
            .send()
    ).unwrap();
    // the request was written, the server never answered
    assert_eq!(resp.status(), 596);
}

#[test]
fn dropping_the_future_cancels() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::silent();
    let fut = server.connect(client.request("GET", "http://localhost:8080/"))
        .send();
    drop(fut);
    assert_eq!(client.active(), 0);
    assert_eq!(client.active_per_host("localhost"), 0);
    // and the machinery is still usable afterwards
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec()]);
    let resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
}

#[test]
fn suppressed_default_is_omitted() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()]);
    lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .suppress("User-Agent")
            .header("X-Custom", "1")
            .send()
    ).unwrap();
    let written = server.written();
    assert!(!written.contains("User-Agent"), "{}", written);
    assert!(written.contains("X-Custom: 1\r\n"), "{}", written);
}

#[test]
fn want_body_handle_hands_over_the_stream() {
    let mut lp = Core::new().unwrap();
    let client = client(&lp);
    let server = Server::new(vec![
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec()]);
    let mut resp = lp.run(
        server.connect(client.request("GET", "http://localhost:8080/"))
            .want_body_handle()
            .send()
    ).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.body(), None);
    let mut handle = resp.take_handle().expect("stream handed over");
    // the slot stays taken until the handle is gone
    assert_eq!(client.active(), 1);
    let mut body = Vec::new();
    handle.read_to_end(&mut body).unwrap();
    assert_eq!(&body[..], &b"hello"[..]);
    drop(handle);
    assert_eq!(client.active(), 0);
    assert_eq!(client.active_per_host("localhost"), 0);
}
