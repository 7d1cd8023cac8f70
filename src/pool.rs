//! The connection registry
//!
//! One registry is shared by every request of a client: it keeps the
//! idle ("persistent") connections keyed by identity, counts
//! connections per host against the concurrency cap and parks requests
//! in FIFO order when a host is saturated.
//!
//! Counting rules: `active_per_host` covers every live connection of a
//! host, idle ones included (an idle hit is not counted twice), while
//! the `active` counter covers only connections currently attached to a
//! request. Freed slots are handed to the head waiter directly so a
//! waiter never coexists with a free slot.
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::mem;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::AsyncRead;

use connection::{Conn, Key};
use errors::Error;


/// What an admitted request is allowed to do
#[derive(Debug)]
pub enum Grant {
    /// Take over this idle connection
    Reused(Conn),
    /// Open a new connection, the slot is yours
    Fresh,
}

struct Idle {
    conn: Conn,
    serial: u64,
}

struct Inner {
    /// front is the most recently parked connection
    idle: HashMap<Key, VecDeque<Idle>>,
    active_per_host: HashMap<String, usize>,
    waiters: HashMap<String, VecDeque<(Key, oneshot::Sender<Grant>)>>,
    /// connections currently attached to a request
    active: usize,
    next_serial: u64,
    max_per_host: usize,
}

struct Shared {
    inner: RefCell<Inner>,
    handle: Handle,
    persistent_timeout: Duration,
}

/// Idle pool, per-host counters and admission queue in one place
#[derive(Clone)]
pub struct Pool(Rc<Shared>);

impl Inner {
    fn decrement(&mut self, host: &str) {
        let empty = {
            let count = self.active_per_host.get_mut(host)
                .expect("per-host counter is consistent");
            *count -= 1;
            *count == 0
        };
        if empty {
            self.active_per_host.remove(host);
        }
    }

    /// Hand a freed slot to the next live waiter, keeping it taken
    fn wake_one(&mut self, host: &str) {
        let mut granted = false;
        if let Some(queue) = self.waiters.get_mut(host) {
            while let Some((_, tx)) = queue.pop_front() {
                if tx.send(Grant::Fresh).is_ok() {
                    granted = true;
                    break;
                }
            }
        }
        if self.waiters.get(host).map_or(false, |q| q.is_empty()) {
            self.waiters.remove(host);
        }
        if granted {
            *self.active_per_host.entry(host.to_string()).or_insert(0) += 1;
            self.active += 1;
        }
    }

    /// Slot of an attached connection is gone
    fn slot_freed(&mut self, host: &str) {
        self.active -= 1;
        self.decrement(host);
        self.wake_one(host);
    }
}

impl Pool {
    pub fn new(handle: &Handle, max_per_host: usize,
        persistent_timeout: Duration)
        -> Pool
    {
        Pool(Rc::new(Shared {
            inner: RefCell::new(Inner {
                idle: HashMap::new(),
                active_per_host: HashMap::new(),
                waiters: HashMap::new(),
                active: 0,
                next_serial: 0,
                max_per_host: max_per_host,
            }),
            handle: handle.clone(),
            persistent_timeout: persistent_timeout,
        }))
    }

    /// Ask for a connection with this identity
    ///
    /// Resolution order: most recently parked idle connection, then a
    /// fresh slot under the per-host cap, otherwise the request waits
    /// in line. Dropping the returned future gives the grant back.
    pub fn lease(&self, key: &Key) -> Lease {
        let mut inner = self.0.inner.borrow_mut();
        let reused = inner.idle.get_mut(key).and_then(|q| q.pop_front());
        if let Some(entry) = reused {
            if inner.idle.get(key).map_or(false, |q| q.is_empty()) {
                inner.idle.remove(key);
            }
            inner.active += 1;
            debug!("reusing idle connection to {}:{}", key.host, key.port);
            return Lease {
                state: LeaseState::Ready(Some(Grant::Reused(entry.conn))),
                pool: self.clone(),
                key: key.clone(),
            };
        }
        let count = inner.active_per_host.get(&key.host)
            .cloned().unwrap_or(0);
        if count < inner.max_per_host {
            *inner.active_per_host.entry(key.host.clone()).or_insert(0) += 1;
            inner.active += 1;
            return Lease {
                state: LeaseState::Ready(Some(Grant::Fresh)),
                pool: self.clone(),
                key: key.clone(),
            };
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.entry(key.host.clone()).or_insert_with(VecDeque::new)
            .push_back((key.clone(), tx));
        Lease {
            state: LeaseState::Waiting(rx),
            pool: self.clone(),
            key: key.clone(),
        }
    }

    /// Return a cleanly finished connection for reuse
    ///
    /// When the head waiter of the host wants exactly this identity the
    /// connection is handed over directly, otherwise it is parked in
    /// the idle pool and a timer is set to close it.
    pub fn release(&self, conn: Conn) {
        let mut conn = conn;
        let serial = {
            let mut inner = self.0.inner.borrow_mut();
            loop {
                let head_matches = inner.waiters
                    .get(&conn.key().host)
                    .and_then(|q| q.front())
                    .map_or(false, |&(ref key, _)| key == conn.key());
                if !head_matches {
                    break;
                }
                let (_, tx) = inner.waiters.get_mut(&conn.key().host)
                    .and_then(|q| q.pop_front())
                    .expect("head waiter is still queued");
                match tx.send(Grant::Reused(conn)) {
                    Ok(()) => return,
                    // that waiter is gone, try the next one
                    Err(Grant::Reused(back)) => conn = back,
                    Err(Grant::Fresh) => unreachable!(),
                }
            }
            let serial = inner.next_serial;
            inner.next_serial += 1;
            inner.active -= 1;
            serial
        };
        match Timeout::new(self.0.persistent_timeout, &self.0.handle) {
            Ok(timeout) => {
                let key = conn.key().clone();
                debug!("parking idle connection to {}:{}",
                    key.host, key.port);
                self.0.inner.borrow_mut().idle
                    .entry(key.clone()).or_insert_with(VecDeque::new)
                    .push_front(Idle { conn: conn, serial: serial });
                self.0.handle.spawn(IdleExpire {
                    pool: Rc::downgrade(&self.0),
                    key: key,
                    serial: serial,
                    timeout: timeout,
                });
            }
            Err(_) => {
                // no timer, no parking
                let host = conn.key().host.clone();
                drop(conn);
                let mut inner = self.0.inner.borrow_mut();
                inner.decrement(&host);
                inner.wake_one(&host);
            }
        }
    }

    /// Like `lease`, but never hands out an idle connection
    ///
    /// Used for the one-shot retry after a reused connection turned out
    /// to be dead: the spare idle connections of that identity are just
    /// as suspect.
    pub fn lease_fresh(&self, key: &Key) -> Lease {
        let mut inner = self.0.inner.borrow_mut();
        let count = inner.active_per_host.get(&key.host)
            .cloned().unwrap_or(0);
        if count < inner.max_per_host {
            *inner.active_per_host.entry(key.host.clone()).or_insert(0) += 1;
            inner.active += 1;
            return Lease {
                state: LeaseState::Ready(Some(Grant::Fresh)),
                pool: self.clone(),
                key: key.clone(),
            };
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.entry(key.host.clone()).or_insert_with(VecDeque::new)
            .push_back((key.clone(), tx));
        Lease {
            state: LeaseState::Waiting(rx),
            pool: self.clone(),
            key: key.clone(),
        }
    }

    /// A granted slot never became a connection
    pub fn connect_failed(&self, host: &str) {
        self.0.inner.borrow_mut().slot_freed(host);
    }

    /// Destroy a connection that was attached to a request
    pub fn destroy(&self, conn: Conn) {
        let host = conn.key().host.clone();
        debug!("destroying connection to {}", host);
        drop(conn);
        self.0.inner.borrow_mut().slot_freed(&host);
    }

    /// Total number of connections attached to requests
    pub fn active(&self) -> usize {
        self.0.inner.borrow().active
    }

    /// Live connections of a host, idle included
    pub fn active_per_host(&self, host: &str) -> usize {
        self.0.inner.borrow().active_per_host.get(host)
            .cloned().unwrap_or(0)
    }
}

enum LeaseState {
    Ready(Option<Grant>),
    Waiting(oneshot::Receiver<Grant>),
    Done,
}

/// Future of an admission decision, see `Pool::lease`
pub struct Lease {
    state: LeaseState,
    pool: Pool,
    key: Key,
}

impl Future for Lease {
    type Item = Grant;
    type Error = Error;
    fn poll(&mut self) -> Poll<Grant, Error> {
        match self.state {
            LeaseState::Ready(ref mut grant) => {
                let grant = grant.take().expect("lease polled after ready");
                self.state = LeaseState::Done;
                Ok(Async::Ready(grant))
            }
            LeaseState::Waiting(ref mut rx) => {
                match rx.poll() {
                    Ok(Async::Ready(grant)) => {
                        self.state = LeaseState::Done;
                        Ok(Async::Ready(grant))
                    }
                    Ok(Async::NotReady) => Ok(Async::NotReady),
                    Err(_) => {
                        // the pool is gone, nothing to wait for
                        Err(Error::Connect(io::Error::new(
                            io::ErrorKind::Other, "client was shut down")))
                    }
                }
            }
            LeaseState::Done => panic!("lease polled after completion"),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let grant = match mem::replace(&mut self.state, LeaseState::Done) {
            LeaseState::Ready(Some(grant)) => Some(grant),
            LeaseState::Ready(None) | LeaseState::Done => None,
            LeaseState::Waiting(mut rx) => {
                rx.close();
                match rx.poll() {
                    Ok(Async::Ready(grant)) => Some(grant),
                    _ => None,
                }
            }
        };
        match grant {
            // an untouched connection is as good as new
            Some(Grant::Reused(conn)) => self.pool.release(conn),
            Some(Grant::Fresh) => {
                // the slot was counted when the grant was made
                self.pool.0.inner.borrow_mut().slot_freed(&self.key.host);
            }
            None => {}
        }
    }
}

struct IdleExpire {
    pool: Weak<Shared>,
    key: Key,
    serial: u64,
    timeout: Timeout,
}

impl Future for IdleExpire {
    type Item = ();
    type Error = ();
    fn poll(&mut self) -> Poll<(), ()> {
        match self.timeout.poll() {
            Ok(Async::NotReady) => return Ok(Async::NotReady),
            Ok(Async::Ready(())) | Err(_) => {}
        }
        if let Some(shared) = self.pool.upgrade() {
            let mut inner = shared.inner.borrow_mut();
            let expired = {
                match inner.idle.get_mut(&self.key) {
                    Some(queue) => {
                        let before = queue.len();
                        queue.retain(|idle| idle.serial != self.serial);
                        before != queue.len()
                    }
                    None => false,
                }
            };
            if expired {
                debug!("idle connection to {}:{} expired",
                    self.key.host, self.key.port);
                if inner.idle.get(&self.key).map_or(false, |q| q.is_empty())
                {
                    inner.idle.remove(&self.key);
                }
                inner.decrement(&self.key.host);
                inner.wake_one(&self.key.host);
            }
        }
        Ok(Async::Ready(()))
    }
}

/// The live body stream handed out for a `want_body_handle` request
///
/// The engine does not touch the connection (nor its timers or pool
/// accounting) once the handle exists; dropping or `release()`-ing it
/// frees the host slot.
pub struct BodyHandle {
    conn: Option<Conn>,
    pool: Pool,
}

pub fn new_body_handle(conn: Conn, pool: &Pool) -> BodyHandle {
    BodyHandle {
        conn: Some(conn),
        pool: pool.clone(),
    }
}

impl BodyHandle {
    /// Give the connection slot back explicitly
    pub fn release(self) {
        // drop does the work
    }
}

impl Read for BodyHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let conn = self.conn.as_mut().expect("stream still attached");
        loop {
            let buffered = conn.io.in_buf.len();
            if buffered > 0 {
                let n = ::std::cmp::min(buffered, buf.len());
                buf[..n].copy_from_slice(&conn.io.in_buf[..n]);
                conn.io.in_buf.consume(n);
                return Ok(n);
            }
            if conn.io.done() {
                return Ok(0);
            }
            if conn.io.read()? == 0 {
                if conn.io.done() {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock,
                                          "no data buffered"));
            }
        }
    }
}

impl AsyncRead for BodyHandle {}

impl Drop for BodyHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.destroy(conn);
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use futures::{Async, Future, Poll};
    use futures::future::lazy;
    use tk_bufstream::IoBuf;
    use tokio_core::reactor::{Core, Timeout};
    use tokio_io::{AsyncRead, AsyncWrite};

    use connection::{Conn, IoBox, Key};
    use urlparts::Scheme;
    use super::{Grant, Pool};

    struct Dummy;

    impl Read for Dummy {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "nothing here"))
        }
    }
    impl Write for Dummy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl AsyncRead for Dummy {}
    impl AsyncWrite for Dummy {
        fn shutdown(&mut self) -> Poll<(), io::Error> {
            Ok(Async::Ready(()))
        }
    }

    fn key(host: &str) -> Key {
        Key {
            scheme: Scheme::Http,
            host: host.to_string(),
            port: 80,
            session: String::new(),
            proxy: None,
        }
    }

    fn conn(key: &Key) -> Conn {
        Conn::new(IoBuf::new(IoBox::new(Dummy)), key.clone())
    }

    #[test]
    fn cap_and_fifo_admission() {
        let mut lp = Core::new().unwrap();
        let handle = lp.handle();
        lp.run(lazy(move || {
            let pool = Pool::new(&handle, 2, Duration::from_secs(3));
            let key = key("example.com");
            let mut l1 = pool.lease(&key);
            let mut l2 = pool.lease(&key);
            let mut l3 = pool.lease(&key);
            let mut l4 = pool.lease(&key);
            assert!(matches!(l1.poll(), Ok(Async::Ready(Grant::Fresh))));
            assert!(matches!(l2.poll(), Ok(Async::Ready(Grant::Fresh))));
            assert!(matches!(l3.poll(), Ok(Async::NotReady)));
            assert!(matches!(l4.poll(), Ok(Async::NotReady)));
            assert_eq!(pool.active(), 2);
            assert_eq!(pool.active_per_host("example.com"), 2);
            // a destroyed connection admits the waiters in order
            pool.destroy(conn(&key));
            assert!(matches!(l3.poll(), Ok(Async::Ready(Grant::Fresh))));
            assert!(matches!(l4.poll(), Ok(Async::NotReady)));
            pool.destroy(conn(&key));
            assert!(matches!(l4.poll(), Ok(Async::Ready(Grant::Fresh))));
            assert_eq!(pool.active_per_host("example.com"), 2);
            Ok::<(), ()>(())
        })).unwrap();
    }

    #[test]
    fn release_hands_connection_to_matching_waiter() {
        let mut lp = Core::new().unwrap();
        let handle = lp.handle();
        lp.run(lazy(move || {
            let pool = Pool::new(&handle, 1, Duration::from_secs(3));
            let key = key("example.com");
            let mut l1 = pool.lease(&key);
            let mut l2 = pool.lease(&key);
            assert!(matches!(l1.poll(), Ok(Async::Ready(Grant::Fresh))));
            assert!(matches!(l2.poll(), Ok(Async::NotReady)));
            pool.release(conn(&key));
            assert!(matches!(l2.poll(),
                Ok(Async::Ready(Grant::Reused(..)))));
            // the connection went straight across, it was never idle
            assert_eq!(pool.active(), 1);
            Ok::<(), ()>(())
        })).unwrap();
    }

    #[test]
    fn dead_waiters_are_skipped() {
        let mut lp = Core::new().unwrap();
        let handle = lp.handle();
        lp.run(lazy(move || {
            let pool = Pool::new(&handle, 1, Duration::from_secs(3));
            let key = key("example.com");
            let mut l1 = pool.lease(&key);
            let l2 = pool.lease(&key);
            let mut l3 = pool.lease(&key);
            assert!(matches!(l1.poll(), Ok(Async::Ready(Grant::Fresh))));
            drop(l2);
            pool.destroy(conn(&key));
            assert!(matches!(l3.poll(), Ok(Async::Ready(Grant::Fresh))));
            Ok::<(), ()>(())
        })).unwrap();
    }

    #[test]
    fn idle_hit_does_not_count_twice() {
        let lp = Core::new().unwrap();
        let pool = Pool::new(&lp.handle(), 4, Duration::from_secs(3));
        let key = key("example.com");
        let mut lease = pool.lease(&key);
        assert!(matches!(lease.poll(), Ok(Async::Ready(Grant::Fresh))));
        pool.release(conn(&key));
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.active_per_host("example.com"), 1);
        let mut lease = pool.lease(&key);
        assert!(matches!(lease.poll(),
            Ok(Async::Ready(Grant::Reused(..)))));
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.active_per_host("example.com"), 1);
    }

    #[test]
    fn idle_connections_expire() {
        let mut lp = Core::new().unwrap();
        let pool = Pool::new(&lp.handle(), 1, Duration::from_millis(50));
        let key = key("example.com");
        let mut lease = pool.lease(&key);
        assert!(matches!(lease.poll(), Ok(Async::Ready(Grant::Fresh))));
        pool.release(conn(&key));
        assert_eq!(pool.active_per_host("example.com"), 1);
        let wait = Timeout::new(Duration::from_millis(150), &lp.handle())
            .unwrap();
        lp.run(wait).unwrap();
        assert_eq!(pool.active_per_host("example.com"), 0);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn dropping_a_waiting_lease_leaves_the_line() {
        let mut lp = Core::new().unwrap();
        let handle = lp.handle();
        lp.run(lazy(move || {
            let pool = Pool::new(&handle, 1, Duration::from_secs(3));
            let key = key("example.com");
            let mut l1 = pool.lease(&key);
            assert!(matches!(l1.poll(), Ok(Async::Ready(Grant::Fresh))));
            let l2 = pool.lease(&key);
            drop(l2);
            // the abandoned waiter doesn't hold the slot count up
            pool.destroy(conn(&key));
            assert_eq!(pool.active(), 0);
            assert_eq!(pool.active_per_host("example.com"), 0);
            Ok::<(), ()>(())
        })).unwrap();
    }
}
