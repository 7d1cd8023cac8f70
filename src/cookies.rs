//! A netscape style cookie jar
//!
//! This is deliberately not a full RFC 6265 implementation: it applies
//! `Set-Cookie` headers, selects matching cookies for outgoing requests
//! and expires stale entries, which is what the request machinery needs.
//! Persisting the jar is out of scope.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use httpdate;
use urlparts::Scheme;


#[derive(Debug, Clone, PartialEq)]
struct Cookie {
    value: String,
    /// None means a session cookie
    expires: Option<i64>,
    secure: bool,
    httponly: bool,
}

/// domain -> path -> name -> cookie
type Entries = HashMap<String, HashMap<String, HashMap<String, Cookie>>>;

#[derive(Debug)]
struct Inner {
    version: u32,
    entries: Entries,
}

/// A cookie jar shared between requests
///
/// Cloning the jar gives another handle to the same underlying set of
/// cookies. The jar is only ever touched from the reactor thread, at
/// callback boundaries, so no locking is involved.
#[derive(Debug, Clone)]
pub struct CookieJar(Rc<RefCell<Inner>>);

/// Splits a (possibly joined) `Set-Cookie` value into individual cookies
///
/// Duplicate response headers arrive joined with a comma, but commas
/// also occur inside `expires` dates. A comma only starts a new cookie
/// when it is followed by a `name=` pair.
fn split_cookies(header: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    for (idx, ch) in header.char_indices() {
        if ch != ',' {
            continue;
        }
        let rest = header[idx+1..].trim_left();
        let name_len = rest
            .find(|c: char| c == '=' || c == ';' || c == ',' ||
                            c.is_whitespace())
            .unwrap_or(rest.len());
        if name_len > 0 && rest[name_len..].starts_with('=') {
            items.push(&header[start..idx]);
            start = idx + 1;
        }
    }
    items.push(&header[start..]);
    items
}

/// Cookie path is the request path up to and including the last slash
fn default_path(request_path: &str) -> String {
    let path = request_path.split('?').next().unwrap_or("/");
    match path.rfind('/') {
        Some(idx) => path[..idx+1].to_string(),
        None => "/".to_string(),
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain ||
        (host.len() > domain.len() &&
         host.ends_with(domain) &&
         host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if !request_path.starts_with(cookie_path) {
        return false;
    }
    cookie_path.ends_with('/') ||
        request_path.len() == cookie_path.len() ||
        request_path.as_bytes()[cookie_path.len()] == b'/'
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar(Rc::new(RefCell::new(Inner {
            version: 1,
            entries: HashMap::new(),
        })))
    }

    /// A jar carrying a version read from some external representation
    ///
    /// Only version 1 jars are usable; anything else is emptied the
    /// first time the jar is touched.
    pub fn with_version(version: u32) -> CookieJar {
        CookieJar(Rc::new(RefCell::new(Inner {
            version: version,
            entries: HashMap::new(),
        })))
    }

    fn check_version(inner: &mut Inner) {
        if inner.version != 1 {
            inner.entries.clear();
            inner.version = 1;
        }
    }

    /// Apply one `Set-Cookie` response header
    ///
    /// `host` and `path` are taken from the request the response belongs
    /// to, `now` is the current posix time used for expiry.
    pub fn set_cookie(&self, host: &str, path: &str, header: &str, now: i64)
    {
        let mut inner = self.0.borrow_mut();
        CookieJar::check_version(&mut inner);
        for piece in split_cookies(header) {
            let mut attrs = piece.split(';');
            let (name, value) = match attrs.next() {
                Some(pair) => {
                    let mut kv = pair.splitn(2, '=');
                    match (kv.next(), kv.next()) {
                        (Some(name), Some(value))
                        if name.trim().len() > 0 => {
                            (name.trim().to_string(),
                             value.trim().to_string())
                        }
                        _ => continue,
                    }
                }
                None => continue,
            };
            let mut domain = None;
            let mut cpath = None;
            let mut max_age = None;
            let mut expires_attr = None;
            let mut secure = false;
            let mut httponly = false;
            for attr in attrs {
                let mut kv = attr.splitn(2, '=');
                let key = kv.next().unwrap_or("").trim().to_lowercase();
                let val = kv.next().map(|x| x.trim());
                match (&key[..], val) {
                    ("domain", Some(v)) if v.len() > 0 => {
                        domain = Some(
                            v.trim_left_matches('.').to_lowercase());
                    }
                    ("path", Some(v)) if v.starts_with('/') => {
                        cpath = Some(v.to_string());
                    }
                    ("max-age", Some(v)) => {
                        max_age = v.parse::<i64>().ok();
                    }
                    ("expires", Some(v)) => {
                        expires_attr = httpdate::parse(v);
                    }
                    ("secure", _) => secure = true,
                    ("httponly", _) => httponly = true,
                    _ => {}
                }
            }
            let host = host.to_lowercase();
            let domain = match domain {
                Some(d) if domain_matches(&host, &d) => d,
                _ => host,
            };
            let cpath = cpath.unwrap_or_else(|| default_path(path));
            let expires = match max_age {
                Some(age) => Some(now + age),
                None => expires_attr,
            };
            if expires.map_or(false, |e| e <= now) {
                // an expired value removes the entry
                if let Some(paths) = inner.entries.get_mut(&domain) {
                    if let Some(names) = paths.get_mut(&cpath) {
                        names.remove(&name);
                    }
                }
                continue;
            }
            inner.entries
                .entry(domain).or_insert_with(HashMap::new)
                .entry(cpath).or_insert_with(HashMap::new)
                .insert(name, Cookie {
                    value: value,
                    expires: expires,
                    secure: secure,
                    httponly: httponly,
                });
        }
    }

    /// Value for the `Cookie` header of a request, if any cookie matches
    pub fn cookie_header(&self, scheme: Scheme, host: &str, path: &str,
        now: i64)
        -> Option<String>
    {
        let mut inner = self.0.borrow_mut();
        CookieJar::check_version(&mut inner);
        let host = host.to_lowercase();
        let request_path = path.split('?').next().unwrap_or("/");
        let mut matched = Vec::new();
        for (domain, paths) in &inner.entries {
            if !domain_matches(&host, domain) {
                continue;
            }
            for (cpath, names) in paths {
                if !path_matches(request_path, cpath) {
                    continue;
                }
                for (name, cookie) in names {
                    if cookie.secure && scheme != Scheme::Https {
                        continue;
                    }
                    if cookie.expires.map_or(false, |e| e <= now) {
                        continue;
                    }
                    matched.push((cpath.clone(), name.clone(),
                                  cookie.value.clone()));
                }
            }
        }
        if matched.is_empty() {
            return None;
        }
        // longest path first, then by name, to keep the header stable
        matched.sort_by(|a, b| {
            b.0.len().cmp(&a.0.len())
                .then_with(|| a.0.cmp(&b.0))
                .then_with(|| a.1.cmp(&b.1))
        });
        Some(matched.iter()
            .map(|&(_, ref name, ref value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "))
    }

    /// Drop expired cookies, and session cookies if asked to
    pub fn expire(&self, drop_session: bool, now: i64) {
        let mut inner = self.0.borrow_mut();
        CookieJar::check_version(&mut inner);
        for (_, paths) in inner.entries.iter_mut() {
            for (_, names) in paths.iter_mut() {
                names.retain(|_, cookie| {
                    match cookie.expires {
                        Some(e) => e > now,
                        None => !drop_session,
                    }
                });
            }
            paths.retain(|_, names| !names.is_empty());
        }
        inner.entries.retain(|_, paths| !paths.is_empty());
    }

    /// Number of cookies currently stored
    pub fn len(&self) -> usize {
        self.0.borrow().entries.values()
            .flat_map(|paths| paths.values())
            .map(|names| names.len())
            .sum()
    }

    /// True when no cookies are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use urlparts::Scheme;
    use super::{CookieJar, split_cookies, default_path};
    use super::{domain_matches, path_matches};

    const NOW: i64 = 1500000000;

    #[test]
    fn simple_set_and_get() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/", "sid=abc123", NOW);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   Some("sid=abc123".to_string()));
        assert_eq!(jar.cookie_header(Scheme::Http, "other.com", "/", NOW),
                   None);
    }

    #[test]
    fn domain_suffix() {
        let jar = CookieJar::new();
        jar.set_cookie("www.example.com", "/",
            "a=1; Domain=.example.com", NOW);
        assert_eq!(
            jar.cookie_header(Scheme::Http, "sub.example.com", "/", NOW),
            Some("a=1".to_string()));
        assert_eq!(
            jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
            Some("a=1".to_string()));
        // not a suffix on a dot boundary
        assert_eq!(
            jar.cookie_header(Scheme::Http, "badexample.com", "/", NOW),
            None);
    }

    #[test]
    fn foreign_domain_attribute_falls_back_to_host() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/", "a=1; Domain=evil.org", NOW);
        assert_eq!(jar.cookie_header(Scheme::Http, "evil.org", "/", NOW),
                   None);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   Some("a=1".to_string()));
    }

    #[test]
    fn path_scoping() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/a/b", "x=1", NOW);
        // default path is up to the last slash
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com",
                                     "/a/other", NOW),
                   Some("x=1".to_string()));
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/b", NOW),
                   None);
        jar.set_cookie("example.com", "/", "y=2; Path=/a", NOW);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com",
                                     "/about", NOW),
                   None);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com",
                                     "/a/b", NOW),
                   Some("x=1; y=2".to_string()));
    }

    #[test]
    fn secure_requires_https() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/", "s=1; Secure", NOW);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   None);
        assert_eq!(jar.cookie_header(Scheme::Https, "example.com", "/", NOW),
                   Some("s=1".to_string()));
    }

    #[test]
    fn max_age_wins_over_expires() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/",
            "a=1; Max-Age=60; Expires=Sun, 06 Nov 1994 08:49:37 GMT", NOW);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   Some("a=1".to_string()));
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/",
                                     NOW + 61),
                   None);
    }

    #[test]
    fn expired_value_removes_entry() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/", "a=1", NOW);
        assert_eq!(jar.len(), 1);
        jar.set_cookie("example.com", "/", "a=gone; Max-Age=0", NOW);
        assert_eq!(jar.len(), 0);
    }

    #[test]
    fn joined_headers_with_expires_commas() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/",
            "a=1; Expires=Wed, 01 Jan 2031 00:00:00 GMT,b=2; Path=/,c=3",
            NOW);
        assert_eq!(jar.len(), 3);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   Some("a=1; b=2; c=3".to_string()));
    }

    #[test]
    fn expire_drops_stale_and_session() {
        let jar = CookieJar::new();
        jar.set_cookie("example.com", "/", "session=1", NOW);
        jar.set_cookie("example.com", "/", "keep=1; Max-Age=1000", NOW);
        jar.set_cookie("example.com", "/", "stale=1; Max-Age=10", NOW);
        jar.expire(false, NOW + 100);
        assert_eq!(jar.len(), 2);
        jar.expire(true, NOW + 100);
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/",
                                     NOW + 100),
                   Some("keep=1".to_string()));
    }

    #[test]
    fn wrong_version_is_emptied() {
        let jar = CookieJar::with_version(2);
        jar.set_cookie("example.com", "/", "a=1", NOW);
        // the jar became usable (version 1) on first touch
        assert_eq!(jar.cookie_header(Scheme::Http, "example.com", "/", NOW),
                   Some("a=1".to_string()));
    }

    #[test]
    fn split_heuristics() {
        assert_eq!(split_cookies("a=1"), vec!["a=1"]);
        assert_eq!(split_cookies("a=1,b=2"), vec!["a=1", "b=2"]);
        assert_eq!(
            split_cookies("a=1; expires=Wed, 09 Jun 2021 10:18:14 GMT,b=2"),
            vec!["a=1; expires=Wed, 09 Jun 2021 10:18:14 GMT", "b=2"]);
    }

    #[test]
    fn default_paths() {
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path("/a"), "/");
        assert_eq!(default_path("/a/b"), "/a/");
        assert_eq!(default_path("/a/b?q=1"), "/a/");
    }

    #[test]
    fn matching_rules() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("a.example.com", "example.com"));
        assert!(!domain_matches("aexample.com", "example.com"));
        assert!(path_matches("/a/b", "/a/"));
        assert!(path_matches("/a/b", "/a"));
        assert!(path_matches("/a", "/a"));
        assert!(!path_matches("/about", "/a"));
    }
}
