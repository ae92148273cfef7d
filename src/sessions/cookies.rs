//! Per-run cookie jar
//!
//! Cookies returned by one step's response are carried into subsequent steps
//! of the same run. Each run owns its jar exclusively; jars are never shared
//! between runs and are flushed into the execution record at completion.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single stored cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix timestamp; None means session cookie.
    #[serde(default)]
    pub expires: Option<i64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

/// Session-scoped cookie store for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Add or replace a cookie (same name + domain + path replaces).
    pub fn store(&mut self, cookie: Cookie) {
        self.remove_expired();

        if let Some(existing) = self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Parse a Set-Cookie header and store the result.
    pub fn store_set_cookie(&mut self, set_cookie: &str, default_domain: &str) {
        let parts: Vec<&str> = set_cookie.split(';').map(|s| s.trim()).collect();
        if parts.is_empty() {
            return;
        }

        let (name, value) = match parts[0].split_once('=') {
            Some((n, v)) => (n.to_string(), v.to_string()),
            None => return,
        };

        let mut cookie = Cookie {
            name,
            value,
            domain: Some(default_domain.to_string()),
            path: Some("/".to_string()),
            expires: None,
            secure: false,
            http_only: false,
        };

        for attr in &parts[1..] {
            let (key, val) = attr
                .split_once('=')
                .map(|(k, v)| (k.to_lowercase(), Some(v)))
                .unwrap_or_else(|| (attr.to_lowercase(), None));

            match key.as_str() {
                "domain" => cookie.domain = val.map(|s| s.trim_start_matches('.').to_string()),
                "path" => cookie.path = val.map(|s| s.to_string()),
                "expires" => {
                    if let Some(exp) = val {
                        cookie.expires = parse_cookie_date(exp);
                    }
                }
                "max-age" => {
                    if let Some(age) = val.and_then(|s| s.parse::<i64>().ok()) {
                        cookie.expires = Some(now_unix() + age);
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        self.store(cookie);
    }

    /// Drop cookies whose expiry has passed.
    pub fn remove_expired(&mut self) {
        let now = now_unix();
        self.cookies.retain(|c| c.expires.map(|exp| exp > now).unwrap_or(true));
    }

    /// Cookies applicable to a request target.
    pub fn cookies_for(&self, domain: &str, path: &str, is_secure: bool) -> Vec<&Cookie> {
        let now = now_unix();
        self.cookies
            .iter()
            .filter(|c| {
                let domain_match = c
                    .domain
                    .as_ref()
                    .map(|d| domain_matches(domain, d))
                    .unwrap_or(true);
                let path_match = c.path.as_ref().map(|p| path.starts_with(p.as_str())).unwrap_or(true);
                let secure_match = !c.secure || is_secure || is_localhost(domain);
                let not_expired = c.expires.map(|exp| exp > now).unwrap_or(true);

                domain_match && path_match && secure_match && not_expired
            })
            .collect()
    }

    /// Assemble the Cookie request header for a target, if any cookie applies.
    pub fn cookie_header(&self, domain: &str, path: &str, is_secure: bool) -> Option<String> {
        let cookies = self.cookies_for(domain, path, is_secure);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Check if a request domain matches a cookie domain.
///
/// Handles the leading dot in cookie domains per RFC 6265.
/// Example: "api.example.com" matches ".example.com".
pub fn domain_matches(request_domain: &str, cookie_domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');

    request_domain == cookie_domain
        || request_domain.ends_with(&format!(".{}", cookie_domain))
}

/// Localhost counts as a secure context for Secure cookies.
pub fn is_localhost(domain: &str) -> bool {
    domain == "localhost"
        || domain.ends_with(".localhost")
        || domain == "127.0.0.1"
        || domain == "[::1]"
}

/// Parse a cookie date string to a Unix timestamp.
fn parse_cookie_date(date_str: &str) -> Option<i64> {
    use chrono::{DateTime, NaiveDateTime};

    let formats = [
        // RFC 1123: "Sun, 06 Nov 1994 08:49:37 GMT"
        "%a, %d %b %Y %H:%M:%S GMT",
        // RFC 850: "Sunday, 06-Nov-94 08:49:37 GMT"
        "%A, %d-%b-%y %H:%M:%S GMT",
        // ANSI C: "Sun Nov  6 08:49:37 1994"
        "%a %b %e %H:%M:%S %Y",
        // ISO 8601
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.timestamp());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_set_cookie() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("session_id=abc123; Path=/; Secure", "example.com");

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.cookies()[0].name, "session_id");
        assert_eq!(jar.cookies()[0].value, "abc123");
        assert!(jar.cookies()[0].secure);
    }

    #[test]
    fn test_replace_same_cookie() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("token=old; Path=/", "example.com");
        jar.store_set_cookie("token=new; Path=/", "example.com");

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.cookies()[0].value, "new");
    }

    #[test]
    fn test_cookie_header_assembly() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("foo=bar", "example.com");
        jar.store_set_cookie("baz=qux", "example.com");

        let header = jar.cookie_header("example.com", "/", false).unwrap();
        assert!(header.contains("foo=bar"));
        assert!(header.contains("baz=qux"));
    }

    #[test]
    fn test_domain_matching() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("api.example.com", ".example.com"));
        assert!(domain_matches("api.example.com", "example.com"));
        assert!(!domain_matches("example.com", "other.com"));
        assert!(!domain_matches("notexample.com", "example.com"));
    }

    #[test]
    fn test_secure_cookie_not_sent_over_http() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("s=1; Secure", "example.com");

        assert!(jar.cookie_header("example.com", "/", false).is_none());
        assert!(jar.cookie_header("example.com", "/", true).is_some());
        // localhost counts as secure
        let mut jar = CookieJar::new();
        jar.store_set_cookie("s=1; Secure", "localhost");
        assert!(jar.cookie_header("localhost", "/", false).is_some());
    }

    #[test]
    fn test_path_matching() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("scoped=1; Path=/api", "example.com");

        assert!(jar.cookie_header("example.com", "/api/users", false).is_some());
        assert!(jar.cookie_header("example.com", "/other", false).is_none());
    }

    #[test]
    fn test_expired_cookie_dropped() {
        let mut jar = CookieJar::new();
        jar.store(Cookie {
            name: "expired".to_string(),
            value: "old".to_string(),
            domain: Some("example.com".to_string()),
            path: Some("/".to_string()),
            expires: Some(0),
            secure: false,
            http_only: false,
        });
        jar.store(Cookie {
            name: "live".to_string(),
            value: "current".to_string(),
            domain: Some("example.com".to_string()),
            path: Some("/".to_string()),
            expires: None,
            secure: false,
            http_only: false,
        });

        jar.remove_expired();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.cookies()[0].name, "live");
    }

    #[test]
    fn test_max_age_sets_expiry() {
        let mut jar = CookieJar::new();
        jar.store_set_cookie("t=1; Max-Age=3600", "example.com");
        assert!(jar.cookies()[0].expires.unwrap() > 0);

        let mut jar = CookieJar::new();
        jar.store_set_cookie("t=1; Max-Age=-1", "example.com");
        assert!(jar.cookie_header("example.com", "/", false).is_none());
    }
}
