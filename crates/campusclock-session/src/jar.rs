//! Serializable cookie jar.
//!
//! The portal session is nothing but cookies, and the snapshot persisted on
//! the user record must round-trip through JSON. reqwest's built-in jar is
//! opaque, so this module keeps its own cookie list and plugs it into
//! reqwest through the `CookieStore` trait. Matching rules are the RFC 6265
//! subset the portal actually exercises: domain suffix, path prefix,
//! `Secure`, expiry.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use campusclock_core::error::{ClockError, Result};

/// One cookie as persisted in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }
}

/// The serializable snapshot — the opaque blob stored on the user record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieSnapshot {
    pub cookies: Vec<StoredCookie>,
}

/// Thread-safe jar shared between the redirecting and non-redirecting
/// clients of one session. Owned by exactly one user's session at a time.
#[derive(Debug, Default)]
pub struct SharedJar {
    inner: RwLock<CookieSnapshot>,
}

impl SharedJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CookieSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: CookieSnapshot = serde_json::from_str(json)
            .map_err(|e| ClockError::Store(format!("Cookie snapshot parse: {e}")))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.snapshot())
            .map_err(|e| ClockError::Store(format!("Cookie snapshot serialize: {e}")))
    }

    pub fn snapshot(&self) -> CookieSnapshot {
        self.inner
            .read()
            .map(|jar| jar.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut jar) = self.inner.write() {
            jar.cookies.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map(|jar| jar.cookies.is_empty()).unwrap_or(true)
    }

    /// Insert or replace; an already-expired cookie deletes its match
    /// (that is how the portal logs sessions out).
    fn store(&self, cookie: StoredCookie) {
        let Ok(mut jar) = self.inner.write() else {
            return;
        };
        jar.cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        if !cookie.is_expired(Utc::now()) {
            jar.cookies.push(cookie);
        }
    }
}

impl reqwest::cookie::CookieStore for SharedJar {
    fn set_cookies(
        &self,
        cookie_headers: &mut dyn Iterator<Item = &HeaderValue>,
        url: &reqwest::Url,
    ) {
        let host = url.host_str().unwrap_or_default().to_string();
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            if let Some(cookie) = parse_set_cookie(raw, &host) {
                self.store(cookie);
            }
        }
    }

    fn cookies(&self, url: &reqwest::Url) -> Option<HeaderValue> {
        let jar = self.inner.read().ok()?;
        let host = url.host_str()?;
        let path = url.path();
        let https = url.scheme() == "https";
        let now = Utc::now();

        let header = jar
            .cookies
            .iter()
            .filter(|c| {
                domain_matches(host, &c.domain)
                    && path_matches(path, &c.path)
                    && (!c.secure || https)
                    && !c.is_expired(now)
            })
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            None
        } else {
            HeaderValue::from_str(&header).ok()
        }
    }
}

/// Parse one `Set-Cookie` header value.
fn parse_set_cookie(raw: &str, default_domain: &str) -> Option<StoredCookie> {
    let mut parts = raw.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: default_domain.to_string(),
        path: "/".to_string(),
        secure: false,
        expires: None,
    };

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" => {
                let d = val.trim().trim_start_matches('.');
                if !d.is_empty() {
                    cookie.domain = d.to_ascii_lowercase();
                }
            }
            "path" => {
                let p = val.trim();
                if p.starts_with('/') {
                    cookie.path = p.to_string();
                }
            }
            // Max-Age wins over Expires when both are present.
            "max-age" => {
                if let Ok(secs) = val.trim().parse::<i64>() {
                    cookie.expires = Some(if secs <= 0 {
                        Utc::now() - Duration::seconds(1)
                    } else {
                        Utc::now() + Duration::seconds(secs)
                    });
                }
            }
            "expires" => {
                if cookie.expires.is_none()
                    && let Ok(when) = DateTime::parse_from_rfc2822(val.trim())
                {
                    cookie.expires = Some(when.with_timezone(&Utc));
                }
            }
            "secure" => cookie.secure = true,
            _ => {}
        }
    }

    Some(cookie)
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}
