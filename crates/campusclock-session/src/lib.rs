//! # CampusClock Session
//! Browser-like portal session: cookie jar, CAS login, auth probe, logout.

pub mod client;
pub mod jar;

pub use client::SessionClient;
pub use jar::{CookieSnapshot, SharedJar, StoredCookie};
