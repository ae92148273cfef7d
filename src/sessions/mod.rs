//! Per-run HTTP session state

pub mod cookies;

pub use cookies::{Cookie, CookieJar};
