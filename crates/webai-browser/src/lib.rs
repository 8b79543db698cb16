//! Browser cookie jar — reads provider session cookies from local
//! Firefox and Chromium-family profiles.

pub mod jar;
pub mod types;

pub use jar::{BrowserCookieJar, CookieSource, StaticCookieSource};
pub use types::*;
