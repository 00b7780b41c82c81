//! The JSON-over-HTTP transport.
//!
//! | Call | Route |
//! |------|-------|
//! | single | `POST {base}/json/reply/{Name}` |
//! | batch | `POST {base}/json/reply/{Name}[]` with a JSON array |
//! | one-way | `POST {base}/json/oneway/{Name}` (or `{Name}[]`) |
//!
//! The verb travels in the HTTP method or the `X-Http-Method-Override`
//! header. Faults are returned with their status code and a
//! `{"responseStatus": {...}}` body; a call that ends without a response
//! answers `204 No Content`.

#[cfg(feature = "http-client")]
mod client;
#[cfg(feature = "http-client")]
pub use client::JsonServiceClient;

#[cfg(feature = "http-server")]
mod server;
#[cfg(feature = "http-server")]
pub use server::{HttpServer, serve};

/// Header carrying the verb when the HTTP method cannot.
pub const METHOD_OVERRIDE_HEADER: &str = "X-Http-Method-Override";

/// Suffix marking a batch route.
pub const BATCH_SUFFIX: &str = "[]";

/// The request/reply route of `name`.
pub fn reply_path(name: &str) -> String {
    format!("/json/reply/{name}")
}

/// The one-way route of `name`.
pub fn oneway_path(name: &str) -> String {
    format!("/json/oneway/{name}")
}

/// Splits a route name into the operation name and whether it is a batch.
pub fn split_batch(name: &str) -> (&str, bool) {
    match name.strip_suffix(BATCH_SUFFIX) {
        Some(name) => (name, true),
        None => (name, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes() {
        assert_eq!(reply_path("Hello"), "/json/reply/Hello");
        assert_eq!(oneway_path("Hello[]"), "/json/oneway/Hello[]");
        assert_eq!(split_batch("Hello[]"), ("Hello", true));
        assert_eq!(split_batch("Hello"), ("Hello", false));
    }
}
