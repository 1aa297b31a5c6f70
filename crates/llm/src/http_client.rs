//! HTTP Client Factory
//!
//! Provides a factory function for building reqwest clients with proxy and
//! timeout settings. Shared by the generation providers and the warehouse
//! query engine.

use std::time::Duration;

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(url)` -> route all traffic through the proxy
/// - `None` -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(
    proxy: Option<&str>,
    timeout: Option<Duration>,
) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    match proxy {
        Some(url) => {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client_no_proxy() {
        assert!(build_http_client(None, Some(Duration::from_secs(5))).is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        assert!(build_http_client(Some("http://127.0.0.1:8080"), None).is_ok());
    }
}
