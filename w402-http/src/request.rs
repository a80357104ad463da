//! Replayable request descriptors.

use http::{HeaderMap, Method};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use url::Url;

/// Everything needed to issue the same request twice: once unpaid, once paid.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Optional JSON body.
    pub body: Option<Value>,
}

impl RequestDescriptor {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Describes the probe of a registered endpoint.
    ///
    /// Unknown method names fall back to `GET`. Methods that carry a body
    /// (`POST`, `PUT`, `PATCH`) send an empty JSON object.
    #[must_use]
    pub fn for_endpoint(method: &str, url: Url) -> Self {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).unwrap_or(Method::GET);
        let body = matches!(method, Method::POST | Method::PUT | Method::PATCH)
            .then(|| Value::Object(serde_json::Map::new()));
        Self {
            body,
            ..Self::new(method, url)
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub(crate) fn build(&self, client: &Client) -> RequestBuilder {
        let mut request = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.json(body);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://agent.example/api/run").unwrap()
    }

    #[test]
    fn test_writes_carry_empty_object() {
        for method in ["post", "PUT", "Patch"] {
            let request = RequestDescriptor::for_endpoint(method, url());
            assert_eq!(request.body, Some(serde_json::json!({})), "{method}");
        }
    }

    #[test]
    fn test_reads_have_no_body() {
        let request = RequestDescriptor::for_endpoint("get", url());
        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_none());
        assert!(RequestDescriptor::for_endpoint("DELETE", url()).body.is_none());
    }

    #[test]
    fn test_garbage_method_defaults_to_get() {
        assert_eq!(RequestDescriptor::for_endpoint("not a method", url()).method, Method::GET);
    }
}
