use crate::error::{AlertError, Result};
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| AlertError::Config(format!("invalid header name '{header_name}': {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| AlertError::Config(format!("invalid value for header '{header_name}': {e}")))?;
        value.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    pub fn authorize(&self, req: &mut reqwest::Request) {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.authorize(&mut req);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use reqwest::{Method, Request, Url};

    fn request() -> Request {
        Request::new(
            Method::GET,
            Url::parse("https://citymetro.gov/gtfs-rt/alerts").unwrap(),
        )
    }

    #[test]
    fn test_sets_header() {
        let client = ApiKey::new(BasicClient::new(), "x-api-key", "secret").unwrap();
        let mut req = request();
        client.authorize(&mut req);

        let value = req.headers().get("x-api-key").unwrap();
        assert_eq!(value.to_str().unwrap(), "secret");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        assert!(matches!(
            ApiKey::new(BasicClient::new(), "bad header", "k"),
            Err(AlertError::Config(_))
        ));
        assert!(matches!(
            ApiKey::new(BasicClient::new(), "x-api-key", "line\nbreak"),
            Err(AlertError::Config(_))
        ));
    }
}
