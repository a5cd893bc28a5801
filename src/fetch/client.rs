use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes a prepared request. Authentication wrappers implement this by
/// decorating the request before delegating to an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
