//! Thin HTTP layer shared by the placement and namespace clients

use m3db_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// JSON-over-HTTP client bound to one cluster's coordinator endpoint.
///
/// All admin requests for a cluster go through one of these; errors are
/// mapped to [`Error::Admin`] carrying the cluster name so a failed call is
/// attributable from logs alone.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    cluster: String,
}

impl Client {
    /// Create a client for the given cluster rooted at `base_url`
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cluster: cluster.into(),
        }
    }

    /// The cluster this client belongs to
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn admin_err(&self, path: &str, msg: impl std::fmt::Display) -> Error {
        Error::admin_for(&self.cluster, format!("{path}: {msg}"))
    }

    /// GET `path` and deserialize the JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(cluster = %self.cluster, path, "admin GET");
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.admin_err(path, e))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| self.admin_err(path, e))?;
        resp.json().await.map_err(|e| self.admin_err(path, e))
    }

    /// POST a JSON body to `path`, discarding any response body
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        debug!(cluster = %self.cluster, path, "admin POST");
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.admin_err(path, e))?;
        resp.error_for_status()
            .map(|_| ())
            .map_err(|e| self.admin_err(path, e))
    }

    /// DELETE `path`, discarding any response body
    pub async fn delete(&self, path: &str) -> Result<()> {
        debug!(cluster = %self.cluster, path, "admin DELETE");
        let resp = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| self.admin_err(path, e))?;
        resp.error_for_status()
            .map(|_| ())
            .map_err(|e| self.admin_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let c = Client::new(reqwest::Client::new(), "http://coordinator:7201/", "c1");
        assert_eq!(c.url("/api/v1/placement"), "http://coordinator:7201/api/v1/placement");
    }

    #[test]
    fn errors_carry_cluster_name() {
        let c = Client::new(reqwest::Client::new(), "http://coordinator:7201", "prod");
        let err = c.admin_err("/api/v1/placement", "connection refused");
        assert_eq!(err.cluster(), Some("prod"));
        assert!(err.to_string().contains("/api/v1/placement"));
    }
}
