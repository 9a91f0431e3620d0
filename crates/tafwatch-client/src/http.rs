//! `reqwest` implementation of the snapshot fetch API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use tafwatch_core::errors::FetchError;
use tafwatch_core::wire::{TmiDetail, TmiListing, TmiRequest};
use tafwatch_store::SnapshotSource;

#[derive(Clone, Debug)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpSnapshotSource {
    /// `base_url` is the API root; `tmis` is resolved relative to it.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| FetchError::InvalidRequest(format!("bad base URL {base_url:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| FetchError::InvalidRequest(format!("bad path {path:?}: {e}")))?;
        debug!(%url, "fetching snapshot");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{path}: {e}")))
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn list_tmis(&self) -> Result<TmiListing, FetchError> {
        self.get_json("tmis").await
    }

    async fn fetch_tmi(&self, request: &TmiRequest) -> Result<TmiDetail, FetchError> {
        self.get_json(&request.path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tafwatch_core::wire::{UpdatesPayload, VersionSelector};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> HttpSnapshotSource {
        HttpSnapshotSource::new(&format!("{}/api", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn lists_tmis() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "//app/sess1/tmpl/abc": {
                    "id": "abc", "fullTMI": "//app/sess1/tmpl/abc",
                    "template": "tmpl", "active": true, "latestVersion": 2
                }
            })))
            .mount(&server)
            .await;

        let listing = source(&server).list_tmis().await.unwrap();
        assert_eq!(listing["//app/sess1/tmpl/abc"].latest_version, 2);
    }

    #[tokio::test]
    async fn fetches_single_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis/app/sess1/tmpl/abc/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "fullTMI": "//app/sess1/tmpl/abc", "id": "abc", "template": "tmpl",
                "active": true, "latestVersion": 2,
                "state": {"Version": 2, "Fingerprint": 1, "Structure": {"operator": "OP", "adjacency_list": []},
                          "Values": {}, "RTLs": {}},
                "updates": [{"op": "UPDATE_TO"}]
            })))
            .mount(&server)
            .await;

        let req = TmiRequest::new("app", "sess1", "tmpl", "abc").with_version(VersionSelector::At(2));
        let detail = source(&server).fetch_tmi(&req).await.unwrap();
        assert_eq!(detail.state.unwrap().version, 2);
        assert!(matches!(detail.updates, Some(UpdatesPayload::List(ref l)) if l.len() == 1));
    }

    #[tokio::test]
    async fn not_found_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis/app/sess1/tmpl/gone/all"))
            .respond_with(ResponseTemplate::new(404).set_body_string("TMI not found"))
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_tmi(&TmiRequest::new("app", "sess1", "tmpl", "gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(ref body) if body == "TMI not found"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = source(&server).list_tmis().await.unwrap_err();
        assert!(matches!(err, FetchError::ServerError { status: 502, .. }));
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = source(&server).list_tmis().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tmis"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)).set_body_json(json!({})))
            .mount(&server)
            .await;

        let source = HttpSnapshotSource::new(&format!("{}/api/", server.uri()), Duration::from_millis(50)).unwrap();
        let err = source.list_tmis().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let source = HttpSnapshotSource::new("http://127.0.0.1:1/api", Duration::from_secs(1)).unwrap();
        let err = source.list_tmis().await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let source = HttpSnapshotSource::new("http://taf.local/api", Duration::from_secs(1)).unwrap();
        assert_eq!(source.base_url().join("tmis").unwrap().as_str(), "http://taf.local/api/tmis");
        assert!(HttpSnapshotSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}
