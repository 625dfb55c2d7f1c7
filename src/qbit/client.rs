use crate::config::QbitConfig;
use crate::error::{ShuttleError, ShuttleResult};
use crate::qbit::types::{InfoQuery, Torrent, TorrentFile};
use crate::types::Infohash;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// HTTP client for the qBittorrent WebUI API (v2).
///
/// All commands are form-encoded POSTs; queries are GETs. Authentication is
/// a cookie session established by [`QbitClient::login`]; the cookie store
/// lives inside the reqwest client.
pub struct QbitClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl QbitClient {
    pub fn new(config: &QbitConfig) -> ShuttleResult<Self> {
        Self::with_base_url(config, config.base_url())
    }

    /// Construction against an explicit base URL; used by tests to point at
    /// a mock server.
    pub fn with_base_url(config: &QbitConfig, base_url: String) -> ShuttleResult<Self> {
        let _ = reqwest::Url::parse(&base_url)
            .map_err(|e| ShuttleError::ClientInitializationError(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| ShuttleError::ClientInitializationError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, endpoint)
    }

    /// Helper method to execute a request with retry logic for transient
    /// failures. Server errors back off linearly per attempt.
    async fn execute_with_retry<F, Fut>(
        &self,
        endpoint: &str,
        operation: F,
    ) -> ShuttleResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            endpoint = endpoint,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            max_attempts = self.max_retries + 1,
                            "Server error, retrying"
                        );
                        sleep(self.retry_delay * (attempt + 1)).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let err: ShuttleError = e.into();
                    if err.is_transient() && attempt < self.max_retries {
                        warn!(
                            endpoint = endpoint,
                            attempt = attempt + 1,
                            max_attempts = self.max_retries + 1,
                            error = %err,
                            "Transient error, retrying"
                        );
                        last_error = Some(err);
                        sleep(self.retry_delay * (attempt + 1)).await;
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or(ShuttleError::RetryLimitExceeded))
    }

    /// Check response status and convert errors.
    async fn check_response(&self, response: reqwest::Response) -> ShuttleResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::FORBIDDEN {
            Err(ShuttleError::AuthenticationError(
                "session expired or not logged in".to_string(),
            ))
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ShuttleError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ShuttleResult<T> {
        let url = self.url(endpoint);
        let response = self
            .execute_with_retry(endpoint, || self.client.get(&url).query(params).send())
            .await?;
        let response = self.check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, String)]) -> ShuttleResult<()> {
        let url = self.url(endpoint);
        let response = self
            .execute_with_retry(endpoint, || self.client.post(&url).form(form).send())
            .await?;
        self.check_response(response).await?;
        trace!(endpoint = endpoint, "command accepted");
        Ok(())
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Establish the cookie session. qBittorrent answers 200 with a literal
    /// "Fails." body on bad credentials.
    pub async fn login(&self) -> ShuttleResult<()> {
        let url = self.url("auth/login");
        let form = [
            ("username", self.username.clone()),
            ("password", self.password.clone()),
        ];
        let response = self
            .execute_with_retry("auth/login", || self.client.post(&url).form(&form).send())
            .await?;
        let response = self.check_response(response).await?;
        let body = response.text().await.unwrap_or_default();
        if body.trim() == "Fails." {
            return Err(ShuttleError::AuthenticationError(
                "invalid credentials".to_string(),
            ));
        }
        debug!("logged in to qBittorrent");
        Ok(())
    }

    pub async fn logout(&self) -> ShuttleResult<()> {
        self.post_form("auth/logout", &[]).await
    }

    /// Cheap liveness probe used by the session pool.
    pub async fn version(&self) -> ShuttleResult<String> {
        let url = self.url("app/version");
        let response = self.client.get(&url).send().await.map_err(ShuttleError::from)?;
        let response = self.check_response(response).await?;
        Ok(response.text().await.unwrap_or_default())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn torrents_info(&self, query: &InfoQuery) -> ShuttleResult<Vec<Torrent>> {
        let params = query.to_params();
        self.get_json("torrents/info", &params).await
    }

    /// The torrent matching `hash`, or None when the client does not know it.
    pub async fn torrent_by_hash(&self, hash: &Infohash) -> ShuttleResult<Option<Torrent>> {
        let torrents = self.torrents_info(&InfoQuery::by_hash(hash)).await?;
        Ok(torrents.into_iter().find(|t| hash.matches(&t.hash)))
    }

    pub async fn torrents_files(&self, hash: &Infohash) -> ShuttleResult<Vec<TorrentFile>> {
        self.get_json("torrents/files", &[("hash", hash.to_string())])
            .await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn pause(&self, hash: &Infohash) -> ShuttleResult<()> {
        self.post_form("torrents/pause", &[("hashes", hash.to_string())])
            .await
    }

    pub async fn resume(&self, hash: &Infohash) -> ShuttleResult<()> {
        self.post_form("torrents/resume", &[("hashes", hash.to_string())])
            .await
    }

    pub async fn set_location(&self, hash: &Infohash, location: &str) -> ShuttleResult<()> {
        self.post_form(
            "torrents/setLocation",
            &[
                ("hashes", hash.to_string()),
                ("location", location.to_string()),
            ],
        )
        .await
    }

    pub async fn add_tags(&self, hash: &Infohash, tags: &str) -> ShuttleResult<()> {
        self.post_form(
            "torrents/addTags",
            &[("hashes", hash.to_string()), ("tags", tags.to_string())],
        )
        .await
    }

    pub async fn remove_tags(&self, hash: &Infohash, tags: &str) -> ShuttleResult<()> {
        self.post_form(
            "torrents/removeTags",
            &[("hashes", hash.to_string()), ("tags", tags.to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> QbitClient {
        let config = QbitConfig::default();
        QbitClient::with_base_url(&config, server.uri()).unwrap()
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .and(body_string_contains("username=admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .mount(&server)
            .await;

        client_for(&server).login().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Fails."))
            .mount(&server)
            .await;

        let err = client_for(&server).login().await.unwrap_err();
        assert!(matches!(err, ShuttleError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn test_version_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/app/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v4.6.3"))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).version().await.unwrap(), "v4.6.3");
    }

    #[tokio::test]
    async fn test_torrents_info_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .and(query_param("filter", "completed"))
            .and(query_param("tag", "ssd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "hash": "a".repeat(40),
                    "name": "m.mkv",
                    "content_path": "/cache/downloads/radarr/m.mkv",
                    "save_path": "/cache/downloads/radarr",
                    "size": 1024,
                    "category": "radarr",
                    "tags": "ssd, hdd",
                    "state": "pausedUP",
                    "completion_on": 100
                }
            ])))
            .mount(&server)
            .await;

        let torrents = client_for(&server)
            .torrents_info(&InfoQuery::completed_with_tag("ssd"))
            .await
            .unwrap();
        assert_eq!(torrents.len(), 1);
        assert_eq!(torrents[0].name, "m.mkv");
        assert!(torrents[0].has_tag("hdd"));
    }

    #[tokio::test]
    async fn test_torrent_by_hash_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let hash: Infohash = "b".repeat(40).parse().unwrap();
        let found = client_for(&server).torrent_by_hash(&hash).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_torrents_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/files"))
            .and(query_param("hash", "c".repeat(40)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "a.mkv", "size": 10},
                {"name": "b.mkv", "size": 20}
            ])))
            .mount(&server)
            .await;

        let hash: Infohash = "c".repeat(40).parse().unwrap();
        let files = client_for(&server).torrents_files(&hash).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].size, 20);
    }

    #[tokio::test]
    async fn test_pause_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/pause"))
            .and(body_string_contains("hashes="))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hash: Infohash = "d".repeat(40).parse().unwrap();
        client_for(&server).pause(&hash).await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_set_location() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/setLocation"))
            .and(body_string_contains("location=%2Fbulk%2Fdownloads%2Fradarr"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let hash: Infohash = "e".repeat(40).parse().unwrap();
        client_for(&server)
            .set_location(&hash, "/bulk/downloads/radarr")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_tags() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/torrents/addTags"))
            .and(body_string_contains("tags=hdd"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let hash: Infohash = "f".repeat(40).parse().unwrap();
        client_for(&server).add_tags(&hash, "hdd").await.unwrap();
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .torrents_info(&InfoQuery::completed())
            .await
            .unwrap_err();
        assert!(matches!(err, ShuttleError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn test_retry_on_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/torrents/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let torrents = client_for(&server)
            .torrents_info(&InfoQuery::completed())
            .await
            .unwrap();
        assert!(torrents.is_empty());
    }

    #[tokio::test]
    async fn test_pool_reuses_live_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/app/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v5"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = QbitConfig::default();
        let url = reqwest::Url::parse(&server.uri()).unwrap();
        config.host = url.host_str().unwrap().to_string();
        config.port = url.port().unwrap();

        let pool = crate::qbit::QbitPool::new(config);
        let first = pool.get().await.unwrap();
        // Second checkout probes the live session instead of logging in again.
        let second = pool.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        server.verify().await;
    }
}
