//! HTTP object store (S3-compatible gateways, R2 workers, plain WebDAV-ish servers).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::config::HttpStorageConfig;
use super::error::ArtifactError;
use super::traits::{validate_key, ArtifactStore};

pub struct HttpArtifactStore {
    client: Client,
    base_url: String,
    bucket: String,
    token: Option<String>,
    public_url: Option<String>,
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn request_error(key: &str, e: reqwest::Error) -> ArtifactError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ArtifactError::unavailable(format!("{}: {}", key, e))
    } else {
        ArtifactError::backend(format!("{}: {}", key, e))
    }
}

fn status_error(key: &str, status: StatusCode) -> ArtifactError {
    match status {
        StatusCode::NOT_FOUND => ArtifactError::NotFound {
            key: key.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ArtifactError::PermissionDenied {
            key: key.to_string(),
        },
        s if s.is_server_error()
            || s == StatusCode::TOO_MANY_REQUESTS
            || s == StatusCode::REQUEST_TIMEOUT =>
        {
            ArtifactError::unavailable(format!("{}: HTTP {}", key, s))
        }
        s => ArtifactError::backend(format!("{}: HTTP {}", key, s)),
    }
}

impl HttpArtifactStore {
    pub fn new(config: &HttpStorageConfig) -> Result<Self, ArtifactError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArtifactError::backend(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            public_url: config
                .public_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, encode_key(key))
    }

    fn request(&self, method: Method, key: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.object_url(key));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn check(key: &str, response: Response) -> Result<Response, ArtifactError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(key, response.status()))
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        validate_key(key)?;
        let response = self
            .request(Method::GET, key)
            .send()
            .await
            .map_err(|e| request_error(key, e))?;
        let bytes = Self::check(key, response)?
            .bytes()
            .await
            .map_err(|e| request_error(key, e))?;
        debug!("Fetched {} bytes for {}", bytes.len(), key);
        Ok(bytes.to_vec())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        validate_key(key)?;
        let content_type = if key.ends_with(".pdf") {
            "application/pdf"
        } else {
            "application/octet-stream"
        };
        let response = self
            .request(Method::PUT, key)
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_error(key, e))?;
        Self::check(key, response)?;

        Ok(match &self.public_url {
            Some(base) => format!("{}/{}", base, encode_key(key)),
            None => key.to_string(),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        validate_key(key)?;
        let response = self
            .request(Method::HEAD, key)
            .send()
            .await
            .map_err(|e| request_error(key, e))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(key, s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Transient;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer, public_url: Option<&str>) -> HttpArtifactStore {
        HttpArtifactStore::new(&HttpStorageConfig {
            base_url: server.uri(),
            bucket: "papers".to_string(),
            token: Some("t0ken".to_string()),
            public_url: public_url.map(String::from),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/papers/in/source.pdf"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(&server)
            .await;

        let bytes = store_for(&server, None).get("in/source.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_put_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/papers/out/1.pdf"))
            .and(header("content-type", "application/pdf"))
            .and(body_bytes(b"data".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reference = store_for(&server, Some("https://cdn.example.com/"))
            .put("out/1.pdf", b"data".to_vec())
            .await
            .unwrap();
        assert_eq!(reference, "https://cdn.example.com/out/1.pdf");
    }

    #[tokio::test]
    async fn test_exists_maps_404_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/papers/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/papers/present.pdf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        assert!(!store.exists("missing.pdf").await.unwrap());
        assert!(store.exists("present.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/papers/busy.pdf"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/papers/secret.pdf"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        let busy = store.get("busy.pdf").await.unwrap_err();
        assert!(busy.is_transient());
        let secret = store.get("secret.pdf").await.unwrap_err();
        assert!(matches!(secret, ArtifactError::PermissionDenied { .. }));
        assert!(!secret.is_transient());
    }

    #[test]
    fn test_encode_key_keeps_slashes() {
        assert_eq!(encode_key("a b/c.pdf"), "a%20b/c.pdf");
    }
}
