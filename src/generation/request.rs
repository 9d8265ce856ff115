//! A single multipart submission to `POST /api/generate`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::ArtifactRef;
use crate::constants::{
    FIELD_PRIMARY_IMAGE, FIELD_TEMPLATE_IMAGE, GENERATE_PATH, USER_AGENT,
};
use crate::submission::{ImageBlob, Submission};

/// Raw failure of one generation request, before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestFailure {
    /// Nothing came back: DNS, connect, TLS, timeout, CORS-style refusals.
    NoResponse {
        /// Transport error text
        reason: String,
    },
    /// The request couldn't be built, so nothing was sent.
    Encoding {
        /// What couldn't be encoded and why
        reason: String,
    },
    /// The service answered with a non-2xx status.
    Rejected {
        /// HTTP status code
        status: u16,
        /// String `detail` from the error body, if any
        detail: Option<String>,
    },
    /// The service answered 2xx but the body could not be understood.
    Malformed {
        /// HTTP status code
        status: u16,
        /// Parse error text
        reason: String,
    },
}

impl RequestFailure {
    /// True when a response reached the client at all.
    pub fn response_received(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Malformed { .. })
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResponse { reason } => write!(f, "No response from generation service: {reason}"),
            Self::Encoding { reason } => write!(f, "Could not build generation request: {reason}"),
            Self::Rejected {
                status,
                detail: Some(detail),
            } => write!(f, "Generation service returned {status}: {detail}"),
            Self::Rejected { status, detail: None } => {
                write!(f, "Generation service returned {status}")
            }
            Self::Malformed { status, reason } => {
                write!(f, "Unreadable {status} response from generation service: {reason}")
            }
        }
    }
}

impl std::error::Error for RequestFailure {}

/// Something that can turn a submission into one artifact reference.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Sends one request; each call is independent of any other.
    async fn request_one(&self, submission: &Submission) -> Result<ArtifactRef, RequestFailure>;
}

/// Errors building the HTTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The base URL plus the endpoint path isn't a URL.
    #[error("Invalid API base URL {url:?}: {source}")]
    InvalidBaseUrl {
        /// Base URL as given, trailing slashes trimmed
        url: String,
        /// Parser error
        source: url::ParseError,
    },
    /// reqwest refused the client settings.
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Connection settings for the generation service.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
    endpoint: Url,
    timeout: Option<Duration>,
}

impl ClientConfig {
    /// Settings for the service at `base_url`, trailing slashes ignored.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let endpoint = Url::parse(&format!("{base_url}{GENERATE_PATH}")).map_err(|source| {
            ClientError::InvalidBaseUrl {
                url: base_url.clone(),
                source,
            }
        })?;
        Ok(Self {
            base_url,
            endpoint,
            timeout: None,
        })
    }

    /// Bounds each request. There is no timeout unless one is set here.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the generate endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Per-request timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Builds the reqwest client shared by generation and downloads.
    pub fn build_http(&self) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    image_url: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<Value>,
}

/// [`GenerationClient`] backed by the real HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpGenerationClient {
    /// Builds its own reqwest client from `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::with_client(config.build_http()?, config))
    }

    /// Uses an existing client, eg one shared with the downloader.
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
        }
    }

    /// Where submissions are posted.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn file_part(bytes: Vec<u8>, file_name: &str, mime_type: &str) -> Result<Part, RequestFailure> {
    Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(mime_type)
        .map_err(|err| RequestFailure::Encoding {
            reason: format!("{file_name} as {mime_type}: {err}"),
        })
}

fn image_part(blob: &ImageBlob) -> Result<Part, RequestFailure> {
    file_part(blob.bytes().to_vec(), blob.file_name(), blob.mime_type())
}

fn build_form(submission: &Submission) -> Result<Form, RequestFailure> {
    let mut form = Form::new().part(FIELD_PRIMARY_IMAGE, image_part(submission.primary())?);
    if let Some(template) = submission.template() {
        form = form.part(FIELD_TEMPLATE_IMAGE, image_part(template)?);
    }
    Ok(form)
}

/// Maps a received status and body onto a reference or a failure.
///
/// A 2xx without a usable `image_url` yields an empty reference, which the
/// orchestrator drops before results are shown.
pub(crate) fn interpret_response(status: u16, body: &[u8]) -> Result<ArtifactRef, RequestFailure> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_slice::<ErrorResponse>(body)
            .ok()
            .and_then(|parsed| parsed.detail)
            .and_then(|detail| detail.as_str().map(str::to_owned))
            .filter(|detail| !detail.trim().is_empty());
        return Err(RequestFailure::Rejected { status, detail });
    }

    let parsed: GenerateResponse =
        serde_json::from_slice(body).map_err(|err| RequestFailure::Malformed {
            status,
            reason: err.to_string(),
        })?;

    if parsed.status.as_deref() == Some("mock_mode") {
        warn!(
            "Generation service is in mock mode: {}",
            parsed.message.as_deref().unwrap_or("no message")
        );
    }

    let url = parsed
        .image_url
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(ArtifactRef::new(url))
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn request_one(&self, submission: &Submission) -> Result<ArtifactRef, RequestFailure> {
        let form = build_form(submission)?;
        debug!(
            "POST {} ({} bytes, template: {})",
            self.endpoint,
            submission.primary().len(),
            submission.template().is_some()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|err| RequestFailure::NoResponse {
                reason: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| {
            // a body that never finishes arriving is a dead connection, not a bad payload
            if err.is_timeout() {
                RequestFailure::NoResponse {
                    reason: err.to_string(),
                }
            } else {
                RequestFailure::Malformed {
                    status,
                    reason: err.to_string(),
                }
            }
        })?;

        interpret_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TEST_API_URL;

    #[test]
    fn endpoint_appends_generate_path() {
        let config = ClientConfig::new("http://localhost:8000/").expect("config");
        assert_eq!(config.endpoint().as_str(), "http://localhost:8000/api/generate");
        assert_eq!(config.base_url(), "http://localhost:8000");

        // a path prefix on the base survives, like string concatenation would
        let config = ClientConfig::new("https://space.example/proxy").expect("config");
        assert_eq!(
            config.endpoint().as_str(),
            "https://space.example/proxy/api/generate"
        );
        assert!(config.timeout().is_none());
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = ClientConfig::new("not a url").expect_err("invalid");
        assert!(matches!(err, ClientError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn success_body_yields_reference() {
        let body = br#"{"status":"success","message":"ok","image_url":"http://img/1.png"}"#;
        assert_eq!(
            interpret_response(200, body),
            Ok(ArtifactRef::new("http://img/1.png"))
        );
    }

    #[test]
    fn success_without_url_yields_empty_reference() {
        let reference = interpret_response(200, br#"{"status":"success"}"#).expect("ok");
        assert!(reference.is_empty());
        let reference = interpret_response(200, br#"{"image_url":null}"#).expect("ok");
        assert!(reference.is_empty());
    }

    #[test]
    fn success_with_garbage_body_is_malformed() {
        let err = interpret_response(200, b"<html>proxy page</html>").expect_err("malformed");
        assert!(matches!(err, RequestFailure::Malformed { status: 200, .. }));
        assert!(err.response_received());
    }

    #[test]
    fn error_body_keeps_string_detail_only() {
        assert_eq!(
            interpret_response(500, br#"{"detail":"AI Service Error: boom"}"#),
            Err(RequestFailure::Rejected {
                status: 500,
                detail: Some("AI Service Error: boom".to_string()),
            })
        );
        // FastAPI validation errors carry a list, which is not a message
        assert_eq!(
            interpret_response(422, br#"{"detail":[{"loc":["body"],"msg":"field required"}]}"#),
            Err(RequestFailure::Rejected {
                status: 422,
                detail: None,
            })
        );
        assert_eq!(
            interpret_response(502, b"Bad Gateway"),
            Err(RequestFailure::Rejected {
                status: 502,
                detail: None,
            })
        );
    }

    #[test]
    fn client_targets_configured_endpoint() {
        let config = ClientConfig::new(TEST_API_URL)
            .expect("config")
            .with_timeout(Duration::from_secs(5));
        let client = HttpGenerationClient::new(&config).expect("client");
        assert_eq!(client.endpoint().path(), GENERATE_PATH);
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn form_includes_template_only_when_present() {
        use crate::submission::tests::png_blob;

        let without = Submission::new(png_blob("kid.png"));
        let with = without.clone().with_template(png_blob("pose.png"));
        assert!(build_form(&without).is_ok());
        assert!(build_form(&with).is_ok());
    }

    #[test]
    fn unencodable_part_is_not_a_network_failure() {
        let err = file_part(b"x".to_vec(), "kid.png", "not a mime type").expect_err("bad mime");
        assert!(matches!(err, RequestFailure::Encoding { .. }));
        assert!(!err.response_received());
        assert!(err.to_string().contains("kid.png"));
    }
}
