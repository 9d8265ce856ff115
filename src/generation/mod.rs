//! Talking to the remote generation service: one request, its failure
//! classification, and the fan-out over several requests.

pub mod classify;
pub mod orchestrator;
pub mod request;

use std::fmt;

pub use classify::{ErrorCause, classify};
pub use orchestrator::{AggregationPolicy, Batch, Cancelled, Orchestrator};
pub use request::{ClientConfig, ClientError, GenerationClient, HttpGenerationClient, RequestFailure};

/// Opaque, fetchable URL of one generated image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Wraps a URL as given; no validation happens here.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The URL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank references resolve to nothing and never reach the results view.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ArtifactRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of one fan-out branch, fixed once the branch finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The branch produced a reference.
    Success(ArtifactRef),
    /// The branch failed for this reason.
    Failure(ErrorCause),
}

impl GenerationOutcome {
    /// True for [`GenerationOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The reference, when the branch succeeded.
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match self {
            Self::Success(artifact) => Some(artifact),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, when the branch failed.
    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }
}
