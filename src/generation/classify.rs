//! Classification of request failures into user-facing causes.

use std::fmt;

use super::request::RequestFailure;
use crate::constants::QUOTA_MARKER;

/// Generic message used when the service gave us nothing to show.
pub const GENERIC_FAILURE: &str = "Magic spell backfired slightly. Please try again.";

/// Why a generation attempt failed, most specific first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCause {
    /// No response reached the client.
    NetworkUnreachable,
    /// The service said its shared compute quota is exhausted.
    QuotaExceeded,
    /// The service returned an error with a message.
    ServiceError(String),
    /// Anything else, including malformed responses.
    Unknown(String),
}

/// Maps a raw failure onto exactly one [`ErrorCause`]. Total and pure.
pub fn classify(failure: &RequestFailure) -> ErrorCause {
    match failure {
        RequestFailure::NoResponse { .. } => ErrorCause::NetworkUnreachable,
        RequestFailure::Rejected {
            detail: Some(detail),
            ..
        } if detail.contains(QUOTA_MARKER) => ErrorCause::QuotaExceeded,
        RequestFailure::Rejected {
            detail: Some(detail),
            ..
        } => ErrorCause::ServiceError(detail.clone()),
        RequestFailure::Rejected { detail: None, .. }
        | RequestFailure::Malformed { .. }
        | RequestFailure::Encoding { .. } => ErrorCause::Unknown(GENERIC_FAILURE.to_string()),
    }
}

impl ErrorCause {
    /// Text shown to the user for this cause.
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkUnreachable => "Cannot reach the generation service. \
                Check that PICKABOOK_API_URL points at a running backend."
                .to_string(),
            Self::QuotaExceeded => "Magical recharging needed! We've used up our free magic \
                for now (ZeroGPU usage limit). Please try again in an hour, or check back tomorrow."
                .to_string(),
            Self::ServiceError(message) | Self::Unknown(message) => message.clone(),
        }
    }

    /// Extra remedial tip, only for causes the user can act on.
    pub fn remedial_hint(&self) -> Option<&'static str> {
        match self {
            Self::QuotaExceeded => Some(
                "The free magic wand needs a recharge (quota limit). \
                 Try again later (usually resets hourly) or switch the backend to mock mode.",
            ),
            Self::NetworkUnreachable => {
                Some("Is the backend running, and is its hosting space awake?")
            }
            Self::ServiceError(_) | Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkUnreachable => f.write_str("network unreachable"),
            Self::QuotaExceeded => f.write_str("quota exceeded"),
            Self::ServiceError(message) => write!(f, "service error: {message}"),
            Self::Unknown(message) => write!(f, "unknown error: {message}"),
        }
    }
}
