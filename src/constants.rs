//! Shared constants for the generation service contract and downloads
//!

use std::num::NonZeroUsize;

/// Base URL used when `PICKABOOK_API_URL` is not set.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Path of the generation endpoint, relative to the base URL.
pub const GENERATE_PATH: &str = "/api/generate";

/// Multipart field carrying the primary photo.
pub const FIELD_PRIMARY_IMAGE: &str = "child_photo";

/// Multipart field carrying the optional style template.
pub const FIELD_TEMPLATE_IMAGE: &str = "template_image";

/// Substring in an error `detail` that means the shared compute quota is spent.
pub const QUOTA_MARKER: &str = "ZeroGPU quotas";

/// Number of variants requested per submission.
pub const DEFAULT_FANOUT: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

/// Prefix of saved files, eg `pickabook-character-1.png`.
pub const DOWNLOAD_PREFIX: &str = "pickabook-character";

/// Extension used when the artifact format can't be sniffed.
pub const DEFAULT_EXTENSION: &str = "png";

/// Largest accepted upload, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
/// Base URL used in tests that never hit the network
pub const TEST_API_URL: &str = "http://pickabook.invalid";
