//! CLI parser
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::constants::{DEFAULT_API_URL, DEFAULT_FANOUT};

#[derive(Parser, Debug)]
#[command(name = "pickabook")]
/// Turn a photo into storybook character variants and download the keepers.
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "PICKABOOK_DEBUG")]
    /// Enable debug logging. Env: PICKABOOK_DEBUG
    pub debug: bool,

    /// Photo of the child to transform (JPEG, PNG or WebP, under 5MB).
    pub photo: PathBuf,

    #[clap(long, short)]
    /// Optional style/pose template image.
    pub template: Option<PathBuf>,

    #[clap(long, short, default_value = DEFAULT_API_URL, env = "PICKABOOK_API_URL")]
    /// Base URL of the generation backend, defaults to `http://localhost:8000`.
    /// Env: PICKABOOK_API_URL
    pub api_url: String,

    #[clap(long, default_value_t = DEFAULT_FANOUT, env = "PICKABOOK_FANOUT")]
    /// How many variants to request. Env: PICKABOOK_FANOUT
    pub fanout: NonZeroUsize,

    #[clap(long, env = "PICKABOOK_ALLOW_PARTIAL")]
    /// Show whatever succeeded instead of failing the whole batch.
    /// Env: PICKABOOK_ALLOW_PARTIAL
    pub allow_partial: bool,

    #[clap(long, env = "PICKABOOK_TIMEOUT_SECS")]
    /// Per-request timeout in seconds; unbounded when unset.
    /// Env: PICKABOOK_TIMEOUT_SECS
    pub timeout_secs: Option<u64>,

    #[clap(long, short, default_value = "./downloads", env = "PICKABOOK_OUT_DIR")]
    /// Where downloads are written. Env: PICKABOOK_OUT_DIR
    pub out_dir: PathBuf,

    #[clap(long, env = "PICKABOOK_OPENER")]
    /// Command that opens a remote image when fetching it fails, eg `xdg-open`.
    /// Defaults to the platform opener. Env: PICKABOOK_OPENER
    pub opener: Option<String>,

    #[clap(long, value_delimiter = ',')]
    /// 1-based variant numbers to leave out of the download, eg `--skip 2,3`.
    pub skip: Vec<usize>,
}
