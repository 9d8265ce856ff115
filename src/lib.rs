//! Pickabook client: fans a photo out into several generated storybook
//! characters, tracks the session, and downloads the variants the user keeps.

#![allow(clippy::multiple_crate_versions)]
#![deny(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::complexity)]
#![deny(clippy::correctness)]
#![deny(clippy::disallowed_methods)]
#![deny(clippy::expect_used)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::panic)]
#![deny(clippy::perf)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::unreachable)]
#![deny(clippy::unwrap_used)]
#![deny(warnings)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cli;
pub mod config;
pub mod constants;
pub mod download;
pub mod generation;
pub mod selection;
pub mod submission;
pub mod workflow;

pub use download::{DirectoryTarget, DownloadReport, Downloader, HttpFetcher};
pub use generation::{
    AggregationPolicy, ArtifactRef, ClientConfig, ErrorCause, GenerationOutcome,
    HttpGenerationClient, Orchestrator,
};
pub use selection::Selection;
pub use submission::{ImageBlob, Submission};
pub use workflow::{Phase, Workflow, WorkflowError, WorkflowState};
