//! Saving selected artifacts, one at a time, with a best-effort fallback.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use image::ImageFormat;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_EXTENSION, DOWNLOAD_PREFIX};
use crate::generation::ArtifactRef;

/// Fetching an artifact's bytes failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a usable response.
    #[error("Request for {url} failed: {source}")]
    Transport {
        /// Artifact URL
        url: String,
        /// Underlying client error
        source: reqwest::Error,
    },
    /// The server answered with a non-2xx status.
    #[error("{url} returned {status}")]
    Status {
        /// Artifact URL
        url: String,
        /// HTTP status code
        status: u16,
    },
}

/// Saving or opening an artifact failed.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Creating the directory or writing the file failed.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// Destination file
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// There's nothing to hand the remote reference to.
    #[error("No opener configured for {0}")]
    NoOpener(String),
    /// The opener command couldn't be run.
    #[error("Failed to launch {opener}: {source}")]
    Opener {
        /// Opener command
        opener: String,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// The opener ran but reported failure.
    #[error("{opener} exited with {status}")]
    OpenerExit {
        /// Opener command
        opener: String,
        /// How it exited
        status: ExitStatus,
    },
}

/// One network fetch of an artifact's bytes.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Returns the artifact's bytes, or why they couldn't be had.
    async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, FetchError>;
}

/// Where downloads end up.
#[async_trait]
pub trait SaveTarget: Send + Sync {
    /// Stores fetched bytes under `file_name`.
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, SaveError>;

    /// Hands the remote reference itself to the platform, no bytes fetched.
    async fn open_remote(&self, file_name: &str, artifact: &ArtifactRef) -> Result<(), SaveError>;
}

/// Plain GET of the artifact URL; any non-2xx is a failure.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Fetches with a shared client so connection settings match generation.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, FetchError> {
        let url = artifact.as_str();
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

/// Writes into a directory; the fallback launches an external opener.
#[derive(Clone, Debug)]
pub struct DirectoryTarget {
    dir: PathBuf,
    opener: Option<String>,
}

impl DirectoryTarget {
    /// Saves into `dir`, creating it on first write. No opener until one is set.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            opener: None,
        }
    }

    /// Command used to open remote references, eg `xdg-open`.
    pub fn with_opener(mut self, opener: impl Into<String>) -> Self {
        let opener = opener.into();
        self.opener = (!opener.trim().is_empty()).then_some(opener);
        self
    }

    /// Directory files are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Opener for the current platform, if there's an obvious one.
pub fn platform_opener() -> Option<&'static str> {
    if cfg!(target_os = "macos") {
        Some("open")
    } else if cfg!(target_os = "windows") {
        Some("explorer")
    } else if cfg!(unix) {
        Some("xdg-open")
    } else {
        None
    }
}

#[async_trait]
impl SaveTarget for DirectoryTarget {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, SaveError> {
        let path = self.dir.join(file_name);
        let write_error = |source: std::io::Error| SaveError::Write {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_error)?;
        tokio::fs::write(&path, bytes).await.map_err(write_error)?;
        Ok(path)
    }

    async fn open_remote(&self, file_name: &str, artifact: &ArtifactRef) -> Result<(), SaveError> {
        let Some(opener) = self.opener.as_deref() else {
            return Err(SaveError::NoOpener(artifact.to_string()));
        };
        debug!("Opening {artifact} with {opener} (wanted as {file_name})");
        // openers hand off and exit; waiting on them reaps the child
        let status = Command::new(opener)
            .arg(artifact.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| SaveError::Opener {
                opener: opener.to_string(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(SaveError::OpenerExit {
                opener: opener.to_string(),
                status,
            })
        }
    }
}

/// What happened to one requested download.
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Bytes were fetched and stored.
    Saved(PathBuf),
    /// The primary path failed; the remote reference was handed off instead.
    FellBack {
        /// Why the primary path failed
        reason: String,
    },
    /// Both paths failed.
    Failed {
        /// Why the primary path failed
        reason: String,
        /// Why the fallback failed
        fallback: String,
    },
}

/// One attempted download.
#[derive(Debug, PartialEq, Eq)]
pub struct DownloadItem {
    /// What was requested
    pub artifact: ArtifactRef,
    /// Name it was (or would have been) saved under
    pub file_name: String,
    /// How it went
    pub status: DownloadStatus,
}

/// Per-item outcomes, in the order they were attempted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// One entry per requested artifact
    pub items: Vec<DownloadItem>,
}

impl DownloadReport {
    /// Items whose bytes were stored.
    pub fn saved(&self) -> usize {
        self.count(|status| matches!(status, DownloadStatus::Saved(_)))
    }

    /// Items handed to the opener instead.
    pub fn fell_back(&self) -> usize {
        self.count(|status| matches!(status, DownloadStatus::FellBack { .. }))
    }

    /// Items where both paths failed.
    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, DownloadStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&DownloadStatus) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.status)).count()
    }
}

/// `{prefix}-{index+1}.{ext}`
pub fn download_file_name(index: usize, extension: &str) -> String {
    format!("{DOWNLOAD_PREFIX}-{}.{extension}", index + 1)
}

/// Extension matching the image bytes, falling back to `png`.
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| match format {
            ImageFormat::Jpeg => Some("jpg"),
            other => other.extensions_str().first().copied(),
        })
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Runs downloads sequentially so save prompts stay ordered.
pub struct Downloader<F, T> {
    fetcher: F,
    target: T,
}

impl<F: ArtifactFetcher, T: SaveTarget> Downloader<F, T> {
    /// Pairs a fetcher with where its results go.
    pub fn new(fetcher: F, target: T) -> Self {
        Self { fetcher, target }
    }

    /// Where downloads are saved.
    pub fn target(&self) -> &T {
        &self.target
    }

    async fn primary(&self, index: usize, artifact: &ArtifactRef) -> Result<(String, PathBuf), String> {
        let bytes = self
            .fetcher
            .fetch(artifact)
            .await
            .map_err(|err| err.to_string())?;
        let file_name = download_file_name(index, sniff_extension(&bytes));
        let path = self
            .target
            .save(&file_name, &bytes)
            .await
            .map_err(|err| err.to_string())?;
        Ok((file_name, path))
    }

    /// Attempts every artifact exactly once, in order. A failing item never
    /// stops the ones after it.
    pub async fn download_all(&self, artifacts: &[ArtifactRef]) -> DownloadReport {
        let mut report = DownloadReport::default();
        for (index, artifact) in artifacts.iter().enumerate() {
            let item = match self.primary(index, artifact).await {
                Ok((file_name, path)) => {
                    info!("Saved {artifact} to {}", path.display());
                    DownloadItem {
                        artifact: artifact.clone(),
                        file_name,
                        status: DownloadStatus::Saved(path),
                    }
                }
                Err(reason) => {
                    warn!("Download of {artifact} failed, falling back: {reason}");
                    let file_name = download_file_name(index, DEFAULT_EXTENSION);
                    let status = match self.target.open_remote(&file_name, artifact).await {
                        Ok(()) => DownloadStatus::FellBack { reason },
                        Err(err) => {
                            warn!("Fallback for {artifact} failed: {err}");
                            DownloadStatus::Failed {
                                reason,
                                fallback: err.to_string(),
                            }
                        }
                    };
                    DownloadItem {
                        artifact: artifact.clone(),
                        file_name,
                        status,
                    }
                }
            };
            report.items.push(item);
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::submission::tests::PNG_MAGIC;

    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Serves PNG bytes for every reference except the ones listed as broken.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub(crate) broken: HashSet<String>,
        pub(crate) log: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub(crate) fn failing(broken: &[&str]) -> Self {
            Self {
                broken: broken.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ArtifactFetcher for FakeFetcher {
        async fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, FetchError> {
            self.log.lock().expect("log").push(artifact.to_string());
            if self.broken.contains(artifact.as_str()) {
                return Err(FetchError::Status {
                    url: artifact.to_string(),
                    status: 403,
                });
            }
            Ok(PNG_MAGIC.to_vec())
        }
    }

    /// Records saves and fallbacks; can be told to refuse fallbacks.
    #[derive(Default)]
    pub(crate) struct RecordingTarget {
        pub(crate) saved: Mutex<Vec<String>>,
        pub(crate) opened: Mutex<Vec<String>>,
        pub(crate) refuse_open: bool,
    }

    #[async_trait]
    impl SaveTarget for RecordingTarget {
        async fn save(&self, file_name: &str, _bytes: &[u8]) -> Result<PathBuf, SaveError> {
            self.saved.lock().expect("saved").push(file_name.to_string());
            Ok(PathBuf::from(file_name))
        }

        async fn open_remote(
            &self,
            _file_name: &str,
            artifact: &ArtifactRef,
        ) -> Result<(), SaveError> {
            self.opened.lock().expect("opened").push(artifact.to_string());
            if self.refuse_open {
                return Err(SaveError::NoOpener(artifact.to_string()));
            }
            Ok(())
        }
    }

    fn refs(urls: &[&str]) -> Vec<ArtifactRef> {
        urls.iter().map(|url| ArtifactRef::new(*url)).collect()
    }

    #[test]
    fn file_names_are_one_based() {
        assert_eq!(download_file_name(0, "png"), "pickabook-character-1.png");
        assert_eq!(download_file_name(2, "jpg"), "pickabook-character-3.jpg");
    }

    #[test]
    fn extension_follows_bytes() {
        assert_eq!(sniff_extension(PNG_MAGIC), "png");
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), "jpg");
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WEBPVP8 "), "webp");
        assert_eq!(sniff_extension(b"not an image"), "png");
    }

    #[tokio::test]
    async fn every_item_attempted_once_in_order() {
        let downloader = Downloader::new(FakeFetcher::default(), RecordingTarget::default());
        let report = downloader.download_all(&refs(&["a", "b", "c"])).await;

        assert_eq!(
            *downloader.fetcher.log.lock().expect("log"),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            *downloader.target.saved.lock().expect("saved"),
            vec![
                "pickabook-character-1.png",
                "pickabook-character-2.png",
                "pickabook-character-3.png"
            ]
        );
        assert_eq!(report.saved(), 3);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_and_continues() {
        let downloader = Downloader::new(FakeFetcher::failing(&["b"]), RecordingTarget::default());
        let report = downloader.download_all(&refs(&["a", "b", "c"])).await;

        assert_eq!(
            *downloader.fetcher.log.lock().expect("log"),
            vec!["a", "b", "c"]
        );
        assert_eq!(*downloader.target.opened.lock().expect("opened"), vec!["b"]);
        assert_eq!(report.saved(), 2);
        assert_eq!(report.fell_back(), 1);
        assert_eq!(report.items[1].file_name, "pickabook-character-2.png");
        assert!(matches!(report.items[1].status, DownloadStatus::FellBack { .. }));
        assert!(matches!(report.items[2].status, DownloadStatus::Saved(_)));
    }

    #[tokio::test]
    async fn failed_fallback_does_not_abort_siblings() {
        let target = RecordingTarget {
            refuse_open: true,
            ..Default::default()
        };
        let downloader = Downloader::new(FakeFetcher::failing(&["a", "b"]), target);
        let report = downloader.download_all(&refs(&["a", "b", "c"])).await;

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.saved(), 1);
        assert_eq!(*downloader.target.opened.lock().expect("opened"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn directory_target_writes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = DirectoryTarget::new(dir.path().join("nested"));
        let path = target
            .save("pickabook-character-1.png", PNG_MAGIC)
            .await
            .expect("save");
        assert_eq!(std::fs::read(&path).expect("read back"), PNG_MAGIC);
    }

    #[tokio::test]
    async fn directory_target_without_opener_refuses_fallback() {
        let target = DirectoryTarget::new("unused").with_opener("  ");
        let err = target
            .open_remote("x.png", &"http://img/x.png".into())
            .await
            .expect_err("no opener");
        assert!(matches!(err, SaveError::NoOpener(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn opener_exit_status_decides_fallback() {
        let artifact = ArtifactRef::new("http://img/x.png");
        DirectoryTarget::new("unused")
            .with_opener("true")
            .open_remote("x.png", &artifact)
            .await
            .expect("true exits cleanly");

        let err = DirectoryTarget::new("unused")
            .with_opener("false")
            .open_remote("x.png", &artifact)
            .await
            .expect_err("false exits non-zero");
        assert!(matches!(err, SaveError::OpenerExit { .. }));

        let err = DirectoryTarget::new("unused")
            .with_opener("pickabook-no-such-opener")
            .open_remote("x.png", &artifact)
            .await
            .expect_err("missing binary");
        assert!(matches!(err, SaveError::Opener { .. }));
    }

    /// Child pids of this process running `command` that are still zombies.
    #[cfg(target_os = "linux")]
    fn zombie_children(command: &str) -> Vec<String> {
        let name = format!("({command})");
        let mut zombies = Vec::new();
        for task in std::fs::read_dir("/proc/self/task").expect("tasks").flatten() {
            let children = std::fs::read_to_string(task.path().join("children")).unwrap_or_default();
            for pid in children.split_whitespace() {
                let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
                // state follows the parenthesised command name
                let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
                if stat.contains(&name) && state == Some("Z") {
                    zombies.push(pid.to_string());
                }
            }
        }
        zombies
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn opener_is_reaped_before_returning() {
        // `echo` so parallel tests using `true` don't show up here
        let target = DirectoryTarget::new("unused").with_opener("echo");
        let artifact = ArtifactRef::new("http://img/x.png");
        for _ in 0..5 {
            target.open_remote("x.png", &artifact).await.expect("open");
        }
        assert_eq!(zombie_children("echo"), Vec::<String>::new());
    }
}
