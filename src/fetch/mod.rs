//! Downloads a backup set from the remote site and stores it on disk.
//!
//! The remote site answers with all three [artifacts](ArtifactKind) of the latest
//! backup at once. Artifacts that already exist on disk are never overwritten.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use derive_more::{Display, Error, From};

pub mod latin1;
pub mod transport;

pub use latin1::NonLatin1Char;
pub use transport::{HttpTransport, Response, Transport};

use crate::settings::BackupSettings;

/// API method of the remote site returning the latest backup.
pub const UPLOAD_BACKUP_METHOD: &str =
    "/api/method/cloud_backup.cloud_backup.cloud_backup.upload_backup";

/// Suffix of artifacts that are still being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// The artifacts making up a backup set.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    #[display("database dump")]
    Database,
    #[display("public files archive")]
    PublicFiles,
    #[display("private files archive")]
    PrivateFiles,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Database, Self::PublicFiles, Self::PrivateFiles];

    /// Key of the artifact in the response.
    pub fn key(self) -> &'static str {
        match self {
            Self::Database => "backup",
            Self::PublicFiles => "public_files",
            Self::PrivateFiles => "private_files",
        }
    }
}

/// A decoded artifact as received from the remote site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub kind: ArtifactKind,
    pub filename: String,
    pub content: Vec<u8>,
}

/// What happened to an artifact on disk.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum WriteStatus {
    #[display("written")]
    Written,
    /// A file with the same name already existed and was kept.
    #[display("skipped")]
    Skipped,
    #[display("dry-run")]
    DryRun,
}

/// An artifact of the [BackupSet] and its location on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size: usize,
    pub status: WriteStatus,
}

/// The three artifacts of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub artifacts: Vec<StoredArtifact>,
}

impl BackupSet {
    pub fn written(&self) -> impl Iterator<Item = &StoredArtifact> {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.status == WriteStatus::Written)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StoredArtifact> {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.status == WriteStatus::Skipped)
    }
}

/// Errors on fetching a backup set.
#[derive(Debug, Display, Error, From)]
pub enum FetchError {
    /// The remote site couldn't be reached.
    #[display("Remote site unavailable: {_0}")]
    RemoteUnavailable(io::Error),
    /// The remote site answered with a status other than `200 OK`.
    #[display("Remote site answered with status {_0}")]
    UnexpectedStatus(#[error(ignore)] u16),
    /// The response isn't the expected JSON.
    #[display("Malformed response: {_0}")]
    #[from]
    MalformedResponse(serde_json::Error),
    /// The content of an artifact can't be decoded into bytes.
    #[display("Content of the {kind} can't be decoded: {source}")]
    InvalidContent {
        kind: ArtifactKind,
        source: NonLatin1Char,
    },
    /// The filename would place the artifact outside of the backup directory.
    #[display("Refusing unsafe filename of the {kind}: {filename:?}")]
    UnsafeFilename { kind: ArtifactKind, filename: String },
    /// The backup directory can't be created.
    #[display("Unable to create backup directory: {_0}")]
    DestinationUnavailable(io::Error),
    /// Writing an artifact failed, artifacts of the set already on disk stay.
    #[display(
        "Writing the {artifact} failed with {} artifact(s) of the set on disk: {source}",
        written.len() + skipped.len()
    )]
    PartialWriteFailure {
        /// Written by this fetch before the failure.
        written: Vec<PathBuf>,
        /// Already on disk before this fetch.
        skipped: Vec<PathBuf>,
        artifact: ArtifactKind,
        source: io::Error,
    },
}

impl FetchError {
    /// If the error originates from the remote site rather than the local disk.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_) | Self::UnexpectedStatus(_) | Self::MalformedResponse(_)
        )
    }
}

#[derive(serde::Deserialize)]
struct Envelope {
    message: Message,
}

#[derive(serde::Deserialize)]
struct Message {
    backup: RemoteFile,
    public_files: RemoteFile,
    private_files: RemoteFile,
}

#[derive(serde::Deserialize)]
struct RemoteFile {
    filename: String,
    content: String,
}

/// Fetches backup sets into a backup directory.
#[derive(Debug, Clone)]
pub struct Fetcher<T> {
    transport: T,
    backup_dir: PathBuf,
    dry_run: bool,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, backup_dir: impl Into<PathBuf>) -> Self {
        let backup_dir = backup_dir.into();
        if backup_dir.is_relative() {
            log::debug!(target: "fetch", "backup_dir is relative: {}", backup_dir.display());
        }

        Self {
            transport,
            backup_dir,
            dry_run: false,
        }
    }

    /// On a dry run the backup set is downloaded and decoded but not written.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Url of the API method on the remote site.
    pub fn endpoint(settings: &BackupSettings) -> String {
        format!(
            "{}{UPLOAD_BACKUP_METHOD}",
            settings.remote_url.trim().trim_end_matches('/')
        )
    }

    /// Downloads the latest backup set and stores the artifacts not yet on disk.
    pub fn fetch(&self, settings: &BackupSettings) -> Result<BackupSet, FetchError> {
        let artifacts = self.download(settings)?;
        self.store(artifacts)
    }

    /// Downloads and decodes the latest backup set without touching the disk.
    pub fn download(&self, settings: &BackupSettings) -> Result<Vec<BackupArtifact>, FetchError> {
        let url = Self::endpoint(settings);
        let authorization = format!("token {}:{}", settings.api_key, settings.api_secret);
        log::info!(target: "fetch", "Requesting backup from {url}");

        let response = self
            .transport
            .get(&url, &authorization)
            .map_err(FetchError::RemoteUnavailable)?;
        if response.status != 200 {
            return Err(FetchError::UnexpectedStatus(response.status));
        }

        let Envelope { message } = serde_json::from_slice(&response.body)?;
        let Message {
            backup,
            public_files,
            private_files,
        } = message;

        // decode everything before writing, so a malformed set leaves no files behind
        ArtifactKind::ALL
            .into_iter()
            .zip([backup, public_files, private_files])
            .map(|(kind, remote)| decode_artifact(kind, remote))
            .collect()
    }

    fn store(&self, artifacts: Vec<BackupArtifact>) -> Result<BackupSet, FetchError> {
        if !self.dry_run {
            fs::create_dir_all(&self.backup_dir).map_err(FetchError::DestinationUnavailable)?;
        }

        let mut stored: Vec<StoredArtifact> = Vec::with_capacity(artifacts.len());
        let mut written = Vec::new();
        for BackupArtifact {
            kind,
            filename,
            content,
        } in artifacts
        {
            let path = self.backup_dir.join(&filename);
            let status = if path.exists() {
                log::debug!(target: "fetch", "Skipping {kind}, already exists: {}", path.display());
                WriteStatus::Skipped
            } else if self.dry_run {
                log::debug!(target: "fetch", "Would write {kind} to {}", path.display());
                WriteStatus::DryRun
            } else {
                log::debug!(target: "fetch", "Writing {kind} to {}", path.display());
                if let Err(source) = write_artifact(&path, &content) {
                    let skipped: Vec<_> = stored
                        .iter()
                        .filter(|artifact| artifact.status == WriteStatus::Skipped)
                        .map(|artifact| artifact.path.clone())
                        .collect();
                    if !stored.is_empty() {
                        // a retry skips these, even if the remote set changed meanwhile
                        log::warn!(
                            target: "fetch",
                            "Backup set is incomplete, {} artifact(s) stay on disk",
                            stored.len()
                        );
                    }
                    return Err(FetchError::PartialWriteFailure {
                        written,
                        skipped,
                        artifact: kind,
                        source,
                    });
                }
                written.push(path.clone());
                WriteStatus::Written
            };

            stored.push(StoredArtifact {
                kind,
                path,
                size: content.len(),
                status,
            });
        }

        log::info!(
            target: "fetch",
            "Fetched backup set into {}: {} written, {} skipped",
            self.backup_dir.display(),
            written.len(),
            stored.iter().filter(|a| a.status == WriteStatus::Skipped).count()
        );

        Ok(BackupSet { artifacts: stored })
    }
}

fn decode_artifact(kind: ArtifactKind, remote: RemoteFile) -> Result<BackupArtifact, FetchError> {
    let RemoteFile { filename, content } = remote;

    if !is_plain_filename(&filename) {
        return Err(FetchError::UnsafeFilename { kind, filename });
    }
    let content =
        latin1::decode(&content).map_err(|source| FetchError::InvalidContent { kind, source })?;

    Ok(BackupArtifact {
        kind,
        filename,
        content,
    })
}

/// A single normal path component, e.g. no `..`, `/` or drive prefix.
fn is_plain_filename(filename: &str) -> bool {
    let mut components = Path::new(filename).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == filename
    ) && !filename.ends_with(PARTIAL_SUFFIX)
}

/// Writes `content` next to `path` first and moves it into place once complete.
fn write_artifact(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut partial_name = path.file_name().unwrap_or_default().to_os_string();
    partial_name.push(PARTIAL_SUFFIX);
    let partial = path.with_file_name(partial_name);

    let result = (|| {
        let mut file = File::create(&partial)?;
        file.write_all(content)?;
        file.sync_all()?;

        let len = file.metadata()?.len();
        if len != content.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("wrote {len} of {} bytes", content.len()),
            ));
        }

        fs::rename(&partial, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}
