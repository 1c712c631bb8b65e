//! Deployment artifact builder
//!
//! Three packages are produced, all as zip archives held in memory:
//!
//! - the handler package: the handler source tree under a fixed prefix plus
//!   the entry point renamed to `__main__.py` at the archive root
//! - the dependencies layer: a requirements manifest installed into an
//!   isolated directory and archived under `python/`
//! - the probe package: a single `__main__.py` reporting what the
//!   environment has preinstalled
//!
//! Archive sizes are not checked here; the platform rejects oversized
//! packages at deploy time.

use async_trait::async_trait;
use bytes::Bytes;
use fnbridge_core::config::ArtifactConfig;
use fnbridge_core::BackendError;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name the platform loads as the main module
pub const MAIN_MODULE: &str = "__main__.py";

/// Directory layer contents must live under to land on the import path
pub const LAYER_PREFIX: &str = "python";

/// Directories never shipped
pub const EXCLUDED_DIRS: &[&str] = &["__pycache__"];

const PROBE_SOURCE: &str = include_str!("../assets/probe.py");

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to write archive: {0}")]
    Write(#[from] std::io::Error),

    #[error("invalid requirement on line {line}: {text:?}")]
    InvalidRequirement { line: usize, text: String },

    #[error("no installer command configured")]
    NoInstaller,

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    Install {
        command: String,
        status: String,
        stderr: String,
    },
}

/// A file of a source tree, path relative to the tree root with `/` separators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub contents: Bytes,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A file as it will be written into an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub contents: Bytes,
}

/// Map a source tree onto archive entries under `prefix`.
///
/// Files inside any directory named in `excluded_dirs` are dropped. The
/// result is sorted by name so identical trees give identical archives.
pub fn archive_entries<I>(files: I, prefix: &str, excluded_dirs: &[&str]) -> Vec<ArchiveEntry>
where
    I: IntoIterator<Item = SourceFile>,
{
    let mut entries: Vec<ArchiveEntry> = files
        .into_iter()
        .filter(|file| {
            let mut dirs = file.path.split('/').rev().skip(1);
            !dirs.any(|dir| excluded_dirs.contains(&dir))
        })
        .map(|file| {
            let path = file.path.trim_start_matches('/');
            let name = if prefix.is_empty() {
                path.to_string()
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), path)
            };
            ArchiveEntry {
                name,
                contents: file.contents,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Read every file under `root`, skipping excluded directories
pub fn read_tree(root: &Path, excluded_dirs: &[&str]) -> Result<Vec<SourceFile>, ArtifactError> {
    let walker = WalkDir::new(root).follow_links(true).into_iter();
    let mut files = Vec::new();

    for entry in walker.filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.file_name()
                .to_str()
                .is_some_and(|name| excluded_dirs.contains(&name)))
    }) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents = std::fs::read(entry.path()).map_err(|source| ArtifactError::Read {
            path: entry.path().to_path_buf(),
            source,
        })?;

        files.push(SourceFile::new(path, contents));
    }

    Ok(files)
}

/// Write entries into a deflated zip archive
pub fn write_archive(entries: &[ArchiveEntry]) -> Result<Bytes, ArtifactError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        zip.write_all(&entry.contents)?;
    }

    Ok(Bytes::from(zip.finish()?.into_inner()))
}

/// Parse a `package==version` manifest, skipping blanks and comments
pub fn parse_manifest(text: &str) -> Result<Vec<String>, ArtifactError> {
    let mut requirements = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.split_whitespace().count() != 1 {
            return Err(ArtifactError::InvalidRequirement {
                line: index + 1,
                text: line.to_string(),
            });
        }
        requirements.push(line.to_string());
    }
    Ok(requirements)
}

/// Source of the packages the lifecycle manager deploys
#[async_trait]
pub trait Packager: Send + Sync {
    async fn handler_package(&self) -> Result<Bytes, BackendError>;

    async fn dependency_layer(&self) -> Result<Bytes, BackendError>;

    fn probe_package(&self) -> Result<Bytes, BackendError>;
}

/// Builds packages from the local filesystem.
///
/// Tree walks and archive writes run on the blocking pool when driven
/// through [`Packager`].
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    config: ArtifactConfig,
    archive_prefix: String,
}

impl ArtifactBuilder {
    /// `archive_prefix` is the directory the handler tree is placed under
    pub fn new(config: ArtifactConfig, archive_prefix: impl Into<String>) -> Self {
        Self {
            config,
            archive_prefix: archive_prefix.into(),
        }
    }

    pub fn build_handler_package(&self) -> Result<Bytes, BackendError> {
        let source_dir = &self.config.handler_source_dir;
        let entry_point = &self.config.entry_point;
        let artifact = format!("handler ({})", source_dir.display());
        debug!(source = %source_dir.display(), "Building handler package");

        let main = std::fs::read(entry_point).map_err(|source| {
            BackendError::packaging(
                &artifact,
                ArtifactError::Read {
                    path: entry_point.clone(),
                    source,
                },
            )
        })?;
        let files = read_tree(source_dir, EXCLUDED_DIRS)
            .map_err(|e| BackendError::packaging(&artifact, e))?;

        let mut entries = vec![ArchiveEntry {
            name: MAIN_MODULE.to_string(),
            contents: Bytes::from(main),
        }];
        entries.extend(archive_entries(files, &self.archive_prefix, EXCLUDED_DIRS));

        let package = write_archive(&entries).map_err(|e| BackendError::packaging(&artifact, e))?;
        info!(entries = entries.len(), size = package.len(), "Built handler package");
        Ok(package)
    }

    /// Install `manifest` into a scratch directory and archive it as a layer
    pub async fn build_dependency_layer(&self, manifest: &Path) -> Result<Bytes, BackendError> {
        let artifact = format!("dependencies layer ({})", manifest.display());

        let text = tokio::fs::read_to_string(manifest).await.map_err(|source| {
            BackendError::packaging(
                &artifact,
                ArtifactError::Read {
                    path: manifest.to_path_buf(),
                    source,
                },
            )
        })?;
        let requirements =
            parse_manifest(&text).map_err(|e| BackendError::packaging(&artifact, e))?;

        let scratch = tempfile::tempdir()
            .map_err(|e| BackendError::packaging(&artifact, ArtifactError::Write(e)))?;
        let target = scratch.path().join(LAYER_PREFIX);
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| BackendError::packaging(&artifact, ArtifactError::Write(e)))?;

        if !requirements.is_empty() {
            self.install(&requirements, &target)
                .await
                .map_err(|e| BackendError::packaging(&artifact, e))?;
        }

        // `scratch` outlives the blocking task
        let root = target.clone();
        let layer = tokio::task::spawn_blocking(move || {
            let files = read_tree(&root, EXCLUDED_DIRS)?;
            write_archive(&archive_entries(files, LAYER_PREFIX, EXCLUDED_DIRS))
        })
        .await
        .map_err(|e| BackendError::packaging(&artifact, e))?
        .map_err(|e| BackendError::packaging(&artifact, e))?;
        drop(scratch);

        info!(
            requirements = requirements.len(),
            size = layer.len(),
            "Built dependencies layer"
        );
        Ok(layer)
    }

    async fn install(&self, requirements: &[String], target: &Path) -> Result<(), ArtifactError> {
        let (program, args) = self
            .config
            .installer
            .split_first()
            .ok_or(ArtifactError::NoInstaller)?;

        debug!(
            installer = %program,
            target = %target.display(),
            requirements = ?requirements,
            "Installing layer dependencies"
        );

        let output = Command::new(program)
            .args(args)
            .arg("--target")
            .arg(target)
            .args(requirements)
            .output()
            .await
            .map_err(|source| ArtifactError::Spawn {
                command: self.config.installer.join(" "),
                source,
            })?;

        if !output.status.success() {
            return Err(ArtifactError::Install {
                command: self.config.installer.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn build_probe_package() -> Result<Bytes, BackendError> {
        let entries = [ArchiveEntry {
            name: MAIN_MODULE.to_string(),
            contents: Bytes::from_static(PROBE_SOURCE.as_bytes()),
        }];
        write_archive(&entries).map_err(|e| BackendError::packaging("probe", e))
    }
}

#[async_trait]
impl Packager for ArtifactBuilder {
    async fn handler_package(&self) -> Result<Bytes, BackendError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || builder.build_handler_package())
            .await
            .map_err(|e| BackendError::packaging("handler", e))?
    }

    async fn dependency_layer(&self) -> Result<Bytes, BackendError> {
        self.build_dependency_layer(&self.config.requirements).await
    }

    fn probe_package(&self) -> Result<Bytes, BackendError> {
        Self::build_probe_package()
    }
}
