//! Artifact Ingestion
//!
//! Accepts an uploaded zip archive, extracts it into an isolated workspace,
//! locates the build entry file and scans it for known dependency markers.
//! Filesystem work runs on the blocking pool.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::IngestSettings;
use kiln_core::domain::bundle::{BundleDescriptor, DependencyReport};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("uploaded archive is empty")]
    EmptyPayload,

    #[error("uploaded file is not a valid zip archive: {0}")]
    InvalidArchive(String),

    #[error("no {0} found in the uploaded archive")]
    MissingEntryFile(String),

    #[error("workspace I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub struct ArtifactIngestor {
    upload_root: PathBuf,
    entry_file: String,
    markers: Vec<String>,
}

impl ArtifactIngestor {
    pub fn new(settings: &IngestSettings) -> Self {
        Self {
            upload_root: settings.upload_dir.clone(),
            entry_file: settings.entry_file.clone(),
            markers: settings.dependency_markers.clone(),
        }
    }

    /// Directory an upload is extracted into
    pub fn workspace_path(&self, upload_id: Uuid) -> PathBuf {
        self.upload_root.join(upload_id.to_string())
    }

    /// Extracts an archive into a fresh workspace and validates it
    ///
    /// On any failure the workspace is removed again, so a rejected upload
    /// leaves nothing behind.
    ///
    /// # Returns
    /// The bundle descriptor with the entry file relative to the workspace root
    pub async fn ingest(&self, archive: Vec<u8>) -> Result<BundleDescriptor, IngestError> {
        if archive.is_empty() {
            return Err(IngestError::EmptyPayload);
        }

        let upload_id = Uuid::new_v4();
        let root = self.workspace_path(upload_id);
        let entry_file = self.entry_file.clone();
        let markers = self.markers.clone();

        info!("Ingesting upload {} ({} bytes)", upload_id, archive.len());

        let descriptor = tokio::task::spawn_blocking(move || {
            let result = ingest_into(&root, &archive, &entry_file, &markers);
            if result.is_err() {
                if let Err(e) = fs::remove_dir_all(&root) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to clean up workspace {}: {}", root.display(), e);
                    }
                }
            }
            result.map(|(entry, hints)| BundleDescriptor {
                upload_id,
                root_path: root,
                entry_file: entry,
                dependency_hints: hints,
            })
        })
        .await
        .map_err(|e| IngestError::Io(io::Error::other(e)))??;

        info!(
            "Upload {} extracted, entry file {}",
            upload_id,
            descriptor.entry_file_str()
        );

        Ok(descriptor)
    }

    /// Scans an archive's entry file for dependency markers without keeping it
    pub async fn inspect(&self, archive: Vec<u8>) -> Result<DependencyReport, IngestError> {
        if archive.is_empty() {
            return Err(IngestError::EmptyPayload);
        }

        let entry_file = self.entry_file.clone();
        let markers = self.markers.clone();

        tokio::task::spawn_blocking(move || -> Result<DependencyReport, IngestError> {
            let scratch = tempfile::Builder::new().prefix("kiln-inspect-").tempdir()?;
            extract(scratch.path(), &archive)?;

            let relative = find_entry_file(scratch.path(), &entry_file)?
                .ok_or_else(|| IngestError::MissingEntryFile(entry_file.clone()))?;
            let found = scan_markers(&scratch.path().join(relative), &markers)?;

            Ok(DependencyReport {
                entry_file_name: entry_file,
                markers: found,
            })
        })
        .await
        .map_err(|e| IngestError::Io(io::Error::other(e)))?
    }

    /// Deletes an upload workspace
    pub async fn release(&self, upload_id: Uuid) -> Result<(), IngestError> {
        let root = self.workspace_path(upload_id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                debug!("Removed workspace {}", root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn ingest_into(
    root: &Path,
    archive: &[u8],
    entry_file: &str,
    markers: &[String],
) -> Result<(PathBuf, BTreeSet<String>), IngestError> {
    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)?;
    }
    // create_dir (not _all): fails if the workspace already exists.
    fs::create_dir(root)?;

    extract(root, archive)?;

    let relative = find_entry_file(root, entry_file)?
        .ok_or_else(|| IngestError::MissingEntryFile(entry_file.to_string()))?;

    let hints = scan_markers(&root.join(&relative), markers)?
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(marker, _)| marker)
        .collect();

    Ok((relative, hints))
}

fn extract(root: &Path, archive: &[u8]) -> Result<(), IngestError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| IngestError::InvalidArchive(e.to_string()))?;

    debug!("Extracting {} entries into {}", zip.len(), root.display());

    zip.extract(root).map_err(extract_error)
}

/// Corrupt entry data surfaces as an I/O error while decompressing; only
/// genuine filesystem failures stay `Io`.
fn extract_error(err: ZipError) -> IngestError {
    match err {
        ZipError::Io(io)
            if matches!(
                io.kind(),
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
            ) =>
        {
            IngestError::InvalidArchive(io.to_string())
        }
        ZipError::Io(io) => IngestError::Io(io),
        other => IngestError::InvalidArchive(other.to_string()),
    }
}

/// Finds the first file called `name` below `root`
///
/// Depth-first, pre-order: a directory's own files are checked before its
/// subdirectories, and siblings are visited in lexicographic order. Symlinks
/// are never followed.
///
/// # Returns
/// The match relative to `root`, or `None`
pub fn find_entry_file(root: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    fn walk(dir: &Path, relative: &Path, name: &str) -> io::Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in &entries {
            if entry.file_type()?.is_file() && entry.file_name() == name {
                return Ok(Some(relative.join(name)));
            }
        }

        for entry in &entries {
            if entry.file_type()?.is_dir() {
                let child = relative.join(entry.file_name());
                if let Some(found) = walk(&entry.path(), &child, name)? {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    walk(root, Path::new(""), name)
}

/// Case-insensitive substring scan of a file for each marker
pub fn scan_markers(path: &Path, markers: &[String]) -> io::Result<BTreeMap<String, bool>> {
    let content = String::from_utf8_lossy(&fs::read(path)?).to_lowercase();

    Ok(markers
        .iter()
        .map(|marker| (marker.clone(), content.contains(&marker.to_lowercase())))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Builds an in-memory zip from `(path, contents)` pairs
    pub(crate) fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, contents) in files {
            writer
                .start_file(*path, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn ingestor(root: &Path) -> ArtifactIngestor {
        let mut settings = Config::default().ingest;
        settings.upload_dir = root.to_path_buf();
        ArtifactIngestor::new(&settings)
    }

    #[tokio::test]
    async fn test_ingest_finds_nested_entry_file_and_markers() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let archive = zip_bytes(&[
            ("README.md", "mentions torch but is not scanned"),
            (
                "project/Dockerfile",
                "FROM python:3.11\nRUN pip install NumPy pandas\n",
            ),
            ("project/train.py", "import numpy"),
        ]);

        let bundle = ingestor.ingest(archive).await.unwrap();

        assert_eq!(bundle.entry_file_str(), "project/Dockerfile");
        assert_eq!(bundle.root_path, dir.path().join(bundle.upload_id.to_string()));
        assert!(bundle.root_path.join("project/train.py").is_file());
        let hints: Vec<_> = bundle.dependency_hints.into_iter().collect();
        assert_eq!(hints, vec!["numpy".to_string(), "pandas".to_string()]);
    }

    #[tokio::test]
    async fn test_each_upload_gets_its_own_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());
        let archive = zip_bytes(&[("Dockerfile", "FROM alpine")]);

        let first = ingestor.ingest(archive.clone()).await.unwrap();
        let second = ingestor.ingest(archive).await.unwrap();

        assert_ne!(first.upload_id, second.upload_id);
        assert_ne!(first.root_path, second.root_path);
    }

    #[tokio::test]
    async fn test_missing_entry_file_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let err = ingestor
            .ingest(zip_bytes(&[("main.py", "print('hi')")]))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::MissingEntryFile(ref name) if name == "Dockerfile"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_and_empty_archives() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let err = ingestor.ingest(Vec::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyPayload));

        let err = ingestor
            .ingest(b"definitely not a zip".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidArchive(_)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_data_is_invalid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let contents = b"FROM alpine\nRUN echo corrupted\n";
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                "Dockerfile",
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(contents).unwrap();
        let mut archive = writer.finish().unwrap().into_inner();

        let offset = archive
            .windows(contents.len())
            .position(|w| w == contents)
            .unwrap();
        archive[offset] ^= 0x20;

        let err = ingestor.ingest(archive.clone()).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidArchive(_)), "{:?}", err);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let err = ingestor.inspect(archive).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidArchive(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_inspect_reports_every_marker() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let report = ingestor
            .inspect(zip_bytes(&[("Dockerfile", "RUN pip install numpy")]))
            .await
            .unwrap();

        assert_eq!(report.entry_file_name, "Dockerfile");
        assert_eq!(report.markers.get("numpy"), Some(&true));
        assert_eq!(report.markers.get("torch"), Some(&false));
        assert_eq!(report.markers.get("pandas"), Some(&false));
        assert_eq!(report.markers.get("tensorflow"), Some(&false));
        // Nothing is kept under the upload root.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_release_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());
        let bundle = ingestor
            .ingest(zip_bytes(&[("Dockerfile", "FROM alpine")]))
            .await
            .unwrap();

        ingestor.release(bundle.upload_id).await.unwrap();
        assert!(!bundle.root_path.exists());
        // Releasing twice is fine.
        ingestor.release(bundle.upload_id).await.unwrap();
    }

    #[test]
    fn test_search_prefers_shallow_files_then_lexicographic_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("a/deep")).unwrap();
        fs::write(root.join("b/Dockerfile"), "").unwrap();
        fs::write(root.join("a/deep/Dockerfile"), "").unwrap();

        let found = find_entry_file(root, "Dockerfile").unwrap().unwrap();
        assert_eq!(found, PathBuf::from("a").join("deep").join("Dockerfile"));

        fs::write(root.join("Dockerfile"), "").unwrap();
        let found = find_entry_file(root, "Dockerfile").unwrap().unwrap();
        assert_eq!(found, PathBuf::from("Dockerfile"));
    }

    #[test]
    fn test_search_is_case_sensitive_on_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dockerfile"), "").unwrap();
        assert!(find_entry_file(dir.path(), "Dockerfile").unwrap().is_none());
    }
}
