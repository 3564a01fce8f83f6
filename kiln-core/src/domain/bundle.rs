//! Bundle domain types

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use uuid::Uuid;

/// A validated, extracted upload ready to be built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescriptor {
    pub upload_id: Uuid,
    /// Root of the isolated workspace the archive was extracted into
    pub root_path: PathBuf,
    /// Entry file (build descriptor) relative to `root_path`
    pub entry_file: PathBuf,
    /// Known library names mentioned in the entry file. Advisory only.
    pub dependency_hints: BTreeSet<String>,
}

impl BundleDescriptor {
    /// Entry file path with forward slashes, as the builder expects it
    pub fn entry_file_str(&self) -> String {
        self.entry_file
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Presence of each known dependency marker in an entry file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    /// File name of the scanned entry file (e.g. `Dockerfile`)
    pub entry_file_name: String,
    pub markers: BTreeMap<String, bool>,
}

impl DependencyReport {
    /// Marker names that were found
    pub fn detected(&self) -> BTreeSet<String> {
        self.markers
            .iter()
            .filter(|(_, present)| **present)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
