//! Digest snapshot of the sources that make up a composed experiment.

use std::fs;
use std::path::{Path, PathBuf};

use comex_core::{archive_io, ComexError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::serde::to_canonical_json_bytes;

/// File name of the snapshot inside an archive.
pub const DEPENDENCIES_FILE_NAME: &str = ".dependencies.json";

/// One snapshotted source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDigest {
    /// Name of the copy inside the archive.
    pub archive_name: String,
    /// Where the file was copied from.
    pub original_path: PathBuf,
    /// Length in bytes.
    pub size: u64,
    /// Hex encoded SHA-256 of the file contents.
    pub sha256: String,
}

/// Contents of `.dependencies.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    /// Crate that wrote the snapshot.
    pub framework: String,
    /// Its version.
    pub framework_version: String,
    /// One entry per archived source, the experiment's own code last.
    pub sources: Vec<SourceDigest>,
    /// SHA-256 over the canonical JSON of `sources`; equal for identical compositions.
    pub composition_sha256: String,
}

/// Hex encoded SHA-256 of `bytes`.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digests every `(archive_name, original_path)` pair from the archived copies in `archive`.
pub fn snapshot_sources(archive: &Path, sources: &[(String, PathBuf)]) -> Result<DependencySnapshot, ComexError> {
    let mut digests = Vec::with_capacity(sources.len());
    for (archive_name, original_path) in sources {
        let copy = archive.join(archive_name);
        let bytes = fs::read(&copy).map_err(|err| archive_io("reproducible.read", &copy, err))?;
        digests.push(SourceDigest {
            archive_name: archive_name.clone(),
            original_path: original_path.clone(),
            size: bytes.len() as u64,
            sha256: digest_bytes(&bytes),
        });
    }
    let composition_sha256 = digest_bytes(&to_canonical_json_bytes(&digests)?);
    Ok(DependencySnapshot {
        framework: env!("CARGO_PKG_NAME").to_string(),
        framework_version: env!("CARGO_PKG_VERSION").to_string(),
        sources: digests,
        composition_sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn composition_digest_follows_source_contents() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for dir in [first.path(), second.path()] {
            fs::write(dir.join("base.rs"), "// base\n").unwrap();
        }
        let sources = [("base.rs".to_string(), PathBuf::from("/src/base.rs"))];

        let one = snapshot_sources(first.path(), &sources).unwrap();
        let two = snapshot_sources(second.path(), &sources).unwrap();
        assert_eq!(one.composition_sha256, two.composition_sha256);
        assert_eq!(
            one.composition_sha256,
            digest_bytes(&to_canonical_json_bytes(&one.sources).unwrap())
        );

        fs::write(second.path().join("base.rs"), "// changed\n").unwrap();
        let changed = snapshot_sources(second.path(), &sources).unwrap();
        assert_ne!(one.composition_sha256, changed.composition_sha256);
    }
}
