//! Archive directory naming and the file writes that go into an archive.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use comex_core::{archive_io, ComexError, ErrorInfo};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tempfile::NamedTempFile;
use tracing::debug;

/// Final and running metadata of a run.
pub const METADATA_FILE_NAME: &str = "experiment_meta.json";
/// Persisted data store.
pub const DATA_FILE_NAME: &str = "experiment_data.json";
/// Stem of the source snapshot; the extension follows the source file.
pub const CODE_FILE_STEM: &str = "experiment_code";
/// Body output and log records of a run.
pub const LOG_FILE_NAME: &str = "experiment_out.log";
/// Tracebacks of a failed body or analysis.
pub const ERROR_FILE_NAME: &str = "experiment_error.log";
/// Folder for tracked figures.
pub const TRACK_DIR_NAME: &str = ".track";

/// Leaf directory name used by every debug run.
pub const DEBUG_NAME: &str = "debug";

/// Default template for generated archive names.
pub const DEFAULT_NAME_FORMAT: &str = "{date}__{time}__{id}";

/// Maps `(base_path, namespace, debug)` to a freshly created archive directory.
///
/// Debug runs always land in `<base>/<namespace>/debug`, which is wiped and
/// recreated on every resolve. Concurrent debug runs of the same namespace
/// from several processes race on that directory; nothing locks it.
#[derive(Debug, Clone)]
pub struct ArchiveNamer {
    name_format: String,
    id_length: usize,
    prefix: Option<String>,
    name: Option<String>,
}

impl Default for ArchiveNamer {
    fn default() -> Self {
        Self {
            name_format: DEFAULT_NAME_FORMAT.to_string(),
            id_length: 4,
            prefix: None,
            name: None,
        }
    }
}

impl ArchiveNamer {
    /// Namer with the given folder template and random id length.
    pub fn new(name_format: impl Into<String>, id_length: usize) -> Self {
        Self {
            name_format: name_format.into(),
            id_length,
            ..Self::default()
        }
    }

    /// Prefix joined as `{prefix}__{generated}`. Empty prefixes are ignored.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Uses a fixed leaf name instead of the template.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Renders the template for the given instant with a fresh random id.
    pub fn format_name(&self, at: DateTime<Local>) -> String {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.id_length)
            .map(char::from)
            .collect();
        let generated = self
            .name_format
            .replace("{date}", &at.format("%d_%m_%Y").to_string())
            .replace("{time}", &at.format("%H_%M").to_string())
            .replace("{id}", &id);
        match &self.prefix {
            Some(prefix) => format!("{prefix}__{generated}"),
            None => generated,
        }
    }

    /// Creates the namespace directories and the leaf archive directory.
    ///
    /// Validation happens before anything is created: `base_path` must be an
    /// existing directory and `namespace` a relative slash-delimited path.
    pub fn resolve(&self, base_path: &Path, namespace: &str, debug: bool) -> Result<PathBuf, ComexError> {
        validate_base_path(base_path)?;
        let segments = namespace_segments(namespace)?;

        let mut current = base_path.to_path_buf();
        for segment in segments {
            current.push(segment);
            if !current.exists() {
                fs::create_dir(&current)
                    .map_err(|err| archive_io("archive.create_namespace", &current, err))?;
            }
        }

        let leaf = if debug {
            DEBUG_NAME.to_string()
        } else if let Some(name) = &self.name {
            name.clone()
        } else {
            self.format_name(Local::now())
        };
        let path = current.join(leaf);

        if debug && path.exists() {
            debug!(path = %path.display(), "clearing previous debug archive");
            fs::remove_dir_all(&path).map_err(|err| archive_io("archive.clear_debug", &path, err))?;
        }
        fs::create_dir(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                ComexError::Archive(
                    ErrorInfo::new("archive.collision", "archive directory already exists")
                        .with_context("path", path.display().to_string())
                        .with_hint("archives are never reused outside debug mode"),
                )
            } else {
                archive_io("archive.create", &path, err)
            }
        })?;
        let debug_run = debug;
        debug!(path = %path.display(), debug = debug_run, "archive directory created");
        Ok(path)
    }
}

/// Checks that `base_path` exists and is a directory.
pub fn validate_base_path(base_path: &Path) -> Result<(), ComexError> {
    if !base_path.exists() {
        return Err(ComexError::Config(
            ErrorInfo::new("archive.base_path_missing", "archive base path does not exist")
                .with_context("base_path", base_path.display().to_string())
                .with_hint("create the folder before running the experiment"),
        ));
    }
    if !base_path.is_dir() {
        return Err(ComexError::Config(
            ErrorInfo::new("archive.base_path_not_dir", "archive base path is not a directory")
                .with_context("base_path", base_path.display().to_string()),
        ));
    }
    Ok(())
}

/// Splits a namespace into directory names, rejecting absolute or escaping paths.
pub fn namespace_segments(namespace: &str) -> Result<Vec<&str>, ComexError> {
    let malformed = |reason: &str| {
        ComexError::Config(
            ErrorInfo::new("archive.bad_namespace", reason.to_string())
                .with_context("namespace", namespace),
        )
    };
    if namespace.trim().is_empty() {
        return Err(malformed("namespace is empty"));
    }
    let mut segments = Vec::new();
    for segment in namespace.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => segments.push(segment),
            _ => return Err(malformed("namespace segments must be plain directory names")),
        }
    }
    Ok(segments)
}

/// Writes `bytes` through a sibling temp file and renames it into place.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ComexError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file =
        NamedTempFile::new_in(dir).map_err(|err| archive_io("archive.temp_file", path, err))?;
    file.write_all(bytes)
        .map_err(|err| archive_io("archive.write", path, err))?;
    file.persist(path)
        .map_err(|err| archive_io("archive.persist", path, err.error))?;
    Ok(())
}

/// Appends text to a log-style file, creating it when missing.
pub fn append_text(path: &Path, text: &str) -> Result<(), ComexError> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| archive_io("archive.open", path, err))?;
    file.write_all(text.as_bytes())
        .map_err(|err| archive_io("archive.write", path, err))
}
