//! Step sources.
//!
//! A [`StepMap`] is an ordered `version -> step` mapping. Callback steps are
//! merged into one directly; file steps are discovered on disk by a
//! [`StepReader`], one file per version.

use crate::error::ReadError;
use crate::step::Step;
use crate::version::{is_newer, sort_by_version};
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Extension of step files discovered by [`StepReader`].
pub const DEFAULT_STEP_EXTENSION: &str = "sh";

/// Ordered mapping of version to step.
///
/// Holds at most one step per version string. Entries are kept sorted by
/// version after every merge; equal-ranking versions keep insertion order.
#[derive(Clone, Default)]
pub struct StepMap {
    entries: Vec<(String, Arc<dyn Step>)>,
}

impl StepMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `steps` into the map and re-sort it.
    ///
    /// A step whose version is already present replaces the existing one.
    pub fn merge<I, V>(&mut self, steps: I)
    where
        I: IntoIterator<Item = (V, Arc<dyn Step>)>,
        V: Into<String>,
    {
        for (version, step) in steps {
            self.insert(version.into(), step);
        }
        sort_by_version(&mut self.entries, |(version, _)| version.as_str());
    }

    fn insert(&mut self, version: String, step: Arc<dyn Step>) {
        match self.entries.iter_mut().find(|(v, _)| *v == version) {
            Some(entry) => entry.1 = step,
            None => self.entries.push((version, step)),
        }
    }

    /// Iterate entries in version order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Step>)> {
        self.entries.iter().map(|(v, step)| (v.as_str(), step))
    }

    /// Versions in order.
    pub fn versions(&self) -> Vec<&str> {
        self.entries.iter().map(|(v, _)| v.as_str()).collect()
    }

    /// Versions strictly newer than `current`, in order.
    pub fn pending<'a>(&'a self, current: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .map(|(v, _)| v.as_str())
            .filter(move |v| is_newer(current, v))
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no steps.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for StepMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(v, _)| v)).finish()
    }
}

/// Discovers step files in directory trees.
///
/// Paths starting with `./` are relative to the installation root and paths
/// starting with `../` to its parent. The process working directory is
/// never used for those forms; any other path is taken as given.
#[derive(Debug, Clone)]
pub struct StepReader {
    install_root: Option<PathBuf>,
    extension: String,
}

impl Default for StepReader {
    fn default() -> Self {
        Self {
            install_root: None,
            extension: DEFAULT_STEP_EXTENSION.to_string(),
        }
    }
}

impl StepReader {
    /// Create a reader without an installation root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the installation root used for `./` and `../` paths.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = Some(root.into());
        self
    }

    /// Set the step file extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// The step file extension.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Resolve `path` against the installation root.
    ///
    /// A relative root is made absolute against the working directory and
    /// normalized first, so `../` always names the root's real parent.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ReadError> {
        if let Some(rest) = path.strip_prefix("./") {
            return Ok(self.root_for(path)?.join(rest));
        }

        if let Some(rest) = path.strip_prefix("../") {
            let root = self.root_for(path)?;
            let parent = root.parent().unwrap_or(root.as_path());
            return Ok(parent.join(rest));
        }

        Ok(PathBuf::from(path))
    }

    fn root_for(&self, path: &str) -> Result<PathBuf, ReadError> {
        let root = self
            .install_root
            .as_deref()
            .ok_or_else(|| ReadError::NoInstallRoot {
                path: path.to_string(),
            })?;

        let absolute = std::path::absolute(root).map_err(|source| ReadError::NotReadable {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(normalize(&absolute))
    }

    /// Resolve `path` and check it is a readable directory.
    ///
    /// Returns the canonical directory path.
    pub fn validate(&self, path: &str) -> Result<PathBuf, ReadError> {
        let resolved = self.resolve(path)?;

        let canonical = match fs::canonicalize(&resolved) {
            Ok(canonical) => canonical,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::NotFound { path: resolved });
            }
            Err(source) => {
                return Err(ReadError::NotReadable {
                    path: resolved,
                    source,
                });
            }
        };

        if !canonical.is_dir() {
            return Err(ReadError::NotDirectory { path: canonical });
        }

        if let Err(source) = fs::read_dir(&canonical) {
            return Err(ReadError::NotReadable {
                path: canonical,
                source,
            });
        }

        Ok(canonical)
    }

    /// Discover step files under every directory in `paths`.
    ///
    /// All directories are validated before any is scanned. Steps from all
    /// directories are accumulated; when two directories hold the same
    /// version the later directory wins. The result is sorted by version.
    pub fn discover<I, P>(&self, paths: I) -> Result<Vec<(String, PathBuf)>, ReadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let directories = paths
            .into_iter()
            .map(|path| self.validate(path.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut found: Vec<(String, PathBuf)> = Vec::new();
        for directory in &directories {
            for (version, file) in self.scan(directory) {
                match found.iter_mut().find(|(v, _)| *v == version) {
                    Some(entry) => {
                        tracing::debug!(
                            version = %version,
                            replaced = %entry.1.display(),
                            by = %file.display(),
                            "duplicate step version"
                        );
                        entry.1 = file;
                    }
                    None => found.push((version, file)),
                }
            }
        }

        sort_by_version(&mut found, |(version, _)| version.as_str());
        Ok(found)
    }

    /// List step files under `directory`, recursively.
    ///
    /// Unreadable entries and non-files are skipped.
    pub fn scan(&self, directory: &Path) -> Vec<(String, PathBuf)> {
        let mut steps = Vec::new();

        for entry in WalkDir::new(directory).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if path.extension() != Some(OsStr::new(&self.extension)) {
                continue;
            }
            if !path.is_file() || fs::File::open(path).is_err() {
                tracing::debug!(path = %path.display(), "skipping unreadable step file");
                continue;
            }

            let Some(version) = path.file_stem().and_then(OsStr::to_str) else {
                tracing::debug!(path = %path.display(), "skipping step file with non-UTF-8 name");
                continue;
            };

            steps.push((version.to_string(), path.to_path_buf()));
        }

        tracing::debug!(
            directory = %directory.display(),
            count = steps.len(),
            "scanned step directory"
        );
        steps
    }
}

/// Remove `.` and `..` components lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
