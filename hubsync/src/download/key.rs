//! Download keys and artifact locators.

use std::fmt;
use std::str::FromStr;

use super::error::DownloadError;

/// Identifier for one downloadable artifact.
///
/// Keys are the deduplication unit: two requests with the same key never
/// produce two concurrent transfers. A key is typically `{repo}` or
/// `{repo}/{path}` (see [`DownloadKey::for_source`]) but any non-empty string
/// is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownloadKey(String);

impl DownloadKey {
    /// Create a key, rejecting empty or whitespace-only strings.
    pub fn new(key: impl Into<String>) -> Result<Self, DownloadError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "download key is empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Derive the conventional key for a source: `repo` or `repo/path`.
    pub fn for_source(source: &SourceParams) -> Self {
        match source.path.as_deref() {
            Some(path) if !path.is_empty() => {
                Self(format!("{}/{}", source.repo_id, path.trim_start_matches('/')))
            }
            _ => Self(source.repo_id.clone()),
        }
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DownloadKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for DownloadKey {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Locator for the artifact a download fetches.
///
/// Sent to the server when the channel for a download is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParams {
    /// Remote repository id, e.g. `org/model`.
    pub repo_id: String,
    /// Artifact kind, e.g. `checkpoints` or `loras`.
    pub kind: String,
    /// Optional path of a single file or folder inside the repository.
    pub path: Option<String>,
    /// Glob patterns selecting which files to fetch.
    pub include_patterns: Vec<String>,
    /// Glob patterns of files to skip.
    pub exclude_patterns: Vec<String>,
}

impl SourceParams {
    /// Create a locator for a whole repository.
    pub fn new(repo_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            kind: kind.into(),
            path: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Restrict the download to a path inside the repository.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add an include pattern.
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    /// Add an exclude pattern.
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Check the locator before it is handed to a channel.
    ///
    /// Patterns are matched server-side, but a pattern that does not parse
    /// as a glob here would never match anything there either.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.repo_id.trim().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "repo id is empty".to_string(),
            ));
        }
        if self.kind.trim().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "artifact kind is empty".to_string(),
            ));
        }

        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            glob::Pattern::new(pattern).map_err(|e| {
                DownloadError::InvalidRequest(format!("invalid file pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}
