//! Artifact size hints.
//!
//! A size hint fills in `total_bytes` before the first frame so the UI can
//! show a determinate bar right away. It is best effort: a missing hint only
//! means an indeterminate bar until the server reports a total.

use std::collections::HashMap;

use super::key::SourceParams;

/// Looks up the expected size of a whole repository.
pub trait ArtifactSizeResolver: Send + Sync {
    /// Expected size in bytes, if known.
    fn resolve_artifact_size(&self, repo_id: &str) -> Option<u64>;
}

/// Resolver that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSizeHints;

impl ArtifactSizeResolver for NoSizeHints {
    fn resolve_artifact_size(&self, _repo_id: &str) -> Option<u64> {
        None
    }
}

impl ArtifactSizeResolver for HashMap<String, u64> {
    fn resolve_artifact_size(&self, repo_id: &str) -> Option<u64> {
        self.get(repo_id).copied()
    }
}

/// The hint to seed a new record with.
///
/// Sizes are known per repository, so a request for a single path inside
/// one gets no hint.
pub(crate) fn size_hint(resolver: &dyn ArtifactSizeResolver, source: &SourceParams) -> Option<u64> {
    if source.path.is_some() {
        return None;
    }
    resolver.resolve_artifact_size(&source.repo_id)
}
