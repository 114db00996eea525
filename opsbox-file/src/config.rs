//! Filesystem adapter configuration.

use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use opsbox_core::SourceError;

fn default_max_depth() -> usize {
    8
}

fn default_include() -> Vec<String> {
    vec![
        "**/*.md".to_owned(),
        "**/*.json".to_owned(),
        "**/*.txt".to_owned(),
    ]
}

fn default_priority() -> u32 {
    1
}

fn default_rate_per_sec() -> f64 {
    200.0
}

fn default_burst() -> u32 {
    50
}

/// Configuration of one filesystem source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Source name, unique within the registry.
    pub name: SmolStr,
    /// Routing priority; lower wins ties.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Root directories to index.
    pub base_paths: Vec<PathBuf>,
    /// Maximum traversal depth below each base path.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Include glob patterns, matched against paths relative to the base.
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// Exclude glob patterns; an excluded path never gets indexed.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Token-bucket refill rate for adapter calls.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Token-bucket burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl FileSystemConfig {
    /// Minimal config over one base path, defaults elsewhere.
    pub fn new(name: impl Into<SmolStr>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            priority: default_priority(),
            base_paths: vec![base_path.into()],
            max_depth: default_max_depth(),
            include: default_include(),
            exclude: Vec::new(),
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
        }
    }

    pub(crate) fn build_globs(&self) -> Result<(GlobSet, GlobSet), SourceError> {
        Ok((
            build_globset(&self.include)?,
            build_globset(&self.exclude)?,
        ))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, SourceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SourceError::Fatal(format!("invalid glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SourceError::Fatal(format!("glob set build failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_globs_compile() {
        let config = FileSystemConfig::new("docs", "/tmp/docs");
        let (include, exclude) = config.build_globs().unwrap();
        assert!(include.is_match("runbooks/db.md"));
        assert!(include.is_match("rb.json"));
        assert!(!include.is_match("image.png"));
        assert!(!exclude.is_match("runbooks/db.md"));
    }

    #[test]
    fn invalid_glob_is_fatal() {
        let mut config = FileSystemConfig::new("docs", "/tmp/docs");
        config.include = vec!["[".to_owned()];
        assert!(matches!(config.build_globs(), Err(SourceError::Fatal(_))));
    }
}
