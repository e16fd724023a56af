//! Worker-local affinity cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::error::Result;

const CACHE_FILE: &str = "affinity_cache.json";

/// Values this worker has executed against, per cache dimension.
///
/// Dimensions are context keys (sweep axes, mostly); the value sets only
/// grow. Persisted to the worker's state directory on every claim so a
/// restarted worker keeps its history.
#[derive(Debug, Clone)]
pub struct WorkerCache {
    path: PathBuf,
    dims: BTreeMap<String, BTreeSet<String>>,
}

impl WorkerCache {
    /// Load the cache from `state_dir`, starting empty when there is no
    /// usable file yet.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join(CACHE_FILE);
        let dims = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, dims }
    }

    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.dims)?)?;
        Ok(())
    }

    /// Record every dimension/value pair of a claimed job's context.
    pub fn observe(&mut self, context: &HashMap<String, String>) {
        for (dim, value) in context {
            self.dims
                .entry(dim.clone())
                .or_default()
                .insert(value.clone());
        }
    }

    /// Additive match count: one point per tracked dimension whose cached
    /// value set already holds the job's value. No weighting, so equal
    /// scores are common and ties are the selector's problem.
    pub fn score(&self, context: &HashMap<String, String>) -> usize {
        self.dims
            .iter()
            .filter(|(dim, values)| {
                context
                    .get(dim.as_str())
                    .is_some_and(|value| values.contains(value))
            })
            .count()
    }

    pub fn values(&self, dim: &str) -> Option<&BTreeSet<String>> {
        self.dims.get(dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn score_counts_matching_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = WorkerCache::load(dir.path());
        cache.observe(&ctx(&[("model", "m1"), ("dataset", "d1")]));

        assert_eq!(cache.score(&ctx(&[("model", "m1"), ("dataset", "d1")])), 2);
        assert_eq!(cache.score(&ctx(&[("model", "m1"), ("dataset", "d2")])), 1);
        assert_eq!(cache.score(&ctx(&[("model", "m2")])), 0);
        assert_eq!(cache.score(&ctx(&[])), 0);
    }

    #[test]
    fn observing_a_match_never_lowers_a_score() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = WorkerCache::load(dir.path());
        cache.observe(&ctx(&[("model", "m1")]));
        let job = ctx(&[("model", "m1"), ("rate", "0.1")]);
        let before = cache.score(&job);
        cache.observe(&ctx(&[("rate", "0.1")]));
        assert!(cache.score(&job) >= before);
        assert_eq!(cache.score(&job), 2);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = WorkerCache::load(dir.path());
        cache.observe(&ctx(&[("model", "m1")]));
        cache.persist().unwrap();

        let reloaded = WorkerCache::load(dir.path());
        assert_eq!(reloaded.score(&ctx(&[("model", "m1")])), 1);
        assert!(reloaded.values("model").unwrap().contains("m1"));
    }

    #[test]
    fn corrupt_cache_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "{not json").unwrap();
        let cache = WorkerCache::load(dir.path());
        assert_eq!(cache.score(&ctx(&[("model", "m1")])), 0);
    }
}
