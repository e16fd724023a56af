use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};

use crate::compiler::context::Context;
use crate::error::Result;

/// Stable hex hash of an accessed-variable set, independent of key order.
pub fn accessed_hash(accessed: &Context) -> Result<String> {
    let map: BTreeMap<&str, &str> = accessed.scalar_pairs().into_iter().collect();
    let bytes = serde_json::to_vec(&map)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// Drops sweep combinations that render to a job consuming the same
/// relevant variables as one already compiled. Sweeps routinely vary axes a
/// given stage never reads; without this the full product would submit
/// redundant work items.
#[derive(Debug, Default)]
pub struct DedupFilter {
    seen: HashSet<String>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_duplicate(&self, accessed: &Context) -> Result<bool> {
        Ok(self.seen.contains(&accessed_hash(accessed)?))
    }

    pub fn record(&mut self, accessed: &Context) -> Result<()> {
        self.seen.insert(accessed_hash(accessed)?);
        Ok(())
    }
}
