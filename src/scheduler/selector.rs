//! Backlog scanning and candidate selection.

use rand::seq::SliceRandom;

use crate::config::StateMap;
use crate::error::{Result, SweepboardError};
use crate::scheduler::affinity::WorkerCache;
use crate::store::body::{self, ParsedBody};
use crate::store::{WorkItem, WorkItemRef, WorkItemStore};

/// A claimable backlog item with its parsed body and affinity score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: WorkItem,
    pub parsed: ParsedBody,
    pub score: usize,
}

/// One scheduling scan: fetch a page of backlog items, drop those whose
/// dependencies are not all done, score the rest against the worker's
/// cache and pick uniformly among the top scorers.
///
/// Random tie-breaking is deliberate: equally cache-favorable items carry
/// no further signal, and indifference spreads a fleet of workers across
/// the backlog instead of starving low scorers.
pub async fn select(
    store: &dyn WorkItemStore,
    states: &StateMap,
    cache: &WorkerCache,
    page_size: usize,
) -> Result<Option<Candidate>> {
    let refs = store.list_items(&states.backlog, page_size).await?;
    let mut candidates = Vec::new();
    for reference in &refs {
        let item = store.get_details(reference).await?;
        let parsed = body::parse(&item.body);
        if !dependencies_done(store, states, &parsed.dependency_ids).await? {
            continue;
        }
        let score = cache.score(&parsed.context);
        candidates.push(Candidate {
            item,
            parsed,
            score,
        });
    }
    if candidates.is_empty() {
        return Ok(None);
    }

    let best = candidates.iter().map(|c| c.score).max().unwrap_or(0);
    let top: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.score == best)
        .collect();
    let Some(chosen) = top.choose(&mut rand::thread_rng()).cloned() else {
        return Ok(None);
    };
    tracing::debug!(
        item = %chosen.item.reference,
        score = chosen.score,
        scanned = refs.len(),
        "selected backlog item"
    );
    Ok(Some(chosen))
}

/// Whether every dependency id is in the terminal-success state.
///
/// A dependency the store no longer knows counts as unsatisfied; the item
/// is skipped this scan rather than failed.
async fn dependencies_done(
    store: &dyn WorkItemStore,
    states: &StateMap,
    dependency_ids: &[String],
) -> Result<bool> {
    for id in dependency_ids {
        let reference = WorkItemRef(id.clone());
        match store.get_details(&reference).await {
            Ok(dep) if dep.state_id == states.done => {}
            Ok(_) => return Ok(false),
            Err(SweepboardError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

/// Best-effort optimistic claim: write our identity marker, re-read, and
/// yield if a concurrent worker got there first. No lock is held, so a
/// race window remains between the write and the verify.
pub async fn try_claim(
    store: &dyn WorkItemStore,
    reference: &WorkItemRef,
    worker_id: &str,
) -> Result<bool> {
    store.set_assignee(reference, Some(worker_id)).await?;
    let item = store.get_details(reference).await?;
    if item.assignee.as_deref() == Some(worker_id) {
        Ok(true)
    } else {
        tracing::info!(
            item = %reference,
            holder = ?item.assignee,
            "lost claim race, rescanning"
        );
        Ok(false)
    }
}
