use std::collections::HashMap;

use sweepboard::compiler::context::{Context, CtxValue};
use sweepboard::config::StateMap;
use sweepboard::scheduler::{self, WorkerCache};
use sweepboard::store::memory::InMemoryStore;
use sweepboard::store::{body, WorkItemRef, WorkItemStore};

fn ctx(pairs: &[(&str, &str)]) -> Context {
    let mut c = Context::new();
    for (k, v) in pairs {
        c.set(k, CtxValue::Scalar(v.to_string()));
    }
    c
}

/// Create a backlog item the way the compiler would submit it.
async fn add_item(
    store: &InMemoryStore,
    states: &StateMap,
    name: &str,
    script: &str,
    deps: &[(&str, &WorkItemRef)],
    context: &[(&str, &str)],
) -> WorkItemRef {
    let mut name_to_ref = HashMap::new();
    let mut dep_names = Vec::new();
    for (dep_name, reference) in deps {
        name_to_ref.insert(dep_name.to_string(), (*reference).clone());
        dep_names.push(dep_name.to_string());
    }
    let text = body::render(script, &dep_names, &name_to_ref, &ctx(context)).unwrap();
    store
        .create_item(name, &text, &states.backlog, &[])
        .await
        .unwrap()
}

fn empty_cache() -> (tempfile::TempDir, WorkerCache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = WorkerCache::load(dir.path());
    (dir, cache)
}

#[tokio::test]
async fn test_empty_backlog_selects_none() {
    let store = InMemoryStore::new();
    let states = StateMap::default();
    let (_dir, cache) = empty_cache();

    let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap();
    assert!(selected.is_none());
}

#[tokio::test]
async fn test_item_with_unmet_dependency_is_filtered() {
    let store = InMemoryStore::new();
    let states = StateMap::default();
    let (_dir, cache) = empty_cache();

    let prep = add_item(&store, &states, "prep", "prep.sh", &[], &[]).await;
    let train = add_item(&store, &states, "train", "train.sh", &[("prep", &prep)], &[]).await;

    // prep is still pending, so train is not claimable.
    let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap().unwrap();
    assert_eq!(selected.item.reference, prep);

    store.set_state(&prep, &states.done).await.unwrap();
    let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap().unwrap();
    assert_eq!(selected.item.reference, train);
}

#[tokio::test]
async fn test_unknown_dependency_counts_as_unsatisfied() {
    let store = InMemoryStore::new();
    let states = StateMap::default();
    let (_dir, cache) = empty_cache();

    let ghost = WorkItemRef("9999".to_string());
    add_item(&store, &states, "train", "train.sh", &[("prep", &ghost)], &[]).await;

    let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap();
    assert!(selected.is_none());
}

#[tokio::test]
async fn test_cached_value_wins_over_cold_one() {
    let store = InMemoryStore::new();
    let states = StateMap::default();
    let (_dir, mut cache) = empty_cache();

    let warm = add_item(&store, &states, "warm", "run", &[], &[("model", "m1")]).await;
    let cold = add_item(&store, &states, "cold", "run", &[], &[("model", "m2")]).await;

    let mut seen: HashMap<String, String> = HashMap::new();
    seen.insert("model".to_string(), "m1".to_string());
    cache.observe(&seen);

    // Score 1 beats score 0 every time; no tie to randomize.
    for _ in 0..20 {
        let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap().unwrap();
        assert_eq!(selected.item.reference, warm);
        assert_eq!(selected.score, 1);
        assert_ne!(selected.item.reference, cold);
    }
}

#[tokio::test]
async fn test_tie_break_is_roughly_uniform() {
    let store = InMemoryStore::new();
    let states = StateMap::default();
    let (_dir, cache) = empty_cache();

    let a = add_item(&store, &states, "a", "run", &[], &[]).await;
    let b = add_item(&store, &states, "b", "run", &[], &[]).await;
    let c = add_item(&store, &states, "c", "run", &[], &[]).await;

    let mut counts: HashMap<WorkItemRef, usize> = HashMap::new();
    for _ in 0..300 {
        let selected = scheduler::select(&store, &states, &cache, 25).await.unwrap().unwrap();
        *counts.entry(selected.item.reference).or_default() += 1;
    }

    // Expected ~100 each; anything above 60 rules out a biased pick
    // without flaking on randomness.
    for reference in [&a, &b, &c] {
        let count = counts.get(reference).copied().unwrap_or(0);
        assert!(count > 60, "item {reference} picked only {count}/300 times");
    }
}

#[tokio::test]
async fn test_claim_writes_marker_and_wins() {
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let item = add_item(&store, &states, "job", "run", &[], &[]).await;
    let claimed = scheduler::try_claim(&store, &item, "worker-1").await.unwrap();

    assert!(claimed);
    let details = store.get_details(&item).await.unwrap();
    assert_eq!(details.assignee.as_deref(), Some("worker-1"));
}

#[tokio::test]
async fn test_claim_yields_when_another_marker_holds() {
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let item = add_item(&store, &states, "job", "run", &[], &[]).await;
    store.set_assignee(&item, Some("rival")).await.unwrap();

    let claimed = scheduler::try_claim(&store, &item, "worker-1").await.unwrap();
    assert!(!claimed);
    let details = store.get_details(&item).await.unwrap();
    assert_eq!(details.assignee.as_deref(), Some("rival"));
}
