use sweepboard::compiler::spec::SweepSpec;
use sweepboard::compiler::{self, Compiler};
use sweepboard::config::StateMap;
use sweepboard::store::body;
use sweepboard::store::memory::InMemoryStore;
use sweepboard::store::WorkItemStore;

fn compile(doc: &str) -> Vec<compiler::JobRecord> {
    Compiler::compile(&SweepSpec::from_str(doc).unwrap()).unwrap()
}

#[tokio::test]
async fn test_submission_creates_backlog_items_in_compile_order() {
    let records = compile(
        r#"
script: "run --rate={rate}"
sweep:
  rate: [0.1, 0.2]
stages:
  - name: job_{rate}
"#,
    );
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let created = compiler::submit(&records, &store, &states).await.unwrap();

    assert_eq!(created.len(), 2);
    let backlog = store.items_in_state(&states.backlog);
    assert_eq!(backlog, created);
    assert_eq!(store.item(&created[0]).unwrap().name, "job_0.1");
    assert_eq!(store.item(&created[1]).unwrap().name, "job_0.2");
}

#[tokio::test]
async fn test_submission_wires_dependency_links_to_created_ids() {
    let records = compile(
        r#"
script: "{cmd}"
sweep: {}
stages:
  - name: prep
    output: /data/v1
    cmd: "prep > {output}"
  - name: train
    cmd: "train $(prep.output)"
"#,
    );
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let created = compiler::submit(&records, &store, &states).await.unwrap();

    let train = store.item(&created[1]).unwrap();
    let parsed = body::parse(&train.body);
    assert_eq!(parsed.script, "train /data/v1");
    assert_eq!(parsed.dependency_ids, vec![created[0].0.clone()]);
}

#[tokio::test]
async fn test_submitted_body_round_trips_accessed_context() {
    let records = compile(
        r#"
script: "train --rate={rate} --model={model}"
sweep:
  rate: [0.5]
  model: m7
stages:
  - name: train_{rate}
"#,
    );
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let created = compiler::submit(&records, &store, &states).await.unwrap();

    let item = store.item(&created[0]).unwrap();
    let parsed = body::parse(&item.body);
    assert_eq!(parsed.context.get("rate").map(String::as_str), Some("0.5"));
    assert_eq!(parsed.context.get("model").map(String::as_str), Some("m7"));
}

#[tokio::test]
async fn test_shared_tags_are_created_once() {
    let records = compile(
        r#"
script: "run {rate}"
sweep:
  rate: [0.1, 0.2]
  tags: "exp42"
stages:
  - name: job_{rate}
"#,
    );
    let store = InMemoryStore::new();
    let states = StateMap::default();

    let created = compiler::submit(&records, &store, &states).await.unwrap();

    let tags = store.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "exp42");
    for reference in &created {
        let item = store.item(reference).unwrap();
        assert_eq!(item.tags.len(), 1);
        assert_eq!(item.tags[0].name, "exp42");
    }
}
