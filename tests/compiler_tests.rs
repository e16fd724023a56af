use sweepboard::compiler::spec::SweepSpec;
use sweepboard::compiler::{Compiler, JobRecord};
use sweepboard::error::SweepboardError;

fn compile(doc: &str) -> Vec<JobRecord> {
    let spec = SweepSpec::from_str(doc).expect("spec should parse");
    Compiler::compile(&spec).expect("compile should succeed")
}

#[test]
fn test_rate_sweep_produces_one_job_per_value() {
    let records = compile(
        r#"
script: "run --rate={rate}"
sweep:
  rate: [0.1, 0.2]
stages:
  - name: job_{rate}
"#,
    );

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "job_0.1");
    assert_eq!(records[0].script, "run --rate=0.1");
    assert_eq!(records[1].name, "job_0.2");
    assert_eq!(records[1].script, "run --rate=0.2");
    assert!(records[0].depends_on.is_empty());
    assert!(records[1].depends_on.is_empty());
}

#[test]
fn test_combination_count_is_full_product() {
    let records = compile(
        r#"
script: "run {a} {b} {c}"
sweep:
  a: [1, 2]
  b: [x, y, z]
  c: [hot, cold]
stages:
  - name: j_{a}_{b}_{c}
"#,
    );

    assert_eq!(records.len(), 12);
    let mut names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    // First axis major, last axis minor.
    assert_eq!(names[0], "j_1_x_hot");
    assert_eq!(names[1], "j_1_x_cold");
    assert_eq!(names[11], "j_2_z_cold");
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 12);
}

#[test]
fn test_cross_stage_reference_resolves_and_links() {
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

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "prep");
    assert_eq!(records[0].script, "prep > /data/v1");
    assert_eq!(records[1].name, "train");
    // The reference resolved to prep's actual rendered context value.
    assert_eq!(records[1].script, "train /data/v1");
    assert_eq!(records[1].depends_on, vec!["prep"]);
}

#[test]
fn test_dependency_comes_from_raw_text_not_resolved_context() {
    // After substitution the reference marker is gone from the rendered
    // script, yet the dependency must still be recorded.
    let records = compile(
        r#"
script: "{cmd}"
sweep: {}
stages:
  - name: a
    out: ok
    cmd: "echo a"
  - name: b
    cmd: "echo $(a.out)"
"#,
    );

    let b = &records[1];
    assert!(!b.script.contains("$("));
    assert_eq!(b.script, "echo ok");
    assert_eq!(b.depends_on, vec!["a"]);
}

#[test]
fn test_stage_ignoring_an_axis_is_deduplicated() {
    let records = compile(
        r#"
script: "{cmd}"
sweep:
  rate: [0.1, 0.2]
  seed: [1, 2]
stages:
  - name: prep_{seed}
    cmd: "prep --seed={seed}"
  - name: train_{rate}_{seed}
    cmd: "train --rate={rate} --seed={seed}"
"#,
    );

    // prep ignores the rate axis: half of its expansions collapse.
    let preps = records.iter().filter(|r| r.name.starts_with("prep")).count();
    let trains = records.iter().filter(|r| r.name.starts_with("train")).count();
    assert_eq!(preps, 2);
    assert_eq!(trains, 4);
    assert_eq!(records.len(), 6);
}

#[test]
fn test_differing_accessed_sets_both_survive() {
    let records = compile(
        r#"
script: "{cmd}"
sweep:
  rate: [0.1, 0.2]
stages:
  - name: train_{rate}
    cmd: "train --rate={rate}"
"#,
    );
    assert_eq!(records.len(), 2);
}

#[test]
fn test_duplicate_job_name_is_fatal() {
    let spec = SweepSpec::from_str(
        r#"
script: "{cmd}"
sweep:
  seed: [1, 2]
stages:
  - name: fixed
    cmd: "run --seed={seed}"
"#,
    )
    .unwrap();
    // Same name, different accessed sets: not a duplicate, so the name
    // collision must abort the run.
    let err = Compiler::compile(&spec).unwrap_err();
    assert!(matches!(err, SweepboardError::DuplicateJobName(name) if name == "fixed"));
}

#[test]
fn test_unresolved_cross_job_reference_is_fatal() {
    let spec = SweepSpec::from_str(
        r#"
script: "{cmd}"
sweep: {}
stages:
  - name: b
    cmd: "use $(ghost.output)"
"#,
    )
    .unwrap();
    let err = Compiler::compile(&spec).unwrap_err();
    assert!(matches!(
        err,
        SweepboardError::UnresolvedReference { job, .. } if job == "ghost"
    ));
}

#[test]
fn test_placeholder_cycle_is_fatal_not_a_hang() {
    let spec = SweepSpec::from_str(
        r#"
script: "{a}"
sweep:
  a: "{b}"
  b: "{a}"
stages:
  - name: j
"#,
    )
    .unwrap();
    let err = Compiler::compile(&spec).unwrap_err();
    assert!(matches!(err, SweepboardError::PlaceholderCycle(_)));
}

#[test]
fn test_tags_and_title_from_context() {
    let records = compile(
        r#"
script: "run"
sweep:
  tags: "nightly, gpu, "
stages:
  - name: j
    title: "Nightly GPU run"
"#,
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tags, vec!["nightly", "gpu"]);
    assert_eq!(records[0].display_name(), "Nightly GPU run");
    assert_eq!(records[0].name, "j");
}

#[test]
fn test_no_axes_is_a_one_job_sweep() {
    let records = compile(
        r#"
script: "echo hi"
sweep: {}
stages:
  - name: only
"#,
    );
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].script, "echo hi");
}
