//! Sweep compilation: turn a declarative sweep document into ordered,
//! dependency-linked job records and submit them to the board.

pub mod combos;
pub mod context;
pub mod dedup;
pub mod refs;
pub mod spec;

use std::collections::HashMap;

use crate::compiler::context::{Context, CtxValue};
use crate::compiler::dedup::DedupFilter;
use crate::compiler::spec::{Stage, SweepSpec};
use crate::config::StateMap;
use crate::error::{Result, SweepboardError};
use crate::store::{body, TagRef, WorkItemRef, WorkItemStore};

/// Passes of whole-context normalization. Each pass re-renders every string
/// entry against the evolving context, so values nested this many levels
/// deep still settle.
pub const NESTED_RESOLVE_PASSES: usize = 4;

/// A compiled job, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Unique within one compile run; the key other jobs reference.
    pub name: String,
    /// Display title; falls back to `name` at submission.
    pub title: Option<String>,
    pub script: String,
    /// Names of jobs this one depends on, in first-reference order.
    pub depends_on: Vec<String>,
    pub tags: Vec<String>,
    /// The context entries actually substituted into `script`.
    pub accessed: Context,
}

impl JobRecord {
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// One compile run's mutable state: contexts of already-compiled jobs for
/// `$(job.field)` lookups, the duplicate filter, and the output order.
pub struct Compiler {
    jobs_context: HashMap<String, Context>,
    dedup: DedupFilter,
    records: Vec<JobRecord>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            jobs_context: HashMap::new(),
            dedup: DedupFilter::new(),
            records: Vec::new(),
        }
    }

    /// Compile a sweep document into ordered job records.
    ///
    /// Combinations form the outer loop and stages the inner one, so within
    /// each combination a later stage can reference every earlier stage's
    /// job.
    pub fn compile(spec: &SweepSpec) -> Result<Vec<JobRecord>> {
        let mut session = Self::new();
        let axes = spec.base.list_axes();
        for combination in combos::expand(&axes) {
            let combined = spec.base.merged(&combination);
            for stage in &spec.stages {
                session.compile_stage(spec, &combined, stage)?;
            }
        }
        Ok(session.records)
    }

    fn compile_stage(&mut self, spec: &SweepSpec, combined: &Context, stage: &Stage) -> Result<()> {
        let mut ctx = combined.merged(&stage.overlay);

        // Entries may reference each other and earlier jobs; re-render the
        // whole context a fixed number of passes so nested values settle.
        for _ in 0..NESTED_RESOLVE_PASSES {
            for index in 0..ctx.len() {
                let (_, value) = ctx.entry_at(index);
                let CtxValue::Scalar(raw) = value.clone() else {
                    continue;
                };
                let rendered = context::resolve(&raw, &ctx)?;
                let resolved = refs::resolve_refs(&rendered.text, &self.jobs_context)?;
                ctx.set_at(index, CtxValue::Scalar(resolved));
            }
        }

        let name = ctx
            .scalar("name")
            .ok_or_else(|| SweepboardError::Spec("stage resolved to an empty name".to_string()))?
            .to_string();

        let depends_on = refs::extract_refs(&stage.raw_text);
        let rendered = context::resolve(&spec.script, &ctx)?;
        let script = refs::resolve_refs(&rendered.text, &self.jobs_context)?;

        if self.dedup.is_duplicate(&rendered.accessed)? {
            tracing::debug!(job = %name, "sweep combination renders an already-compiled job, skipping");
            return Ok(());
        }
        if self.jobs_context.contains_key(&name) {
            return Err(SweepboardError::DuplicateJobName(name));
        }

        self.dedup.record(&rendered.accessed)?;
        self.jobs_context.insert(name.clone(), ctx.clone());

        let tags = ctx.scalar("tags").map(split_tags).unwrap_or_default();
        let title = ctx.scalar("title").map(str::to_string);
        tracing::debug!(job = %name, deps = ?depends_on, "compiled job");
        self.records.push(JobRecord {
            name,
            title,
            script,
            depends_on,
            tags,
            accessed: rendered.accessed,
        });
        Ok(())
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Submit compiled records as backlog work items, in compile order, wiring
/// dependency links to the item ids created earlier in the same run.
pub async fn submit(
    records: &[JobRecord],
    store: &dyn WorkItemStore,
    states: &StateMap,
) -> Result<Vec<WorkItemRef>> {
    let mut name_to_ref: HashMap<String, WorkItemRef> = HashMap::new();
    let mut known_tags: Option<Vec<TagRef>> = None;
    let mut created = Vec::with_capacity(records.len());

    for record in records {
        let mut tags = Vec::with_capacity(record.tags.len());
        for tag in &record.tags {
            tags.push(get_or_create_tag(store, &mut known_tags, tag).await?);
        }
        let notes = body::render(
            &record.script,
            &record.depends_on,
            &name_to_ref,
            &record.accessed,
        )?;
        let item = store
            .create_item(record.display_name(), &notes, &states.backlog, &tags)
            .await?;
        tracing::info!(job = %record.name, item = %item, "work item created");
        name_to_ref.insert(record.name.clone(), item.clone());
        created.push(item);
    }
    Ok(created)
}

async fn get_or_create_tag(
    store: &dyn WorkItemStore,
    known: &mut Option<Vec<TagRef>>,
    name: &str,
) -> Result<TagRef> {
    if known.is_none() {
        *known = Some(store.list_tags().await?);
    }
    if let Some(tags) = known.as_ref() {
        if let Some(tag) = tags.iter().find(|t| t.name == name) {
            return Ok(tag.clone());
        }
    }
    let tag = store.create_tag(name).await?;
    if let Some(tags) = known.as_mut() {
        tags.push(tag.clone());
    }
    Ok(tag)
}
