//! Work-item body format.
//!
//! The board stores a work item's script, dependency links and declared
//! context as one free-text body. Rendering and parsing that structure
//! lives here and nowhere else; the rest of the engine sees typed values.
//!
//! ```text
//! # Script
//! run --rate=0.1
//!
//! # Depends on
//! - prep (id:1200)
//!
//! # Context
//! ```context
//! {"rate": "0.1"}
//! ```
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::compiler::context::Context;
use crate::error::{Result, SweepboardError};
use crate::store::WorkItemRef;

const SCRIPT_HEADER: &str = "# Script";
const DEPENDS_HEADER: &str = "# Depends on";
const CONTEXT_HEADER: &str = "# Context";
const CONTEXT_FENCE_OPEN: &str = "```context";
const CONTEXT_FENCE_CLOSE: &str = "```";

/// Typed view of a parsed work-item body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBody {
    pub script: String,
    /// Item ids of the dependency links, in listed order.
    pub dependency_ids: Vec<String>,
    /// The declared context map; empty when the block is absent or
    /// malformed.
    pub context: HashMap<String, String>,
}

/// Render a compiled job into the body text submitted to the board.
///
/// Dependency names are resolved to the item ids created earlier in the
/// same submission run; a name with no known item is a compile-order bug
/// and fails rather than emitting a dangling link.
pub fn render(
    script: &str,
    depends_on: &[String],
    name_to_ref: &HashMap<String, WorkItemRef>,
    accessed: &Context,
) -> Result<String> {
    let mut out = String::new();
    out.push_str(SCRIPT_HEADER);
    out.push('\n');
    out.push_str(script.trim_end());
    out.push('\n');

    if !depends_on.is_empty() {
        out.push('\n');
        out.push_str(DEPENDS_HEADER);
        out.push('\n');
        for name in depends_on {
            let item = name_to_ref
                .get(name)
                .ok_or_else(|| SweepboardError::NotFound(name.clone()))?;
            out.push_str(&format!("- {} (id:{})\n", name, item));
        }
    }

    let map: BTreeMap<&str, &str> = accessed.scalar_pairs().into_iter().collect();
    if !map.is_empty() {
        out.push('\n');
        out.push_str(CONTEXT_HEADER);
        out.push('\n');
        out.push_str(CONTEXT_FENCE_OPEN);
        out.push('\n');
        out.push_str(&serde_json::to_string(&map)?);
        out.push('\n');
        out.push_str(CONTEXT_FENCE_CLOSE);
        out.push('\n');
    }

    Ok(out)
}

enum Section {
    Script,
    Depends,
    Context,
}

/// Parse a body back into its typed parts.
///
/// Lenient by contract: a body written by hand, an older renderer, or a
/// mangled context block still yields a usable script with whatever
/// structure could be recovered. A missing or malformed context block is
/// an empty context, never an error.
pub fn parse(body: &str) -> ParsedBody {
    let mut parsed = ParsedBody::default();

    let mut section = Section::Script;
    let mut script_lines: Vec<&str> = Vec::new();
    let mut context_json = String::new();
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed == SCRIPT_HEADER {
            section = Section::Script;
            continue;
        }
        if trimmed == DEPENDS_HEADER {
            section = Section::Depends;
            continue;
        }
        if trimmed == CONTEXT_HEADER {
            section = Section::Context;
            continue;
        }
        match section {
            Section::Script => script_lines.push(line),
            Section::Depends => {
                if let Some(rest) = trimmed.strip_prefix("- ") {
                    if let Some(id) = dependency_id(rest) {
                        parsed.dependency_ids.push(id);
                    }
                }
            }
            Section::Context => {
                if trimmed == CONTEXT_FENCE_OPEN {
                    in_fence = true;
                } else if trimmed == CONTEXT_FENCE_CLOSE {
                    in_fence = false;
                } else if in_fence {
                    context_json.push_str(line);
                    context_json.push('\n');
                }
            }
        }
    }

    parsed.script = script_lines.join("\n").trim().to_string();
    if !context_json.is_empty() {
        match serde_json::from_str::<HashMap<String, String>>(&context_json) {
            Ok(map) => parsed.context = map,
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed context block");
            }
        }
    }
    parsed
}

/// Extract the id from a dependency line tail, `name (id:1200)`.
fn dependency_id(rest: &str) -> Option<String> {
    let open = rest.rfind("(id:")?;
    let tail = &rest[open + 4..];
    let close = tail.find(')')?;
    let id = tail[..close].trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
