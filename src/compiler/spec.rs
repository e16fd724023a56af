use std::path::Path;

use serde_yaml::Value;

use crate::compiler::context::Context;
use crate::error::{Result, SweepboardError};

/// A declarative sweep document: one script template, a base context whose
/// list-valued entries are sweep axes, and an ordered chain of stage
/// overlays.
#[derive(Debug, Clone)]
pub struct SweepSpec {
    pub script: String,
    pub base: Context,
    pub stages: Vec<Stage>,
}

/// One stage overlay plus its raw pre-substitution text, kept for
/// dependency extraction (substitution may erase `$(job.field)` markers
/// before linkage would otherwise see them).
#[derive(Debug, Clone)]
pub struct Stage {
    pub overlay: Context,
    pub raw_text: String,
}

impl SweepSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(raw)?;
        if !doc.is_mapping() {
            return Err(SweepboardError::Spec(
                "sweep document must be a mapping".to_string(),
            ));
        }

        let script = doc
            .get("script")
            .and_then(Value::as_str)
            .ok_or_else(|| SweepboardError::Spec("missing 'script' entry".to_string()))?
            .to_string();

        let sweep = doc
            .get("sweep")
            .and_then(Value::as_mapping)
            .ok_or_else(|| SweepboardError::Spec("missing 'sweep' mapping".to_string()))?;
        let base = Context::from_mapping(sweep)?;

        let stages_value = doc
            .get("stages")
            .and_then(Value::as_sequence)
            .ok_or_else(|| SweepboardError::Spec("missing 'stages' sequence".to_string()))?;
        if stages_value.is_empty() {
            return Err(SweepboardError::Spec("'stages' is empty".to_string()));
        }

        let mut stages = Vec::with_capacity(stages_value.len());
        for (index, stage) in stages_value.iter().enumerate() {
            let Some(mapping) = stage.as_mapping() else {
                return Err(SweepboardError::Spec(format!(
                    "stage {index} is not a mapping"
                )));
            };
            if stage.get("name").is_none() {
                return Err(SweepboardError::Spec(format!(
                    "stage {index} does not name its job"
                )));
            }
            let overlay = Context::from_mapping(mapping)?;
            stages.push(Stage {
                overlay,
                raw_text: raw_strings(stage).join("\n"),
            });
        }

        Ok(Self {
            script,
            base,
            stages,
        })
    }
}

/// Every string scalar inside a YAML value, depth-first in document order.
fn raw_strings(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Sequence(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Mapping(mapping) => {
            for (_, v) in mapping {
                collect_strings(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_document() {
        let spec = SweepSpec::from_str(
            "script: \"run {name}\"\nsweep:\n  rate: [0.1, 0.2]\nstages:\n  - name: stage_{rate}\n",
        )
        .unwrap();
        assert_eq!(spec.script, "run {name}");
        assert_eq!(spec.base.list_axes().len(), 1);
        assert_eq!(spec.stages.len(), 1);
        assert!(spec.stages[0].raw_text.contains("stage_{rate}"));
    }

    #[test]
    fn missing_script_is_fatal() {
        let err = SweepSpec::from_str("sweep: {}\nstages:\n  - name: a\n").unwrap_err();
        assert!(matches!(err, SweepboardError::Spec(_)));
    }

    #[test]
    fn unnamed_stage_is_fatal() {
        let err =
            SweepSpec::from_str("script: x\nsweep: {}\nstages:\n  - cmd: echo\n").unwrap_err();
        assert!(matches!(err, SweepboardError::Spec(_)));
    }

    #[test]
    fn raw_text_preserves_reference_markers() {
        let spec = SweepSpec::from_str(
            "script: \"{cmd}\"\nsweep: {}\nstages:\n  - name: b\n    cmd: \"use $(a.out)\"\n",
        )
        .unwrap();
        assert!(spec.stages[0].raw_text.contains("$(a.out)"));
    }
}
