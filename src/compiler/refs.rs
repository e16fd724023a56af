use std::collections::HashMap;

use crate::compiler::context::Context;
use crate::error::{Result, SweepboardError};

/// A `$(job.field)` occurrence in raw text.
struct RefMatch {
    start: usize,
    end: usize,
    job: String,
    field: String,
}

fn is_job_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn scan(text: &str) -> Vec<RefMatch> {
    let bytes = text.as_bytes();
    let mut matches = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if &bytes[i..i + 2] != b"$(" {
            i += 1;
            continue;
        }
        let rest = &text[i + 2..];
        let job_len = rest.chars().take_while(|&c| is_job_char(c)).count();
        if job_len == 0 || !rest[job_len..].starts_with('.') {
            i += 2;
            continue;
        }
        let after_dot = &rest[job_len + 1..];
        let field_len = after_dot.chars().take_while(|&c| is_field_char(c)).count();
        if field_len == 0 || !after_dot[field_len..].starts_with(')') {
            i += 2;
            continue;
        }
        let end = i + 2 + job_len + 1 + field_len + 1;
        matches.push(RefMatch {
            start: i,
            end,
            job: rest[..job_len].to_string(),
            field: after_dot[..field_len].to_string(),
        });
        i = end;
    }
    matches
}

/// Job names referenced as `$(job.field)` in `raw`, distinct, in order of
/// first appearance. Runs on pre-substitution text: by the time templates
/// are rendered the references may already have been replaced by values.
pub fn extract_refs(raw: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in scan(raw) {
        if !seen.contains(&m.job) {
            seen.push(m.job);
        }
    }
    seen
}

/// Replace every `$(job.field)` in `value` with the named field from an
/// already-compiled job's context. A reference to a job that has not been
/// compiled yet (or a field it never defined) aborts the compile run.
pub fn resolve_refs(value: &str, jobs: &HashMap<String, Context>) -> Result<String> {
    let matches = scan(value);
    if matches.is_empty() {
        return Ok(value.to_string());
    }
    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;
    for m in matches {
        let replacement = jobs
            .get(&m.job)
            .and_then(|ctx| ctx.scalar(&m.field))
            .ok_or_else(|| SweepboardError::UnresolvedReference {
                job: m.job.clone(),
                field: m.field.clone(),
            })?;
        out.push_str(&value[cursor..m.start]);
        out.push_str(replacement);
        cursor = m.end;
    }
    out.push_str(&value[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::CtxValue;

    fn jobs(entries: &[(&str, &[(&str, &str)])]) -> HashMap<String, Context> {
        entries
            .iter()
            .map(|(name, fields)| {
                let mut ctx = Context::new();
                for (k, v) in *fields {
                    ctx.set(k, CtxValue::Scalar(v.to_string()));
                }
                (name.to_string(), ctx)
            })
            .collect()
    }

    #[test]
    fn extracts_distinct_names_in_order() {
        let raw = "use $(prep.output) and $(train-1.ckpt) then $(prep.output)";
        assert_eq!(extract_refs(raw), vec!["prep", "train-1"]);
    }

    #[test]
    fn ignores_malformed_references() {
        assert!(extract_refs("$(broken $(x) $(.y) $(a.)").is_empty());
    }

    #[test]
    fn resolves_against_compiled_jobs() {
        let jobs = jobs(&[("prep", &[("output", "/data/v1")])]);
        let out = resolve_refs("cat $(prep.output)/all", &jobs).unwrap();
        assert_eq!(out, "cat /data/v1/all");
    }

    #[test]
    fn unknown_job_is_fatal() {
        let err = resolve_refs("$(ghost.output)", &HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            SweepboardError::UnresolvedReference { job, .. } if job == "ghost"
        ));
    }
}
