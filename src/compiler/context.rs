use serde_yaml::Value;

use crate::error::{Result, SweepboardError};

/// A context entry: either a concrete scalar (stringified) or a list of
/// scalars marking a sweep axis.
#[derive(Debug, Clone, PartialEq)]
pub enum CtxValue {
    Scalar(String),
    List(Vec<String>),
}

/// Ordered key/value environment a job's script is rendered against.
///
/// Keys are dotted paths produced by flattening nested mappings
/// (`{a: {b: c}}` becomes `a.b`). Insertion order is preserved so that
/// substitution passes and sweep expansion stay deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    entries: Vec<(String, CtxValue)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a YAML mapping into dotted-path entries.
    pub fn from_mapping(mapping: &serde_yaml::Mapping) -> Result<Self> {
        let mut ctx = Self::new();
        flatten_into("", mapping, &mut ctx)?;
        Ok(ctx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CtxValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(CtxValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// Insert or replace. Replacement keeps the key's original position so
    /// merged overlays preserve base ordering, like a dict merge.
    pub fn set(&mut self, key: &str, value: CtxValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CtxValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entry_at(&self, index: usize) -> (&str, &CtxValue) {
        let (k, v) = &self.entries[index];
        (k.as_str(), v)
    }

    pub fn set_at(&mut self, index: usize, value: CtxValue) {
        self.entries[index].1 = value;
    }

    /// New context with `overlay` entries winning on conflicting keys.
    pub fn merged(&self, overlay: &Context) -> Context {
        let mut out = self.clone();
        for (k, v) in overlay.iter() {
            out.set(k, v.clone());
        }
        out
    }

    /// The list-valued entries, in declaration order. These are the sweep
    /// axes a combination generator expands.
    pub fn list_axes(&self) -> Vec<(String, Vec<String>)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| match v {
                CtxValue::List(items) => Some((k.clone(), items.clone())),
                CtxValue::Scalar(_) => None,
            })
            .collect()
    }

    /// Scalar entries as (key, value) pairs, in order.
    pub fn scalar_pairs(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| match v {
                CtxValue::Scalar(s) => Some((k.as_str(), s.as_str())),
                CtxValue::List(_) => None,
            })
            .collect()
    }
}

/// Result of rendering a template against a context.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Exactly the entries whose values were substituted into the text.
    pub accessed: Context,
}

/// Substitute `{key}` placeholders from `context` into `template`.
///
/// Runs whole-template passes until a pass changes nothing, so a
/// substituted value may itself contain placeholders (including composed
/// keys such as `{some_nested_{var}}`). Placeholders with no matching
/// context key stay literal. An acyclic reference chain settles within one
/// pass per nesting level, so a run that is still changing after
/// `context.len() + 1` passes must be cyclic and fails instead of looping.
pub fn resolve(template: &str, context: &Context) -> Result<Rendered> {
    let mut text = template.to_string();
    let mut accessed = Context::new();
    let budget = context.len() + 1;
    let mut passes = 0usize;
    loop {
        let mut changed = false;
        for (key, value) in context.iter() {
            let CtxValue::Scalar(replacement) = value else {
                continue;
            };
            let needle = format!("{{{key}}}");
            if text.contains(&needle) {
                text = text.replace(&needle, replacement);
                accessed.set(key, CtxValue::Scalar(replacement.clone()));
                changed = true;
            }
        }
        if !changed {
            break;
        }
        passes += 1;
        if passes > budget {
            return Err(SweepboardError::PlaceholderCycle(clip(template)));
        }
    }
    Ok(Rendered { text, accessed })
}

fn clip(template: &str) -> String {
    const MAX: usize = 80;
    if template.chars().count() <= MAX {
        template.to_string()
    } else {
        let head: String = template.chars().take(MAX).collect();
        format!("{head}...")
    }
}

fn flatten_into(prefix: &str, mapping: &serde_yaml::Mapping, out: &mut Context) -> Result<()> {
    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err(SweepboardError::Spec(format!(
                "non-string key under '{prefix}'"
            )));
        };
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Mapping(nested) => flatten_into(&path, nested, out)?,
            Value::Sequence(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match scalar_to_string(item) {
                        Some(s) => list.push(s),
                        None => {
                            return Err(SweepboardError::Spec(format!(
                                "sweep axis '{path}' may only hold scalar values"
                            )))
                        }
                    }
                }
                out.set(&path, CtxValue::List(list));
            }
            other => match scalar_to_string(other) {
                Some(s) => out.set(&path, CtxValue::Scalar(s)),
                None => {
                    return Err(SweepboardError::Spec(format!(
                        "unsupported value for '{path}'"
                    )))
                }
            },
        }
    }
    Ok(())
}

/// String form of a YAML scalar, `None` for structured values.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
