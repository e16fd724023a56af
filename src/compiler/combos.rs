use crate::compiler::context::{Context, CtxValue};

/// Expand list-valued sweep axes into the full Cartesian product of
/// concrete assignments.
///
/// Axis declaration order is the major-to-minor product order: the first
/// axis varies slowest, the last fastest. No list-valued axes produce a
/// single empty combination, the degenerate one-job sweep.
pub fn expand(axes: &[(String, Vec<String>)]) -> Vec<Context> {
    let mut out = Vec::new();
    expand_axes(axes, 0, Context::new(), &mut out);
    out
}

fn expand_axes(axes: &[(String, Vec<String>)], idx: usize, current: Context, out: &mut Vec<Context>) {
    if idx == axes.len() {
        out.push(current);
        return;
    }
    let (key, values) = &axes[idx];
    for value in values {
        let mut next = current.clone();
        next.set(key, CtxValue::Scalar(value.clone()));
        expand_axes(axes, idx + 1, next, out);
    }
}
