//! Classpath loading
//!
//! `require` maps a namespace name to a relative path (`.` to `/`, `-`
//! to `_`, `.clj` appended) and searches the configured classpath roots
//! in order; each namespace loads at most once per context. `load-file`
//! evaluates a file unconditionally. The current namespace is saved
//! around a load so an `ns` form inside the file cannot leak into the
//! caller.

use std::path::{Path, PathBuf};

use tracing::debug;

use loam_core::value::Value;
use loamc::analyzer::VarResolver;

use crate::context::RuntimeContext;
use crate::engine;
use crate::error::{EvalError, EvalResult};

/// Namespace name to classpath-relative file path.
pub fn namespace_path(name: &str) -> PathBuf {
    let mut path = name.replace('.', "/").replace('-', "_");
    path.push_str(".clj");
    PathBuf::from(path)
}

pub fn require(ctx: &mut RuntimeContext, name: &str) -> EvalResult<Value> {
    if ctx.loaded.contains(name) {
        return Ok(Value::Nil);
    }
    let rel = namespace_path(name);
    let roots = ctx.config.classpath.clone();
    for root in &roots {
        let candidate = root.join(&rel);
        if candidate.is_file() {
            debug!(ns = name, path = %candidate.display(), "require");
            ctx.loaded.insert(name.to_string());
            return load_path(ctx, &candidate);
        }
    }
    Err(EvalError::runtime(format!(
        "could not locate {} on classpath ({} roots searched)",
        rel.display(),
        roots.len()
    )))
}

pub fn load_path(ctx: &mut RuntimeContext, path: &Path) -> EvalResult<Value> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| EvalError::runtime(format!("load {}: {}", path.display(), e)))?;
    let file = path.display().to_string();

    let saved_ns = ctx.env.current_ns();
    let result = engine::evaluate_source(ctx, &source, &file);
    ctx.env.set_current(&saved_ns);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_path_mangling() {
        assert_eq!(
            namespace_path("my-app.core-utils"),
            PathBuf::from("my_app/core_utils.clj")
        );
    }
}
