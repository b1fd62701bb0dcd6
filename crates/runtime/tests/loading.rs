//! Classpath loading: require's name mangling, once-only semantics, and
//! load-file.

mod common;

use std::io::Write as _;

use common::eval_str;
use loam_runtime::context::{Backend, RuntimeConfig, RuntimeContext};

fn ctx_with_root(root: &std::path::Path) -> RuntimeContext {
    let config = RuntimeConfig {
        backend: Backend::Bytecode,
        classpath: vec![root.to_path_buf()],
        ..RuntimeConfig::default()
    };
    RuntimeContext::new(config)
}

fn write_file(dir: &std::path::Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

#[test]
fn test_require_resolves_mangled_path() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "my_app/core_utils.clj",
        "(ns my-app.core-utils)\n(def answer 42)\n",
    );
    let mut ctx = ctx_with_root(dir.path());
    assert_eq!(
        eval_str(
            &mut ctx,
            "(require 'my-app.core-utils) my-app.core-utils/answer"
        )
        .unwrap(),
        "42"
    );
}

#[test]
fn test_require_loads_once() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "counted.clj",
        "(ns counted)\n(def hits (atom 0))\n(swap! hits inc)\n",
    );
    let mut ctx = ctx_with_root(dir.path());
    eval_str(&mut ctx, "(require 'counted)").unwrap();
    eval_str(&mut ctx, "(require 'counted)").unwrap();
    assert_eq!(eval_str(&mut ctx, "@counted/hits").unwrap(), "1");
}

#[test]
fn test_load_file_is_unconditional() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "inc.clj", "(swap! tally inc)\n");
    let mut ctx = ctx_with_root(dir.path());
    eval_str(&mut ctx, "(def tally (atom 0))").unwrap();
    let path = dir.path().join("inc.clj").display().to_string();
    eval_str(&mut ctx, &format!("(load-file \"{}\")", path)).unwrap();
    eval_str(&mut ctx, &format!("(load-file \"{}\")", path)).unwrap();
    assert_eq!(eval_str(&mut ctx, "@tally").unwrap(), "2");
}

#[test]
fn test_missing_namespace_reports_roots_searched() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = ctx_with_root(dir.path());
    let err = eval_str(&mut ctx, "(require 'nowhere.to-be-found)").unwrap_err();
    let loam_runtime::error::EvalError::Diag(d) = err else {
        panic!("expected a diagnostic");
    };
    assert!(d.message.contains("nowhere/to_be_found.clj"));
}

#[test]
fn test_ns_form_does_not_leak_into_caller() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "other.clj", "(ns other)\n(def x 1)\n");
    let mut ctx = ctx_with_root(dir.path());
    eval_str(&mut ctx, "(require 'other)").unwrap();
    // Definitions after the require still land in user.
    eval_str(&mut ctx, "(def here 7)").unwrap();
    assert_eq!(eval_str(&mut ctx, "user/here").unwrap(), "7");
}
