//! Shared harness for the runtime integration suites.

use loam_runtime::call::pr_str_value;
use loam_runtime::context::{Backend, RuntimeConfig, RuntimeContext};
use loam_runtime::engine;
use loam_runtime::error::EvalError;

pub const ALL_BACKENDS: [Backend; 3] = [Backend::TreeWalk, Backend::Bytecode, Backend::Compare];

pub fn ctx_with(backend: Backend) -> RuntimeContext {
    let config = RuntimeConfig {
        backend,
        ..RuntimeConfig::default()
    };
    RuntimeContext::new(config)
}

/// Evaluate and print the last value readably.
pub fn eval_str(ctx: &mut RuntimeContext, src: &str) -> Result<String, EvalError> {
    let v = engine::evaluate_source(ctx, src, "test.clj")?;
    Ok(pr_str_value(ctx, &v).expect("result should print"))
}

/// Evaluate on one backend, panicking on error.
pub fn run_on(backend: Backend, src: &str) -> String {
    let mut ctx = ctx_with(backend);
    match eval_str(&mut ctx, src) {
        Ok(s) => s,
        Err(e) => panic!("{:?} failed on {:?}: {:?}", src, backend, e),
    }
}

/// Assert the same printed result on every backend.
pub fn assert_all(src: &str, expected: &str) {
    for backend in ALL_BACKENDS {
        assert_eq!(
            run_on(backend, src),
            expected,
            "backend {:?} on {:?}",
            backend,
            src
        );
    }
}

/// Evaluate expecting an error; returns it.
pub fn run_err_on(backend: Backend, src: &str) -> EvalError {
    let mut ctx = ctx_with(backend);
    match eval_str(&mut ctx, src) {
        Ok(v) => panic!("expected error from {:?}, got {}", src, v),
        Err(e) => e,
    }
}
