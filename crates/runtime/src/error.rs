//! Evaluation error channel
//!
//! Both backends propagate failures through `EvalResult`. A `Thrown`
//! carries the user's value from `throw`; a `Diag` carries a structured
//! diagnostic (only the Runtime kind is catchable); `Recur` is not an
//! error at all but the tree-walker's non-local jump back to the nearest
//! loop head, consumed by `loop`/fn frames and invisible to `try`.

use std::rc::Rc;

use loam_core::diagnostics::Diagnostic;
use loam_core::value::{ExInfo, Value};

#[derive(Debug, Clone)]
pub enum EvalError {
    /// Value thrown by user code.
    Thrown(Value),
    Diag(Diagnostic),
    /// Tree-walker recur signal: rebind loop slots and continue.
    Recur(Vec<Value>),
}

pub type EvalResult<T> = Result<T, EvalError>;

impl From<Diagnostic> for EvalError {
    fn from(d: Diagnostic) -> Self {
        EvalError::Diag(d)
    }
}

impl EvalError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        EvalError::Diag(Diagnostic::runtime(msg))
    }

    /// Whether a `try` may catch this.
    pub fn catchable(&self) -> bool {
        match self {
            EvalError::Thrown(_) => true,
            EvalError::Diag(d) => d.catchable(),
            EvalError::Recur(_) => false,
        }
    }

    /// The value bound by a catch clause. Runtime diagnostics surface as
    /// exception-info values so `ex-message` works on them.
    pub fn catch_value(&self) -> Value {
        match self {
            EvalError::Thrown(v) => v.clone(),
            EvalError::Diag(d) => Value::ExInfo(Rc::new(ExInfo {
                message: d.message.clone().into(),
                data: Value::Nil,
            })),
            EvalError::Recur(_) => Value::Nil,
        }
    }

    /// Root values carried by an in-flight error (the "thrown slot" for
    /// GC purposes while unwinding).
    pub fn for_each_value(&self, visit: &mut dyn FnMut(&Value)) {
        match self {
            EvalError::Thrown(v) => visit(v),
            EvalError::Recur(vs) => {
                for v in vs {
                    visit(v);
                }
            }
            EvalError::Diag(_) => {}
        }
    }
}

pub fn arity_error(name: &str, got: usize) -> EvalError {
    EvalError::runtime(format!("wrong number of arguments ({}) passed to {}", got, name))
}
