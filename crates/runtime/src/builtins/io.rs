//! I/O and string-surface builtins
//!
//! Printing goes through the runtime printer (which realizes lazy
//! sequences first); file loading delegates to the classpath loader.

use std::io::Write as _;

use loam_core::value::Value;

use crate::call::{display_value, pr_str_value};
use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::loader;

fn print_with(
    ctx: &mut RuntimeContext,
    args: &[Value],
    readable: bool,
    newline: bool,
) -> EvalResult<Value> {
    let mut parts = Vec::with_capacity(args.len());
    for v in args {
        parts.push(if readable {
            pr_str_value(ctx, v)?
        } else {
            display_value(ctx, v)?
        });
    }
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(parts.join(" ").as_bytes());
    if newline {
        let _ = out.write_all(b"\n");
    }
    let _ = out.flush();
    Ok(Value::Nil)
}

pub fn println(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    print_with(ctx, args, false, true)
}

pub fn print(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    print_with(ctx, args, false, false)
}

pub fn prn(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    print_with(ctx, args, true, true)
}

pub fn pr(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    print_with(ctx, args, true, false)
}

pub fn newline(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let _ = args;
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(b"\n");
    let _ = out.flush();
    Ok(Value::Nil)
}

pub fn subs(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(s) = &args[0] else {
        return Err(EvalError::runtime("subs requires a string"));
    };
    let chars: Vec<char> = s.chars().collect();
    let start = match args[1] {
        Value::Int(n) if n >= 0 => n as usize,
        _ => return Err(EvalError::runtime("subs requires a non-negative start")),
    };
    let end = match args.get(2) {
        Some(Value::Int(n)) if *n >= 0 => *n as usize,
        None => chars.len(),
        _ => return Err(EvalError::runtime("subs requires a non-negative end")),
    };
    if start > end || end > chars.len() {
        return Err(EvalError::runtime(format!(
            "subs range {}..{} out of bounds for length {}",
            start,
            end,
            chars.len()
        )));
    }
    Ok(Value::string(chars[start..end].iter().collect::<String>()))
}

pub fn slurp(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(path) = &args[0] else {
        return Err(EvalError::runtime("slurp requires a path string"));
    };
    std::fs::read_to_string(&**path)
        .map(Value::string)
        .map_err(|e| EvalError::runtime(format!("slurp {}: {}", path, e)))
}

pub fn load_file(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(path) = &args[0] else {
        return Err(EvalError::runtime("load-file requires a path string"));
    };
    let path = path.to_string();
    loader::load_path(ctx, std::path::Path::new(&path))
}

pub fn require(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    for arg in args {
        let name = match arg {
            Value::Symbol(s) => s.name.to_string(),
            Value::Str(s) => s.to_string(),
            other => {
                return Err(EvalError::runtime(format!(
                    "require expects namespace symbols, got {}",
                    other.type_name()
                )));
            }
        };
        loader::require(ctx, &name)?;
    }
    Ok(Value::Nil)
}
