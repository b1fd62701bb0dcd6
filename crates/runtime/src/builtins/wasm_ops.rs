//! Wasm interop builtins
//!
//! Thin adapters over the host bridge trait; module handles are opaque
//! heap objects carrying only the name and export list.

use loam_core::heap::HeapObj;
use loam_core::value::Value;

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::wasm::WasmScalar;

pub fn wasm_load(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(name) = &args[0] else {
        return Err(EvalError::runtime("wasm-load requires a module name"));
    };
    let name = name.clone();
    let Some(host) = ctx.wasm_host.as_mut() else {
        return Err(EvalError::runtime("no wasm host installed"));
    };
    let exports = host
        .load(&name)
        .map_err(|e| EvalError::runtime(format!("wasm-load {}: {}", name, e)))?;
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Wasm {
        name,
        exports: exports.into_iter().map(Into::into).collect(),
    })))
}

pub fn wasm_exports(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Obj(r) = &args[0] else {
        return Err(EvalError::runtime("wasm-exports requires a module"));
    };
    match ctx.heap.get(r) {
        HeapObj::Wasm { exports, .. } => Ok(Value::list(
            exports.iter().map(|e| Value::Str(e.clone())).collect(),
        )),
        other => Err(EvalError::runtime(format!(
            "wasm-exports requires a module, got {}",
            other.type_name()
        ))),
    }
}

pub fn wasm_invoke(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Obj(r) = &args[0] else {
        return Err(EvalError::runtime("wasm-invoke requires a module"));
    };
    let module = match ctx.heap.get(r) {
        HeapObj::Wasm { name, .. } => name.to_string(),
        other => {
            return Err(EvalError::runtime(format!(
                "wasm-invoke requires a module, got {}",
                other.type_name()
            )));
        }
    };
    let Value::Str(export) = &args[1] else {
        return Err(EvalError::runtime("wasm-invoke requires an export name"));
    };
    let export = export.to_string();
    let scalars: Vec<WasmScalar> = args[2..]
        .iter()
        .map(|v| match v {
            Value::Int(n) => Ok(WasmScalar::I64(*n)),
            Value::Double(d) => Ok(WasmScalar::F64(*d)),
            other => Err(EvalError::runtime(format!(
                "wasm-invoke arguments must be numbers, got {}",
                other.type_name()
            ))),
        })
        .collect::<EvalResult<Vec<_>>>()?;
    let Some(host) = ctx.wasm_host.as_mut() else {
        return Err(EvalError::runtime("no wasm host installed"));
    };
    let result = host
        .invoke(&module, &export, &scalars)
        .map_err(|e| EvalError::runtime(format!("wasm-invoke {}/{}: {}", module, export, e)))?;
    Ok(match result {
        WasmScalar::I64(n) => Value::Int(n),
        WasmScalar::F64(d) => Value::Double(d),
    })
}
