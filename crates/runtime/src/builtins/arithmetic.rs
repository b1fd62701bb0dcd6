//! Numeric builtins
//!
//! Integer arithmetic is checked (overflow is a runtime error, not a
//! wrap), mixed int/double promotes to double, and `/` of two ints
//! yields an int only when the division is exact. These helpers are also
//! the implementation behind the specialized arithmetic opcodes.

use loam_core::node::BinOp;
use loam_core::value::Value;

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

fn num_err(op: &str, v: &Value) -> EvalError {
    EvalError::runtime(format!("{} expects a number, got {}", op, v.type_name()))
}

fn overflow(op: &str) -> EvalError {
    EvalError::runtime(format!("integer overflow in {}", op))
}

pub fn num_add(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .ok_or_else(|| overflow("+")),
        (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x + y)),
        (Value::Int(x), Value::Double(y)) => Ok(Value::Double(*x as f64 + y)),
        (Value::Double(x), Value::Int(y)) => Ok(Value::Double(x + *y as f64)),
        (Value::Int(_) | Value::Double(_), other) => Err(num_err("+", other)),
        (other, _) => Err(num_err("+", other)),
    }
}

pub fn num_sub(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_sub(*y)
            .map(Value::Int)
            .ok_or_else(|| overflow("-")),
        (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x - y)),
        (Value::Int(x), Value::Double(y)) => Ok(Value::Double(*x as f64 - y)),
        (Value::Double(x), Value::Int(y)) => Ok(Value::Double(x - *y as f64)),
        (Value::Int(_) | Value::Double(_), other) => Err(num_err("-", other)),
        (other, _) => Err(num_err("-", other)),
    }
}

pub fn num_mul(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_mul(*y)
            .map(Value::Int)
            .ok_or_else(|| overflow("*")),
        (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x * y)),
        (Value::Int(x), Value::Double(y)) => Ok(Value::Double(*x as f64 * y)),
        (Value::Double(x), Value::Int(y)) => Ok(Value::Double(x * *y as f64)),
        (Value::Int(_) | Value::Double(_), other) => Err(num_err("*", other)),
        (other, _) => Err(num_err("*", other)),
    }
}

pub fn num_div(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return Err(EvalError::runtime("divide by zero"));
            }
            if x % y == 0 {
                Ok(Value::Int(x / y))
            } else {
                Ok(Value::Double(*x as f64 / *y as f64))
            }
        }
        (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x / y)),
        (Value::Int(x), Value::Double(y)) => Ok(Value::Double(*x as f64 / y)),
        (Value::Double(x), Value::Int(y)) => Ok(Value::Double(x / *y as f64)),
        (Value::Int(_) | Value::Double(_), other) => Err(num_err("/", other)),
        (other, _) => Err(num_err("/", other)),
    }
}

fn as_f64(v: &Value, op: &str) -> EvalResult<f64> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Double(d) => Ok(*d),
        other => Err(num_err(op, other)),
    }
}

pub fn num_cmp(a: &Value, b: &Value, op: BinOp) -> EvalResult<Value> {
    let (x, y) = (as_f64(a, "comparison")?, as_f64(b, "comparison")?);
    let ok = match op {
        BinOp::Lt => x < y,
        BinOp::Gt => x > y,
        BinOp::Le => x <= y,
        BinOp::Ge => x >= y,
        _ => return Err(EvalError::runtime("unsupported comparison")),
    };
    Ok(Value::Bool(ok))
}

fn fold(
    args: &[Value],
    identity: Option<Value>,
    f: fn(&Value, &Value) -> EvalResult<Value>,
) -> EvalResult<Value> {
    match args.split_first() {
        None => identity.ok_or_else(|| EvalError::runtime("wrong number of arguments")),
        Some((first, rest)) => {
            let mut acc = first.clone();
            for v in rest {
                acc = f(&acc, v)?;
            }
            Ok(acc)
        }
    }
}

pub fn add(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    fold(args, Some(Value::Int(0)), num_add)
}

pub fn sub(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match args {
        [Value::Int(n)] => n.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
        [Value::Double(d)] => Ok(Value::Double(-d)),
        [only] => Err(num_err("-", only)),
        _ => fold(args, None, num_sub),
    }
}

pub fn mul(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    fold(args, Some(Value::Int(1)), num_mul)
}

pub fn div(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match args {
        [only] => num_div(&Value::Int(1), only),
        _ => fold(args, None, num_div),
    }
}

fn chain(
    ctx: &mut RuntimeContext,
    args: &[Value],
    op: BinOp,
) -> EvalResult<Value> {
    let _ = ctx;
    for pair in args.windows(2) {
        let Value::Bool(ok) = num_cmp(&pair[0], &pair[1], op)? else {
            unreachable!("num_cmp yields a bool");
        };
        if !ok {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn lt(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    chain(ctx, args, BinOp::Lt)
}

pub fn gt(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    chain(ctx, args, BinOp::Gt)
}

pub fn le(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    chain(ctx, args, BinOp::Le)
}

pub fn ge(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    chain(ctx, args, BinOp::Ge)
}

pub fn inc(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    num_add(&args[0], &Value::Int(1))
}

pub fn dec(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    num_sub(&args[0], &Value::Int(1))
}

fn int_pair(args: &[Value], op: &str) -> EvalResult<(i64, i64)> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok((*a, *b)),
        (Value::Int(_), other) | (other, _) => Err(num_err(op, other)),
    }
}

pub fn rem_op(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (a, b) = int_pair(args, "rem")?;
    if b == 0 {
        return Err(EvalError::runtime("divide by zero"));
    }
    Ok(Value::Int(a % b))
}

pub fn quot(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (a, b) = int_pair(args, "quot")?;
    if b == 0 {
        return Err(EvalError::runtime("divide by zero"));
    }
    Ok(Value::Int(a / b))
}

pub fn mod_op(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (a, b) = int_pair(args, "mod")?;
    if b == 0 {
        return Err(EvalError::runtime("divide by zero"));
    }
    Ok(Value::Int(a.rem_euclid(b)))
}

pub fn min_op(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    fold(args, None, |a, b| {
        Ok(match num_cmp(a, b, BinOp::Le)? {
            Value::Bool(true) => a.clone(),
            _ => b.clone(),
        })
    })
}

pub fn max_op(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    fold(args, None, |a, b| {
        Ok(match num_cmp(a, b, BinOp::Ge)? {
            Value::Bool(true) => a.clone(),
            _ => b.clone(),
        })
    })
}

pub fn abs(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(|| overflow("abs")),
        Value::Double(d) => Ok(Value::Double(d.abs())),
        other => Err(num_err("abs", other)),
    }
}

fn int_pred(args: &[Value], f: fn(i64) -> bool) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Bool(f(*n))),
        other => Err(num_err("predicate", other)),
    }
}

pub fn zero_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Bool(*n == 0)),
        Value::Double(d) => Ok(Value::Bool(*d == 0.0)),
        other => Err(num_err("zero?", other)),
    }
}

pub fn pos_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Bool(*n > 0)),
        Value::Double(d) => Ok(Value::Bool(*d > 0.0)),
        other => Err(num_err("pos?", other)),
    }
}

pub fn neg_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Bool(*n < 0)),
        Value::Double(d) => Ok(Value::Bool(*d < 0.0)),
        other => Err(num_err("neg?", other)),
    }
}

pub fn odd_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    int_pred(args, |n| n.rem_euclid(2) == 1)
}

pub fn even_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    int_pred(args, |n| n.rem_euclid(2) == 0)
}

pub fn number_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(
        args[0],
        Value::Int(_) | Value::Double(_)
    )))
}

pub fn integer_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Int(_))))
}

pub fn double_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Double(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_promotion() {
        assert!(matches!(
            num_add(&Value::Int(1), &Value::Double(0.5)).unwrap(),
            Value::Double(d) if d == 1.5
        ));
    }

    #[test]
    fn test_exact_division_stays_int() {
        assert!(matches!(
            num_div(&Value::Int(6), &Value::Int(3)).unwrap(),
            Value::Int(2)
        ));
        assert!(matches!(
            num_div(&Value::Int(1), &Value::Int(2)).unwrap(),
            Value::Double(d) if d == 0.5
        ));
    }

    #[test]
    fn test_integer_divide_by_zero_errors() {
        assert!(num_div(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert!(num_add(&Value::Int(i64::MAX), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_variadic_fold() {
        let mut ctx = crate::context::RuntimeContext::with_defaults();
        let r = add(&mut ctx, &[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert!(matches!(r, Value::Int(6)));
        let r = add(&mut ctx, &[]).unwrap();
        assert!(matches!(r, Value::Int(0)));
        let r = sub(&mut ctx, &[Value::Int(5)]).unwrap();
        assert!(matches!(r, Value::Int(-5)));
    }

    #[test]
    fn test_comparison_chains() {
        let mut ctx = crate::context::RuntimeContext::with_defaults();
        let r = lt(&mut ctx, &[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert!(matches!(r, Value::Bool(true)));
        let r = lt(&mut ctx, &[Value::Int(1), Value::Int(3), Value::Int(2)]).unwrap();
        assert!(matches!(r, Value::Bool(false)));
    }

    #[test]
    fn test_odd_even_with_negatives() {
        let mut ctx = crate::context::RuntimeContext::with_defaults();
        assert!(matches!(
            odd_p(&mut ctx, &[Value::Int(-3)]).unwrap(),
            Value::Bool(true)
        ));
        assert!(matches!(
            even_p(&mut ctx, &[Value::Int(-4)]).unwrap(),
            Value::Bool(true)
        ));
    }
}
