//! Regular expression builtins
//!
//! The pattern surface only; matching is delegated to the regex crate.
//! Group-carrying matches return `[full g1 g2 ...]`, groupless matches
//! return the matched string, mirroring the language's conventions.

use std::rc::Rc;

use loam_core::heap::HeapObj;
use loam_core::value::Value;

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

fn pattern_arg(v: &Value) -> EvalResult<Rc<regex::Regex>> {
    match v {
        Value::Regex(r) => Ok(r.clone()),
        other => Err(EvalError::runtime(format!(
            "expected a pattern, got {}",
            other.type_name()
        ))),
    }
}

fn str_arg(v: &Value) -> EvalResult<Rc<str>> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        other => Err(EvalError::runtime(format!(
            "expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn match_value(re: &regex::Regex, caps: regex::Captures<'_>) -> Value {
    if re.captures_len() == 1 {
        return Value::string(caps.get(0).map(|m| m.as_str()).unwrap_or(""));
    }
    let groups: Vec<Value> = (0..re.captures_len())
        .map(|i| match caps.get(i) {
            Some(m) => Value::string(m.as_str()),
            None => Value::Nil,
        })
        .collect();
    Value::vector(groups)
}

pub fn re_pattern(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Regex(_) => Ok(args[0].clone()),
        Value::Str(s) => regex::Regex::new(s)
            .map(|re| Value::Regex(Rc::new(re)))
            .map_err(|e| EvalError::runtime(format!("invalid regex: {}", e))),
        other => Err(EvalError::runtime(format!(
            "re-pattern requires a string, got {}",
            other.type_name()
        ))),
    }
}

pub fn re_matches(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let re = pattern_arg(&args[0])?;
    let s = str_arg(&args[1])?;
    match re.captures(&s) {
        Some(caps) if caps.get(0).is_some_and(|m| m.as_str() == &*s) => {
            Ok(match_value(&re, caps))
        }
        _ => Ok(Value::Nil),
    }
}

pub fn re_find(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match args {
        // Stateful: advance a matcher.
        [Value::Obj(r)] => {
            let (pattern, haystack, pos) = match ctx.heap.get(r) {
                HeapObj::Matcher {
                    pattern,
                    haystack,
                    pos,
                } => (pattern.clone(), haystack.clone(), *pos),
                other => {
                    return Err(EvalError::runtime(format!(
                        "re-find requires a matcher, got {}",
                        other.type_name()
                    )));
                }
            };
            if pos > haystack.len() {
                return Ok(Value::Nil);
            }
            match pattern.captures_at(&haystack, pos) {
                Some(caps) => {
                    let end = caps.get(0).map(|m| m.end()).unwrap_or(pos);
                    let next = if end == pos { pos + 1 } else { end };
                    if let HeapObj::Matcher { pos, .. } = ctx.heap.get_mut(r) {
                        *pos = next;
                    }
                    Ok(match_value(&pattern, caps))
                }
                None => Ok(Value::Nil),
            }
        }
        [pattern, s] => {
            let re = pattern_arg(pattern)?;
            let s = str_arg(s)?;
            match re.captures(&s) {
                Some(caps) => Ok(match_value(&re, caps)),
                None => Ok(Value::Nil),
            }
        }
        _ => Err(EvalError::runtime("re-find requires a matcher or pattern and string")),
    }
}

pub fn re_seq(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let re = pattern_arg(&args[0])?;
    let s = str_arg(&args[1])?;
    let matches: Vec<Value> = re.captures_iter(&s).map(|caps| match_value(&re, caps)).collect();
    if matches.is_empty() {
        return Ok(Value::Nil);
    }
    Ok(Value::list(matches))
}

pub fn re_matcher(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let pattern = pattern_arg(&args[0])?;
    let haystack = str_arg(&args[1])?;
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Matcher {
        pattern,
        haystack,
        pos: 0,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RuntimeContext;

    fn re(src: &str) -> Value {
        Value::Regex(Rc::new(regex::Regex::new(src).unwrap()))
    }

    #[test]
    fn test_re_find_groupless_returns_string() {
        let mut ctx = RuntimeContext::with_defaults();
        let r = re_find(&mut ctx, &[re("\\d+"), Value::string("a12b")]).unwrap();
        assert!(matches!(r, Value::Str(s) if &*s == "12"));
    }

    #[test]
    fn test_re_find_groups_return_vector() {
        let mut ctx = RuntimeContext::with_defaults();
        let r = re_find(&mut ctx, &[re("(\\d)(\\d)"), Value::string("a12b")]).unwrap();
        let Value::Vector(v) = r else { panic!("expected vector") };
        assert_eq!(v.items.len(), 3);
    }

    #[test]
    fn test_re_matches_requires_full_match() {
        let mut ctx = RuntimeContext::with_defaults();
        let r = re_matches(&mut ctx, &[re("\\d+"), Value::string("a12")]).unwrap();
        assert!(matches!(r, Value::Nil));
        let r = re_matches(&mut ctx, &[re("\\d+"), Value::string("12")]).unwrap();
        assert!(matches!(r, Value::Str(_)));
    }

    #[test]
    fn test_matcher_advances() {
        let mut ctx = RuntimeContext::with_defaults();
        let m = re_matcher(&mut ctx, &[re("\\d"), Value::string("1a2")]).unwrap();
        let a = re_find(&mut ctx, std::slice::from_ref(&m)).unwrap();
        let b = re_find(&mut ctx, std::slice::from_ref(&m)).unwrap();
        let c = re_find(&mut ctx, std::slice::from_ref(&m)).unwrap();
        assert!(matches!(a, Value::Str(s) if &*s == "1"));
        assert!(matches!(b, Value::Str(s) if &*s == "2"));
        assert!(matches!(c, Value::Nil));
    }
}
