//! range

use super::super::exception::{type_error, value_error};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{normalize_index, slice_indices, type_name};
use super::super::value::{IterState, Object, ObjectData, Value};
use super::super::VmResult;
use super::object::new_property;
use super::{P, SELF, SELF_KEY, SELF_OTHER, fix_hash, slice_parts};

const RANGE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        range_new,
        &[("cls", P), ("start", P), ("stop", P), ("step", P)],
    )
    .with_optional(&["stop", "step"]),
    MethodDef::method("__repr__", range_repr, SELF),
    MethodDef::method("__len__", range_len, SELF),
    MethodDef::method("__iter__", range_iter, SELF),
    MethodDef::method("__reversed__", range_reversed, SELF),
    MethodDef::method("__contains__", range_contains, SELF_KEY),
    MethodDef::method("__getitem__", range_getitem, SELF_KEY),
    MethodDef::method("__eq__", range_eq, SELF_OTHER),
    MethodDef::method("__hash__", range_hash, SELF),
    MethodDef::method("count", range_count, &[("self", P), ("value", P)]),
    MethodDef::method("index", range_index, &[("self", P), ("value", P)]),
];

const ATTRIBUTES: &[MethodDef] = &[
    MethodDef::static_fn("start", range_start, SELF),
    MethodDef::static_fn("stop", range_stop, SELF),
    MethodDef::static_fn("step", range_step, SELF),
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    start: i64,
    stop: i64,
    step: i64,
}

impl Range {
    fn len(&self) -> i64 {
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.stop, self.step)
        } else {
            (self.stop, self.start, -self.step)
        };
        if lo >= hi {
            0
        } else {
            ((hi as i128 - lo as i128 - 1) / step as i128 + 1) as i64
        }
    }

    fn at(&self, i: i64) -> i64 {
        self.start + i * self.step
    }

    fn contains(&self, v: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= v && v < self.stop
        } else {
            self.stop < v && v <= self.start
        };
        in_bounds && (v - self.start) % self.step == 0
    }

    /// 같은 정수열이면 같은 range (`range(0) == range(2, 2)`)
    fn same_sequence(&self, other: &Range) -> bool {
        let n = self.len();
        if n != other.len() {
            return false;
        }
        match n {
            0 => true,
            1 => self.start == other.start,
            _ => self.start == other.start && self.step == other.step,
        }
    }
}

fn range_of(v: &Value) -> Option<Range> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Range { start, stop, step } => Some(Range {
                start: *start,
                stop: *stop,
                step: *step,
            }),
            _ => None,
        },
        _ => None,
    }
}

fn this(b: &Bindings, method: &str) -> VmResult<Range> {
    let v = b.get("self")?;
    range_of(v).ok_or_else(|| super::descriptor_error(method, "range", v))
}

fn make(r: Range) -> Value {
    Value::Object(Object::new(ObjectData::Range {
        start: r.start,
        stop: r.stop,
        step: r.step,
    }))
}

fn index_arg(vm: &mut Vm, v: &Value) -> VmResult<i64> {
    if let Some(i) = v.as_int() {
        return Ok(i);
    }
    match vm.call_special(v, "__index__", Vec::new())? {
        Some(Value::Int(i)) => Ok(i),
        _ => Err(type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            type_name(v)
        ))),
    }
}

fn range_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let first = index_arg(vm, b.get("start")?)?;
    let (start, stop) = match b.optional("stop") {
        Some(stop) => (first, index_arg(vm, stop)?),
        None => {
            if b.optional("step").is_some() {
                return Err(type_error("range expected at most 1 argument with no stop"));
            }
            (0, first)
        }
    };
    let step = match b.optional("step") {
        Some(step) => index_arg(vm, step)?,
        None => 1,
    };
    if step == 0 {
        return Err(value_error("range() arg 3 must not be zero"));
    }
    Ok(make(Range { start, stop, step }))
}

fn range_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__repr__")?;
    Ok(Value::str(if r.step == 1 {
        format!("range({}, {})", r.start, r.stop)
    } else {
        format!("range({}, {}, {})", r.start, r.stop, r.step)
    }))
}

fn range_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this(&b, "__len__")?.len()))
}

fn range_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__iter__")?;
    Ok(Value::iterator(IterState::range(r.start, r.stop, r.step)))
}

fn range_reversed(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__reversed__")?;
    let n = r.len();
    if n == 0 {
        return Ok(Value::iterator(IterState::range(0, 0, 1)));
    }
    let last = r.at(n - 1);
    Ok(Value::iterator(IterState::range(last, r.start - r.step, -r.step)))
}

fn range_contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__contains__")?;
    let key = b.get("key")?;
    match key {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Bool(key.as_int().is_some_and(|v| r.contains(v)))),
        _ => {
            let mut i = 0;
            while i < r.len() {
                if vm.eq(&Value::Int(r.at(i)), key)? {
                    return Ok(Value::Bool(true));
                }
                i += 1;
            }
            Ok(Value::Bool(false))
        }
    }
}

fn range_getitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__getitem__")?;
    let key = b.get("key")?;
    let len = r.len() as usize;
    if let Some(i) = key.as_int() {
        let idx = normalize_index(i, len, "range object")?;
        return Ok(Value::Int(r.at(idx as i64)));
    }
    if let Some((start, stop, step)) = slice_parts(key) {
        let (lo, hi, step) = slice_indices(&start, &stop, &step, len)?;
        return Ok(make(Range {
            start: r.at(lo),
            stop: r.at(hi),
            step: r.step * step,
        }));
    }
    Err(type_error(format!(
        "range indices must be integers or slices, not {}",
        type_name(key)
    )))
}

fn range_eq(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__eq__")?;
    match range_of(b.get("other")?) {
        Some(other) => Ok(Value::Bool(r.same_sequence(&other))),
        None => Ok(Value::NotImplemented),
    }
}

fn range_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "__hash__")?;
    let n = r.len();
    let (start, step) = match n {
        0 => (0, 0),
        1 => (r.start, 0),
        _ => (r.start, r.step),
    };
    let h = n
        .wrapping_mul(1_000_003)
        .wrapping_add(start)
        .wrapping_mul(1_000_003)
        .wrapping_add(step);
    Ok(Value::Int(fix_hash(h)))
}

fn range_count(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "count")?;
    let hit = b.get("value")?.as_int().is_some_and(|v| r.contains(v));
    Ok(Value::Int(hit as i64))
}

fn range_index(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let r = this(&b, "index")?;
    let value = b.get("value")?;
    match value.as_int() {
        Some(v) if r.contains(v) => Ok(Value::Int((v - r.start) / r.step)),
        _ => Err(value_error(format!("{} is not in range", vm.repr(value)?))),
    }
}

fn range_start(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this(&b, "start")?.start))
}

fn range_stop(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this(&b, "stop")?.stop))
}

fn range_step(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this(&b, "step")?.step))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.range, RANGE_METHODS)?;
    for def in ATTRIBUTES {
        let getter = def.build("range")?;
        types.range.set_attr(def.name, new_property(getter, Value::None));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: i64, stop: i64, step: i64) -> Range {
        Range { start, stop, step }
    }

    #[test]
    fn test_len() {
        assert_eq!(r(0, 10, 1).len(), 10);
        assert_eq!(r(0, 10, 3).len(), 4);
        assert_eq!(r(10, 0, -3).len(), 4);
        assert_eq!(r(5, 5, 1).len(), 0);
        assert_eq!(r(5, 0, 1).len(), 0);
    }

    #[test]
    fn test_contains() {
        assert!(r(0, 10, 3).contains(9));
        assert!(!r(0, 10, 3).contains(10));
        assert!(r(10, 0, -2).contains(2));
        assert!(!r(10, 0, -2).contains(0));
        assert!(!r(10, 0, -2).contains(3));
    }

    #[test]
    fn test_same_sequence() {
        assert!(r(0, 0, 1).same_sequence(&r(2, 2, 5)));
        assert!(r(1, 2, 1).same_sequence(&r(1, 5, 10)));
        assert!(!r(0, 3, 1).same_sequence(&r(0, 6, 2)));
    }
}
