//! tuple

use super::super::exception::{type_error, value_error};
use super::super::machine::{CompareOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{repeat_items, type_name};
use super::super::value::{IterState, ObjectData, Value};
use super::super::VmResult;
use super::{
    P, SELF, SELF_KEY, SELF_OTHER, compare_sequences, fix_hash, guarded_repr, join_reprs,
    subscript,
};

const TUPLE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", tuple_new, &[("cls", P), ("iterable", P)])
        .with_optional(&["iterable"]),
    MethodDef::method("__repr__", tuple_repr, SELF),
    MethodDef::method("__hash__", tuple_hash, SELF),
    MethodDef::method("__len__", tuple_len, SELF),
    MethodDef::method("__getitem__", tuple_getitem, SELF_KEY),
    MethodDef::method("__iter__", tuple_iter, SELF),
    MethodDef::method("__contains__", tuple_contains, SELF_KEY),
    MethodDef::method("__add__", tuple_add, SELF_OTHER),
    MethodDef::method("__mul__", tuple_mul, SELF_OTHER),
    MethodDef::method("__rmul__", tuple_mul, SELF_OTHER),
    MethodDef::method("__eq__", tuple_eq, SELF_OTHER),
    MethodDef::method("__ne__", tuple_ne, SELF_OTHER),
    MethodDef::method("__lt__", tuple_lt, SELF_OTHER),
    MethodDef::method("__le__", tuple_le, SELF_OTHER),
    MethodDef::method("__gt__", tuple_gt, SELF_OTHER),
    MethodDef::method("__ge__", tuple_ge, SELF_OTHER),
    MethodDef::method("count", tuple_count, &[("self", P), ("value", P)]),
    MethodDef::method("index", tuple_index, &[("self", P), ("value", P)]),
];

fn items(b: &Bindings, method: &str) -> VmResult<Vec<Value>> {
    let v = b.get("self")?;
    v.tuple_items()
        .ok_or_else(|| super::descriptor_error(method, "tuple", v))
}

fn tuple_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.optional("iterable") {
        None => Ok(Value::tuple(Vec::new())),
        Some(v) if matches!(v, Value::Object(o) if matches!(o.data, ObjectData::Tuple(_))) => {
            Ok(v.clone())
        }
        Some(v) => {
            let v = v.clone();
            Ok(Value::tuple(vm.collect(&v)?))
        }
    }
}

fn tuple_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?.clone();
    let items = items(&b, "__repr__")?;
    let text = guarded_repr(vm, &this, "(...)", |vm| {
        let body = join_reprs(vm, &items)?;
        // 원소 하나짜리는 쉼표를 붙인다
        Ok(if items.len() == 1 {
            format!("({},)", body)
        } else {
            format!("({})", body)
        })
    })?;
    Ok(Value::str(text))
}

/// 항목 해시를 섞는다. 해시 불가능한 항목이 있으면 TypeError
fn tuple_hash(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let mut acc: i64 = 0x345678;
    let mut mult: i64 = 1_000_003;
    let items = items(&b, "__hash__")?;
    let len = items.len() as i64;
    for (i, item) in items.iter().enumerate() {
        let h = vm.hash(item)?;
        acc = (acc ^ h).wrapping_mul(mult);
        mult = mult.wrapping_add(82_520 + 2 * (len - i as i64));
    }
    Ok(Value::Int(fix_hash(acc.wrapping_add(97_531))))
}

fn tuple_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(items(&b, "__len__")?.len() as i64))
}

fn tuple_getitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = items(&b, "__getitem__")?;
    subscript(&items, b.get("key")?, "tuple", Value::tuple)
}

fn tuple_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    items(&b, "__iter__")?;
    Ok(Value::iterator(IterState::seq(b.get("self")?.clone())))
}

fn tuple_contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = items(&b, "__contains__")?;
    let key = b.get("key")?;
    for item in &items {
        if item.is(key) || vm.eq(item, key)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn tuple_add(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let mut items = items(&b, "__add__")?;
    let other = b.get("other")?;
    match other {
        Value::Object(o) if matches!(o.data, ObjectData::Tuple(_)) => {
            items.extend(other.tuple_items().unwrap_or_default());
            Ok(Value::tuple(items))
        }
        _ => Err(type_error(format!(
            "can only concatenate tuple (not \"{}\") to tuple",
            type_name(other)
        ))),
    }
}

fn tuple_mul(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = items(&b, "__mul__")?;
    match b.get("other")?.as_int() {
        Some(n) => Ok(Value::tuple(repeat_items(&items, n)?)),
        None => Ok(Value::NotImplemented),
    }
}

fn compare_tuple(vm: &mut Vm, b: &Bindings, op: CompareOp) -> VmResult<Value> {
    let (Some(x), Some(y)) = (
        b.get("self")?.tuple_items(),
        b.get("other")?.tuple_items(),
    ) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(compare_sequences(vm, &x, &y, op)?))
}

fn tuple_eq(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Eq)
}

fn tuple_ne(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Ne)
}

fn tuple_lt(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Lt)
}

fn tuple_le(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Le)
}

fn tuple_gt(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Gt)
}

fn tuple_ge(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_tuple(vm, &b, CompareOp::Ge)
}

fn tuple_count(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = items(&b, "count")?;
    let value = b.get("value")?;
    let mut n = 0;
    for item in &items {
        if item.is(value) || vm.eq(item, value)? {
            n += 1;
        }
    }
    Ok(Value::Int(n))
}

fn tuple_index(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = items(&b, "index")?;
    let value = b.get("value")?;
    for (i, item) in items.iter().enumerate() {
        if item.is(value) || vm.eq(item, value)? {
            return Ok(Value::Int(i as i64));
        }
    }
    Err(value_error("tuple.index(x): x not in tuple"))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.tuple, TUPLE_METHODS)
}
