//! list
//!
//! 락을 쥔 채로 파이썬 코드를 부르지 않도록, 비교가 필요한 메서드는
//! 스냅샷을 떠서 비교한 뒤 다시 쓰기 락을 잡습니다.

use std::sync::RwLock;

use super::super::exception::{index_error, type_error, value_error};
use super::super::machine::{CompareOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{
    expect_int, normalize_index, read, repeat_items, slice_indices, slice_positions, type_name,
    write,
};
use super::super::value::{IterState, ObjectData, Value};
use super::super::VmResult;
use super::{
    Kw, P, SELF, SELF_KEY, SELF_OTHER, compare_sequences, guarded_repr, join_reprs, slice_parts,
    sort_values, subscript,
};

const LIST_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", list_new, &[("cls", P), ("iterable", P)])
        .with_optional(&["iterable"]),
    MethodDef::method("__repr__", list_repr, SELF),
    MethodDef::method("__len__", list_len, SELF),
    MethodDef::method("__getitem__", list_getitem, SELF_KEY),
    MethodDef::method("__setitem__", list_setitem, &[("self", P), ("key", P), ("value", P)]),
    MethodDef::method("__delitem__", list_delitem, SELF_KEY),
    MethodDef::method("__iter__", list_iter, SELF),
    MethodDef::method("__contains__", list_contains, SELF_KEY),
    MethodDef::method("__add__", list_add, SELF_OTHER),
    MethodDef::method("__iadd__", list_iadd, SELF_OTHER),
    MethodDef::method("__mul__", list_mul, SELF_OTHER),
    MethodDef::method("__rmul__", list_mul, SELF_OTHER),
    MethodDef::method("__imul__", list_imul, SELF_OTHER),
    MethodDef::method("__eq__", list_eq, SELF_OTHER),
    MethodDef::method("__ne__", list_ne, SELF_OTHER),
    MethodDef::method("__lt__", list_lt, SELF_OTHER),
    MethodDef::method("__le__", list_le, SELF_OTHER),
    MethodDef::method("__gt__", list_gt, SELF_OTHER),
    MethodDef::method("__ge__", list_ge, SELF_OTHER),
    MethodDef::method("append", list_append, &[("self", P), ("object", P)]),
    MethodDef::method("extend", list_extend, &[("self", P), ("iterable", P)]),
    MethodDef::method("insert", list_insert, &[("self", P), ("index", P), ("object", P)]),
    MethodDef::method("pop", list_pop, &[("self", P), ("index", P)]).with_optional(&["index"]),
    MethodDef::method("remove", list_remove, &[("self", P), ("value", P)]),
    MethodDef::method("clear", list_clear, SELF),
    MethodDef::method("copy", list_copy, SELF),
    MethodDef::method("reverse", list_reverse, SELF),
    MethodDef::method(
        "index",
        list_index,
        &[("self", P), ("value", P), ("start", P), ("stop", P)],
    )
    .with_optional(&["start", "stop"]),
    MethodDef::method("count", list_count, &[("self", P), ("value", P)]),
    MethodDef::method("sort", list_sort, &[("self", P), ("key", Kw), ("reverse", Kw)])
        .with_optional(&["key", "reverse"]),
];

fn cell<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a RwLock<Vec<Value>>> {
    let v = b.get("self")?;
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::List(items) => Ok(items),
            _ => Err(super::descriptor_error(method, "list", v)),
        },
        _ => Err(super::descriptor_error(method, "list", v)),
    }
}

fn snapshot(b: &Bindings, method: &str) -> VmResult<Vec<Value>> {
    Ok(read(cell(b, method)?).clone())
}

fn list_of(v: &Value) -> Option<Vec<Value>> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::List(items) => Some(read(items).clone()),
            _ => None,
        },
        _ => None,
    }
}

fn list_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.optional("iterable").cloned() {
        None => Ok(Value::list(Vec::new())),
        Some(v) => Ok(Value::list(vm.collect(&v)?)),
    }
}

fn list_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?.clone();
    let items = snapshot(&b, "__repr__")?;
    let text = guarded_repr(vm, &this, "[...]", |vm| {
        Ok(format!("[{}]", join_reprs(vm, &items)?))
    })?;
    Ok(Value::str(text))
}

fn list_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(read(cell(&b, "__len__")?).len() as i64))
}

fn list_getitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "__getitem__")?;
    subscript(&items, b.get("key")?, "list", Value::list)
}

fn list_setitem(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "__setitem__")?;
    let key = b.get("key")?;
    let value = b.get("value")?.clone();
    if let Some(i) = key.as_int() {
        let mut items = write(target);
        let idx = normalize_index(i, items.len(), "list assignment")?;
        items[idx] = value;
        return Ok(Value::None);
    }
    let Some((start, stop, step)) = slice_parts(key) else {
        return Err(type_error(format!(
            "list indices must be integers or slices, not {}",
            type_name(key)
        )));
    };
    let replacement = vm.collect(&value)?;
    let mut items = write(target);
    let (start, stop, step) = slice_indices(&start, &stop, &step, items.len())?;
    if step == 1 {
        let start = start as usize;
        let stop = (stop as usize).max(start);
        items.splice(start..stop, replacement);
        return Ok(Value::None);
    }
    let positions = slice_positions(start, stop, step);
    if positions.len() != replacement.len() {
        return Err(value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            positions.len()
        )));
    }
    for (pos, v) in positions.into_iter().zip(replacement) {
        items[pos] = v;
    }
    Ok(Value::None)
}

fn list_delitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "__delitem__")?;
    let key = b.get("key")?;
    let mut items = write(target);
    if let Some(i) = key.as_int() {
        let idx = normalize_index(i, items.len(), "list assignment")?;
        items.remove(idx);
        return Ok(Value::None);
    }
    let Some((start, stop, step)) = slice_parts(key) else {
        return Err(type_error(format!(
            "list indices must be integers or slices, not {}",
            type_name(key)
        )));
    };
    let (start, stop, step) = slice_indices(&start, &stop, &step, items.len())?;
    let mut positions = slice_positions(start, stop, step);
    positions.sort_unstable();
    for pos in positions.into_iter().rev() {
        items.remove(pos);
    }
    Ok(Value::None)
}

fn list_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    cell(&b, "__iter__")?;
    Ok(Value::iterator(IterState::seq(b.get("self")?.clone())))
}

fn list_contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "__contains__")?;
    let key = b.get("key")?;
    for item in &items {
        if item.is(key) || vm.eq(item, key)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn list_add(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let mut items = snapshot(&b, "__add__")?;
    let other = b.get("other")?;
    match list_of(other) {
        Some(more) => {
            items.extend(more);
            Ok(Value::list(items))
        }
        None => Err(type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            type_name(other)
        ))),
    }
}

/// `+=`는 임의의 반복 가능 값을 받는다
fn list_iadd(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "__iadd__")?;
    let more = vm.collect(b.get("other")?)?;
    write(target).extend(more);
    Ok(b.get("self")?.clone())
}

fn list_mul(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "__mul__")?;
    match b.get("other")?.as_int() {
        Some(n) => Ok(Value::list(repeat_items(&items, n)?)),
        None => Ok(Value::NotImplemented),
    }
}

fn list_imul(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "__imul__")?;
    let Some(n) = b.get("other")?.as_int() else {
        return Ok(Value::NotImplemented);
    };
    let repeated = repeat_items(&read(target), n)?;
    *write(target) = repeated;
    Ok(b.get("self")?.clone())
}

fn compare_list(vm: &mut Vm, b: &Bindings, op: CompareOp) -> VmResult<Value> {
    let (Some(x), Some(y)) = (list_of(b.get("self")?), list_of(b.get("other")?)) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(compare_sequences(vm, &x, &y, op)?))
}

fn list_eq(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Eq)
}

fn list_ne(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Ne)
}

fn list_lt(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Lt)
}

fn list_le(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Le)
}

fn list_gt(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Gt)
}

fn list_ge(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_list(vm, &b, CompareOp::Ge)
}

fn list_append(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "append")?;
    write(target).push(b.get("object")?.clone());
    Ok(Value::None)
}

fn list_extend(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "extend")?;
    let more = vm.collect(b.get("iterable")?)?;
    write(target).extend(more);
    Ok(Value::None)
}

fn list_insert(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "insert")?;
    let index = expect_int(b.get("index")?, "index")?;
    let mut items = write(target);
    let len = items.len() as i64;
    let pos = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(pos as usize, b.get("object")?.clone());
    Ok(Value::None)
}

fn list_pop(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "pop")?;
    let index = match b.optional("index") {
        Some(v) => expect_int(v, "index")?,
        None => -1,
    };
    let mut items = write(target);
    if items.is_empty() {
        return Err(index_error("pop from empty list"));
    }
    let idx = normalize_index(index, items.len(), "pop")?;
    Ok(items.remove(idx))
}

fn position(vm: &mut Vm, items: &[Value], value: &Value) -> VmResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if item.is(value) || vm.eq(item, value)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn list_remove(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "remove")?;
    let value = b.get("value")?;
    let Some(idx) = position(vm, &items, value)? else {
        return Err(value_error("list.remove(x): x not in list"));
    };
    let mut items = write(cell(&b, "remove")?);
    // 비교 도중 리스트가 줄었을 수 있다
    if idx < items.len() {
        items.remove(idx);
    }
    Ok(Value::None)
}

fn list_clear(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    write(cell(&b, "clear")?).clear();
    Ok(Value::None)
}

fn list_copy(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::list(snapshot(&b, "copy")?))
}

fn list_reverse(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    write(cell(&b, "reverse")?).reverse();
    Ok(Value::None)
}

fn list_index(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "index")?;
    let (start, stop, _) =
        slice_indices(b.get("start")?, b.get("stop")?, &Value::None, items.len())?;
    let value = b.get("value")?;
    let (start, stop) = (start.max(0) as usize, stop.max(0) as usize);
    if start < stop
        && let Some(i) = position(vm, &items[start..stop], value)?
    {
        return Ok(Value::Int((start + i) as i64));
    }
    Err(value_error(format!(
        "{} is not in list",
        vm.repr(value)?
    )))
}

fn list_count(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = snapshot(&b, "count")?;
    let value = b.get("value")?;
    let mut n = 0;
    for item in &items {
        if item.is(value) || vm.eq(item, value)? {
            n += 1;
        }
    }
    Ok(Value::Int(n))
}

/// 정렬 중에는 리스트를 비워 두고, 끝나면 결과를 되돌려 놓는다
fn list_sort(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = cell(&b, "sort")?;
    let items = std::mem::take(&mut *write(target));
    let reverse = match b.optional("reverse") {
        Some(v) => vm.is_true(v)?,
        None => false,
    };
    match sort_values(vm, items.clone(), b.optional_not_none("key"), reverse) {
        Ok(sorted) => {
            *write(target) = sorted;
            Ok(Value::None)
        }
        Err(e) => {
            *write(target) = items;
            Err(e)
        }
    }
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.list, LIST_METHODS)?;
    types.list.set_attr("__hash__", Value::None);
    Ok(())
}
