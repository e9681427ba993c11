//! set과 frozenset
//!
//! 두 타입은 같은 `ObjectData::Set` payload를 쓰고 `frozen` 플래그로 구분합니다.
//! 연산 결과는 왼쪽 피연산자의 종류를 따릅니다.

use indexmap::IndexMap;
use std::sync::RwLock;

use super::super::exception::{ExcKind, pending};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{read, write};
use super::super::value::{IterState, ObjectData, SetMap, Value};
use super::super::{VmError, VmResult};
use super::{P, SELF, SELF_KEY, SELF_OTHER, VarP, fix_hash, guarded_repr, join_reprs};

/// set과 frozenset이 공유하는 메서드
const COMMON_METHODS: &[MethodDef] = &[
    MethodDef::method("__repr__", set_repr, SELF),
    MethodDef::method("__len__", set_len, SELF),
    MethodDef::method("__iter__", set_iter, SELF),
    MethodDef::method("__contains__", set_contains, SELF_KEY),
    MethodDef::method("__eq__", set_eq, SELF_OTHER),
    MethodDef::method("__ne__", set_ne, SELF_OTHER),
    MethodDef::method("__le__", set_le, SELF_OTHER),
    MethodDef::method("__lt__", set_lt, SELF_OTHER),
    MethodDef::method("__ge__", set_ge, SELF_OTHER),
    MethodDef::method("__gt__", set_gt, SELF_OTHER),
    MethodDef::method("__or__", set_or, SELF_OTHER),
    MethodDef::method("__and__", set_and, SELF_OTHER),
    MethodDef::method("__sub__", set_sub, SELF_OTHER),
    MethodDef::method("__xor__", set_xor, SELF_OTHER),
    MethodDef::method("union", set_union, &[("self", P), ("others", VarP)]),
    MethodDef::method("intersection", set_intersection, &[("self", P), ("others", VarP)]),
    MethodDef::method("difference", set_difference, &[("self", P), ("others", VarP)]),
    MethodDef::method(
        "symmetric_difference",
        set_symmetric_difference,
        &[("self", P), ("other", P)],
    ),
    MethodDef::method("issubset", set_issubset, SELF_OTHER),
    MethodDef::method("issuperset", set_issuperset, SELF_OTHER),
    MethodDef::method("isdisjoint", set_isdisjoint, SELF_OTHER),
    MethodDef::method("copy", set_copy, SELF),
];

const SET_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", set_new, &[("cls", P), ("iterable", P)])
        .with_optional(&["iterable"]),
    MethodDef::method("add", set_add, &[("self", P), ("elem", P)]),
    MethodDef::method("discard", set_discard, &[("self", P), ("elem", P)]),
    MethodDef::method("remove", set_remove, &[("self", P), ("elem", P)]),
    MethodDef::method("pop", set_pop, SELF),
    MethodDef::method("clear", set_clear, SELF),
    MethodDef::method("update", set_update, &[("self", P), ("others", VarP)]),
    MethodDef::method("__ior__", set_ior, SELF_OTHER),
    MethodDef::method("__iand__", set_iand, SELF_OTHER),
    MethodDef::method("__isub__", set_isub, SELF_OTHER),
    MethodDef::method("__ixor__", set_ixor, SELF_OTHER),
];

const FROZENSET_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", frozenset_new, &[("cls", P), ("iterable", P)])
        .with_optional(&["iterable"]),
    MethodDef::method("__hash__", frozenset_hash, SELF),
];

// ========== 공통 ==========

fn set_parts(v: &Value) -> Option<(&RwLock<SetMap>, bool)> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Set { items, frozen } => Some((items, *frozen)),
            _ => None,
        },
        _ => None,
    }
}

fn this<'a>(b: &'a Bindings, method: &str) -> VmResult<(&'a RwLock<SetMap>, bool)> {
    let v = b.get("self")?;
    set_parts(v).ok_or_else(|| super::descriptor_error(method, "set", v))
}

fn this_items(b: &Bindings, method: &str) -> VmResult<(SetMap, bool)> {
    let (items, frozen) = this(b, method)?;
    Ok((read(items).clone(), frozen))
}

/// 반복 가능 값의 항목을 키와 함께 모은다
fn to_set_map(vm: &mut Vm, iterable: &Value) -> VmResult<SetMap> {
    if let Some((items, _)) = set_parts(iterable) {
        return Ok(read(items).clone());
    }
    let mut map = IndexMap::new();
    for item in vm.collect(iterable)? {
        let key = vm.dict_key(&item)?;
        map.entry(key).or_insert(item);
    }
    Ok(map)
}

/// 연산자 피연산자는 set/frozenset만
fn operand(b: &Bindings) -> VmResult<Option<SetMap>> {
    Ok(set_parts(b.get("other")?).map(|(items, _)| read(items).clone()))
}

fn union(mut a: SetMap, b: SetMap) -> SetMap {
    for (k, v) in b {
        a.entry(k).or_insert(v);
    }
    a
}

fn intersection(a: SetMap, b: &SetMap) -> SetMap {
    a.into_iter().filter(|(k, _)| b.contains_key(k)).collect()
}

fn difference(a: SetMap, b: &SetMap) -> SetMap {
    a.into_iter().filter(|(k, _)| !b.contains_key(k)).collect()
}

fn symmetric_difference(a: SetMap, b: SetMap) -> SetMap {
    let mut out: SetMap = a.clone().into_iter().filter(|(k, _)| !b.contains_key(k)).collect();
    for (k, v) in b {
        if !a.contains_key(&k) {
            out.insert(k, v);
        }
    }
    out
}

fn is_subset(a: &SetMap, b: &SetMap) -> bool {
    a.len() <= b.len() && a.keys().all(|k| b.contains_key(k))
}

fn set_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = match b.optional("iterable").cloned() {
        Some(v) => to_set_map(vm, &v)?,
        None => IndexMap::new(),
    };
    Ok(Value::set(items, false))
}

fn frozenset_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.optional("iterable").cloned() {
        Some(v) if matches!(set_parts(&v), Some((_, true))) => Ok(v),
        Some(v) => Ok(Value::set(to_set_map(vm, &v)?, true)),
        None => Ok(Value::set(IndexMap::new(), true)),
    }
}

fn set_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this_value = b.get("self")?.clone();
    let (items, frozen) = this_items(&b, "__repr__")?;
    let name = if frozen { "frozenset" } else { "set" };
    if items.is_empty() {
        return Ok(Value::str(format!("{}()", name)));
    }
    let values: Vec<Value> = items.into_values().collect();
    let text = guarded_repr(vm, &this_value, &format!("{}(...)", name), |vm| {
        let body = join_reprs(vm, &values)?;
        Ok(if frozen {
            format!("frozenset({{{}}})", body)
        } else {
            format!("{{{}}}", body)
        })
    })?;
    Ok(Value::str(text))
}

fn set_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this(&b, "__len__")?;
    Ok(Value::Int(read(items).len() as i64))
}

fn set_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this_items(&b, "__iter__")?;
    Ok(Value::iterator(IterState::snapshot(items.into_values().collect())))
}

fn set_contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this(&b, "__contains__")?;
    let key = vm.dict_key(b.get("key")?)?;
    Ok(Value::Bool(read(items).contains_key(&key)))
}

macro_rules! set_compare {
    ($($name:ident => |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            fn $name(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
                let ($a, _) = this_items(&b, stringify!($name))?;
                let Some($b) = operand(&b)? else {
                    return Ok(Value::NotImplemented);
                };
                Ok(Value::Bool($body))
            }
        )*
    };
}

set_compare! {
    set_eq => |x, y| x.len() == y.len() && is_subset(&x, &y);
    set_ne => |x, y| !(x.len() == y.len() && is_subset(&x, &y));
    set_le => |x, y| is_subset(&x, &y);
    set_lt => |x, y| x.len() < y.len() && is_subset(&x, &y);
    set_ge => |x, y| is_subset(&y, &x);
    set_gt => |x, y| y.len() < x.len() && is_subset(&y, &x);
}

macro_rules! set_operators {
    ($($name:ident => |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            fn $name(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
                let ($a, frozen) = this_items(&b, stringify!($name))?;
                let Some($b) = operand(&b)? else {
                    return Ok(Value::NotImplemented);
                };
                Ok(Value::set($body, frozen))
            }
        )*
    };
}

set_operators! {
    set_or => |x, y| union(x, y);
    set_and => |x, y| intersection(x, &y);
    set_sub => |x, y| difference(x, &y);
    set_xor => |x, y| symmetric_difference(x, y);
}

/// 메서드 형태는 임의의 반복 가능 값을 여러 개 받는다
fn fold_others(
    vm: &mut Vm,
    b: &Bindings,
    method: &str,
    step: fn(SetMap, SetMap) -> SetMap,
) -> VmResult<Value> {
    let (mut acc, frozen) = this_items(b, method)?;
    for other in b.varargs("others")? {
        let other = to_set_map(vm, &other)?;
        acc = step(acc, other);
    }
    Ok(Value::set(acc, frozen))
}

fn set_union(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    fold_others(vm, &b, "union", union)
}

fn set_intersection(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    fold_others(vm, &b, "intersection", |a, b| intersection(a, &b))
}

fn set_difference(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    fold_others(vm, &b, "difference", |a, b| difference(a, &b))
}

fn set_symmetric_difference(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, frozen) = this_items(&b, "symmetric_difference")?;
    let other = to_set_map(vm, b.get("other")?)?;
    Ok(Value::set(symmetric_difference(items, other), frozen))
}

fn set_issubset(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this_items(&b, "issubset")?;
    let other = to_set_map(vm, b.get("other")?)?;
    Ok(Value::Bool(is_subset(&items, &other)))
}

fn set_issuperset(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this_items(&b, "issuperset")?;
    let other = to_set_map(vm, b.get("other")?)?;
    Ok(Value::Bool(is_subset(&other, &items)))
}

fn set_isdisjoint(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this_items(&b, "isdisjoint")?;
    let other = to_set_map(vm, b.get("other")?)?;
    Ok(Value::Bool(items.keys().all(|k| !other.contains_key(k))))
}

fn set_copy(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, frozen) = this_items(&b, "copy")?;
    if frozen {
        return Ok(b.get("self")?.clone());
    }
    Ok(Value::set(items, false))
}

/// 항목 해시의 순서 무관 조합
fn frozenset_hash(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (items, _) = this_items(&b, "__hash__")?;
    let mut acc: i64 = 1_927_868_237;
    acc = acc.wrapping_mul(items.len() as i64 + 1);
    for item in items.values() {
        let h = vm.hash(item)?;
        acc ^= (h ^ (h << 16) ^ 89_869_747).wrapping_mul(3_644_798_167);
    }
    Ok(Value::Int(fix_hash(acc.wrapping_mul(69_069).wrapping_add(907_133_923))))
}

// ========== set 전용 (변경) ==========

fn mutable<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a RwLock<SetMap>> {
    let v = b.get("self")?;
    match set_parts(v) {
        Some((items, false)) => Ok(items),
        _ => Err(super::descriptor_error(method, "set", v)),
    }
}

fn set_add(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = mutable(&b, "add")?;
    let elem = b.get("elem")?.clone();
    let key = vm.dict_key(&elem)?;
    write(items).entry(key).or_insert(elem);
    Ok(Value::None)
}

fn set_discard(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = mutable(&b, "discard")?;
    let key = vm.dict_key(b.get("elem")?)?;
    write(items).shift_remove(&key);
    Ok(Value::None)
}

fn set_remove(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = mutable(&b, "remove")?;
    let elem = b.get("elem")?;
    let key = vm.dict_key(elem)?;
    let removed = write(items).shift_remove(&key);
    match removed {
        Some(_) => Ok(Value::None),
        None => Err(VmError::Raised(
            vm.new_exception(ExcKind::KeyError, vec![elem.clone()]),
        )),
    }
}

fn set_pop(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = mutable(&b, "pop")?;
    match write(items).shift_remove_index(0) {
        Some((_, v)) => Ok(v),
        None => Err(pending(ExcKind::KeyError, "pop from an empty set")),
    }
}

fn set_clear(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    write(mutable(&b, "clear")?).clear();
    Ok(Value::None)
}

fn set_update(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = mutable(&b, "update")?;
    for other in b.varargs("others")? {
        let other = to_set_map(vm, &other)?;
        let mut items = write(items);
        for (k, v) in other {
            items.entry(k).or_insert(v);
        }
    }
    Ok(Value::None)
}

/// 제자리 연산: 결과로 내용을 바꾸고 자기 자신을 돌려준다
fn inplace(b: &Bindings, method: &str, op: fn(SetMap, SetMap) -> SetMap) -> VmResult<Value> {
    let items = mutable(b, method)?;
    let Some(other) = operand(b)? else {
        return Ok(Value::NotImplemented);
    };
    let current = read(items).clone();
    *write(items) = op(current, other);
    Ok(b.get("self")?.clone())
}

fn set_ior(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    inplace(&b, "__ior__", union)
}

fn set_iand(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    inplace(&b, "__iand__", |a, b| intersection(a, &b))
}

fn set_isub(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    inplace(&b, "__isub__", |a, b| difference(a, &b))
}

fn set_ixor(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    inplace(&b, "__ixor__", symmetric_difference)
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.set, COMMON_METHODS)?;
    install_methods(&types.set, SET_METHODS)?;
    types.set.set_attr("__hash__", Value::None);
    install_methods(&types.frozenset, COMMON_METHODS)?;
    install_methods(&types.frozenset, FROZENSET_METHODS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::DictKey;

    fn ints(xs: &[i64]) -> SetMap {
        xs.iter().map(|x| (DictKey::Int(*x), Value::Int(*x))).collect()
    }

    fn keys(m: &SetMap) -> Vec<i64> {
        m.values().filter_map(Value::as_int).collect()
    }

    #[test]
    fn test_set_algebra_keeps_left_order() {
        assert_eq!(keys(&union(ints(&[3, 1]), ints(&[2, 1]))), vec![3, 1, 2]);
        assert_eq!(keys(&intersection(ints(&[3, 1, 2]), &ints(&[2, 3]))), vec![3, 2]);
        assert_eq!(keys(&difference(ints(&[3, 1, 2]), &ints(&[1]))), vec![3, 2]);
        assert_eq!(keys(&symmetric_difference(ints(&[1, 2]), ints(&[2, 3]))), vec![1, 3]);
    }

    #[test]
    fn test_subset() {
        assert!(is_subset(&ints(&[]), &ints(&[1])));
        assert!(is_subset(&ints(&[1, 2]), &ints(&[2, 1])));
        assert!(!is_subset(&ints(&[1, 4]), &ints(&[1, 2, 3])));
    }
}
