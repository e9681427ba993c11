//! dict와 dict 뷰 (`keys()`, `values()`, `items()`)
//!
//! 뷰는 원본 dict를 `_mapping` 속성으로 들고 있는 인스턴스라서 dict가 바뀌면 같이 바뀝니다.

use indexmap::IndexMap;
use std::sync::RwLock;

use super::super::exception::{ExcKind, pending, type_error, value_error};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{read, write};
use super::super::value::{DictKey, DictMap, IterState, ObjRef, Object, ObjectData, Value};
use super::super::{VmError, VmResult};
use super::{P, SELF, SELF_KEY, SELF_OTHER, VarKw, VarP, guarded_repr};

const DICT_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        dict_new,
        &[("cls", P), ("args", VarP), ("kwargs", VarKw)],
    ),
    MethodDef::method("__init__", dict_update, &[("self", P), ("args", VarP), ("kwargs", VarKw)]),
    MethodDef::method("__repr__", dict_repr, SELF),
    MethodDef::method("__len__", dict_len, SELF),
    MethodDef::method("__getitem__", dict_getitem, SELF_KEY),
    MethodDef::method("__setitem__", dict_setitem, &[("self", P), ("key", P), ("value", P)]),
    MethodDef::method("__delitem__", dict_delitem, SELF_KEY),
    MethodDef::method("__contains__", dict_contains, SELF_KEY),
    MethodDef::method("__iter__", dict_iter, SELF),
    MethodDef::method("__eq__", dict_eq, SELF_OTHER),
    MethodDef::method("__ne__", dict_ne, SELF_OTHER),
    MethodDef::method("get", dict_get, &[("self", P), ("key", P), ("default", P)])
        .with_optional(&["default"]),
    MethodDef::method("setdefault", dict_setdefault, &[("self", P), ("key", P), ("default", P)])
        .with_optional(&["default"]),
    MethodDef::method("pop", dict_pop, &[("self", P), ("key", P), ("default", VarP)]),
    MethodDef::method("popitem", dict_popitem, SELF),
    MethodDef::method("update", dict_update, &[("self", P), ("args", VarP), ("kwargs", VarKw)]),
    MethodDef::method("clear", dict_clear, SELF),
    MethodDef::method("copy", dict_copy, SELF),
    MethodDef::method("keys", dict_keys, SELF),
    MethodDef::method("values", dict_values, SELF),
    MethodDef::method("items", dict_items, SELF),
];

const FROMKEYS: MethodDef =
    MethodDef::static_fn("fromkeys", dict_fromkeys, &[("cls", P), ("iterable", P), ("value", P)])
        .with_optional(&["value"]);

fn map_of(v: &Value) -> Option<&RwLock<DictMap>> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Dict(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn this<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a RwLock<DictMap>> {
    let v = b.get("self")?;
    map_of(v).ok_or_else(|| super::descriptor_error(method, "dict", v))
}

/// 키 자체를 인자로 가진 KeyError
fn missing_key(vm: &Vm, key: &Value) -> VmError {
    VmError::Raised(vm.new_exception(ExcKind::KeyError, vec![key.clone()]))
}

/// dict 생성자와 `update`가 공유하는 채우기 규칙
///
/// 매핑이면 `keys()`로, 아니면 길이 2짜리 항목들의 반복으로 채운다.
pub(crate) fn merge_into(vm: &mut Vm, target: &RwLock<DictMap>, source: &Value) -> VmResult<()> {
    let is_mapping = map_of(source).is_some() || vm.has_attribute(source, "keys")?;
    let pairs = if is_mapping {
        vm.mapping_items(source)?
    } else {
        let mut pairs = Vec::new();
        for (i, item) in vm.collect(source)?.into_iter().enumerate() {
            let parts = vm.collect(&item).map_err(|_| {
                type_error(format!(
                    "cannot convert dictionary update sequence element #{} to a sequence",
                    i
                ))
            })?;
            let [k, v]: [Value; 2] = parts.try_into().map_err(|parts: Vec<Value>| {
                value_error(format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    i,
                    parts.len()
                ))
            })?;
            pairs.push((k, v));
        }
        pairs
    };
    let mut keyed = Vec::with_capacity(pairs.len());
    for (k, v) in pairs {
        keyed.push((vm.dict_key(&k)?, k, v));
    }
    let mut map = write(target);
    for (dk, k, v) in keyed {
        insert(&mut map, dk, k, v);
    }
    Ok(())
}

/// 이미 있는 키는 원래 키 객체를 유지하고 값만 바꾼다
fn insert(map: &mut DictMap, dk: DictKey, key: Value, value: Value) {
    match map.get_mut(&dk) {
        Some(slot) => slot.1 = value,
        None => {
            map.insert(dk, (key, value));
        }
    }
}

fn dict_new(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::dict(IndexMap::new()))
}

fn dict_update(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let target = this(&b, "update")?;
    let args = b.varargs("args")?;
    if args.len() > 1 {
        return Err(type_error(format!(
            "update expected at most 1 argument, got {}",
            args.len()
        )));
    }
    if let Some(source) = args.first() {
        merge_into(vm, target, source)?;
    }
    let kwargs = b.varkwargs("kwargs")?;
    let mut map = write(target);
    for (k, v) in kwargs {
        insert(&mut map, DictKey::Str(k.clone()), Value::str(k), v);
    }
    Ok(Value::None)
}

fn dict_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this_value = b.get("self")?.clone();
    let entries: Vec<(Value, Value)> = read(this(&b, "__repr__")?).values().cloned().collect();
    let text = guarded_repr(vm, &this_value, "{...}", |vm| {
        let mut parts = Vec::with_capacity(entries.len());
        for (k, v) in &entries {
            parts.push(format!("{}: {}", vm.repr(k)?, vm.repr(v)?));
        }
        Ok(format!("{{{}}}", parts.join(", ")))
    })?;
    Ok(Value::str(text))
}

fn dict_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(read(this(&b, "__len__")?).len() as i64))
}

fn dict_getitem(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "__getitem__")?;
    let key = b.get("key")?;
    let dk = vm.dict_key(key)?;
    let found = read(map).get(&dk).map(|(_, v)| v.clone());
    found.ok_or_else(|| missing_key(vm, key))
}

fn dict_setitem(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "__setitem__")?;
    let key = b.get("key")?.clone();
    let dk = vm.dict_key(&key)?;
    insert(&mut write(map), dk, key, b.get("value")?.clone());
    Ok(Value::None)
}

fn dict_delitem(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "__delitem__")?;
    let key = b.get("key")?;
    let dk = vm.dict_key(key)?;
    let removed = write(map).shift_remove(&dk);
    match removed {
        Some(_) => Ok(Value::None),
        None => Err(missing_key(vm, key)),
    }
}

fn dict_contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "__contains__")?;
    let dk = vm.dict_key(b.get("key")?)?;
    Ok(Value::Bool(read(map).contains_key(&dk)))
}

fn keys_of(map: &RwLock<DictMap>) -> Vec<Value> {
    read(map).values().map(|(k, _)| k.clone()).collect()
}

fn dict_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "__iter__")?;
    Ok(Value::iterator(IterState::snapshot(keys_of(map))))
}

fn dicts_equal(vm: &mut Vm, a: &RwLock<DictMap>, b: &RwLock<DictMap>) -> VmResult<bool> {
    let left: Vec<_> = read(a).iter().map(|(k, (_, v))| (k.clone(), v.clone())).collect();
    if left.len() != read(b).len() {
        return Ok(false);
    }
    for (k, v) in left {
        let other = read(b).get(&k).map(|(_, w)| w.clone());
        match other {
            Some(w) if v.is(&w) || vm.eq(&v, &w)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn dict_eq(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (Some(x), Some(y)) = (map_of(b.get("self")?), map_of(b.get("other")?)) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(dicts_equal(vm, x, y)?))
}

fn dict_ne(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (Some(x), Some(y)) = (map_of(b.get("self")?), map_of(b.get("other")?)) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(!dicts_equal(vm, x, y)?))
}

fn dict_get(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "get")?;
    let dk = vm.dict_key(b.get("key")?)?;
    let found = read(map).get(&dk).map(|(_, v)| v.clone());
    Ok(found.unwrap_or_else(|| b.optional("default").cloned().unwrap_or(Value::None)))
}

fn dict_setdefault(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "setdefault")?;
    let key = b.get("key")?.clone();
    let dk = vm.dict_key(&key)?;
    let mut map = write(map);
    if let Some((_, v)) = map.get(&dk) {
        return Ok(v.clone());
    }
    let default = b.optional("default").cloned().unwrap_or(Value::None);
    map.insert(dk, (key, default.clone()));
    Ok(default)
}

/// 기본값이 없을 때만 KeyError. `pop(k, None)`과 구분하려고 가변 인자로 받는다
fn dict_pop(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "pop")?;
    let key = b.get("key")?;
    let defaults = b.varargs("default")?;
    if defaults.len() > 1 {
        return Err(type_error(format!(
            "pop expected at most 2 arguments, got {}",
            defaults.len() + 1
        )));
    }
    let dk = vm.dict_key(key)?;
    let removed = write(map).shift_remove(&dk);
    match (removed, defaults.into_iter().next()) {
        (Some((_, v)), _) => Ok(v),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(missing_key(vm, key)),
    }
}

fn dict_popitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let map = this(&b, "popitem")?;
    match write(map).pop() {
        Some((_, (k, v))) => Ok(Value::tuple(vec![k, v])),
        None => Err(pending(ExcKind::KeyError, "popitem(): dictionary is empty")),
    }
}

fn dict_clear(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    write(this(&b, "clear")?).clear();
    Ok(Value::None)
}

fn dict_copy(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::dict(read(this(&b, "copy")?).clone()))
}

fn dict_fromkeys(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let value = b.optional("value").cloned().unwrap_or(Value::None);
    let mut map = IndexMap::new();
    for key in vm.collect(b.get("iterable")?)? {
        let dk = vm.dict_key(&key)?;
        insert(&mut map, dk, key, value.clone());
    }
    Ok(Value::dict(map))
}

// ========== 뷰 ==========

#[derive(Clone, Copy)]
enum ViewKind {
    Keys,
    Values,
    Items,
}

impl ViewKind {
    fn name(self) -> &'static str {
        match self {
            Self::Keys => "dict_keys",
            Self::Values => "dict_values",
            Self::Items => "dict_items",
        }
    }

    fn class(self, types: &BuiltinTypes) -> ObjRef {
        match self {
            Self::Keys => types.dict_keys.clone(),
            Self::Values => types.dict_values.clone(),
            Self::Items => types.dict_items.clone(),
        }
    }

    fn project(self, map: &RwLock<DictMap>) -> Vec<Value> {
        let map = read(map);
        match self {
            Self::Keys => map.values().map(|(k, _)| k.clone()).collect(),
            Self::Values => map.values().map(|(_, v)| v.clone()).collect(),
            Self::Items => map
                .values()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        }
    }
}

fn make_view(vm: &Vm, b: &Bindings, kind: ViewKind) -> VmResult<Value> {
    let mapping = b.get("self")?.clone();
    this(b, kind.name())?;
    let mut attrs = IndexMap::new();
    attrs.insert("_mapping".to_string(), mapping);
    Ok(Value::Object(Object::with_attrs(
        ObjectData::Instance {
            class: kind.class(vm.types()),
        },
        attrs,
    )))
}

fn dict_keys(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    make_view(vm, &b, ViewKind::Keys)
}

fn dict_values(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    make_view(vm, &b, ViewKind::Values)
}

fn dict_items(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    make_view(vm, &b, ViewKind::Items)
}

/// 뷰가 가리키는 dict
fn view_source(b: &Bindings, kind: ViewKind) -> VmResult<Value> {
    let v = b.get("self")?;
    v.as_object()
        .and_then(|o| o.get_attr("_mapping"))
        .filter(|m| map_of(m).is_some())
        .ok_or_else(|| super::descriptor_error("__iter__", kind.name(), v))
}

fn view_items(b: &Bindings, kind: ViewKind) -> VmResult<Vec<Value>> {
    let source = view_source(b, kind)?;
    match map_of(&source) {
        Some(map) => Ok(kind.project(map)),
        None => Ok(Vec::new()),
    }
}

macro_rules! view_methods {
    ($kind:expr, $table:ident, $iter:ident, $len:ident, $repr:ident, $contains:ident) => {
        const $table: &[MethodDef] = &[
            MethodDef::method("__iter__", $iter, SELF),
            MethodDef::method("__len__", $len, SELF),
            MethodDef::method("__repr__", $repr, SELF),
            MethodDef::method("__contains__", $contains, SELF_KEY),
        ];

        fn $iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
            Ok(Value::iterator(IterState::snapshot(view_items(&b, $kind)?)))
        }

        fn $len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
            Ok(Value::Int(view_items(&b, $kind)?.len() as i64))
        }

        fn $repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
            let items = view_items(&b, $kind)?;
            let listed = vm.repr(&Value::list(items))?;
            Ok(Value::str(format!("{}({})", $kind.name(), listed)))
        }

        fn $contains(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
            let key = b.get("key")?;
            for item in view_items(&b, $kind)? {
                if item.is(key) || vm.eq(&item, key)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    };
}

view_methods!(ViewKind::Keys, KEYS_METHODS, keys_iter, keys_len, keys_repr, keys_contains);
view_methods!(ViewKind::Values, VALUES_METHODS, values_iter, values_len, values_repr, values_contains);
view_methods!(ViewKind::Items, ITEMS_METHODS, items_iter, items_len, items_repr, items_contains);

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.dict, DICT_METHODS)?;
    let fromkeys = FROMKEYS.build("dict")?;
    types.dict.set_attr(
        "fromkeys",
        Value::Object(Object::new(ObjectData::ClassMethod(fromkeys))),
    );
    types.dict.set_attr("__hash__", Value::None);
    install_methods(&types.dict_keys, KEYS_METHODS)?;
    install_methods(&types.dict_values, VALUES_METHODS)?;
    install_methods(&types.dict_items, ITEMS_METHODS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_first_key_object() {
        let mut map = DictMap::new();
        insert(&mut map, DictKey::Int(1), Value::Int(1), Value::str("a"));
        insert(&mut map, DictKey::Int(1), Value::Bool(true), Value::str("b"));
        assert_eq!(map.len(), 1);
        let (k, v) = &map[&DictKey::Int(1)];
        assert!(matches!(k, Value::Int(1)));
        assert_eq!(v.as_str(), Some("b"));
    }

    #[test]
    fn test_view_projection_order() {
        let mut map = DictMap::new();
        insert(&mut map, DictKey::Str("b".into()), Value::str("b"), Value::Int(2));
        insert(&mut map, DictKey::Str("a".into()), Value::str("a"), Value::Int(1));
        let lock = RwLock::new(map);
        let keys: Vec<_> = ViewKind::Keys
            .project(&lock)
            .iter()
            .map(|k| k.as_str().map(str::to_string))
            .collect();
        assert_eq!(keys, vec![Some("b".to_string()), Some("a".to_string())]);
        assert_eq!(ViewKind::Values.project(&lock).len(), 2);
    }
}
