//! 이터레이터 타입: 내장 iterator, generator, enumerate, zip, map, filter, 그리고 slice
//!
//! enumerate/zip/map/filter는 상태를 속성으로 들고 있는 인스턴스이고,
//! `__next__`가 호출될 때마다 한 항목씩 당겨 옵니다.

use indexmap::IndexMap;

use super::super::exception::{stop_iteration, type_error, value_error};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{expect_int, slice_indices};
use super::super::value::{ObjRef, Object, ObjectData, Value};
use super::super::VmResult;
use super::object::new_property;
use super::{P, SELF, SELF_OTHER, VarP, address};

// ========== iterator ==========

const ITERATOR_METHODS: &[MethodDef] = &[
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", iterator_next, SELF),
];

fn iter_self(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(b.get("self")?.clone())
}

fn iterator_next(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let v = b.get("self")?;
    match v.as_object().map(|o| &o.data) {
        Some(ObjectData::Iterator(state)) => state.next().ok_or_else(stop_iteration),
        _ => Err(super::descriptor_error("__next__", "iterator", v)),
    }
}

// ========== generator ==========

const GENERATOR_METHODS: &[MethodDef] = &[
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", generator_next, SELF),
    MethodDef::method("send", generator_send, &[("self", P), ("value", P)]),
    MethodDef::method("close", generator_close, SELF),
    MethodDef::method("__repr__", generator_repr, SELF),
];

fn generator_of<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a ObjRef> {
    let v = b.get("self")?;
    match v {
        Value::Object(o) if matches!(o.data, ObjectData::Generator(_)) => Ok(o),
        _ => Err(super::descriptor_error(method, "generator", v)),
    }
}

fn generator_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    generator_of(&b, "__next__")?;
    vm.send(b.get("self")?, Value::None)
}

fn generator_send(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    generator_of(&b, "send")?;
    vm.send(b.get("self")?, b.get("value")?.clone())
}

fn generator_close(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let generator = generator_of(&b, "close")?.clone();
    vm.close_generator(&generator)?;
    Ok(Value::None)
}

fn generator_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let generator = generator_of(&b, "__repr__")?;
    let ObjectData::Generator(data) = &generator.data else {
        return Err(super::descriptor_error("__repr__", "generator", b.get("self")?));
    };
    Ok(Value::str(format!(
        "<generator object {} at {}>",
        data.qualname,
        address(b.get("self")?)
    )))
}

// ========== 지연 이터레이터 공통 ==========

fn lazy_instance(cls: &Value, attrs: Vec<(&str, Value)>) -> VmResult<Value> {
    let Some(class) = cls.as_object().filter(|_| cls.is_type()) else {
        return Err(type_error("__new__(X): X is not a type object"));
    };
    let attrs: IndexMap<String, Value> = attrs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Ok(Value::Object(Object::with_attrs(
        ObjectData::Instance {
            class: class.clone(),
        },
        attrs,
    )))
}

/// 지연 이터레이터의 내부 상태 조회
fn state(b: &Bindings, name: &str, owner: &str) -> VmResult<(ObjRef, Value)> {
    let v = b.get("self")?;
    let obj = v
        .as_object()
        .ok_or_else(|| super::descriptor_error("__next__", owner, v))?;
    let field = obj
        .get_attr(name)
        .ok_or_else(|| super::descriptor_error("__next__", owner, v))?;
    Ok((obj.clone(), field))
}

fn iterators_of(vm: &mut Vm, iterables: Vec<Value>) -> VmResult<Value> {
    let mut iters = Vec::with_capacity(iterables.len());
    for it in &iterables {
        iters.push(vm.iter(it)?);
    }
    Ok(Value::tuple(iters))
}

// ========== enumerate ==========

const ENUMERATE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", enumerate_new, &[("cls", P), ("iterable", P), ("start", P)])
        .with_optional(&["start"]),
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", enumerate_next, SELF),
];

fn enumerate_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let it = vm.iter(b.get("iterable")?)?;
    let start = match b.optional("start") {
        Some(v) => expect_int(v, "start")?,
        None => 0,
    };
    lazy_instance(b.get("cls")?, vec![("_iter", it), ("_count", Value::Int(start))])
}

fn enumerate_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (obj, it) = state(&b, "_iter", "enumerate")?;
    let count = obj.get_attr("_count").and_then(|c| c.as_int()).unwrap_or(0);
    match vm.next(&it)? {
        Some(item) => {
            obj.set_attr("_count", Value::Int(count + 1));
            Ok(Value::tuple(vec![Value::Int(count), item]))
        }
        None => Err(stop_iteration()),
    }
}

// ========== zip ==========

const ZIP_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", zip_new, &[("cls", P), ("iterables", VarP)]),
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", zip_next, SELF),
];

fn zip_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let iters = iterators_of(vm, b.varargs("iterables")?)?;
    lazy_instance(b.get("cls")?, vec![("_iters", iters)])
}

/// 가장 짧은 입력에서 멈춘다
fn zip_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (_, iters) = state(&b, "_iters", "zip")?;
    let iters = iters.tuple_items().unwrap_or_default();
    if iters.is_empty() {
        return Err(stop_iteration());
    }
    let mut row = Vec::with_capacity(iters.len());
    for it in &iters {
        match vm.next(it)? {
            Some(v) => row.push(v),
            None => return Err(stop_iteration()),
        }
    }
    Ok(Value::tuple(row))
}

// ========== map ==========

const MAP_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        map_new,
        &[("cls", P), ("func", P), ("iterables", VarP)],
    ),
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", map_next, SELF),
];

fn map_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let iterables = b.varargs("iterables")?;
    if iterables.is_empty() {
        return Err(type_error("map() must have at least two arguments."));
    }
    let iters = iterators_of(vm, iterables)?;
    lazy_instance(
        b.get("cls")?,
        vec![("_func", b.get("func")?.clone()), ("_iters", iters)],
    )
}

fn map_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (obj, iters) = state(&b, "_iters", "map")?;
    let func = obj.get_attr("_func").unwrap_or(Value::None);
    let mut args = Vec::new();
    for it in iters.tuple_items().unwrap_or_default() {
        match vm.next(&it)? {
            Some(v) => args.push(v),
            None => return Err(stop_iteration()),
        }
    }
    vm.call(&func, args, Vec::new())
}

// ========== filter ==========

const FILTER_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", filter_new, &[("cls", P), ("function", P), ("iterable", P)]),
    MethodDef::method("__iter__", iter_self, SELF),
    MethodDef::method("__next__", filter_next, SELF),
];

fn filter_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let it = vm.iter(b.get("iterable")?)?;
    lazy_instance(
        b.get("cls")?,
        vec![("_func", b.get("function")?.clone()), ("_iter", it)],
    )
}

/// 함수가 None이면 항목 자체의 참/거짓으로 거른다
fn filter_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (obj, it) = state(&b, "_iter", "filter")?;
    let func = obj.get_attr("_func").unwrap_or(Value::None);
    while let Some(item) = vm.next(&it)? {
        let keep = if func.is_none() {
            vm.is_true(&item)?
        } else {
            let r = vm.call(&func, vec![item.clone()], Vec::new())?;
            vm.is_true(&r)?
        };
        if keep {
            return Ok(item);
        }
    }
    Err(stop_iteration())
}

// ========== slice ==========

const SLICE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", slice_new, &[("cls", P), ("args", VarP)]),
    MethodDef::method("__repr__", slice_repr, SELF),
    MethodDef::method("__eq__", slice_eq, SELF_OTHER),
    MethodDef::method("indices", slice_indices_method, &[("self", P), ("length", P)]),
];

const SLICE_ATTRIBUTES: &[MethodDef] = &[
    MethodDef::static_fn("start", slice_start, SELF),
    MethodDef::static_fn("stop", slice_stop, SELF),
    MethodDef::static_fn("step", slice_step, SELF),
];

fn slice_of(b: &Bindings, method: &str) -> VmResult<(Value, Value, Value)> {
    let v = b.get("self")?;
    super::slice_parts(v).ok_or_else(|| super::descriptor_error(method, "slice", v))
}

/// `slice(stop)` 또는 `slice(start, stop[, step])`
fn slice_new(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let args = b.varargs("args")?;
    let (start, stop, step) = match args.as_slice() {
        [stop] => (Value::None, stop.clone(), Value::None),
        [start, stop] => (start.clone(), stop.clone(), Value::None),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        [] => return Err(type_error("slice expected at least 1 argument, got 0")),
        more => {
            return Err(type_error(format!(
                "slice expected at most 3 arguments, got {}",
                more.len()
            )));
        }
    };
    Ok(Value::Object(Object::new(ObjectData::Slice { start, stop, step })))
}

fn slice_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (start, stop, step) = slice_of(&b, "__repr__")?;
    Ok(Value::str(format!(
        "slice({}, {}, {})",
        vm.repr(&start)?,
        vm.repr(&stop)?,
        vm.repr(&step)?
    )))
}

fn slice_eq(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (a0, a1, a2) = slice_of(&b, "__eq__")?;
    let Some((b0, b1, b2)) = super::slice_parts(b.get("other")?) else {
        return Ok(Value::NotImplemented);
    };
    let same = vm.eq(&a0, &b0)? && vm.eq(&a1, &b1)? && vm.eq(&a2, &b2)?;
    Ok(Value::Bool(same))
}

fn slice_indices_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (start, stop, step) = slice_of(&b, "indices")?;
    let length = b.get("length")?;
    let n = expect_int(length, "length")?;
    if n < 0 {
        return Err(value_error("length should not be negative"));
    }
    let (start, stop, step) = slice_indices(&start, &stop, &step, n as usize)?;
    Ok(Value::tuple(vec![
        Value::Int(start),
        Value::Int(stop),
        Value::Int(step),
    ]))
}

fn slice_start(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(slice_of(&b, "start")?.0)
}

fn slice_stop(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(slice_of(&b, "stop")?.1)
}

fn slice_step(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(slice_of(&b, "step")?.2)
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.iterator, ITERATOR_METHODS)?;
    install_methods(&types.generator, GENERATOR_METHODS)?;
    install_methods(&types.enumerate, ENUMERATE_METHODS)?;
    install_methods(&types.zip, ZIP_METHODS)?;
    install_methods(&types.map, MAP_METHODS)?;
    install_methods(&types.filter, FILTER_METHODS)?;
    install_methods(&types.slice, SLICE_METHODS)?;
    types.slice.set_attr("__hash__", Value::None);
    for def in SLICE_ATTRIBUTES {
        let getter = def.build("slice")?;
        types.slice.set_attr(def.name, new_property(getter, Value::None));
    }
    Ok(())
}
