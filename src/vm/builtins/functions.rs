//! `builtins` 모듈의 함수들
//!
//! 모두 바인딩 없는 네이티브 함수(`MethodDef::static_fn`)로 모듈 속성에 설치됩니다.

use indexmap::IndexMap;
use std::sync::Arc;

use super::super::exception::{ExcKind, pending, type_error, value_error};
use super::super::machine::{BinOp, CompareOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::MethodDef;
use super::super::utils::{expect_int, expect_str, type_name};
use super::super::value::{DictKey, IterState, ObjRef, Object, ObjectData, Value};
use super::super::VmResult;
use super::format::{FormatSpec, format_int};
use super::object::make_class;
use super::{Kw, P, VarKw, VarP, apply_key, sort_values};

pub const FUNCTIONS: &[MethodDef] = &[
    MethodDef::static_fn(
        "print",
        builtin_print,
        &[("args", VarP), ("sep", Kw), ("end", Kw), ("file", Kw), ("flush", Kw)],
    )
    .with_optional(&["sep", "end", "file", "flush"]),
    MethodDef::static_fn("repr", builtin_repr, &[("obj", P)]),
    MethodDef::static_fn("ascii", builtin_ascii, &[("obj", P)]),
    MethodDef::static_fn("len", builtin_len, &[("obj", P)]),
    MethodDef::static_fn("id", builtin_id, &[("obj", P)]),
    MethodDef::static_fn("hash", builtin_hash, &[("obj", P)]),
    MethodDef::static_fn("iter", builtin_iter, &[("obj", P)]),
    MethodDef::static_fn("next", builtin_next, &[("iterator", P), ("default", VarP)]),
    MethodDef::static_fn("callable", builtin_callable, &[("obj", P)]),
    MethodDef::static_fn("isinstance", builtin_isinstance, &[("obj", P), ("class_or_tuple", P)]),
    MethodDef::static_fn("issubclass", builtin_issubclass, &[("cls", P), ("class_or_tuple", P)]),
    MethodDef::static_fn(
        "getattr",
        builtin_getattr,
        &[("obj", P), ("name", P), ("default", VarP)],
    ),
    MethodDef::static_fn("hasattr", builtin_hasattr, &[("obj", P), ("name", P)]),
    MethodDef::static_fn("setattr", builtin_setattr, &[("obj", P), ("name", P), ("value", P)]),
    MethodDef::static_fn("delattr", builtin_delattr, &[("obj", P), ("name", P)]),
    MethodDef::static_fn("dir", builtin_dir, &[("obj", P)]).with_optional(&["obj"]),
    MethodDef::static_fn("vars", builtin_vars, &[("obj", P)]).with_optional(&["obj"]),
    MethodDef::static_fn("locals", builtin_locals, &[]),
    MethodDef::static_fn("globals", builtin_globals, &[]),
    MethodDef::static_fn("abs", builtin_abs, &[("x", P)]),
    MethodDef::static_fn("min", builtin_min, &[("args", VarP), ("kwargs", VarKw)]),
    MethodDef::static_fn("max", builtin_max, &[("args", VarP), ("kwargs", VarKw)]),
    MethodDef::static_fn("sum", builtin_sum, &[("iterable", P), ("start", P)])
        .with_optional(&["start"]),
    MethodDef::static_fn(
        "sorted",
        builtin_sorted,
        &[("iterable", P), ("key", Kw), ("reverse", Kw)],
    )
    .with_optional(&["key", "reverse"]),
    MethodDef::static_fn("reversed", builtin_reversed, &[("seq", P)]),
    MethodDef::static_fn("any", builtin_any, &[("iterable", P)]),
    MethodDef::static_fn("all", builtin_all, &[("iterable", P)]),
    MethodDef::static_fn("chr", builtin_chr, &[("i", P)]),
    MethodDef::static_fn("ord", builtin_ord, &[("c", P)]),
    MethodDef::static_fn("divmod", builtin_divmod, &[("x", P), ("y", P)]),
    MethodDef::static_fn("pow", builtin_pow, &[("base", P), ("exp", P), ("mod", P)])
        .with_optional(&["mod"]),
    MethodDef::static_fn("round", builtin_round, &[("number", P), ("ndigits", P)])
        .with_optional(&["ndigits"]),
    MethodDef::static_fn("hex", builtin_hex, &[("number", P)]),
    MethodDef::static_fn("oct", builtin_oct, &[("number", P)]),
    MethodDef::static_fn("bin", builtin_bin, &[("number", P)]),
    MethodDef::static_fn("format", builtin_format, &[("value", P), ("format_spec", P)])
        .with_optional(&["format_spec"]),
    MethodDef::static_fn(
        "__build_class__",
        builtin_build_class,
        &[("func", P), ("name", P), ("bases", VarP), ("kwds", VarKw)],
    ),
];

// ========== 입출력, 표현 ==========

fn text_option(vm: &mut Vm, b: &Bindings, name: &str, default: &str) -> VmResult<String> {
    match b.optional_not_none(name) {
        None => Ok(default.to_string()),
        Some(v) => match v.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(type_error(format!(
                "{} must be None or a string, not {}",
                name,
                vm.type_name(v)
            ))),
        },
    }
}

/// `file=`이 주어지면 그 객체의 `write`로, 아니면 출력 채널로
fn builtin_print(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let sep = text_option(vm, &b, "sep", " ")?;
    let end = text_option(vm, &b, "end", "\n")?;
    let mut parts = Vec::new();
    for arg in b.varargs("args")? {
        parts.push(vm.to_str(&arg)?);
    }
    let text = format!("{}{}", parts.join(&sep), end);
    match b.optional_not_none("file") {
        Some(file) => {
            let file = file.clone();
            vm.call_method(&file, "write", vec![Value::str(text)])?;
        }
        None => vm.io().write(&text),
    }
    Ok(Value::None)
}

fn builtin_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(vm.repr(b.get("obj")?)?))
}

/// repr 결과에서 ASCII 밖의 문자를 `\x`, `\u`, `\U`로 이스케이프
fn builtin_ascii(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let text = vm.repr(b.get("obj")?)?;
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            n @ 0x80..=0xff => out.push_str(&format!("\\x{:02x}", n)),
            n @ 0x100..=0xffff => out.push_str(&format!("\\u{:04x}", n)),
            n => out.push_str(&format!("\\U{:08x}", n)),
        }
    }
    Ok(Value::str(out))
}

fn builtin_len(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(vm.len(b.get("obj")?)? as i64))
}

fn builtin_id(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(b.get("obj")?.identity() as i64))
}

fn builtin_hash(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(vm.hash(b.get("obj")?)?))
}

fn builtin_format(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let spec = match b.optional("format_spec") {
        Some(v) => expect_str(v, "format_spec")?.to_string(),
        None => String::new(),
    };
    Ok(Value::str(vm.format(b.get("value")?, &spec)?))
}

// ========== 반복 ==========

fn builtin_iter(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    vm.iter(b.get("obj")?)
}

/// 기본값이 없으면 `__next__`가 던진 StopIteration을 그대로 전파 (반환값 보존)
fn builtin_next(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let it = b.get("iterator")?;
    match vm.call_special(it, "__next__", Vec::new()) {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err(type_error(format!(
            "'{}' object is not an iterator",
            vm.type_name(it)
        ))),
        Err(e) if vm.error_matches(&e, ExcKind::StopIteration) => {
            b.varargs("default")?.into_iter().next().ok_or(e)
        }
        Err(e) => Err(e),
    }
}

fn builtin_reversed(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let seq = b.get("seq")?;
    if let Some(it) = vm.call_special(seq, "__reversed__", Vec::new())? {
        return Ok(it);
    }
    let mut items = vm.collect(seq)?;
    items.reverse();
    Ok(Value::iterator(IterState::snapshot(items)))
}

fn builtin_sorted(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let items = vm.collect(b.get("iterable")?)?;
    let reverse = match b.optional("reverse") {
        Some(v) => vm.is_true(v)?,
        None => false,
    };
    let sorted = sort_values(vm, items, b.optional_not_none("key"), reverse)?;
    Ok(Value::list(sorted))
}

fn builtin_any(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let it = vm.iter(b.get("iterable")?)?;
    while let Some(item) = vm.next(&it)? {
        if vm.is_true(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_all(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let it = vm.iter(b.get("iterable")?)?;
    while let Some(item) = vm.next(&it)? {
        if !vm.is_true(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// min/max 공통. 인자 하나면 반복 가능 값, 여러 개면 그 인자들
fn extreme(vm: &mut Vm, b: &Bindings, name: &str, op: CompareOp) -> VmResult<Value> {
    let args = b.varargs("args")?;
    let mut key = None;
    let mut default = None;
    for (k, v) in b.varkwargs("kwargs")? {
        match k.as_str() {
            "key" => key = Some(v).filter(|v| !v.is_none()),
            "default" => default = Some(v),
            other => {
                return Err(type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, other
                )));
            }
        }
    }
    let items = match args.as_slice() {
        [] => {
            return Err(type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            )));
        }
        [single] => vm.collect(single)?,
        _ if default.is_some() => {
            return Err(type_error(format!(
                "Cannot specify a default for {}() with multiple positional arguments",
                name
            )));
        }
        _ => args,
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = apply_key(vm, key.as_ref(), &item)?;
        best = match best {
            None => Some((k, item)),
            Some((best_key, best_item)) => {
                let r = vm.compare(op, &k, &best_key)?;
                if vm.is_true(&r)? {
                    Some((k, item))
                } else {
                    Some((best_key, best_item))
                }
            }
        };
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(value_error(format!("{}() arg is an empty sequence", name))),
    }
}

fn builtin_min(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    extreme(vm, &b, "min", CompareOp::Lt)
}

fn builtin_max(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    extreme(vm, &b, "max", CompareOp::Gt)
}

fn builtin_sum(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let mut acc = b.optional("start").cloned().unwrap_or(Value::Int(0));
    if acc.as_str().is_some() {
        return Err(type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let it = vm.iter(b.get("iterable")?)?;
    while let Some(item) = vm.next(&it)? {
        acc = vm.binary_op(BinOp::Add, &acc, &item)?;
    }
    Ok(acc)
}

// ========== 타입 검사 ==========

/// 두 번째 인자로 받은 타입 또는 타입 튜플 (중첩 튜플 허용)
fn class_targets(vm: &Vm, spec: &Value, func: &str) -> VmResult<Vec<ObjRef>> {
    if let Some(items) = spec.tuple_items() {
        let mut out = Vec::new();
        for item in &items {
            out.extend(class_targets(vm, item, func)?);
        }
        return Ok(out);
    }
    match spec.as_object() {
        Some(o) if spec.is_type() => Ok(vec![o.clone()]),
        _ => Err(type_error(format!(
            "{}() arg 2 must be a type or tuple of types",
            func
        ))),
    }
}

fn builtin_isinstance(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let targets = class_targets(vm, b.get("class_or_tuple")?, "isinstance")?;
    Ok(Value::Bool(targets.iter().any(|t| vm.isinstance(obj, t))))
}

fn builtin_issubclass(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let cls = b.get("cls")?;
    let Some(sub) = cls.as_object().filter(|_| cls.is_type()) else {
        return Err(type_error("issubclass() arg 1 must be a class"));
    };
    let targets = class_targets(vm, b.get("class_or_tuple")?, "issubclass")?;
    Ok(Value::Bool(targets.iter().any(|t| vm.issubclass(sub, t))))
}

fn builtin_callable(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let direct = matches!(
        obj.as_object().map(|o| &o.data),
        Some(
            ObjectData::Function(_)
                | ObjectData::NativeFunction(_)
                | ObjectData::Method { .. }
                | ObjectData::Type(_)
        )
    );
    if direct {
        return Ok(Value::Bool(true));
    }
    let ty = vm.type_of(obj);
    let has_call = super::super::type_def::type_data(&ty)
        .and_then(|t| t.lookup("__call__"))
        .is_some_and(|c| !c.is_none());
    Ok(Value::Bool(has_call))
}

// ========== 속성 ==========

fn attr_name<'a>(v: &'a Value, func: &str) -> VmResult<&'a str> {
    v.as_str().ok_or_else(|| {
        type_error(format!(
            "{}(): attribute name must be string, not '{}'",
            func,
            type_name(v)
        ))
    })
}

fn builtin_getattr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let name = attr_name(b.get("name")?, "getattr")?;
    match b.varargs("default")?.into_iter().next() {
        None => vm.get_attribute(obj, name),
        Some(default) => match vm.get_attribute(obj, name) {
            Ok(v) => Ok(v),
            Err(e) if vm.error_matches(&e, ExcKind::AttributeError) => Ok(default),
            Err(e) => Err(e),
        },
    }
}

fn builtin_hasattr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let name = attr_name(b.get("name")?, "hasattr")?;
    Ok(Value::Bool(vm.has_attribute(obj, name)?))
}

fn builtin_setattr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let name = attr_name(b.get("name")?, "setattr")?;
    vm.set_attribute(obj, name, b.get("value")?.clone())?;
    Ok(Value::None)
}

fn builtin_delattr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let obj = b.get("obj")?;
    let name = attr_name(b.get("name")?, "delattr")?;
    vm.delete_attribute(obj, name)?;
    Ok(Value::None)
}

/// 인자가 없으면 현재 스코프의 이름들
fn builtin_dir(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let names = match b.optional("obj").cloned() {
        Some(obj) => match vm.call_special(&obj, "__dir__", Vec::new())? {
            Some(listing) => vm.collect(&listing)?,
            None => Vec::new(),
        },
        None => scope_items(vm)?
            .into_iter()
            .map(|(k, _)| Value::str(k))
            .collect(),
    };
    let sorted = sort_values(vm, names, None, false)?;
    Ok(Value::list(sorted))
}

fn builtin_vars(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.optional("obj") {
        None => builtin_locals(vm, b),
        Some(Value::Object(o)) if !o.attr_names().is_empty() || vm.has_attribute(&Value::Object(o.clone()), "__dict__")? => {
            Ok(snapshot_dict(o.attr_items()))
        }
        Some(other) => Err(type_error(format!(
            "vars() argument must have __dict__ attribute ({})",
            type_name(other)
        ))),
    }
}

fn snapshot_dict(items: Vec<(String, Value)>) -> Value {
    let map = items
        .into_iter()
        .map(|(k, v)| (DictKey::Str(k.clone()), (Value::str(k), v)))
        .collect();
    Value::dict(map)
}

/// 현재 프레임의 로컬 이름과 값
///
/// 이름공간 로컬이 있으면(모듈, 클래스 본문) 그 테이블을, 아니면 fast 슬롯과 셀을 모은다.
fn scope_items(vm: &Vm) -> VmResult<Vec<(String, Value)>> {
    let frame = vm.frame()?;
    if let Some(ns) = &frame.locals {
        return Ok(ns.attr_items());
    }
    let mut out: IndexMap<String, Value> = IndexMap::new();
    for (name, slot) in frame.code.varnames.iter().zip(frame.fast.iter()) {
        if let Some(v) = slot {
            out.insert(name.clone(), v.clone());
        }
    }
    let cell_names = frame.code.cellvars.iter().chain(frame.code.freevars.iter());
    for (idx, name) in cell_names.enumerate() {
        if let Some(v) = frame.cell_value(idx) {
            out.insert(name.clone(), v);
        }
    }
    Ok(out.into_iter().collect())
}

/// 스냅샷 dict. 돌려준 dict를 고쳐도 스코프는 바뀌지 않는다
fn builtin_locals(vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(snapshot_dict(scope_items(vm)?))
}

fn builtin_globals(vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    let globals = vm.frame()?.globals.clone();
    Ok(snapshot_dict(globals.attr_items()))
}

// ========== 수치 ==========

fn builtin_abs(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = b.get("x")?;
    match vm.call_special(x, "__abs__", Vec::new())? {
        Some(v) => Ok(v),
        None => Err(type_error(format!(
            "bad operand type for abs(): '{}'",
            vm.type_name(x)
        ))),
    }
}

fn builtin_divmod(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (x, y) = (b.get("x")?.clone(), b.get("y")?.clone());
    if let Some(r) = vm.call_special(&x, "__divmod__", vec![y.clone()])?
        && !r.is_not_implemented()
    {
        return Ok(r);
    }
    if let Some(r) = vm.call_special(&y, "__rdivmod__", vec![x.clone()])?
        && !r.is_not_implemented()
    {
        return Ok(r);
    }
    Err(type_error(format!(
        "unsupported operand type(s) for divmod(): '{}' and '{}'",
        vm.type_name(&x),
        vm.type_name(&y)
    )))
}

/// 세 인자 형태는 정수 모듈러 거듭제곱
fn builtin_pow(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (base, exp) = (b.get("base")?, b.get("exp")?);
    let Some(modulus) = b.optional_not_none("mod") else {
        return vm.binary_op(BinOp::Pow, base, exp);
    };
    let (Some(base), Some(exp), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return Err(type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if m == 0 {
        return Err(value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(value_error("pow() 2nd argument cannot be negative when 3rd argument specified"));
    }
    Ok(Value::Int(mod_pow(base, exp, m)))
}

fn mod_pow(base: i64, mut exp: i64, m: i64) -> i64 {
    let m = m as i128;
    let mut result: i128 = 1 % m;
    let mut base = (base as i128).rem_euclid(m);
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m;
        }
        base = base * base % m;
        exp >>= 1;
    }
    // 결과 부호는 모듈러스를 따른다
    let r = result.rem_euclid(m.abs());
    (if m < 0 && r != 0 { r + m } else { r }) as i64
}

fn builtin_round(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let number = b.get("number")?;
    let args = b.optional_not_none("ndigits").cloned().into_iter().collect();
    match vm.call_special(number, "__round__", args)? {
        Some(v) => Ok(v),
        None => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            vm.type_name(number)
        ))),
    }
}

fn index_value(vm: &mut Vm, v: &Value) -> VmResult<i64> {
    if let Some(i) = v.as_int() {
        return Ok(i);
    }
    match vm.call_special(v, "__index__", Vec::new())? {
        Some(r) => expect_int(&r, "__index__ result"),
        None => Err(type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            vm.type_name(v)
        ))),
    }
}

fn radix(vm: &mut Vm, b: &Bindings, ty: char) -> VmResult<Value> {
    let n = index_value(vm, b.get("number")?)?;
    let spec = FormatSpec {
        alternate: true,
        ty: Some(ty),
        ..FormatSpec::default()
    };
    Ok(Value::str(format_int(n, &spec)?))
}

fn builtin_hex(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    radix(vm, &b, 'x')
}

fn builtin_oct(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    radix(vm, &b, 'o')
}

fn builtin_bin(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    radix(vm, &b, 'b')
}

fn builtin_chr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let i = index_value(vm, b.get("i")?)?;
    u32::try_from(i)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))
}

fn builtin_ord(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let c = b.get("c")?;
    if let Some(s) = c.as_str() {
        let mut chars = s.chars();
        return match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(Value::Int(ch as i64)),
            _ => Err(type_error(format!(
                "ord() expected a character, but string of length {} found",
                s.chars().count()
            ))),
        };
    }
    if let Some(ObjectData::Bytes(raw)) = c.as_object().map(|o| &o.data) {
        return match raw.as_slice() {
            [byte] => Ok(Value::Int(*byte as i64)),
            _ => Err(type_error(format!(
                "ord() expected a character, but string of length {} found",
                raw.len()
            ))),
        };
    }
    Err(type_error(format!(
        "ord() expected string of length 1, but {} found",
        type_name(c)
    )))
}

// ========== 클래스 생성 ==========

/// `class` 문: 본문 함수를 새 이름공간에서 실행하고 그 내용으로 타입을 만든다
fn builtin_build_class(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let func = b.get("func")?.clone();
    let name = expect_str(b.get("name")?, "__build_class__: name")?.to_string();
    let bases = b.varargs("bases")?;
    for (k, v) in b.varkwargs("kwds")? {
        match k.as_str() {
            "metaclass" => {
                let is_type = v.as_object().is_some_and(|o| Arc::ptr_eq(o, &vm.types().type_));
                if !is_type {
                    return Err(pending(
                        ExcKind::TypeError,
                        "custom metaclasses are not supported",
                    ));
                }
            }
            other => {
                return Err(type_error(format!(
                    "__init_subclass__() takes no keyword arguments ('{}' given)",
                    other
                )));
            }
        }
    }
    if !matches!(func.as_object().map(|o| &o.data), Some(ObjectData::Function(_))) {
        return Err(type_error("__build_class__: func must be a function"));
    }

    let namespace = Object::new(ObjectData::Namespace);
    vm.run_class_body(&func, &namespace)?;
    let dict: IndexMap<String, Value> = namespace.attr_items().into_iter().collect();
    Ok(Value::Object(make_class(vm, &name, bases, dict)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(2, 10, 1000), 24);
        assert_eq!(mod_pow(3, 0, 7), 1);
        assert_eq!(mod_pow(-2, 3, 5), 2);
        assert_eq!(mod_pow(2, 3, -5), -2);
        assert_eq!(mod_pow(5, 3, 1), 0);
    }
}
