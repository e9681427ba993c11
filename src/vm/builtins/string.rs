//! str과 bytes
//!
//! 인덱스와 길이는 바이트가 아니라 유니코드 코드 포인트 단위입니다.

use super::super::exception::{ExcKind, pending, type_error, value_error};
use super::super::machine::{CompareOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods, type_data};
use super::super::utils::{
    bytes_repr, expect_int, expect_str, normalize_index, repeat_items, repeat_len, slice_indices,
    slice_positions, str_repr, type_name,
};
use super::super::value::{IterState, ObjectData, Value};
use super::super::VmResult;
use super::format::{Align, FormatSpec, Sign, format_float, format_int, format_str, format_template};
use super::{P, SELF, SELF_KEY, SELF_OTHER, VarKw, VarP, hash_bytes, slice_parts};

// ========== 공통 ==========

fn this<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a str> {
    let v = b.get("self")?;
    v.as_str().ok_or_else(|| super::descriptor_error(method, "str", v))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 코드 포인트 인덱스를 바이트 오프셋으로
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// `start`/`end` 인자를 slice 규칙으로 정규화한 코드 포인트 구간
fn window(s: &str, b: &Bindings) -> VmResult<(usize, usize)> {
    let (start, end, _) = slice_indices(b.get("start")?, b.get("end")?, &Value::None, char_len(s))?;
    let start = start.max(0) as usize;
    let end = (end.max(0) as usize).max(start);
    Ok((start, end))
}

fn sub_arg<'a>(b: &'a Bindings, name: &str) -> VmResult<&'a str> {
    let v = b.get(name)?;
    v.as_str().ok_or_else(|| {
        type_error(format!("must be str, not {}", type_name(v)))
    })
}

/// 구간 안에서 처음(또는 마지막) 찾은 코드 포인트 위치
fn find_in(s: &str, sub: &str, start: usize, end: usize, last: bool) -> Option<usize> {
    if start > char_len(s) {
        return None;
    }
    let (lo, hi) = (byte_offset(s, start), byte_offset(s, end));
    let hay = &s[lo..hi];
    let found = if last { hay.rfind(sub) } else { hay.find(sub) }?;
    Some(start + char_len(&hay[..found]))
}

// ========== str 메서드 ==========

const STR_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        str_new,
        &[("cls", P), ("object", P), ("encoding", P), ("errors", P)],
    )
    .with_optional(&["object", "encoding", "errors"]),
    MethodDef::method("__repr__", str_repr_method, SELF),
    MethodDef::method("__str__", str_str, SELF),
    MethodDef::method("__format__", str_format_method, &[("self", P), ("format_spec", P)]),
    MethodDef::method("__hash__", str_hash, SELF),
    MethodDef::method("__len__", str_len, SELF),
    MethodDef::method("__contains__", str_contains, SELF_KEY),
    MethodDef::method("__getitem__", str_getitem, SELF_KEY),
    MethodDef::method("__iter__", str_iter, SELF),
    MethodDef::method("__add__", str_add, SELF_OTHER),
    MethodDef::method("__mul__", str_mul, SELF_OTHER),
    MethodDef::method("__rmul__", str_mul, SELF_OTHER),
    MethodDef::method("__mod__", str_mod, SELF_OTHER),
    MethodDef::method("__eq__", str_eq, SELF_OTHER),
    MethodDef::method("__ne__", str_ne, SELF_OTHER),
    MethodDef::method("__lt__", str_lt, SELF_OTHER),
    MethodDef::method("__le__", str_le, SELF_OTHER),
    MethodDef::method("__gt__", str_gt, SELF_OTHER),
    MethodDef::method("__ge__", str_ge, SELF_OTHER),
    MethodDef::method("join", str_join, &[("self", P), ("iterable", P)]),
    MethodDef::method("split", str_split, &[("self", P), ("sep", P), ("maxsplit", P)])
        .with_optional(&["sep", "maxsplit"]),
    MethodDef::method("rsplit", str_rsplit, &[("self", P), ("sep", P), ("maxsplit", P)])
        .with_optional(&["sep", "maxsplit"]),
    MethodDef::method("splitlines", str_splitlines, &[("self", P), ("keepends", P)])
        .with_optional(&["keepends"]),
    MethodDef::method("strip", str_strip, &[("self", P), ("chars", P)]).with_optional(&["chars"]),
    MethodDef::method("lstrip", str_lstrip, &[("self", P), ("chars", P)]).with_optional(&["chars"]),
    MethodDef::method("rstrip", str_rstrip, &[("self", P), ("chars", P)]).with_optional(&["chars"]),
    MethodDef::method("upper", str_upper, SELF),
    MethodDef::method("lower", str_lower, SELF),
    MethodDef::method("title", str_title, SELF),
    MethodDef::method("capitalize", str_capitalize, SELF),
    MethodDef::method("swapcase", str_swapcase, SELF),
    MethodDef::method("replace", str_replace, &[("self", P), ("old", P), ("new", P), ("count", P)])
        .with_optional(&["count"]),
    MethodDef::method(
        "startswith",
        str_startswith,
        &[("self", P), ("prefix", P), ("start", P), ("end", P)],
    )
    .with_optional(&["start", "end"]),
    MethodDef::method(
        "endswith",
        str_endswith,
        &[("self", P), ("suffix", P), ("start", P), ("end", P)],
    )
    .with_optional(&["start", "end"]),
    MethodDef::method("find", str_find, &[("self", P), ("sub", P), ("start", P), ("end", P)])
        .with_optional(&["start", "end"]),
    MethodDef::method("rfind", str_rfind, &[("self", P), ("sub", P), ("start", P), ("end", P)])
        .with_optional(&["start", "end"]),
    MethodDef::method("index", str_index, &[("self", P), ("sub", P), ("start", P), ("end", P)])
        .with_optional(&["start", "end"]),
    MethodDef::method("count", str_count, &[("self", P), ("sub", P), ("start", P), ("end", P)])
        .with_optional(&["start", "end"]),
    MethodDef::method("partition", str_partition, &[("self", P), ("sep", P)]),
    MethodDef::method("rpartition", str_rpartition, &[("self", P), ("sep", P)]),
    MethodDef::method("center", str_center, &[("self", P), ("width", P), ("fillchar", P)])
        .with_optional(&["fillchar"]),
    MethodDef::method("ljust", str_ljust, &[("self", P), ("width", P), ("fillchar", P)])
        .with_optional(&["fillchar"]),
    MethodDef::method("rjust", str_rjust, &[("self", P), ("width", P), ("fillchar", P)])
        .with_optional(&["fillchar"]),
    MethodDef::method("zfill", str_zfill, &[("self", P), ("width", P)]),
    MethodDef::method("isdigit", str_isdigit, SELF),
    MethodDef::method("isalpha", str_isalpha, SELF),
    MethodDef::method("isalnum", str_isalnum, SELF),
    MethodDef::method("isspace", str_isspace, SELF),
    MethodDef::method("isupper", str_isupper, SELF),
    MethodDef::method("islower", str_islower, SELF),
    MethodDef::method("isidentifier", str_isidentifier, SELF),
    MethodDef::method("format", str_format, &[("self", P), ("args", VarP), ("kwargs", VarKw)]),
    MethodDef::method("encode", str_encode, &[("self", P), ("encoding", P), ("errors", P)])
        .with_optional(&["encoding", "errors"]),
];

/// `str(object='')`, `str(bytes, encoding)`
fn str_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let Some(object) = b.optional("object").cloned() else {
        return Ok(Value::str(""));
    };
    if b.optional("encoding").is_some() || b.optional("errors").is_some() {
        return match &object {
            Value::Object(o) => match &o.data {
                ObjectData::Bytes(raw) => decode_utf8(raw, b.optional("errors")),
                _ => Err(type_error(format!(
                    "decoding to str: need a bytes-like object, {} found",
                    type_name(&object)
                ))),
            },
            _ => Err(type_error(format!(
                "decoding to str: need a bytes-like object, {} found",
                type_name(&object)
            ))),
        };
    }
    Ok(Value::str(vm.to_str(&object)?))
}

fn str_repr_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(str_repr(this(&b, "__repr__")?)))
}

fn str_str(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    this(&b, "__str__")?;
    Ok(b.get("self")?.clone())
}

fn str_format_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__format__")?;
    let spec = expect_str(b.get("format_spec")?, "format spec")?;
    if spec.is_empty() {
        return Ok(b.get("self")?.clone());
    }
    Ok(Value::str(format_str(s, &FormatSpec::parse(spec)?)?))
}

fn str_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(hash_bytes(this(&b, "__hash__")?.as_bytes())))
}

fn str_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(char_len(this(&b, "__len__")?) as i64))
}

fn str_contains(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__contains__")?;
    let key = b.get("key")?;
    match key.as_str() {
        Some(sub) => Ok(Value::Bool(s.contains(sub))),
        None => Err(type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            type_name(key)
        ))),
    }
}

fn str_getitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__getitem__")?;
    let key = b.get("key")?;
    if let Some(i) = key.as_int() {
        let idx = normalize_index(i, char_len(s), "string")?;
        return Ok(s.chars().nth(idx).map(|c| Value::str(c.to_string())).unwrap_or(Value::None));
    }
    if let Some((start, stop, step)) = slice_parts(key) {
        let chars: Vec<char> = s.chars().collect();
        let (start, stop, step) = slice_indices(&start, &stop, &step, chars.len())?;
        let picked: String = slice_positions(start, stop, step)
            .into_iter()
            .map(|i| chars[i])
            .collect();
        return Ok(Value::str(picked));
    }
    Err(type_error(format!(
        "string indices must be integers, not '{}'",
        type_name(key)
    )))
}

fn str_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__iter__")?;
    let items = s.chars().map(|c| Value::str(c.to_string())).collect();
    Ok(Value::iterator(IterState::snapshot(items)))
}

/// 다른 쪽이 `__radd__`를 정의했으면 양보, 아니면 바로 TypeError
fn str_add(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__add__")?;
    let other = b.get("other")?;
    if let Some(o) = other.as_str() {
        return Ok(Value::str(format!("{}{}", s, o)));
    }
    let ty = vm.type_of(other);
    if type_data(&ty).and_then(|t| t.lookup("__radd__")).is_some() {
        return Ok(Value::NotImplemented);
    }
    Err(type_error(format!(
        "can only concatenate str (not \"{}\") to str",
        type_name(other)
    )))
}

fn str_mul(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__mul__")?;
    match b.get("other")?.as_int() {
        Some(n) => {
            let total = repeat_len(s.len(), 1, n)?;
            Ok(Value::str(if total == 0 { String::new() } else { s.repeat(n as usize) }))
        }
        None => Ok(Value::NotImplemented),
    }
}

fn str_mod(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "__mod__")?.to_string();
    let args = b.get("other")?.clone();
    Ok(Value::str(printf_format(vm, &s, &args)?))
}

fn compare_str(b: &Bindings, op: CompareOp) -> VmResult<Value> {
    let (Some(x), Some(y)) = (b.get("self")?.as_str(), b.get("other")?.as_str()) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(match op {
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }))
}

fn str_eq(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Eq)
}

fn str_ne(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Ne)
}

fn str_lt(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Lt)
}

fn str_le(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Le)
}

fn str_gt(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Gt)
}

fn str_ge(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_str(&b, CompareOp::Ge)
}

fn str_join(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let sep = this(&b, "join")?.to_string();
    let items = vm.collect(b.get("iterable")?)?;
    let mut parts = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(s) => parts.push(s),
            None => {
                return Err(type_error(format!(
                    "sequence item {}: expected str instance, {} found",
                    i,
                    type_name(item)
                )));
            }
        }
    }
    Ok(Value::str(parts.join(&sep)))
}

fn maxsplit(b: &Bindings) -> VmResult<Option<usize>> {
    match b.optional("maxsplit") {
        None => Ok(None),
        Some(v) => {
            let n = expect_int(v, "maxsplit")?;
            Ok(usize::try_from(n).ok())
        }
    }
}

fn separator<'a>(b: &'a Bindings) -> VmResult<Option<&'a str>> {
    match b.optional_not_none("sep") {
        None => Ok(None),
        Some(v) => {
            let sep = v.as_str().ok_or_else(|| {
                type_error(format!("must be str or None, not {}", type_name(v)))
            })?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            Ok(Some(sep))
        }
    }
}

fn strings(parts: Vec<&str>) -> Value {
    Value::list(parts.into_iter().map(Value::str).collect())
}

/// 공백 기준 분할 (연속 공백은 하나로, 앞뒤 공백 무시)
fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| out.len() >= n) {
            out.push(rest);
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    out
}

fn rsplit_whitespace(s: &str, limit: Option<usize>) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if limit.is_some_and(|n| out.len() >= n) {
            out.push(rest);
            break;
        }
        let start = rest
            .rfind(char::is_whitespace)
            .map(|i| i + rest[i..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(0);
        out.push(&rest[start..]);
        rest = rest[..start].trim_end();
    }
    out.reverse();
    out
}

fn str_split(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "split")?;
    let limit = maxsplit(&b)?;
    let parts = match separator(&b)? {
        None => split_whitespace(s, limit),
        Some(sep) => match limit {
            Some(n) => s.splitn(n + 1, sep).collect(),
            None => s.split(sep).collect(),
        },
    };
    Ok(strings(parts))
}

fn str_rsplit(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "rsplit")?;
    let limit = maxsplit(&b)?;
    let parts = match separator(&b)? {
        None => rsplit_whitespace(s, limit),
        Some(sep) => {
            let mut parts: Vec<&str> = match limit {
                Some(n) => s.rsplitn(n + 1, sep).collect(),
                None => s.rsplit(sep).collect(),
            };
            parts.reverse();
            parts
        }
    };
    Ok(strings(parts))
}

fn str_splitlines(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "splitlines")?;
    let keep = match b.optional("keepends") {
        Some(v) => vm.is_true(v)?,
        None => false,
    };
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let (is_break, width) = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => (true, 2),
            b'\n' | b'\r' => (true, 1),
            _ => (false, 1),
        };
        if is_break {
            let end = if keep { i + width } else { i };
            out.push(Value::str(&s[start..end]));
            start = i + width;
        }
        i += width;
    }
    if start < s.len() {
        out.push(Value::str(&s[start..]));
    }
    Ok(Value::list(out))
}

fn strip_chars<'a>(b: &'a Bindings) -> VmResult<Option<&'a str>> {
    match b.optional_not_none("chars") {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| {
            type_error(format!("strip arg must be None or str, not {}", type_name(v)))
        }),
    }
}

fn str_strip(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "strip")?;
    Ok(Value::str(match strip_chars(&b)? {
        None => s.trim(),
        Some(chars) => s.trim_matches(|c| chars.contains(c)),
    }))
}

fn str_lstrip(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "lstrip")?;
    Ok(Value::str(match strip_chars(&b)? {
        None => s.trim_start(),
        Some(chars) => s.trim_start_matches(|c| chars.contains(c)),
    }))
}

fn str_rstrip(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "rstrip")?;
    Ok(Value::str(match strip_chars(&b)? {
        None => s.trim_end(),
        Some(chars) => s.trim_end_matches(|c| chars.contains(c)),
    }))
}

fn str_upper(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(this(&b, "upper")?.to_uppercase()))
}

fn str_lower(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(this(&b, "lower")?.to_lowercase()))
}

fn str_title(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "title")?;
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    Ok(Value::str(out))
}

fn str_capitalize(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "capitalize")?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    };
    Ok(Value::str(out))
}

fn str_swapcase(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "swapcase")?;
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_uppercase() {
            out.extend(c.to_lowercase());
        } else if c.is_lowercase() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    Ok(Value::str(out))
}

fn str_replace(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "replace")?;
    let old = sub_arg(&b, "old")?;
    let new = sub_arg(&b, "new")?;
    let count = match b.optional("count") {
        Some(v) => expect_int(v, "count")?,
        None => -1,
    };
    if count < 0 {
        return Ok(Value::str(s.replace(old, new)));
    }
    Ok(Value::str(s.replacen(old, new, count as usize)))
}

/// 접두사/접미사 인자: str 하나 또는 str 튜플
fn affixes(v: &Value, method: &str) -> VmResult<Vec<String>> {
    if let Some(s) = v.as_str() {
        return Ok(vec![s.to_string()]);
    }
    if let Some(items) = v.tuple_items() {
        return items
            .iter()
            .map(|i| {
                i.as_str().map(str::to_string).ok_or_else(|| {
                    type_error(format!(
                        "tuple for {} must only contain str, not {}",
                        method,
                        type_name(i)
                    ))
                })
            })
            .collect();
    }
    Err(type_error(format!(
        "{} first arg must be str or a tuple of str, not {}",
        method,
        type_name(v)
    )))
}

fn str_startswith(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "startswith")?;
    let prefixes = affixes(b.get("prefix")?, "startswith")?;
    let (start, end) = window(s, &b)?;
    let part = &s[byte_offset(s, start)..byte_offset(s, end)];
    Ok(Value::Bool(prefixes.iter().any(|p| part.starts_with(p.as_str()))))
}

fn str_endswith(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "endswith")?;
    let suffixes = affixes(b.get("suffix")?, "endswith")?;
    let (start, end) = window(s, &b)?;
    let part = &s[byte_offset(s, start)..byte_offset(s, end)];
    Ok(Value::Bool(suffixes.iter().any(|p| part.ends_with(p.as_str()))))
}

fn str_find(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "find")?;
    let sub = sub_arg(&b, "sub")?;
    let (start, end) = window(s, &b)?;
    Ok(Value::Int(find_in(s, sub, start, end, false).map_or(-1, |i| i as i64)))
}

fn str_rfind(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "rfind")?;
    let sub = sub_arg(&b, "sub")?;
    let (start, end) = window(s, &b)?;
    Ok(Value::Int(find_in(s, sub, start, end, true).map_or(-1, |i| i as i64)))
}

fn str_index(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "index")?;
    let sub = sub_arg(&b, "sub")?;
    let (start, end) = window(s, &b)?;
    find_in(s, sub, start, end, false)
        .map(|i| Value::Int(i as i64))
        .ok_or_else(|| value_error("substring not found"))
}

fn str_count(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "count")?;
    let sub = sub_arg(&b, "sub")?;
    let (start, end) = window(s, &b)?;
    let part = &s[byte_offset(s, start)..byte_offset(s, end)];
    let n = if sub.is_empty() {
        char_len(part) + 1
    } else {
        part.matches(sub).count()
    };
    Ok(Value::Int(n as i64))
}

fn partition(b: &Bindings, method: &str, last: bool) -> VmResult<Value> {
    let s = this(b, method)?;
    let sep = sub_arg(b, "sep")?;
    if sep.is_empty() {
        return Err(value_error("empty separator"));
    }
    let found = if last { s.rfind(sep) } else { s.find(sep) };
    let parts = match found {
        Some(i) => [&s[..i], sep, &s[i + sep.len()..]],
        None if last => ["", "", s],
        None => [s, "", ""],
    };
    Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
}

fn str_partition(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    partition(&b, "partition", false)
}

fn str_rpartition(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    partition(&b, "rpartition", true)
}

fn justify(b: &Bindings, method: &str, align: Align) -> VmResult<Value> {
    let s = this(b, method)?;
    let width = expect_int(b.get("width")?, "width")?;
    let fill = match b.optional("fillchar") {
        None => ' ',
        Some(v) => {
            let f = v.as_str().unwrap_or("");
            let mut chars = f.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
    };
    let len = char_len(s) as i64;
    if width <= len {
        return Ok(b.get("self")?.clone());
    }
    let n = (width - len) as usize;
    let pad = |k: usize| fill.to_string().repeat(k);
    Ok(Value::str(match align {
        Align::Left => format!("{}{}", s, pad(n)),
        Align::Right => format!("{}{}", pad(n), s),
        // 홀수 여백은 파이썬처럼 너비가 홀수일 때 왼쪽에 하나 더
        _ => {
            let left = n / 2 + (n & width as usize & 1);
            format!("{}{}{}", pad(left), s, pad(n - left))
        }
    }))
}

fn str_center(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    justify(&b, "center", Align::Center)
}

fn str_ljust(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    justify(&b, "ljust", Align::Left)
}

fn str_rjust(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    justify(&b, "rjust", Align::Right)
}

fn str_zfill(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "zfill")?;
    let width = expect_int(b.get("width")?, "width")?;
    let len = char_len(s) as i64;
    if width <= len {
        return Ok(b.get("self")?.clone());
    }
    let zeros = "0".repeat((width - len) as usize);
    let out = match s.chars().next() {
        Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, zeros, &s[1..]),
        _ => format!("{}{}", zeros, s),
    };
    Ok(Value::str(out))
}

fn char_test(b: &Bindings, method: &str, test: fn(char) -> bool) -> VmResult<Value> {
    let s = this(b, method)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
}

fn str_isdigit(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    char_test(&b, "isdigit", |c| c.is_ascii_digit())
}

fn str_isalpha(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    char_test(&b, "isalpha", char::is_alphabetic)
}

fn str_isalnum(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    char_test(&b, "isalnum", char::is_alphanumeric)
}

fn str_isspace(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    char_test(&b, "isspace", char::is_whitespace)
}

/// 대소문자 있는 문자가 하나 이상이고 모두 대문자
fn str_isupper(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "isupper")?;
    Ok(Value::Bool(
        s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
    ))
}

fn str_islower(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "islower")?;
    Ok(Value::Bool(
        s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
    ))
}

fn str_isidentifier(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "isidentifier")?;
    let mut chars = s.chars();
    let ok = match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    };
    Ok(Value::Bool(ok))
}

fn str_format(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let template = this(&b, "format")?.to_string();
    let args = b.varargs("args")?;
    let kwargs = b.varkwargs("kwargs")?;
    Ok(Value::str(format_template(vm, &template, &args, &kwargs)?))
}

fn str_encode(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let s = this(&b, "encode")?;
    check_encoding(b.optional("encoding"))?;
    Ok(Value::bytes(s.as_bytes().to_vec()))
}

// ========== % 포맷 ==========

/// 변환 하나의 플래그, 너비, 정밀도
#[derive(Default)]
struct Conversion {
    left: bool,
    sign: Option<Sign>,
    zero: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Conversion {
    fn spec(&self, ty: Option<char>, numeric: bool) -> FormatSpec {
        let (fill, align) = if self.left {
            (' ', Align::Left)
        } else if self.zero && numeric {
            ('0', Align::AfterSign)
        } else {
            (' ', Align::Right)
        };
        FormatSpec {
            fill,
            align: Some(align),
            sign: self.sign.unwrap_or(Sign::Minus),
            alternate: self.alternate,
            width: self.width,
            grouping: None,
            precision: self.precision,
            ty,
        }
    }
}

/// 인자 공급: 튜플이면 순서대로, 매핑 키가 쓰이면 매핑에서
struct PrintfArgs {
    items: Vec<Value>,
    next: usize,
    mapping: Option<Value>,
}

impl PrintfArgs {
    fn take(&mut self) -> VmResult<Value> {
        let v = self
            .items
            .get(self.next)
            .cloned()
            .ok_or_else(|| type_error("not enough arguments for format string"))?;
        self.next += 1;
        Ok(v)
    }

    fn take_count(&mut self) -> VmResult<usize> {
        let v = self.take()?;
        let n = v.as_int().ok_or_else(|| type_error("* wants int"))?;
        Ok(n.max(0) as usize)
    }
}

fn read_digits(chars: &[char], pos: &mut usize) -> Option<usize> {
    let start = *pos;
    while chars.get(*pos).is_some_and(char::is_ascii_digit) {
        *pos += 1;
    }
    (*pos > start).then(|| chars[start..*pos].iter().collect::<String>().parse().ok()).flatten()
}

fn printf_int(vm: &mut Vm, v: &Value, code: char) -> VmResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) if matches!(code, 'd' | 'i' | 'u') => super::int::float_to_int(*f),
        other => match vm.call_special(other, "__index__", Vec::new())? {
            Some(Value::Int(i)) => Ok(i),
            _ => {
                let what = if matches!(code, 'd' | 'i' | 'u') {
                    "a number is required"
                } else {
                    "an integer is required"
                };
                Err(type_error(format!(
                    "%{} format: {}, not {}",
                    code,
                    what,
                    type_name(other)
                )))
            }
        },
    }
}

/// `template % args`
pub(crate) fn printf_format(vm: &mut Vm, template: &str, args: &Value) -> VmResult<String> {
    let is_mapping = matches!(args, Value::Object(o) if matches!(o.data, ObjectData::Dict(_)));
    let mut supply = PrintfArgs {
        items: args.tuple_items().unwrap_or_else(|| vec![args.clone()]),
        next: 0,
        mapping: is_mapping.then(|| args.clone()),
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut used_mapping = false;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut value = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|c| *c == ')')
                .ok_or_else(|| value_error("incomplete format key"))?;
            let key: String = chars[i + 1..i + close].iter().collect();
            let Some(mapping) = supply.mapping.clone() else {
                return Err(type_error("format requires a mapping"));
            };
            value = Some(vm.getitem(&mapping, &Value::str(key))?);
            used_mapping = true;
            i += close + 1;
        }

        let mut conv = Conversion::default();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => conv.left = true,
                '+' => conv.sign = Some(Sign::Plus),
                ' ' if conv.sign.is_none() => conv.sign = Some(Sign::Space),
                ' ' => {}
                '0' => conv.zero = true,
                '#' => conv.alternate = true,
                _ => break,
            }
            i += 1;
        }
        if chars.get(i) == Some(&'*') {
            conv.width = Some(supply.take_count()?);
            i += 1;
        } else {
            conv.width = read_digits(&chars, &mut i);
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            if chars.get(i) == Some(&'*') {
                conv.precision = Some(supply.take_count()?);
                i += 1;
            } else {
                conv.precision = Some(read_digits(&chars, &mut i).unwrap_or(0));
            }
        }
        while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
            i += 1;
        }
        let code = *chars
            .get(i)
            .ok_or_else(|| value_error("incomplete format"))?;
        i += 1;
        if code == '%' {
            out.push('%');
            continue;
        }
        let v = match value {
            Some(v) => v,
            None => supply.take()?,
        };
        let text = match code {
            's' => {
                let s = vm.to_str(&v)?;
                format_str(&s, &conv.spec(None, false))?
            }
            'r' | 'a' => {
                let s = vm.repr(&v)?;
                format_str(&s, &conv.spec(None, false))?
            }
            'd' | 'i' | 'u' => {
                let n = printf_int(vm, &v, code)?;
                let mut spec = conv.spec(Some('d'), true);
                spec.precision = None;
                format_int(n, &spec)?
            }
            'x' | 'X' | 'o' => {
                let n = printf_int(vm, &v, code)?;
                let mut spec = conv.spec(Some(code), true);
                spec.precision = None;
                format_int(n, &spec)?
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                let f = v.as_float().ok_or_else(|| {
                    type_error(format!("must be real number, not {}", type_name(&v)))
                })?;
                let mut spec = conv.spec(Some(code), true);
                spec.precision = Some(conv.precision.unwrap_or(6));
                format_float(f, &spec)?
            }
            'c' => {
                let c = match (&v, v.as_str()) {
                    (_, Some(s)) if char_len(s) == 1 => s.to_string(),
                    (Value::Int(n), _) => u32::try_from(*n)
                        .ok()
                        .and_then(char::from_u32)
                        .map(String::from)
                        .ok_or_else(|| pending(ExcKind::OverflowError, "%c arg not in range(0x110000)"))?,
                    _ => return Err(type_error("%c requires int or char")),
                };
                format_str(&c, &conv.spec(None, false))?
            }
            other => {
                return Err(value_error(format!(
                    "unsupported format character '{}' (0x{:x}) at index {}",
                    other,
                    other as u32,
                    i - 1
                )));
            }
        };
        out.push_str(&text);
    }
    if !used_mapping && supply.mapping.is_none() && supply.next < supply.items.len() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

// ========== bytes ==========

const BYTES_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        bytes_new,
        &[("cls", P), ("source", P), ("encoding", P), ("errors", P)],
    )
    .with_optional(&["source", "encoding", "errors"]),
    MethodDef::method("__repr__", bytes_repr_method, SELF),
    MethodDef::method("__hash__", bytes_hash, SELF),
    MethodDef::method("__len__", bytes_len, SELF),
    MethodDef::method("__getitem__", bytes_getitem, SELF_KEY),
    MethodDef::method("__iter__", bytes_iter, SELF),
    MethodDef::method("__contains__", bytes_contains, SELF_KEY),
    MethodDef::method("__add__", bytes_add, SELF_OTHER),
    MethodDef::method("__mul__", bytes_mul, SELF_OTHER),
    MethodDef::method("__rmul__", bytes_mul, SELF_OTHER),
    MethodDef::method("__eq__", bytes_eq, SELF_OTHER),
    MethodDef::method("__ne__", bytes_ne, SELF_OTHER),
    MethodDef::method("__lt__", bytes_lt, SELF_OTHER),
    MethodDef::method("__le__", bytes_le, SELF_OTHER),
    MethodDef::method("__gt__", bytes_gt, SELF_OTHER),
    MethodDef::method("__ge__", bytes_ge, SELF_OTHER),
    MethodDef::method("decode", bytes_decode, &[("self", P), ("encoding", P), ("errors", P)])
        .with_optional(&["encoding", "errors"]),
    MethodDef::method("hex", bytes_hex, SELF),
];

fn bytes_of(v: &Value) -> Option<&[u8]> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Bytes(b) => Some(b.as_slice()),
            _ => None,
        },
        _ => None,
    }
}

fn this_bytes<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a [u8]> {
    let v = b.get("self")?;
    bytes_of(v).ok_or_else(|| super::descriptor_error(method, "bytes", v))
}

/// utf-8만 지원
fn check_encoding(encoding: Option<&Value>) -> VmResult<()> {
    let Some(enc) = encoding else {
        return Ok(());
    };
    let name = expect_str(enc, "encoding")?.to_ascii_lowercase().replace('_', "-");
    match name.as_str() {
        "utf-8" | "utf8" | "ascii" => Ok(()),
        other => Err(pending(
            ExcKind::LookupError,
            format!("unknown encoding: {}", other),
        )),
    }
}

fn decode_utf8(raw: &[u8], errors: Option<&Value>) -> VmResult<Value> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(Value::str(s)),
        Err(_) if errors.and_then(Value::as_str) == Some("replace") => {
            Ok(Value::str(String::from_utf8_lossy(raw).into_owned()))
        }
        Err(e) => Err(value_error(format!(
            "'utf-8' codec can't decode byte 0x{:02x} in position {}: invalid start byte",
            raw.get(e.valid_up_to()).copied().unwrap_or(0),
            e.valid_up_to()
        ))),
    }
}

fn bytes_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let Some(source) = b.optional("source").cloned() else {
        return Ok(Value::bytes(Vec::new()));
    };
    if let Some(s) = source.as_str() {
        if b.optional("encoding").is_none() {
            return Err(type_error("string argument without an encoding"));
        }
        check_encoding(b.optional("encoding"))?;
        return Ok(Value::bytes(s.as_bytes().to_vec()));
    }
    if let Some(raw) = bytes_of(&source) {
        return Ok(Value::bytes(raw.to_vec()));
    }
    if let Some(n) = source.as_int() {
        if n < 0 {
            return Err(value_error("negative count"));
        }
        return Ok(Value::bytes(repeat_items(&[0u8], n)?));
    }
    let items = vm.collect(&source)?;
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        let n = item.as_int().ok_or_else(|| {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                type_name(item)
            ))
        })?;
        let byte = u8::try_from(n).map_err(|_| value_error("bytes must be in range(0, 256)"))?;
        out.push(byte);
    }
    Ok(Value::bytes(out))
}

fn bytes_repr_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(bytes_repr(this_bytes(&b, "__repr__")?)))
}

fn bytes_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(hash_bytes(this_bytes(&b, "__hash__")?)))
}

fn bytes_len(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this_bytes(&b, "__len__")?.len() as i64))
}

fn bytes_getitem(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "__getitem__")?;
    let key = b.get("key")?;
    if let Some(i) = key.as_int() {
        let idx = normalize_index(i, raw.len(), "index")?;
        return Ok(Value::Int(raw[idx] as i64));
    }
    if let Some((start, stop, step)) = slice_parts(key) {
        let (start, stop, step) = slice_indices(&start, &stop, &step, raw.len())?;
        let picked = slice_positions(start, stop, step)
            .into_iter()
            .map(|i| raw[i])
            .collect();
        return Ok(Value::bytes(picked));
    }
    Err(type_error(format!(
        "byte indices must be integers or slices, not {}",
        type_name(key)
    )))
}

fn bytes_iter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "__iter__")?;
    let items = raw.iter().map(|x| Value::Int(*x as i64)).collect();
    Ok(Value::iterator(IterState::snapshot(items)))
}

fn bytes_contains(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "__contains__")?;
    let key = b.get("key")?;
    if let Some(n) = key.as_int() {
        let byte = u8::try_from(n).map_err(|_| value_error("byte must be in range(0, 256)"))?;
        return Ok(Value::Bool(raw.contains(&byte)));
    }
    match bytes_of(key) {
        Some(needle) if needle.is_empty() => Ok(Value::Bool(true)),
        Some(needle) => Ok(Value::Bool(raw.windows(needle.len()).any(|w| w == needle))),
        None => Err(type_error(format!(
            "a bytes-like object is required, not '{}'",
            type_name(key)
        ))),
    }
}

fn bytes_add(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "__add__")?;
    match bytes_of(b.get("other")?) {
        Some(other) => Ok(Value::bytes([raw, other].concat())),
        None => Ok(Value::NotImplemented),
    }
}

fn bytes_mul(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "__mul__")?;
    match b.get("other")?.as_int() {
        Some(n) => Ok(Value::bytes(repeat_items(raw, n)?)),
        None => Ok(Value::NotImplemented),
    }
}

fn compare_bytes(b: &Bindings, op: CompareOp) -> VmResult<Value> {
    let (Some(x), Some(y)) = (bytes_of(b.get("self")?), bytes_of(b.get("other")?)) else {
        return Ok(Value::NotImplemented);
    };
    Ok(Value::Bool(match op {
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }))
}

fn bytes_eq(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Eq)
}

fn bytes_ne(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Ne)
}

fn bytes_lt(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Lt)
}

fn bytes_le(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Le)
}

fn bytes_gt(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Gt)
}

fn bytes_ge(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    compare_bytes(&b, CompareOp::Ge)
}

fn bytes_decode(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "decode")?;
    check_encoding(b.optional("encoding"))?;
    decode_utf8(raw, b.optional("errors"))
}

fn bytes_hex(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let raw = this_bytes(&b, "hex")?;
    Ok(Value::str(raw.iter().map(|x| format!("{:02x}", x)).collect::<String>()))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.str_, STR_METHODS)?;
    install_methods(&types.bytes, BYTES_METHODS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace() {
        assert_eq!(split_whitespace("  a b\t c  ", None), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", Some(1)), vec!["a", "b c"]);
        assert!(split_whitespace("   ", None).is_empty());
        assert_eq!(rsplit_whitespace("a b c", Some(1)), vec!["a b", "c"]);
    }

    #[test]
    fn test_find_uses_code_points() {
        assert_eq!(find_in("héllo", "l", 0, 5, false), Some(2));
        assert_eq!(find_in("héllo", "l", 0, 5, true), Some(3));
        assert_eq!(find_in("héllo", "l", 4, 5, false), None);
        assert_eq!(find_in("abc", "", 3, 3, false), Some(3));
        assert_eq!(find_in("abc", "", 4, 4, false), None);
    }

    #[test]
    fn test_byte_offset() {
        assert_eq!(byte_offset("héllo", 2), 3);
        assert_eq!(byte_offset("abc", 10), 3);
    }
}
