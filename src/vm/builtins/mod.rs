//! 빌트인 타입의 메서드 테이블과 `builtins` 모듈
//!
//! 타입마다 `&[MethodDef]` 테이블을 하나씩 두고, 인터프리터 생성 시 [`install`]이
//! 클래스 dict에 네이티브 함수로 설치합니다. 설치된 뒤에는 사용자 클래스의 메서드와
//! 똑같이 MRO 조회와 디스크립터 규칙을 따릅니다.

/// 정방향/반사 이항 메서드 쌍을 만든다. 피연산자 추출이 실패하면 NotImplemented
macro_rules! binary_methods {
    ($self_of:expr, $other_of:expr, $arith:expr; $($fwd:ident, $rev:ident => $op:expr;)*) => {
        $(
            fn $fwd(
                _vm: &mut $crate::vm::machine::Vm,
                b: $crate::vm::signature::Bindings,
            ) -> $crate::vm::VmResult<$crate::vm::value::Value> {
                match (($self_of)(b.get("self")?), ($other_of)(b.get("other")?)) {
                    (Some(x), Some(y)) => ($arith)($op, x, y),
                    _ => Ok($crate::vm::value::Value::NotImplemented),
                }
            }

            fn $rev(
                _vm: &mut $crate::vm::machine::Vm,
                b: $crate::vm::signature::Bindings,
            ) -> $crate::vm::VmResult<$crate::vm::value::Value> {
                match (($self_of)(b.get("self")?), ($other_of)(b.get("other")?)) {
                    (Some(x), Some(y)) => ($arith)($op, y, x),
                    _ => Ok($crate::vm::value::Value::NotImplemented),
                }
            }
        )*
    };
}

/// 비교 메서드. 피연산자 추출이 실패하면 NotImplemented
macro_rules! compare_methods {
    ($self_of:expr, $other_of:expr; $($name:ident => $cmp:expr;)*) => {
        $(
            fn $name(
                _vm: &mut $crate::vm::machine::Vm,
                b: $crate::vm::signature::Bindings,
            ) -> $crate::vm::VmResult<$crate::vm::value::Value> {
                match (($self_of)(b.get("self")?), ($other_of)(b.get("other")?)) {
                    (Some(x), Some(y)) => Ok($crate::vm::value::Value::Bool(($cmp)(&x, &y))),
                    _ => Ok($crate::vm::value::Value::NotImplemented),
                }
            }
        )*
    };
}

pub mod dict;
pub mod exceptions;
pub mod float;
pub mod format;
pub mod functions;
pub mod int;
pub mod iterators;
pub mod list;
pub mod none_type;
pub mod object;
pub mod range;
pub mod set;
pub mod string;
pub mod sys;
pub mod tuple;

#[cfg(test)]
mod tests;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::exception::type_error;
use super::machine::{CompareOp, Vm};
use super::signature::ParamKind;
use super::type_def::BuiltinTypes;
use super::utils::{normalize_index, slice_indices, slice_positions};
use super::value::{ObjRef, ObjectData, Value, new_module};
use super::{VmError, VmResult};

// ========== 파라미터 목록 ==========

pub(crate) type Params = &'static [(&'static str, ParamKind)];

pub(crate) use ParamKind::{
    KeywordOnly as Kw, Positional as P, VarKeyword as VarKw, VarPositional as VarP,
};

pub(crate) const SELF: Params = &[("self", P)];
pub(crate) const SELF_OTHER: Params = &[("self", P), ("other", P)];
pub(crate) const SELF_KEY: Params = &[("self", P), ("key", P)];

// ========== 설치 ==========

/// 모든 메서드 테이블을 설치하고 `builtins` 모듈을 만든다.
pub fn install(types: &BuiltinTypes) -> VmResult<ObjRef> {
    object::install(types)?;
    none_type::install(types)?;
    int::install(types)?;
    float::install(types)?;
    string::install(types)?;
    tuple::install(types)?;
    list::install(types)?;
    dict::install(types)?;
    set::install(types)?;
    range::install(types)?;
    iterators::install(types)?;
    exceptions::install(types)?;

    let module = new_module("builtins");
    for def in functions::FUNCTIONS {
        module.set_attr(def.name, def.build("")?);
    }
    for (name, ty) in types.exposed() {
        module.set_attr(name, Value::Object(ty.clone()));
    }
    module.set_attr("None", Value::None);
    module.set_attr("True", Value::Bool(true));
    module.set_attr("False", Value::Bool(false));
    module.set_attr("NotImplemented", Value::NotImplemented);
    module.set_attr("Ellipsis", Value::Ellipsis);
    Ok(module)
}

// ========== 공통 헬퍼 ==========

/// `list.append(1, 2)`처럼 receiver 타입이 맞지 않을 때
pub(crate) fn descriptor_error(method: &str, owner: &str, got: &Value) -> VmError {
    type_error(format!(
        "descriptor '{}' requires a '{}' object but received a '{}'",
        method,
        owner,
        super::utils::type_name(got)
    ))
}

/// 객체 주소를 흉내 낸 repr용 16진수 식별자
pub(crate) fn address(v: &Value) -> String {
    format!("0x{:x}", v.identity())
}

/// 문자열/바이트열 해시. 프로세스 안에서 안정적
pub(crate) fn hash_bytes(data: &[u8]) -> i64 {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    fix_hash(hasher.finish() as i64)
}

/// 파이썬에서 해시 -1은 오류 표시용이라 -2로 바꾼다
pub(crate) fn fix_hash(h: i64) -> i64 {
    if h == -1 { -2 } else { h }
}

/// 자기 참조 컨테이너 repr. 이미 repr 중이면 `placeholder`
pub(crate) fn guarded_repr(
    vm: &mut Vm,
    container: &Value,
    placeholder: &str,
    body: impl FnOnce(&mut Vm) -> VmResult<String>,
) -> VmResult<String> {
    let id = container.identity();
    if vm.repr_guard.contains(&id) {
        return Ok(placeholder.to_string());
    }
    vm.repr_guard.push(id);
    let result = body(vm);
    vm.repr_guard.retain(|x| *x != id);
    result
}

/// 항목 repr을 `, `로 이어 붙임
pub(crate) fn join_reprs(vm: &mut Vm, items: &[Value]) -> VmResult<String> {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(vm.repr(item)?);
    }
    Ok(parts.join(", "))
}

/// 시퀀스 사전식 비교 (list, tuple)
pub(crate) fn compare_sequences(
    vm: &mut Vm,
    a: &[Value],
    b: &[Value],
    op: CompareOp,
) -> VmResult<bool> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !vm.eq(x, y)? {
            return match op {
                CompareOp::Eq => Ok(false),
                CompareOp::Ne => Ok(true),
                _ => {
                    let r = vm.compare(op, x, y)?;
                    vm.is_true(&r)
                }
            };
        }
    }
    let (la, lb) = (a.len(), b.len());
    Ok(match op {
        CompareOp::Lt => la < lb,
        CompareOp::Le => la <= lb,
        CompareOp::Eq => la == lb,
        CompareOp::Ne => la != lb,
        CompareOp::Gt => la > lb,
        CompareOp::Ge => la >= lb,
    })
}

/// 정수 인덱스 또는 slice로 시퀀스 조회. slice 결과는 `wrap`으로 감싼다.
pub(crate) fn subscript(
    items: &[Value],
    key: &Value,
    what: &str,
    wrap: fn(Vec<Value>) -> Value,
) -> VmResult<Value> {
    if let Some(i) = key.as_int() {
        let idx = normalize_index(i, items.len(), what)?;
        return Ok(items[idx].clone());
    }
    if let Some((start, stop, step)) = slice_parts(key) {
        let (start, stop, step) = slice_indices(&start, &stop, &step, items.len())?;
        let picked = slice_positions(start, stop, step)
            .into_iter()
            .map(|i| items[i].clone())
            .collect();
        return Ok(wrap(picked));
    }
    Err(type_error(format!(
        "{} indices must be integers or slices, not {}",
        what,
        super::utils::type_name(key)
    )))
}

/// slice 객체의 (start, stop, step)
pub(crate) fn slice_parts(v: &Value) -> Option<(Value, Value, Value)> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Slice { start, stop, step } => {
                Some((start.clone(), stop.clone(), step.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// `key=` 인자가 있으면 각 항목에 적용
pub(crate) fn apply_key(vm: &mut Vm, key: Option<&Value>, item: &Value) -> VmResult<Value> {
    match key {
        Some(f) => vm.call(f, vec![item.clone()], Vec::new()),
        None => Ok(item.clone()),
    }
}

/// `<` 비교로 안정 병합 정렬. 비교 중 예외가 나면 그대로 전파
pub(crate) fn sort_values(
    vm: &mut Vm,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> VmResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = apply_key(vm, key, &item)?;
        keyed.push((k, item));
    }
    let sorted = merge_sort(vm, keyed, reverse)?;
    Ok(sorted.into_iter().map(|(_, v)| v).collect())
}

fn merge_sort(
    vm: &mut Vm,
    mut items: Vec<(Value, Value)>,
    reverse: bool,
) -> VmResult<Vec<(Value, Value)>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(vm, items, reverse)?;
    let right = merge_sort(vm, right, reverse)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        // reverse일 때도 같은 키끼리는 원래 순서를 유지
        let take_right = if reverse {
            let lt = vm.compare(CompareOp::Lt, &l.0, &r.0)?;
            vm.is_true(&lt)?
        } else {
            let lt = vm.compare(CompareOp::Lt, &r.0, &l.0)?;
            vm.is_true(&lt)?
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}
