//! VM 유틸리티 함수
//!
//! 락 헬퍼, 타입 이름, 숫자 표시, 인덱스 정규화 등 VM 전반에서 공통으로 쓰이는 함수들을 제공합니다.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::exception::{index_error, memory_error, type_error, value_error};
use super::value::{ObjectData, Value};
use super::VmResult;

// ========== 락 헬퍼 ==========
// 패닉으로 오염된 락도 그대로 복구해서 사용한다.

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========== 타입 이름 ==========

/// Value의 타입 이름 반환
///
/// Python의 `type(x).__name__`과 같습니다.
///
/// # Examples
///
/// ```ignore
/// type_name(&Value::Int(42))        // → "int"
/// type_name(&Value::None)           // → "NoneType"
/// ```
pub fn type_name(v: &Value) -> String {
    match v {
        Value::None => "NoneType".into(),
        Value::NotImplemented => "NotImplementedType".into(),
        Value::Ellipsis => "ellipsis".into(),
        Value::Bool(_) => "bool".into(),
        Value::Int(_) => "int".into(),
        Value::Float(_) => "float".into(),
        Value::Object(obj) => match &obj.data {
            ObjectData::Instance { class } => class_name(class),
            ObjectData::Exception(exc) => class_name(&exc.class),
            other => other.kind_name().into(),
        },
    }
}

fn class_name(class: &super::value::ObjRef) -> String {
    match &class.data {
        ObjectData::Type(t) => t.name.clone(),
        _ => "object".into(),
    }
}

// ========== 값 추출 헬퍼 (expect_*) ==========

/// int(또는 bool)를 i64로 추출
pub fn expect_int(v: &Value, what: &str) -> VmResult<i64> {
    v.as_int().ok_or_else(|| {
        type_error(format!(
            "{} must be an integer, not '{}'",
            what,
            type_name(v)
        ))
    })
}

/// str 데이터 추출
pub fn expect_str<'a>(v: &'a Value, what: &str) -> VmResult<&'a str> {
    v.as_str()
        .ok_or_else(|| type_error(format!("{} must be str, not '{}'", what, type_name(v))))
}

// ========== 숫자 표시 ==========

/// 파이썬 `repr(float)` 규칙으로 부동소수점을 문자열로 변환
///
/// - 가장 짧게 왕복 가능한 자릿수
/// - 지수 `< -4` 또는 `>= 16`이면 과학 표기법 (`1e+16`, `1.5e-05`)
/// - 정수값이면 `.0`을 붙임
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }

    let sci = format!("{:e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if (-4..16).contains(&exp) {
        let s = format!("{}", f);
        if s.contains('.') { s } else { format!("{}.0", s) }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

/// 문자열 repr (작은따옴표 우선, 필요하면 큰따옴표)
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// bytes repr (`b'...'`)
pub fn bytes_repr(b: &[u8]) -> String {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { '"' } else { '\'' };
    let mut out = String::from("b");
    out.push(quote);
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            c if c as char == quote => {
                out.push('\\');
                out.push(c as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push(quote);
    out
}

// ========== 시퀀스 반복 ==========

/// `seq * n` 결과의 최대 크기 (바이트)
const MAX_REPEAT_BYTES: usize = 1 << 31;

/// 원소 크기가 `elem_size`인 길이 `len` 시퀀스를 `n`번 반복한 길이.
/// 너무 크면 할당 전에 MemoryError
pub fn repeat_len(len: usize, elem_size: usize, n: i64) -> VmResult<usize> {
    if n <= 0 || len == 0 {
        return Ok(0);
    }
    usize::try_from(n)
        .ok()
        .and_then(|n| len.checked_mul(n))
        .filter(|total| total.saturating_mul(elem_size.max(1)) <= MAX_REPEAT_BYTES)
        .ok_or_else(|| memory_error("repeated sequence is too long"))
}

pub fn repeat_items<T: Clone>(items: &[T], n: i64) -> VmResult<Vec<T>> {
    let total = repeat_len(items.len(), std::mem::size_of::<T>(), n)?;
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        out.extend_from_slice(items);
    }
    Ok(out)
}

// ========== 인덱스 ==========

/// 음수 인덱스를 정규화. 범위를 벗어나면 IndexError
pub fn normalize_index(index: i64, len: usize, what: &str) -> VmResult<usize> {
    let len = len as i64;
    let idx = if index < 0 { index + len } else { index };
    if idx < 0 || idx >= len {
        return Err(index_error(format!("{} index out of range", what)));
    }
    Ok(idx as usize)
}

/// slice의 (start, stop, step)을 길이에 맞게 조정
///
/// 반환된 인덱스로 `start`부터 `step`씩 이동하며 `stop` 전까지가 선택 구간이다.
pub fn slice_indices(
    start: &Value,
    stop: &Value,
    step: &Value,
    len: usize,
) -> VmResult<(i64, i64, i64)> {
    let len = len as i64;
    let step = match step {
        Value::None => 1,
        v => expect_int(v, "slice step")?,
    };
    if step == 0 {
        return Err(value_error("slice step cannot be zero"));
    }
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let adjust = |v: &Value, default: i64| -> VmResult<i64> {
        match v {
            Value::None => Ok(default),
            v => {
                let i = expect_int(v, "slice indices")?;
                Ok(if i < 0 {
                    (i + len).max(lower)
                } else {
                    i.min(upper)
                })
            }
        }
    };
    let start = adjust(start, if step < 0 { upper } else { lower })?;
    let stop = adjust(stop, if step < 0 { lower } else { upper })?;
    Ok((start, stop, step))
}

/// 조정된 slice가 선택하는 인덱스 목록
pub fn slice_positions(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmError;
    use crate::vm::exception::ExcKind;

    #[test]
    fn test_repeat_items() {
        assert_eq!(repeat_items(&[1, 2], 3).unwrap(), vec![1, 2, 1, 2, 1, 2]);
        assert!(repeat_items(&[1, 2], -1).unwrap().is_empty());
        assert!(repeat_items::<u8>(&[], i64::MAX).unwrap().is_empty());
        assert!(matches!(
            repeat_items(&[0u8, 1], i64::MAX / 2),
            Err(VmError::Pending { kind: ExcKind::MemoryError, .. })
        ));
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_str_repr() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_slice_indices() {
        let none = Value::None;
        assert_eq!(slice_indices(&none, &none, &none, 5).unwrap(), (0, 5, 1));
        assert_eq!(
            slice_indices(&none, &none, &Value::Int(-1), 5).unwrap(),
            (4, -1, -1)
        );
        let (a, b, c) = slice_indices(&Value::Int(-2), &Value::Int(100), &none, 5).unwrap();
        assert_eq!(slice_positions(a, b, c), vec![3, 4]);
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3, "list").unwrap(), 2);
        assert!(normalize_index(3, 3, "list").is_err());
    }
}
