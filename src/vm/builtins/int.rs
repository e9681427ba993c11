//! int과 bool
//!
//! 정수는 i64 범위만 지원합니다. 범위를 넘는 연산은 OverflowError.
//! 나눗셈과 나머지는 파이썬 규칙(몫은 내림, 나머지 부호는 제수를 따름)을 따릅니다.

use super::super::exception::{overflow_error, type_error, value_error, zero_division};
use super::super::machine::{BinOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{expect_str, str_repr};
use super::super::value::{ObjectData, Value};
use super::super::{VmError, VmResult};
use super::format::{FormatSpec, format_int};
use super::{P, SELF, SELF_OTHER, fix_hash};

// ========== 산술 코어 ==========

fn overflow() -> VmError {
    overflow_error("integer overflow")
}

/// 몫을 음의 무한대 방향으로 내림
pub(crate) fn floor_div(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// 결과 부호가 제수를 따르는 나머지
pub(crate) fn floor_mod(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

pub(crate) fn int_pow(a: i64, b: i64) -> VmResult<Value> {
    if b < 0 {
        if a == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((a as f64).powf(b as f64)));
    }
    let exp = u32::try_from(b).map_err(|_| overflow())?;
    a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
}

fn shift_left(a: i64, b: i64) -> VmResult<i64> {
    if b < 0 {
        return Err(value_error("negative shift count"));
    }
    if a == 0 {
        return Ok(0);
    }
    if b >= 63 {
        return Err(overflow());
    }
    let r = a << b;
    if r >> b != a {
        return Err(overflow());
    }
    Ok(r)
}

fn shift_right(a: i64, b: i64) -> VmResult<i64> {
    if b < 0 {
        return Err(value_error("negative shift count"));
    }
    Ok(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
}

pub(crate) fn int_arith(op: BinOp, a: i64, b: i64) -> VmResult<Value> {
    let r = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::FloorDiv => floor_div(a, b)?,
        BinOp::Mod => floor_mod(a, b)?,
        BinOp::TrueDiv => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::Pow => return int_pow(a, b),
        BinOp::LShift => shift_left(a, b)?,
        BinOp::RShift => shift_right(a, b)?,
        BinOp::And => a & b,
        BinOp::Xor => a ^ b,
        BinOp::Or => a | b,
        BinOp::MatMul => return Ok(Value::NotImplemented),
    };
    Ok(Value::Int(r))
}

/// 음수 자릿수 반올림 (`round(1250, -2)` → 1200). 동률은 짝수 쪽
fn round_int(x: i64, ndigits: i64) -> VmResult<i64> {
    if ndigits >= 0 {
        return Ok(x);
    }
    let Some(unit) = u32::try_from(-ndigits).ok().and_then(|n| 10i64.checked_pow(n)) else {
        return Ok(0);
    };
    let q = floor_div(x, unit)?;
    let r = floor_mod(x, unit)?;
    let twice = r.saturating_mul(2);
    let q = if twice > unit || (twice == unit && q % 2 != 0) { q + 1 } else { q };
    q.checked_mul(unit).ok_or_else(overflow)
}

// ========== 문자열 → int ==========

fn strip_radix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.strip_prefix(prefix)
        .map(|rest| rest.strip_prefix('_').unwrap_or(rest))
}

/// `int(text, base)`. base 0은 접두사로 진법을 추론
pub(crate) fn parse_int(text: &str, base: u32) -> Option<i64> {
    let s = text.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = body.to_ascii_lowercase();
    let (base, digits) = match base {
        0 => {
            if let Some(d) = strip_radix(&lower, "0x") {
                (16, d)
            } else if let Some(d) = strip_radix(&lower, "0o") {
                (8, d)
            } else if let Some(d) = strip_radix(&lower, "0b") {
                (2, d)
            } else {
                // 접두사 없이 0으로 시작하면 0만 허용
                if lower.starts_with('0') && lower.chars().any(|c| c != '0' && c != '_') {
                    return None;
                }
                (10, lower.as_str())
            }
        }
        16 => (16, strip_radix(&lower, "0x").unwrap_or(lower.as_str())),
        8 => (8, strip_radix(&lower, "0o").unwrap_or(lower.as_str())),
        2 => (2, strip_radix(&lower, "0b").unwrap_or(lower.as_str())),
        b => (b, lower.as_str()),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = u64::from_str_radix(&cleaned, base).ok()?;
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    }
}

// ========== int 메서드 ==========

const INT_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", int_new, &[("cls", P), ("x", P), ("base", P)])
        .with_optional(&["x", "base"]),
    MethodDef::method("__add__", int_add, SELF_OTHER),
    MethodDef::method("__radd__", int_radd, SELF_OTHER),
    MethodDef::method("__sub__", int_sub, SELF_OTHER),
    MethodDef::method("__rsub__", int_rsub, SELF_OTHER),
    MethodDef::method("__mul__", int_mul, SELF_OTHER),
    MethodDef::method("__rmul__", int_rmul, SELF_OTHER),
    MethodDef::method("__truediv__", int_truediv, SELF_OTHER),
    MethodDef::method("__rtruediv__", int_rtruediv, SELF_OTHER),
    MethodDef::method("__floordiv__", int_floordiv, SELF_OTHER),
    MethodDef::method("__rfloordiv__", int_rfloordiv, SELF_OTHER),
    MethodDef::method("__mod__", int_mod, SELF_OTHER),
    MethodDef::method("__rmod__", int_rmod, SELF_OTHER),
    MethodDef::method("__pow__", int_pow_method, SELF_OTHER),
    MethodDef::method("__rpow__", int_rpow, SELF_OTHER),
    MethodDef::method("__lshift__", int_lshift, SELF_OTHER),
    MethodDef::method("__rlshift__", int_rlshift, SELF_OTHER),
    MethodDef::method("__rshift__", int_rshift, SELF_OTHER),
    MethodDef::method("__rrshift__", int_rrshift, SELF_OTHER),
    MethodDef::method("__and__", int_and, SELF_OTHER),
    MethodDef::method("__rand__", int_rand, SELF_OTHER),
    MethodDef::method("__xor__", int_xor, SELF_OTHER),
    MethodDef::method("__rxor__", int_rxor, SELF_OTHER),
    MethodDef::method("__or__", int_or, SELF_OTHER),
    MethodDef::method("__ror__", int_ror, SELF_OTHER),
    MethodDef::method("__divmod__", int_divmod, SELF_OTHER),
    MethodDef::method("__rdivmod__", int_rdivmod, SELF_OTHER),
    MethodDef::method("__eq__", int_eq, SELF_OTHER),
    MethodDef::method("__ne__", int_ne, SELF_OTHER),
    MethodDef::method("__lt__", int_lt, SELF_OTHER),
    MethodDef::method("__le__", int_le, SELF_OTHER),
    MethodDef::method("__gt__", int_gt, SELF_OTHER),
    MethodDef::method("__ge__", int_ge, SELF_OTHER),
    MethodDef::method("__neg__", int_neg, SELF),
    MethodDef::method("__pos__", int_pos, SELF),
    MethodDef::method("__abs__", int_abs, SELF),
    MethodDef::method("__invert__", int_invert, SELF),
    MethodDef::method("__bool__", int_bool, SELF),
    MethodDef::method("__int__", int_pos, SELF),
    MethodDef::method("__index__", int_pos, SELF),
    MethodDef::method("__float__", int_float, SELF),
    MethodDef::method("__hash__", int_hash, SELF),
    MethodDef::method("__repr__", int_repr, SELF),
    MethodDef::method("__format__", int_format, &[("self", P), ("format_spec", P)]),
    MethodDef::method("__round__", int_round, &[("self", P), ("ndigits", P)])
        .with_optional(&["ndigits"]),
    MethodDef::method("bit_length", int_bit_length, SELF),
];

binary_methods! {
    Value::as_int, Value::as_int, int_arith;
    int_add, int_radd => BinOp::Add;
    int_sub, int_rsub => BinOp::Sub;
    int_mul, int_rmul => BinOp::Mul;
    int_truediv, int_rtruediv => BinOp::TrueDiv;
    int_floordiv, int_rfloordiv => BinOp::FloorDiv;
    int_mod, int_rmod => BinOp::Mod;
    int_pow_method, int_rpow => BinOp::Pow;
    int_lshift, int_rlshift => BinOp::LShift;
    int_rshift, int_rrshift => BinOp::RShift;
    int_and, int_rand => BinOp::And;
    int_xor, int_rxor => BinOp::Xor;
    int_or, int_ror => BinOp::Or;
}

compare_methods! {
    Value::as_int, Value::as_int;
    int_eq => PartialEq::eq;
    int_ne => PartialEq::ne;
    int_lt => PartialOrd::lt;
    int_le => PartialOrd::le;
    int_gt => PartialOrd::gt;
    int_ge => PartialOrd::ge;
}

fn divmod_pair(a: i64, b: i64) -> VmResult<Value> {
    Ok(Value::tuple(vec![
        Value::Int(floor_div(a, b)?),
        Value::Int(floor_mod(a, b)?),
    ]))
}

fn int_divmod(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match (b.get("self")?.as_int(), b.get("other")?.as_int()) {
        (Some(x), Some(y)) => divmod_pair(x, y),
        _ => Ok(Value::NotImplemented),
    }
}

fn int_rdivmod(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match (b.get("self")?.as_int(), b.get("other")?.as_int()) {
        (Some(x), Some(y)) => divmod_pair(y, x),
        _ => Ok(Value::NotImplemented),
    }
}

fn this(b: &Bindings) -> VmResult<i64> {
    let v = b.get("self")?;
    v.as_int().ok_or_else(|| super::descriptor_error("__int__", "int", v))
}

fn int_neg(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    this(&b)?.checked_neg().map(Value::Int).ok_or_else(overflow)
}

fn int_pos(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(this(&b)?))
}

fn int_abs(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    this(&b)?.checked_abs().map(Value::Int).ok_or_else(overflow)
}

fn int_invert(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(!this(&b)?))
}

fn int_bool(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Bool(this(&b)? != 0))
}

fn int_float(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Float(this(&b)? as f64))
}

fn int_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(fix_hash(this(&b)?)))
}

fn int_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(this(&b)?.to_string()))
}

fn int_format(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let spec = expect_str(b.get("format_spec")?, "format spec")?;
    if spec.is_empty() {
        return Ok(Value::str(vm.to_str(b.get("self")?)?));
    }
    let spec = FormatSpec::parse(spec)?;
    Ok(Value::str(format_int(this(&b)?, &spec)?))
}

fn int_round(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = this(&b)?;
    match b.optional_not_none("ndigits") {
        None => Ok(Value::Int(x)),
        Some(n) => {
            let n = n.as_int().ok_or_else(|| {
                type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    super::super::utils::type_name(n)
                ))
            })?;
            Ok(Value::Int(round_int(x, n)?))
        }
    }
}

fn int_bit_length(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = this(&b)?;
    Ok(Value::Int(64 - x.unsigned_abs().leading_zeros() as i64))
}

/// `int(x=0, base=10)`
fn int_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let base = b.optional("base").cloned();
    let Some(x) = b.optional("x").cloned() else {
        if base.is_some() {
            return Err(type_error("int() missing string argument"));
        }
        return Ok(Value::Int(0));
    };

    if let Some(base) = base {
        let base = base.as_int().ok_or_else(|| {
            type_error("'base' must be an integer")
        })?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
        }
        let Some(text) = x.as_str() else {
            return Err(type_error("int() can't convert non-string with explicit base"));
        };
        return parse_int(text, base as u32)
            .map(Value::Int)
            .ok_or_else(|| {
                value_error(format!(
                    "invalid literal for int() with base {}: {}",
                    base,
                    str_repr(text)
                ))
            });
    }

    match &x {
        Value::Int(i) => return Ok(Value::Int(*i)),
        Value::Bool(v) => return Ok(Value::Int(*v as i64)),
        Value::Float(f) => return float_to_int(*f).map(Value::Int),
        Value::Object(o) => match &o.data {
            ObjectData::Str(text) => {
                return parse_int(text, 10).map(Value::Int).ok_or_else(|| {
                    value_error(format!(
                        "invalid literal for int() with base 10: {}",
                        str_repr(text)
                    ))
                });
            }
            ObjectData::Bytes(raw) => {
                let text = String::from_utf8_lossy(raw).into_owned();
                return parse_int(&text, 10).map(Value::Int).ok_or_else(|| {
                    value_error(format!(
                        "invalid literal for int() with base 10: {}",
                        super::super::utils::bytes_repr(raw)
                    ))
                });
            }
            _ => {}
        },
        _ => {}
    }

    for hook in ["__int__", "__index__"] {
        if let Some(r) = vm.call_special(&x, hook, Vec::new())? {
            return match r {
                Value::Int(_) => Ok(r),
                Value::Bool(v) => Ok(Value::Int(v as i64)),
                other => Err(type_error(format!(
                    "{} returned non-int (type {})",
                    hook,
                    vm.type_name(&other)
                ))),
            };
        }
    }
    Err(type_error(format!(
        "int() argument must be a string, a bytes-like object or a number, not '{}'",
        vm.type_name(&x)
    )))
}

pub(crate) fn float_to_int(f: f64) -> VmResult<i64> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(overflow_error("cannot convert float infinity to integer"));
    }
    let t = f.trunc();
    if t >= -9.223_372_036_854_775_808e18 && t < 9.223_372_036_854_775_808e18 {
        Ok(t as i64)
    } else {
        Err(overflow())
    }
}

// ========== bool ==========

const BOOL_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", bool_new, &[("cls", P), ("x", P)]).with_optional(&["x"]),
    MethodDef::method("__repr__", bool_repr, SELF),
    MethodDef::method("__and__", bool_and, SELF_OTHER),
    MethodDef::method("__rand__", bool_rand, SELF_OTHER),
    MethodDef::method("__xor__", bool_xor, SELF_OTHER),
    MethodDef::method("__rxor__", bool_rxor, SELF_OTHER),
    MethodDef::method("__or__", bool_or, SELF_OTHER),
    MethodDef::method("__ror__", bool_ror, SELF_OTHER),
];

fn bool_of(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// 양쪽이 bool이면 bool, 아니면 int 연산
fn bool_bitwise(op: BinOp, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Some(x), Some(y)) = (bool_of(a), bool_of(b)) {
        return Ok(Value::Bool(match op {
            BinOp::And => x & y,
            BinOp::Xor => x ^ y,
            _ => x | y,
        }));
    }
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => int_arith(op, x, y),
        _ => Ok(Value::NotImplemented),
    }
}

binary_methods! {
    Some, Some, |op, x: &Value, y: &Value| bool_bitwise(op, x, y);
    bool_and, bool_rand => BinOp::And;
    bool_xor, bool_rxor => BinOp::Xor;
    bool_or, bool_ror => BinOp::Or;
}

fn bool_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.optional("x") {
        None => Ok(Value::Bool(false)),
        Some(x) => {
            let x = x.clone();
            Ok(Value::Bool(vm.is_true(&x)?))
        }
    }
}

fn bool_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let v = b.get("self")?;
    match bool_of(v) {
        Some(true) => Ok(Value::str("True")),
        Some(false) => Ok(Value::str("False")),
        None => Err(super::descriptor_error("__repr__", "bool", v)),
    }
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.int, INT_METHODS)?;
    install_methods(&types.bool_, BOOL_METHODS)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_semantics() {
        assert_eq!(floor_div(7, 2).unwrap(), 3);
        assert_eq!(floor_div(-7, 2).unwrap(), -4);
        assert_eq!(floor_div(7, -2).unwrap(), -4);
        assert_eq!(floor_mod(-7, 2).unwrap(), 1);
        assert_eq!(floor_mod(7, -2).unwrap(), -1);
        assert!(floor_div(1, 0).is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(int_arith(BinOp::Add, i64::MAX, 1).is_err());
        assert!(int_arith(BinOp::Pow, 10, 40).is_err());
        assert!(int_arith(BinOp::LShift, 1, 64).is_err());
        assert_eq!(int_arith(BinOp::LShift, 0, 100).unwrap(), Value::Int(0));
        assert_eq!(int_arith(BinOp::RShift, -5, 100).unwrap(), Value::Int(-1));
    }

    #[test]
    fn test_negative_pow_is_float() {
        assert_eq!(int_arith(BinOp::Pow, 2, -1).unwrap(), Value::Float(0.5));
        assert!(int_arith(BinOp::Pow, 0, -1).is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-1_000", 10), Some(-1000));
        assert_eq!(parse_int("ff", 16), Some(255));
        assert_eq!(parse_int("0x_ff", 0), Some(255));
        assert_eq!(parse_int("0b101", 0), Some(5));
        assert_eq!(parse_int("010", 0), None);
        assert_eq!(parse_int("12a", 10), None);
        assert_eq!(parse_int("", 10), None);
        assert_eq!(parse_int("1__0", 10), None);
    }

    #[test]
    fn test_round_int_ties_to_even() {
        assert_eq!(round_int(1250, -2).unwrap(), 1200);
        assert_eq!(round_int(1350, -2).unwrap(), 1400);
        assert_eq!(round_int(-1251, -2).unwrap(), -1300);
        assert_eq!(round_int(5, 2).unwrap(), 5);
    }
}
