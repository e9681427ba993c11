//! float
//!
//! 정수 피연산자는 f64로 올려서 계산합니다. `int.__add__`가 float를 만나면
//! NotImplemented를 돌려주므로 `1 + 2.0`은 `float.__radd__`로 옵니다.

use super::super::exception::{ExcKind, pending, type_error, value_error, zero_division};
use super::super::machine::{BinOp, Vm};
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::utils::{expect_str, float_repr, str_repr, type_name};
use super::super::value::{ObjectData, Value};
use super::super::VmResult;
use super::format::{FormatSpec, format_float};
use super::int::float_to_int;
use super::{P, SELF, SELF_OTHER, fix_hash, hash_bytes};

// ========== 산술 코어 ==========

fn float_of(v: &Value) -> Option<f64> {
    match v {
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// 몫과 나머지. 나머지 부호는 제수를 따른다
pub(crate) fn float_divmod(a: f64, b: f64) -> VmResult<(f64, f64)> {
    if b == 0.0 {
        return Err(zero_division("float divmod()"));
    }
    let mut m = a % b;
    let mut div = (a - m) / b;
    if m != 0.0 {
        if (b < 0.0) != (m < 0.0) {
            m += b;
            div -= 1.0;
        }
    } else {
        m = 0.0f64.copysign(b);
    }
    let floordiv = if div != 0.0 {
        let f = div.floor();
        if div - f > 0.5 { f + 1.0 } else { f }
    } else {
        0.0f64.copysign(a / b)
    };
    Ok((floordiv, m))
}

pub(crate) fn float_arith(op: BinOp, a: f64, b: f64) -> VmResult<Value> {
    let r = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => float_divmod(a, b)?.0,
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            float_divmod(a, b)?.1
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
                return Err(value_error("negative number cannot be raised to a fractional power"));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(pending(ExcKind::OverflowError, "(34, 'Numerical result out of range')"));
            }
            r
        }
        _ => return Ok(Value::NotImplemented),
    };
    Ok(Value::Float(r))
}

/// 해시: 정수값이면 같은 int와 같은 해시
fn float_hash_value(f: f64) -> i64 {
    if f.is_nan() {
        return 0;
    }
    if f.is_infinite() {
        return if f > 0.0 { 314159 } else { -314159 };
    }
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return fix_hash(f as i64);
    }
    hash_bytes(&f.to_bits().to_le_bytes())
}

/// 소수점 `ndigits`자리 반올림. 동률은 짝수 쪽
fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    if ndigits > 22 {
        return x;
    }
    if ndigits < -22 {
        return 0.0f64.copysign(x);
    }
    if ndigits >= 0 {
        // 십진 전개가 정확한 포맷팅으로 한 번만 반올림한다
        return format!("{:.*}", ndigits as usize, x).parse().unwrap_or(x);
    }
    let scale = 10f64.powi(ndigits.unsigned_abs() as i32);
    (x / scale).round_ties_even() * scale
}

// ========== 문자열 → float ==========

pub(crate) fn parse_float(text: &str) -> Option<f64> {
    let s = text.trim();
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    let lower = s.to_ascii_lowercase();
    let (sign, body) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lower.strip_prefix('+').unwrap_or(lower.as_str())),
    };
    match body {
        "inf" | "infinity" => return Some(sign * f64::INFINITY),
        "nan" => return Some(f64::NAN),
        _ => {}
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | '+' | '-' | '_'))
    {
        return None;
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().ok().map(|f| sign * f)
}

// ========== float 메서드 ==========

const FLOAT_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", float_new, &[("cls", P), ("x", P)]).with_optional(&["x"]),
    MethodDef::method("__add__", float_add, SELF_OTHER),
    MethodDef::method("__radd__", float_radd, SELF_OTHER),
    MethodDef::method("__sub__", float_sub, SELF_OTHER),
    MethodDef::method("__rsub__", float_rsub, SELF_OTHER),
    MethodDef::method("__mul__", float_mul, SELF_OTHER),
    MethodDef::method("__rmul__", float_rmul, SELF_OTHER),
    MethodDef::method("__truediv__", float_truediv, SELF_OTHER),
    MethodDef::method("__rtruediv__", float_rtruediv, SELF_OTHER),
    MethodDef::method("__floordiv__", float_floordiv, SELF_OTHER),
    MethodDef::method("__rfloordiv__", float_rfloordiv, SELF_OTHER),
    MethodDef::method("__mod__", float_mod, SELF_OTHER),
    MethodDef::method("__rmod__", float_rmod, SELF_OTHER),
    MethodDef::method("__pow__", float_pow, SELF_OTHER),
    MethodDef::method("__rpow__", float_rpow, SELF_OTHER),
    MethodDef::method("__divmod__", float_divmod_method, SELF_OTHER),
    MethodDef::method("__rdivmod__", float_rdivmod, SELF_OTHER),
    MethodDef::method("__eq__", float_eq, SELF_OTHER),
    MethodDef::method("__ne__", float_ne, SELF_OTHER),
    MethodDef::method("__lt__", float_lt, SELF_OTHER),
    MethodDef::method("__le__", float_le, SELF_OTHER),
    MethodDef::method("__gt__", float_gt, SELF_OTHER),
    MethodDef::method("__ge__", float_ge, SELF_OTHER),
    MethodDef::method("__neg__", float_neg, SELF),
    MethodDef::method("__pos__", float_pos, SELF),
    MethodDef::method("__abs__", float_abs, SELF),
    MethodDef::method("__bool__", float_bool, SELF),
    MethodDef::method("__int__", float_int, SELF),
    MethodDef::method("__float__", float_pos, SELF),
    MethodDef::method("__hash__", float_hash, SELF),
    MethodDef::method("__repr__", float_repr_method, SELF),
    MethodDef::method("__format__", float_format, &[("self", P), ("format_spec", P)]),
    MethodDef::method("__round__", float_round, &[("self", P), ("ndigits", P)])
        .with_optional(&["ndigits"]),
    MethodDef::method("is_integer", float_is_integer, SELF),
];

binary_methods! {
    float_of, Value::as_float, float_arith;
    float_add, float_radd => BinOp::Add;
    float_sub, float_rsub => BinOp::Sub;
    float_mul, float_rmul => BinOp::Mul;
    float_truediv, float_rtruediv => BinOp::TrueDiv;
    float_floordiv, float_rfloordiv => BinOp::FloorDiv;
    float_mod, float_rmod => BinOp::Mod;
    float_pow, float_rpow => BinOp::Pow;
}

compare_methods! {
    float_of, Value::as_float;
    float_eq => PartialEq::eq;
    float_ne => PartialEq::ne;
    float_lt => PartialOrd::lt;
    float_le => PartialOrd::le;
    float_gt => PartialOrd::gt;
    float_ge => PartialOrd::ge;
}

fn divmod_pair(a: f64, b: f64) -> VmResult<Value> {
    let (q, r) = float_divmod(a, b)?;
    Ok(Value::tuple(vec![Value::Float(q), Value::Float(r)]))
}

fn float_divmod_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match (float_of(b.get("self")?), b.get("other")?.as_float()) {
        (Some(x), Some(y)) => divmod_pair(x, y),
        _ => Ok(Value::NotImplemented),
    }
}

fn float_rdivmod(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match (float_of(b.get("self")?), b.get("other")?.as_float()) {
        (Some(x), Some(y)) => divmod_pair(y, x),
        _ => Ok(Value::NotImplemented),
    }
}

fn this(b: &Bindings) -> VmResult<f64> {
    let v = b.get("self")?;
    float_of(v).ok_or_else(|| super::descriptor_error("__float__", "float", v))
}

fn float_neg(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Float(-this(&b)?))
}

fn float_pos(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Float(this(&b)?))
}

fn float_abs(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Float(this(&b)?.abs()))
}

fn float_bool(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Bool(this(&b)? != 0.0))
}

fn float_int(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    float_to_int(this(&b)?).map(Value::Int)
}

fn float_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(float_hash_value(this(&b)?)))
}

fn float_repr_method(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(float_repr(this(&b)?)))
}

fn float_format(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = this(&b)?;
    let spec = expect_str(b.get("format_spec")?, "format spec")?;
    if spec.is_empty() {
        return Ok(Value::str(float_repr(x)));
    }
    let spec = FormatSpec::parse(spec)?;
    Ok(Value::str(format_float(x, &spec)?))
}

fn float_round(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = this(&b)?;
    match b.optional_not_none("ndigits") {
        None => float_to_int(x.round_ties_even()).map(Value::Int),
        Some(n) => {
            let n = n.as_int().ok_or_else(|| {
                type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    type_name(n)
                ))
            })?;
            Ok(Value::Float(round_float(x, n)))
        }
    }
}

fn float_is_integer(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let x = this(&b)?;
    Ok(Value::Bool(x.is_finite() && x.fract() == 0.0))
}

/// `float(x=0.0)`
fn float_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let Some(x) = b.optional("x").cloned() else {
        return Ok(Value::Float(0.0));
    };
    match &x {
        Value::Float(f) => return Ok(Value::Float(*f)),
        Value::Int(i) => return Ok(Value::Float(*i as f64)),
        Value::Bool(v) => return Ok(Value::Float(*v as i64 as f64)),
        Value::Object(o) => {
            if let ObjectData::Str(text) = &o.data {
                return parse_float(text).map(Value::Float).ok_or_else(|| {
                    value_error(format!(
                        "could not convert string to float: {}",
                        str_repr(text)
                    ))
                });
            }
        }
        _ => {}
    }
    for hook in ["__float__", "__index__"] {
        if let Some(r) = vm.call_special(&x, hook, Vec::new())? {
            return match r.as_float() {
                Some(f) => Ok(Value::Float(f)),
                None => Err(type_error(format!(
                    "{} returned non-float (type {})",
                    hook,
                    vm.type_name(&r)
                ))),
            };
        }
    }
    Err(type_error(format!(
        "float() argument must be a string or a number, not '{}'",
        vm.type_name(&x)
    )))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.float, FLOAT_METHODS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_floor_semantics() {
        assert_eq!(float_divmod(7.5, 2.0).unwrap(), (3.0, 1.5));
        assert_eq!(float_divmod(-7.5, 2.0).unwrap(), (-4.0, 0.5));
        assert_eq!(float_divmod(7.5, -2.0).unwrap(), (-4.0, -0.5));
        assert!(float_divmod(1.0, 0.0).is_err());
    }

    #[test]
    fn test_division_by_zero_messages() {
        match float_arith(BinOp::TrueDiv, 1.0, 0.0) {
            Err(crate::vm::VmError::Pending { message, .. }) => {
                assert_eq!(message, "float division by zero")
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(" 1.5 "), Some(1.5));
        assert_eq!(parse_float("-1_000.5"), Some(-1000.5));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("-Infinity"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float(""), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(0.125, 2), 0.12);
        assert_eq!(round_float(1234.5, -2), 1200.0);
        assert_eq!(round_float(0.375, 2), 0.38);
        assert_eq!(round_float(0.5, 0), 0.0);
        assert_eq!(round_float(1.005, 2), 1.0);
        assert!(round_float(-0.001, 2).is_sign_negative());
        assert_eq!(2.5f64.round_ties_even(), 2.0);
    }

    #[test]
    fn test_integral_float_hash_matches_int() {
        assert_eq!(float_hash_value(3.0), 3);
        assert_eq!(float_hash_value(-1.0), -2);
    }
}
