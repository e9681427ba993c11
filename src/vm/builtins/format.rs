//! 포맷 미니 언어
//!
//! `[[fill]align][sign][#][0][width][,|_][.precision][type]`
//!
//! FORMAT_VALUE, `format()`, `str.format`, `%` 연산자가 모두 여기를 거칩니다.

use super::super::exception::{ExcKind, index_error, pending, value_error};
use super::super::machine::Vm;
use super::super::utils::float_repr;
use super::super::value::Value;
use super::super::VmResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
    /// 부호 뒤, 숫자 앞에 채움 (`=`)
    AfterSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Minus,
    Plus,
    Space,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<Align>,
    pub sign: Sign,
    pub alternate: bool,
    pub width: Option<usize>,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: Sign::Minus,
            alternate: false,
            width: None,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

fn read_number(chars: &[char], pos: &mut usize) -> Option<usize> {
    let start = *pos;
    while *pos < chars.len() && chars[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == start {
        return None;
    }
    chars[start..*pos].iter().collect::<String>().parse().ok()
}

impl FormatSpec {
    pub fn parse(spec: &str) -> VmResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut pos = 0;

        if chars.len() >= 2 && let Some(align) = align_of(chars[1]) {
            out.fill = chars[0];
            out.align = Some(align);
            pos = 2;
        } else if let Some(align) = chars.first().copied().and_then(align_of) {
            out.align = Some(align);
            pos = 1;
        }

        match chars.get(pos) {
            Some('+') => {
                out.sign = Sign::Plus;
                pos += 1;
            }
            Some('-') => pos += 1,
            Some(' ') => {
                out.sign = Sign::Space;
                pos += 1;
            }
            _ => {}
        }
        if chars.get(pos) == Some(&'#') {
            out.alternate = true;
            pos += 1;
        }
        if chars.get(pos) == Some(&'0') {
            if out.align.is_none() {
                out.fill = '0';
                out.align = Some(Align::AfterSign);
            }
            pos += 1;
        }
        out.width = read_number(&chars, &mut pos);
        if let Some(&c @ (',' | '_')) = chars.get(pos) {
            out.grouping = Some(c);
            pos += 1;
        }
        if chars.get(pos) == Some(&'.') {
            pos += 1;
            out.precision = Some(
                read_number(&chars, &mut pos)
                    .ok_or_else(|| value_error("Format specifier missing precision"))?,
            );
        }
        match chars.len() - pos {
            0 => {}
            1 => out.ty = Some(chars[pos]),
            _ => return Err(value_error("Invalid format specifier")),
        }
        Ok(out)
    }

    fn sign_prefix(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Sign::Plus) => "+",
            (false, Sign::Space) => " ",
            (false, Sign::Minus) => "",
        }
    }

    /// 너비에 맞게 채움. `prefix`는 부호와 `0x` 같은 접두사
    fn pad(&self, prefix: &str, body: &str, default: Align) -> String {
        let len = prefix.chars().count() + body.chars().count();
        let width = self.width.unwrap_or(0);
        if width <= len {
            return format!("{}{}", prefix, body);
        }
        let n = width - len;
        let fill = |k: usize| self.fill.to_string().repeat(k);
        match self.align.unwrap_or(default) {
            Align::Left => format!("{}{}{}", prefix, body, fill(n)),
            Align::Right => format!("{}{}{}", fill(n), prefix, body),
            Align::Center => format!("{}{}{}{}", fill(n / 2), prefix, body, fill(n - n / 2)),
            Align::AfterSign => format!("{}{}{}", prefix, fill(n), body),
        }
    }
}

fn unknown_code(code: char, type_name: &str) -> crate::vm::VmError {
    value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        code, type_name
    ))
}

/// 정수 부분에 자릿수 구분자 삽입
fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

// ========== int ==========

pub fn format_int(value: i64, spec: &FormatSpec) -> VmResult<String> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(value as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(value_error("Precision not allowed in integer format specifier"));
    }
    let magnitude = value.unsigned_abs();
    let (digits, alt_prefix) = match ty {
        'd' | 'n' => (magnitude.to_string(), ""),
        'b' => (format!("{:b}", magnitude), "0b"),
        'o' => (format!("{:o}", magnitude), "0o"),
        'x' => (format!("{:x}", magnitude), "0x"),
        'X' => (format!("{:X}", magnitude), "0X"),
        'c' => {
            let c = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| pending(ExcKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(spec.pad("", &c.to_string(), Align::Left));
        }
        other => return Err(unknown_code(other, "int")),
    };
    let digits = match spec.grouping {
        Some(',') if ty != 'd' && ty != 'n' => {
            return Err(value_error(format!("Cannot specify ',' with '{}'.", ty)));
        }
        Some(sep) => group_digits(&digits, sep, if ty == 'd' || ty == 'n' { 3 } else { 4 }),
        None => digits,
    };
    let mut prefix = spec.sign_prefix(value < 0).to_string();
    if spec.alternate {
        prefix.push_str(alt_prefix);
    }
    Ok(spec.pad(&prefix, &digits, Align::Right))
}

// ========== float ==========

/// `{:e}` 결과를 파이썬 지수 표기(`e+05`)로
fn exponent_form(mantissa: &str, exp: i32, upper: bool) -> String {
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn split_exp(s: &str) -> (String, i32) {
    match s.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse().unwrap_or(0)),
        None => (s.to_string(), 0),
    }
}

fn strip_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn scientific(x: f64, precision: usize, upper: bool) -> String {
    let (mantissa, exp) = split_exp(&format!("{:.*e}", precision, x));
    exponent_form(&mantissa, exp, upper)
}

/// `g` 표기: 유효 숫자 `precision`개, 지수가 범위를 벗어나면 과학 표기
fn general(x: f64, precision: usize, alternate: bool, upper: bool) -> (String, bool) {
    let p = precision.max(1);
    let exp = if x == 0.0 {
        0
    } else {
        split_exp(&format!("{:.*e}", p - 1, x)).1
    };
    if -4 <= exp && exp < p as i32 {
        let s = format!("{:.*}", (p as i32 - 1 - exp) as usize, x);
        (if alternate { s } else { strip_zeros(&s) }, false)
    } else {
        let (mantissa, exp) = split_exp(&format!("{:.*e}", p - 1, x));
        let mantissa = if alternate { mantissa } else { strip_zeros(&mantissa) };
        (exponent_form(&mantissa, exp, upper), true)
    }
}

pub fn format_float(value: f64, spec: &FormatSpec) -> VmResult<String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let x = value.abs();
    let upper = matches!(spec.ty, Some('E' | 'F' | 'G'));

    let body = if !x.is_finite() {
        let s = if x.is_nan() { "nan" } else { "inf" };
        let s = if upper { s.to_uppercase() } else { s.to_string() };
        if spec.ty == Some('%') { format!("{}%", s) } else { s }
    } else {
        match spec.ty {
            None => match spec.precision {
                None => float_repr(x),
                Some(p) => {
                    let (s, sci) = general(x, p, spec.alternate, false);
                    if sci || s.contains('.') { s } else { format!("{}.0", s) }
                }
            },
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), x),
            Some('e' | 'E') => scientific(x, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(x, spec.precision.unwrap_or(6), spec.alternate, upper).0,
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), x * 100.0),
            Some(other) => return Err(unknown_code(other, "float")),
        }
    };

    let body = match spec.grouping {
        Some(sep) if x.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            let (int_part, rest) = body.split_at(split);
            format!("{}{}", group_digits(int_part, sep, 3), rest)
        }
        _ => body,
    };
    Ok(spec.pad(spec.sign_prefix(negative), &body, Align::Right))
}

// ========== str ==========

pub fn format_str(value: &str, spec: &FormatSpec) -> VmResult<String> {
    match spec.ty {
        None | Some('s') => {}
        Some(other) => return Err(unknown_code(other, "str")),
    }
    if spec.sign != Sign::Minus {
        return Err(value_error("Sign not allowed in string format specifier"));
    }
    if spec.alternate {
        return Err(value_error("Alternate form (#) not allowed in string format specifier"));
    }
    if spec.align == Some(Align::AfterSign) {
        return Err(value_error("'=' alignment not allowed in string format specifier"));
    }
    let body: String = match spec.precision {
        Some(p) => value.chars().take(p).collect(),
        None => value.to_string(),
    };
    Ok(spec.pad("", &body, Align::Left))
}

// ========== str.format ==========

/// `str.format(*args, **kwargs)`의 치환 필드 처리
pub fn format_template(
    vm: &mut Vm,
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> VmResult<String> {
    let mut auto_index = 0usize;
    let mut manual = false;
    render_template(vm, template, args, kwargs, &mut auto_index, &mut manual, 0)
}

fn render_template(
    vm: &mut Vm,
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    manual: &mut bool,
    depth: usize,
) -> VmResult<String> {
    if depth > 2 {
        return Err(value_error("Max string recursion exceeded"));
    }
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => return Err(value_error("Single '}' encountered in format string")),
            '{' => {
                // 짝이 맞는 '}' 찾기 (포맷 스펙 안의 중첩 필드 허용)
                let mut level = 1;
                let mut j = i + 1;
                while j < chars.len() {
                    match chars[j] {
                        '{' => level += 1,
                        '}' => {
                            level -= 1;
                            if level == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(value_error("expected '}' before end of string"));
                }
                let field: String = chars[i + 1..j].iter().collect();
                let text = render_field(vm, &field, args, kwargs, auto_index, manual, depth)?;
                out.push_str(&text);
                i = j + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn render_field(
    vm: &mut Vm,
    field: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    manual: &mut bool,
    depth: usize,
) -> VmResult<String> {
    // 이름 부분은 '!' 또는 ':' 전까지 ([] 안은 제외)
    let mut bracket = false;
    let mut end = field.len();
    for (pos, c) in field.char_indices() {
        match c {
            '[' => bracket = true,
            ']' => bracket = false,
            '!' | ':' if !bracket => {
                end = pos;
                break;
            }
            _ => {}
        }
    }
    let (name, rest) = field.split_at(end);
    let (conversion, spec) = match rest.strip_prefix('!') {
        Some(r) => {
            let mut cs = r.chars();
            let conv = cs.next();
            let after: String = cs.collect();
            match after.strip_prefix(':') {
                Some(s) => (conv, s.to_string()),
                None if after.is_empty() => (conv, String::new()),
                None => {
                    return Err(value_error("expected ':' after conversion specifier"));
                }
            }
        }
        None => (None, rest.strip_prefix(':').unwrap_or("").to_string()),
    };

    let mut value = lookup_field(vm, name, args, kwargs, auto_index, manual)?;
    value = match conversion {
        None => value,
        Some('r' | 'a') => Value::str(vm.repr(&value)?),
        Some('s') => Value::str(vm.to_str(&value)?),
        Some(c) => {
            return Err(value_error(format!(
                "Unknown conversion specifier {}",
                c
            )));
        }
    };
    let spec = if spec.contains('{') {
        render_template(vm, &spec, args, kwargs, auto_index, manual, depth + 1)?
    } else {
        spec
    };
    vm.format(&value, &spec)
}

fn lookup_field(
    vm: &mut Vm,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    auto_index: &mut usize,
    manual: &mut bool,
) -> VmResult<Value> {
    let first_end = name.find(['.', '[']).unwrap_or(name.len());
    let (head, mut accessors) = name.split_at(first_end);

    let mut value = if head.is_empty() {
        if *manual {
            return Err(value_error(
                "cannot switch from manual field specification to automatic field numbering",
            ));
        }
        let idx = *auto_index;
        *auto_index += 1;
        positional(args, idx)?
    } else if let Ok(idx) = head.parse::<usize>() {
        if *auto_index > 0 {
            return Err(value_error(
                "cannot switch from automatic field numbering to manual field specification",
            ));
        }
        *manual = true;
        positional(args, idx)?
    } else {
        match kwargs.iter().find(|(k, _)| k == head) {
            Some((_, v)) => v.clone(),
            None => {
                let key = Value::str(head);
                return Err(crate::vm::VmError::Raised(
                    vm.new_exception(ExcKind::KeyError, vec![key]),
                ));
            }
        }
    };

    while !accessors.is_empty() {
        if let Some(rest) = accessors.strip_prefix('.') {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            value = vm.get_attribute(&value, &rest[..end])?;
            accessors = &rest[end..];
        } else if let Some(rest) = accessors.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| value_error("Missing ']' in format string"))?;
            let key_text = &rest[..end];
            let key = match key_text.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::str(key_text),
            };
            value = vm.getitem(&value, &key)?;
            accessors = &rest[end + 1..];
        } else {
            return Err(value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }
    Ok(value)
}

fn positional(args: &[Value], idx: usize) -> VmResult<Value> {
    args.get(idx).cloned().ok_or_else(|| {
        index_error(format!(
            "Replacement index {} out of range for positional args tuple",
            idx
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn int(v: i64, spec: &str) -> String {
        format_int(v, &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    fn float(v: f64, spec: &str) -> String {
        format_float(v, &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let spec = FormatSpec::parse("*^+#012,.3f").unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some(Align::Center));
        assert_eq!(spec.sign, Sign::Plus);
        assert!(spec.alternate);
        assert_eq!(spec.width, Some(12));
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.ty, Some('f'));
        assert!(FormatSpec::parse(".f").is_err());
        assert!(FormatSpec::parse("dd").is_err());
    }

    #[test]
    fn test_int_formats() {
        assert_eq!(int(42, ""), "42");
        assert_eq!(int(42, "5"), "   42");
        assert_eq!(int(42, "<5"), "42   ");
        assert_eq!(int(-42, "05"), "-0042");
        assert_eq!(int(255, "#x"), "0xff");
        assert_eq!(int(5, "b"), "101");
        assert_eq!(int(1234567, ","), "1,234,567");
        assert_eq!(int(7, "+"), "+7");
        assert_eq!(int(3, ".2f"), "3.00");
        assert!(format_int(1, &FormatSpec::parse("s").unwrap()).is_err());
    }

    #[test]
    fn test_float_formats() {
        assert_eq!(float(3.14159, ".2f"), "3.14");
        assert_eq!(float(2.5, ""), "2.5");
        assert_eq!(float(1.0, ".3"), "1.0");
        assert_eq!(float(1234.5, ".3"), "1.23e+03");
        assert_eq!(float(12345.678, "e"), "1.234568e+04");
        assert_eq!(float(0.0001234, "g"), "0.0001234");
        assert_eq!(float(123456789.0, "g"), "1.23457e+08");
        assert_eq!(float(0.25, ".1%"), "25.0%");
        assert_eq!(float(-1.5, "8.2f"), "   -1.50");
        assert_eq!(float(1234567.891, ",.2f"), "1,234,567.89");
    }

    #[test]
    fn test_str_formats() {
        let f = |v: &str, spec: &str| format_str(v, &FormatSpec::parse(spec).unwrap()).unwrap();
        assert_eq!(f("ab", "5"), "ab   ");
        assert_eq!(f("ab", ">5"), "   ab");
        assert_eq!(f("ab", "-^6"), "--ab--");
        assert_eq!(f("abcdef", ".3"), "abc");
        assert!(format_str("x", &FormatSpec::parse("+").unwrap()).is_err());
    }
}
