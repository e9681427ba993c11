//! Builtin 함수와 타입 메서드의 유닛 테스트
//!
//! 각 builtin의 성공/실패 케이스를 Vm을 통해 호출하여 테스트합니다.

use super::*;
use crate::config::InterpreterConfig;
use crate::runtime_io::BufferIo;
use crate::vm::exception::ExcKind;
use crate::vm::interpreter::Interpreter;
use crate::vm::machine::BinOp;
use pretty_assertions::assert_eq;

fn setup() -> (Vm, BufferIo) {
    let interp = Interpreter::new(InterpreterConfig::default()).unwrap();
    let io = BufferIo::new();
    let vm = interp.vm("test", Box::new(io.clone()));
    (vm, io)
}

fn builtin(vm: &Vm, name: &str) -> Value {
    vm.builtins()
        .get_attr(name)
        .unwrap_or_else(|| panic!("builtin '{}' missing", name))
}

fn call(vm: &mut Vm, name: &str, args: Vec<Value>) -> VmResult<Value> {
    let f = builtin(vm, name);
    vm.call(&f, args, Vec::new())
}

fn call_kw(vm: &mut Vm, name: &str, args: Vec<Value>, kwargs: Vec<(&str, Value)>) -> VmResult<Value> {
    let f = builtin(vm, name);
    let kwargs = kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    vm.call(&f, args, kwargs)
}

fn method(vm: &mut Vm, obj: &Value, name: &str, args: Vec<Value>) -> VmResult<Value> {
    vm.call_method(obj, name, args)
}

fn repr(vm: &mut Vm, v: &Value) -> String {
    vm.repr(v).unwrap()
}

fn s(text: &str) -> Value {
    Value::str(text)
}

fn ints(items: &[i64]) -> Value {
    Value::list(items.iter().map(|&i| Value::Int(i)).collect())
}

fn assert_raises(vm: &Vm, result: VmResult<Value>, kind: ExcKind) {
    match result {
        Ok(v) => panic!("expected {:?}, got {:?}", kind, v),
        Err(e) => assert!(vm.error_matches(&e, kind), "expected {:?}, got {}", kind, e),
    }
}

// ========== print / repr ==========

#[test]
fn test_print_sep_and_end() {
    let (mut vm, io) = setup();
    call_kw(
        &mut vm,
        "print",
        vec![s("a"), Value::Int(1), Value::None],
        vec![("sep", s(", ")), ("end", s("!\n"))],
    )
    .unwrap();
    call(&mut vm, "print", vec![]).unwrap();
    assert_eq!(io.get_output(), "a, 1, None!\n\n");
}

#[test]
fn test_print_rejects_non_string_sep() {
    let (mut vm, _io) = setup();
    let r = call_kw(&mut vm, "print", vec![s("a")], vec![("sep", Value::Int(1))]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_repr_of_containers() {
    let (mut vm, _io) = setup();
    let t = Value::tuple(vec![Value::Int(1)]);
    assert_eq!(repr(&mut vm, &t), "(1,)");
    let l = Value::list(vec![s("x"), Value::Float(2.0), Value::Bool(true), Value::None]);
    assert_eq!(repr(&mut vm, &l), "['x', 2.0, True, None]");
    let d = call(&mut vm, "dict", vec![]).unwrap();
    vm.setitem(&d, &s("k"), ints(&[1, 2])).unwrap();
    assert_eq!(repr(&mut vm, &d), "{'k': [1, 2]}");
    let empty = call(&mut vm, "set", vec![]).unwrap();
    assert_eq!(repr(&mut vm, &empty), "set()");
}

#[test]
fn test_recursive_list_repr() {
    let (mut vm, _io) = setup();
    let l = ints(&[1]);
    method(&mut vm, &l, "append", vec![l.clone()]).unwrap();
    assert_eq!(repr(&mut vm, &l), "[1, [...]]");
}

// ========== int / float ==========

#[test]
fn test_int_constructor() {
    let (mut vm, _io) = setup();
    assert_eq!(call(&mut vm, "int", vec![s(" -42 ")]).unwrap(), Value::Int(-42));
    assert_eq!(call(&mut vm, "int", vec![Value::Float(-3.9)]).unwrap(), Value::Int(-3));
    assert_eq!(call(&mut vm, "int", vec![Value::Bool(true)]).unwrap(), Value::Int(1));
    assert_eq!(call(&mut vm, "int", vec![s("ff"), Value::Int(16)]).unwrap(), Value::Int(255));
    let r = call(&mut vm, "int", vec![s("abc")]);
    assert_raises(&vm, r, ExcKind::ValueError);
}

#[test]
fn test_explicit_none_is_not_a_missing_argument() {
    let (mut vm, io) = setup();
    let r = call(&mut vm, "int", vec![Value::None]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = call(&mut vm, "float", vec![Value::None]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = call(&mut vm, "list", vec![Value::None]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = call(&mut vm, "int", vec![s("7"), Value::None]);
    assert_raises(&vm, r, ExcKind::TypeError);
    assert_eq!(call(&mut vm, "str", vec![Value::None]).unwrap(), s("None"));

    // None이 기본값을 뜻하는 인자
    let r = call(&mut vm, "round", vec![Value::Float(2.5), Value::None]).unwrap();
    assert_eq!(r, Value::Int(2));
    let words = method(&mut vm, &s("a b"), "split", vec![Value::None]).unwrap();
    assert_eq!(repr(&mut vm, &words), "['a', 'b']");
    assert_eq!(method(&mut vm, &s(" x "), "strip", vec![Value::None]).unwrap(), s("x"));
    let p = call(&mut vm, "pow", vec![Value::Int(2), Value::Int(3), Value::None]).unwrap();
    assert_eq!(p, Value::Int(8));
    let sorted = call_kw(&mut vm, "sorted", vec![ints(&[2, 1])], vec![("key", Value::None)]).unwrap();
    assert_eq!(sorted, ints(&[1, 2]));
    call_kw(&mut vm, "print", vec![s("a"), s("b")], vec![("sep", Value::None), ("end", Value::None)]).unwrap();
    assert_eq!(io.get_output(), "a b\n");
}

#[test]
fn test_floor_division_and_modulo() {
    let (mut vm, _io) = setup();
    let r = vm.binary_op(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
    assert_eq!(r, Value::Int(-4));
    let r = vm.binary_op(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap();
    assert_eq!(r, Value::Int(1));
    let r = vm.binary_op(BinOp::TrueDiv, &Value::Int(7), &Value::Int(2)).unwrap();
    assert_eq!(r, Value::Float(3.5));
    let r = vm.binary_op(BinOp::Mod, &Value::Int(1), &Value::Int(0));
    assert_raises(&vm, r, ExcKind::ZeroDivisionError);
}

#[test]
fn test_mixed_numeric_comparison() {
    let (mut vm, _io) = setup();
    assert!(vm.eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
    assert!(vm.eq(&Value::Bool(true), &Value::Int(1)).unwrap());
    let lt = vm.compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap();
    assert_eq!(lt, Value::Bool(true));
    let r = vm.compare(CompareOp::Lt, &Value::Int(1), &s("a"));
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_float_repr_and_str() {
    let (mut vm, _io) = setup();
    assert_eq!(repr(&mut vm, &Value::Float(0.1)), "0.1");
    assert_eq!(repr(&mut vm, &Value::Float(1e20)), "1e+20");
    assert_eq!(repr(&mut vm, &Value::Float(f64::INFINITY)), "inf");
    assert_eq!(call(&mut vm, "float", vec![s("2.5")]).unwrap(), Value::Float(2.5));
}

// ========== 수치 builtin ==========

#[test]
fn test_abs_divmod_pow_round() {
    let (mut vm, _io) = setup();
    assert_eq!(call(&mut vm, "abs", vec![Value::Int(-5)]).unwrap(), Value::Int(5));
    let dm = call(&mut vm, "divmod", vec![Value::Int(-7), Value::Int(2)]).unwrap();
    assert_eq!(repr(&mut vm, &dm), "(-4, 1)");
    let p = call(&mut vm, "pow", vec![Value::Int(2), Value::Int(10), Value::Int(1000)]).unwrap();
    assert_eq!(p, Value::Int(24));
    assert_eq!(call(&mut vm, "round", vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
    let r = call(&mut vm, "round", vec![Value::Float(3.14159), Value::Int(2)]).unwrap();
    assert_eq!(r, Value::Float(3.14));
    let r = call(&mut vm, "abs", vec![s("x")]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_radix_and_chr_ord() {
    let (mut vm, _io) = setup();
    assert_eq!(call(&mut vm, "hex", vec![Value::Int(255)]).unwrap(), s("0xff"));
    assert_eq!(call(&mut vm, "hex", vec![Value::Int(-255)]).unwrap(), s("-0xff"));
    assert_eq!(call(&mut vm, "bin", vec![Value::Int(5)]).unwrap(), s("0b101"));
    assert_eq!(call(&mut vm, "oct", vec![Value::Int(8)]).unwrap(), s("0o10"));
    assert_eq!(call(&mut vm, "chr", vec![Value::Int(0xAC00)]).unwrap(), s("가"));
    assert_eq!(call(&mut vm, "ord", vec![s("A")]).unwrap(), Value::Int(65));
    let r = call(&mut vm, "ord", vec![s("AB")]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = call(&mut vm, "chr", vec![Value::Int(-1)]);
    assert_raises(&vm, r, ExcKind::ValueError);
}

#[test]
fn test_min_max_sum() {
    let (mut vm, _io) = setup();
    let l = ints(&[3, 1, 2]);
    assert_eq!(call(&mut vm, "min", vec![l.clone()]).unwrap(), Value::Int(1));
    assert_eq!(call(&mut vm, "max", vec![Value::Int(4), Value::Int(9)]).unwrap(), Value::Int(9));
    assert_eq!(call(&mut vm, "sum", vec![l.clone()]).unwrap(), Value::Int(6));
    assert_eq!(
        call(&mut vm, "sum", vec![l, Value::Float(0.5)]).unwrap(),
        Value::Float(6.5)
    );

    let words = Value::list(vec![s("ccc"), s("a"), s("bb")]);
    let len = builtin(&vm, "len");
    let longest = call_kw(&mut vm, "max", vec![words], vec![("key", len)]).unwrap();
    assert_eq!(longest, s("ccc"));

    let empty = ints(&[]);
    let d = call_kw(&mut vm, "min", vec![empty.clone()], vec![("default", Value::None)]).unwrap();
    assert_eq!(d, Value::None);
    let r = call(&mut vm, "max", vec![empty]);
    assert_raises(&vm, r, ExcKind::ValueError);
    let r = call(&mut vm, "sum", vec![ints(&[]), s("")]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_sorted_and_reversed() {
    let (mut vm, _io) = setup();
    let l = ints(&[3, 1, 2]);
    let sorted = call_kw(&mut vm, "sorted", vec![l.clone()], vec![("reverse", Value::Bool(true))]).unwrap();
    assert_eq!(sorted, ints(&[3, 2, 1]));
    // 원본은 그대로
    assert_eq!(l, ints(&[3, 1, 2]));
    let rev = call(&mut vm, "reversed", vec![l]).unwrap();
    assert_eq!(vm.collect(&rev).unwrap(), vec![Value::Int(2), Value::Int(1), Value::Int(3)]);
    let r = call(&mut vm, "sorted", vec![Value::list(vec![Value::Int(1), s("a")])]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_any_all() {
    let (mut vm, _io) = setup();
    assert_eq!(call(&mut vm, "any", vec![ints(&[0, 0, 3])]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "all", vec![ints(&[1, 0])]).unwrap(), Value::Bool(false));
    assert_eq!(call(&mut vm, "all", vec![ints(&[])]).unwrap(), Value::Bool(true));
}

// ========== 타입 검사와 속성 ==========

#[test]
fn test_isinstance_and_issubclass() {
    let (mut vm, _io) = setup();
    let int = Value::Object(vm.types().int.clone());
    let str_ = Value::Object(vm.types().str_.clone());
    let object = Value::Object(vm.types().object.clone());
    let both = Value::tuple(vec![str_.clone(), Value::tuple(vec![int.clone()])]);
    assert_eq!(call(&mut vm, "isinstance", vec![Value::Bool(true), int.clone()]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "isinstance", vec![Value::Int(1), both]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "isinstance", vec![s("x"), int.clone()]).unwrap(), Value::Bool(false));
    assert_eq!(call(&mut vm, "issubclass", vec![int.clone(), object]).unwrap(), Value::Bool(true));
    let r = call(&mut vm, "isinstance", vec![Value::Int(1), Value::Int(2)]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = call(&mut vm, "issubclass", vec![Value::Int(1), int]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_getattr_default_only_swallows_attribute_error() {
    let (mut vm, _io) = setup();
    let v = call(&mut vm, "getattr", vec![Value::Int(1), s("nope"), s("dflt")]).unwrap();
    assert_eq!(v, s("dflt"));
    let r = call(&mut vm, "getattr", vec![Value::Int(1), s("nope")]);
    assert_raises(&vm, r, ExcKind::AttributeError);
    let r = call(&mut vm, "getattr", vec![Value::Int(1), Value::Int(2)]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let has = call(&mut vm, "hasattr", vec![s("x"), s("upper")]).unwrap();
    assert_eq!(has, Value::Bool(true));
}

#[test]
fn test_setattr_on_builtin_instance_fails() {
    let (mut vm, _io) = setup();
    let r = call(&mut vm, "setattr", vec![Value::Int(1), s("x"), Value::Int(2)]);
    assert_raises(&vm, r, ExcKind::AttributeError);
}

#[test]
fn test_callable() {
    let (mut vm, _io) = setup();
    let len = builtin(&vm, "len");
    let int = Value::Object(vm.types().int.clone());
    assert_eq!(call(&mut vm, "callable", vec![len]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "callable", vec![int]).unwrap(), Value::Bool(true));
    assert_eq!(call(&mut vm, "callable", vec![Value::Int(1)]).unwrap(), Value::Bool(false));
}

#[test]
fn test_hash_of_unhashable() {
    let (mut vm, _io) = setup();
    let r = call(&mut vm, "hash", vec![ints(&[1])]);
    assert_raises(&vm, r, ExcKind::TypeError);
    let a = call(&mut vm, "hash", vec![Value::Int(1)]).unwrap();
    let b = call(&mut vm, "hash", vec![Value::Float(1.0)]).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_next_with_default() {
    let (mut vm, _io) = setup();
    let it = call(&mut vm, "iter", vec![ints(&[7])]).unwrap();
    assert_eq!(call(&mut vm, "next", vec![it.clone()]).unwrap(), Value::Int(7));
    assert_eq!(call(&mut vm, "next", vec![it.clone(), Value::None]).unwrap(), Value::None);
    let r = call(&mut vm, "next", vec![it]);
    assert_raises(&vm, r, ExcKind::StopIteration);
    let r = call(&mut vm, "next", vec![ints(&[1])]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

// ========== str ==========

#[test]
fn test_str_methods() {
    let (mut vm, _io) = setup();
    let text = s("  a,b,,c  ");
    let stripped = method(&mut vm, &text, "strip", vec![]).unwrap();
    assert_eq!(stripped, s("a,b,,c"));
    let parts = method(&mut vm, &stripped, "split", vec![s(",")]).unwrap();
    assert_eq!(repr(&mut vm, &parts), "['a', 'b', '', 'c']");
    let words = method(&mut vm, &s(" x  y\tz "), "split", vec![]).unwrap();
    assert_eq!(repr(&mut vm, &words), "['x', 'y', 'z']");
    let joined = method(&mut vm, &s("-"), "join", vec![parts]).unwrap();
    assert_eq!(joined, s("a-b--c"));
    assert_eq!(method(&mut vm, &s("abc"), "upper", vec![]).unwrap(), s("ABC"));
    assert_eq!(
        method(&mut vm, &s("aaa"), "replace", vec![s("a"), s("b"), Value::Int(2)]).unwrap(),
        s("bba")
    );
    assert_eq!(method(&mut vm, &s("héllo"), "find", vec![s("l")]).unwrap(), Value::Int(2));
    assert_eq!(method(&mut vm, &s("abc"), "find", vec![s("z")]).unwrap(), Value::Int(-1));
    assert_eq!(method(&mut vm, &s("banana"), "count", vec![s("an")]).unwrap(), Value::Int(2));
    let prefixes = Value::tuple(vec![s("x"), s("ba")]);
    assert_eq!(
        method(&mut vm, &s("banana"), "startswith", vec![prefixes]).unwrap(),
        Value::Bool(true)
    );
    let r = method(&mut vm, &s("abc"), "index", vec![s("z")]);
    assert_raises(&vm, r, ExcKind::ValueError);
    let r = method(&mut vm, &s("a"), "join", vec![ints(&[1])]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_str_indexing_and_slicing() {
    let (mut vm, _io) = setup();
    let text = s("héllo");
    assert_eq!(vm.getitem(&text, &Value::Int(1)).unwrap(), s("é"));
    assert_eq!(vm.getitem(&text, &Value::Int(-1)).unwrap(), s("o"));
    let slice = call(&mut vm, "slice", vec![Value::None, Value::None, Value::Int(-1)]).unwrap();
    assert_eq!(vm.getitem(&text, &slice).unwrap(), s("olléh"));
    let r = vm.getitem(&text, &Value::Int(5));
    assert_raises(&vm, r, ExcKind::IndexError);
    assert_eq!(vm.len(&text).unwrap(), 5);
}

#[test]
fn test_str_concat_and_repeat() {
    let (mut vm, _io) = setup();
    assert_eq!(vm.binary_op(BinOp::Add, &s("ab"), &s("c")).unwrap(), s("abc"));
    assert_eq!(vm.binary_op(BinOp::Mul, &s("ab"), &Value::Int(3)).unwrap(), s("ababab"));
    assert_eq!(vm.binary_op(BinOp::Mul, &Value::Int(2), &s("x")).unwrap(), s("xx"));
    let r = vm.binary_op(BinOp::Add, &s("a"), &Value::Int(1));
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_str_format_and_printf() {
    let (mut vm, _io) = setup();
    let f = method(
        &mut vm,
        &s("{} + {:>4} = {x:.2f}"),
        "format",
        vec![Value::Int(1), Value::Int(2)],
    );
    // 키워드 인자 x가 없으면 KeyError
    assert_raises(&vm, f, ExcKind::KeyError);

    let template = s("{} + {:>4} = {x:.2f}");
    let bound = vm.get_attribute(&template, "format").unwrap();
    let formatted = vm
        .call(
            &bound,
            vec![Value::Int(1), Value::Int(2)],
            vec![("x".to_string(), Value::Float(3.0))],
        )
        .unwrap();
    assert_eq!(formatted, s("1 +    2 = 3.00"));

    let args = Value::tuple(vec![s("a"), s("b"), Value::Float(2.34), Value::Int(255)]);
    let out = vm.binary_op(BinOp::Mod, &s("%s-%r|%6.1f|%x%%"), &args).unwrap();
    assert_eq!(out, s("a-'b'|   2.3|ff%"));
    let r = vm.binary_op(BinOp::Mod, &s("%d %d"), &Value::tuple(vec![Value::Int(1)]));
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_format_builtin() {
    let (mut vm, _io) = setup();
    let r = call(&mut vm, "format", vec![Value::Int(1234567), s(",")]).unwrap();
    assert_eq!(r, s("1,234,567"));
    let r = call(&mut vm, "format", vec![Value::Int(42), s("08b")]).unwrap();
    assert_eq!(r, s("00101010"));
    let r = call(&mut vm, "format", vec![s("ab"), s("*^6")]).unwrap();
    assert_eq!(r, s("**ab**"));
    let r = call(&mut vm, "format", vec![Value::Float(0.5), s("+.1%")]).unwrap();
    assert_eq!(r, s("+50.0%"));
    let r = call(&mut vm, "format", vec![s("ab"), s("d")]);
    assert_raises(&vm, r, ExcKind::ValueError);
}

#[test]
fn test_bytes_roundtrip_through_str() {
    let (mut vm, _io) = setup();
    let b = method(&mut vm, &s("한"), "encode", vec![]).unwrap();
    assert_eq!(repr(&mut vm, &b), "b'\\xed\\x95\\x9c'");
    assert_eq!(vm.len(&b).unwrap(), 3);
    assert_eq!(method(&mut vm, &b, "decode", vec![]).unwrap(), s("한"));
    let r = method(&mut vm, &s("x"), "encode", vec![s("latin-9")]);
    assert_raises(&vm, r, ExcKind::LookupError);
}

// ========== list / tuple ==========

#[test]
fn test_list_mutation() {
    let (mut vm, _io) = setup();
    let l = ints(&[1, 2, 3]);
    method(&mut vm, &l, "append", vec![Value::Int(4)]).unwrap();
    method(&mut vm, &l, "insert", vec![Value::Int(0), Value::Int(0)]).unwrap();
    assert_eq!(l, ints(&[0, 1, 2, 3, 4]));
    assert_eq!(method(&mut vm, &l, "pop", vec![]).unwrap(), Value::Int(4));
    assert_eq!(method(&mut vm, &l, "pop", vec![Value::Int(0)]).unwrap(), Value::Int(0));
    method(&mut vm, &l, "extend", vec![Value::tuple(vec![Value::Int(9)])]).unwrap();
    method(&mut vm, &l, "reverse", vec![]).unwrap();
    assert_eq!(l, ints(&[9, 3, 2, 1]));
    assert_eq!(method(&mut vm, &l, "index", vec![Value::Int(2)]).unwrap(), Value::Int(2));
    assert_eq!(method(&mut vm, &l, "count", vec![Value::Int(7)]).unwrap(), Value::Int(0));
    method(&mut vm, &l, "remove", vec![Value::Int(3)]).unwrap();
    assert_eq!(l, ints(&[9, 2, 1]));
    method(&mut vm, &l, "sort", vec![]).unwrap();
    assert_eq!(l, ints(&[1, 2, 9]));

    let r = method(&mut vm, &l, "remove", vec![Value::Int(42)]);
    assert_raises(&vm, r, ExcKind::ValueError);
    let empty = ints(&[]);
    let r = method(&mut vm, &empty, "pop", vec![]);
    assert_raises(&vm, r, ExcKind::IndexError);
}

#[test]
fn test_list_slice_assignment_and_delete() {
    let (mut vm, _io) = setup();
    let l = ints(&[0, 1, 2, 3, 4]);
    let slice = call(&mut vm, "slice", vec![Value::Int(1), Value::Int(3)]).unwrap();
    vm.setitem(&l, &slice, ints(&[7, 7, 7])).unwrap();
    assert_eq!(l, ints(&[0, 7, 7, 7, 3, 4]));
    let evens = call(&mut vm, "slice", vec![Value::None, Value::None, Value::Int(2)]).unwrap();
    vm.delitem(&l, &evens).unwrap();
    assert_eq!(l, ints(&[7, 7, 4]));
    let r = vm.setitem(&l, &evens, ints(&[1])).map(|_| Value::None);
    assert_raises(&vm, r, ExcKind::ValueError);
    vm.setitem(&l, &Value::Int(-1), Value::Int(5)).unwrap();
    assert_eq!(l, ints(&[7, 7, 5]));
    let r = vm.setitem(&l, &Value::Int(3), Value::Int(5)).map(|_| Value::None);
    assert_raises(&vm, r, ExcKind::IndexError);
}

#[test]
fn test_list_operators() {
    let (mut vm, _io) = setup();
    let a = ints(&[1, 2]);
    let sum = vm.binary_op(BinOp::Add, &a, &ints(&[3])).unwrap();
    assert_eq!(sum, ints(&[1, 2, 3]));
    let rep = vm.binary_op(BinOp::Mul, &a, &Value::Int(2)).unwrap();
    assert_eq!(rep, ints(&[1, 2, 1, 2]));
    let lt = vm.compare(CompareOp::Lt, &ints(&[1, 2]), &ints(&[1, 3])).unwrap();
    assert_eq!(lt, Value::Bool(true));
    assert!(vm.contains(&a, &Value::Float(2.0)).unwrap());
    // += 는 같은 리스트를 바꾼다
    let same = vm.inplace_op(BinOp::Add, &a, &Value::tuple(vec![Value::Int(5)])).unwrap();
    assert!(same.is(&a));
    assert_eq!(a, ints(&[1, 2, 5]));
    let same = vm.inplace_op(BinOp::Mul, &a, &Value::Int(2)).unwrap();
    assert!(same.is(&a));
    assert_eq!(a, ints(&[1, 2, 5, 1, 2, 5]));
}

#[test]
fn test_huge_repetition_is_memory_error() {
    let (mut vm, _io) = setup();
    let huge = Value::Int(i64::MAX / 2);
    let r = vm.binary_op(BinOp::Mul, &s("ab"), &huge);
    assert_raises(&vm, r, ExcKind::MemoryError);
    let r = vm.binary_op(BinOp::Mul, &ints(&[1, 2]), &huge);
    assert_raises(&vm, r, ExcKind::MemoryError);
    let r = vm.binary_op(BinOp::Mul, &Value::tuple(vec![Value::None]), &huge);
    assert_raises(&vm, r, ExcKind::MemoryError);
    let r = vm.binary_op(BinOp::Mul, &Value::bytes(b"x".to_vec()), &huge);
    assert_raises(&vm, r, ExcKind::MemoryError);
    // 빈 시퀀스는 몇 번을 반복해도 비어 있다
    assert_eq!(vm.binary_op(BinOp::Mul, &s(""), &huge).unwrap(), s(""));
}

#[test]
fn test_tuple_methods_and_hash() {
    let (mut vm, _io) = setup();
    let t = Value::tuple(vec![Value::Int(1), s("a"), Value::Int(1)]);
    assert_eq!(method(&mut vm, &t, "count", vec![Value::Int(1)]).unwrap(), Value::Int(2));
    assert_eq!(method(&mut vm, &t, "index", vec![s("a")]).unwrap(), Value::Int(1));
    let t2 = Value::tuple(vec![Value::Int(1), s("a"), Value::Int(1)]);
    assert_eq!(vm.hash(&t).unwrap(), vm.hash(&t2).unwrap());
    let with_list = Value::tuple(vec![ints(&[1])]);
    let r = vm.hash(&with_list).map(Value::Int);
    assert_raises(&vm, r, ExcKind::TypeError);
    let r = vm.binary_op(BinOp::Add, &t, &ints(&[1]));
    assert_raises(&vm, r, ExcKind::TypeError);
}

// ========== dict ==========

#[test]
fn test_dict_operations() {
    let (mut vm, _io) = setup();
    let d = call_kw(&mut vm, "dict", vec![], vec![("a", Value::Int(1)), ("b", Value::Int(2))]).unwrap();
    assert_eq!(vm.getitem(&d, &s("a")).unwrap(), Value::Int(1));
    // 1과 1.0, True는 같은 키
    vm.setitem(&d, &Value::Int(1), s("one")).unwrap();
    vm.setitem(&d, &Value::Float(1.0), s("uno")).unwrap();
    assert_eq!(vm.getitem(&d, &Value::Bool(true)).unwrap(), s("uno"));
    assert_eq!(vm.len(&d).unwrap(), 3);

    assert_eq!(method(&mut vm, &d, "get", vec![s("zz")]).unwrap(), Value::None);
    assert_eq!(
        method(&mut vm, &d, "setdefault", vec![s("c"), Value::Int(3)]).unwrap(),
        Value::Int(3)
    );
    assert_eq!(method(&mut vm, &d, "pop", vec![s("a")]).unwrap(), Value::Int(1));
    assert_eq!(method(&mut vm, &d, "pop", vec![s("a"), Value::None]).unwrap(), Value::None);
    let r = method(&mut vm, &d, "pop", vec![s("a")]);
    assert_raises(&vm, r, ExcKind::KeyError);

    let keys = method(&mut vm, &d, "keys", vec![]).unwrap();
    assert_eq!(repr(&mut vm, &keys), "dict_keys(['b', 1, 'c'])");
    let items = method(&mut vm, &d, "items", vec![]).unwrap();
    let first = vm.collect(&items).unwrap().remove(0);
    assert_eq!(repr(&mut vm, &first), "('b', 2)");

    let r = vm.getitem(&d, &s("missing"));
    assert_raises(&vm, r, ExcKind::KeyError);
    let r = vm.setitem(&d, &ints(&[1]), Value::None).map(|_| Value::None);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_dict_update_and_views_are_live() {
    let (mut vm, _io) = setup();
    let d = call(&mut vm, "dict", vec![]).unwrap();
    let values = method(&mut vm, &d, "values", vec![]).unwrap();
    let pairs = Value::list(vec![Value::tuple(vec![s("x"), Value::Int(1)])]);
    method(&mut vm, &d, "update", vec![pairs]).unwrap();
    assert_eq!(vm.len(&values).unwrap(), 1);
    assert!(vm.contains(&values, &Value::Int(1)).unwrap());
    let r = method(&mut vm, &d, "update", vec![ints(&[1])]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_key_error_str_uses_repr() {
    let (mut vm, _io) = setup();
    let exc = Value::Object(vm.new_exception(ExcKind::KeyError, vec![s("k")]));
    assert_eq!(vm.to_str(&exc).unwrap(), "'k'");
    assert_eq!(repr(&mut vm, &exc), "KeyError('k')");
}

// ========== set ==========

#[test]
fn test_set_algebra() {
    let (mut vm, _io) = setup();
    let a = call(&mut vm, "set", vec![ints(&[1, 2, 3])]).unwrap();
    let b = call(&mut vm, "set", vec![ints(&[2, 3, 4])]).unwrap();
    let union = vm.binary_op(BinOp::Or, &a, &b).unwrap();
    assert_eq!(repr(&mut vm, &union), "{1, 2, 3, 4}");
    let inter = vm.binary_op(BinOp::And, &a, &b).unwrap();
    assert_eq!(repr(&mut vm, &inter), "{2, 3}");
    let diff = vm.binary_op(BinOp::Sub, &a, &b).unwrap();
    assert_eq!(repr(&mut vm, &diff), "{1}");

    method(&mut vm, &a, "add", vec![Value::Int(9)]).unwrap();
    method(&mut vm, &a, "discard", vec![Value::Int(42)]).unwrap();
    method(&mut vm, &a, "remove", vec![Value::Int(1)]).unwrap();
    assert_eq!(vm.len(&a).unwrap(), 3);
    let r = method(&mut vm, &a, "remove", vec![Value::Int(1)]);
    assert_raises(&vm, r, ExcKind::KeyError);
    let r = method(&mut vm, &a, "add", vec![ints(&[])]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_frozenset_is_hashable() {
    let (mut vm, _io) = setup();
    let f = call(&mut vm, "frozenset", vec![ints(&[1, 2])]).unwrap();
    assert_eq!(repr(&mut vm, &f), "frozenset({1, 2})");
    assert!(vm.hash(&f).is_ok());
    let set = call(&mut vm, "set", vec![]).unwrap();
    let r = vm.hash(&set).map(Value::Int);
    assert_raises(&vm, r, ExcKind::TypeError);
    let same = call(&mut vm, "set", vec![ints(&[2, 1])]).unwrap();
    assert!(vm.eq(&f, &same).unwrap());
}

// ========== range / slice / 지연 반복자 ==========

#[test]
fn test_range_behaviour() {
    let (mut vm, _io) = setup();
    let r = call(&mut vm, "range", vec![Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap();
    assert_eq!(vm.len(&r).unwrap(), 4);
    assert_eq!(
        vm.collect(&r).unwrap(),
        vec![Value::Int(10), Value::Int(7), Value::Int(4), Value::Int(1)]
    );
    assert!(vm.contains(&r, &Value::Int(4)).unwrap());
    assert_eq!(vm.getitem(&r, &Value::Int(-1)).unwrap(), Value::Int(1));
    let half = call(&mut vm, "slice", vec![Value::None, Value::None, Value::Int(2)]).unwrap();
    let sub = vm.getitem(&r, &half).unwrap();
    assert_eq!(repr(&mut vm, &sub), "range(10, -2, -6)");
    let e = call(&mut vm, "range", vec![Value::Int(1), Value::Int(2), Value::Int(0)]);
    assert_raises(&vm, e, ExcKind::ValueError);
}

#[test]
fn test_slice_indices() {
    let (mut vm, _io) = setup();
    let sl = call(&mut vm, "slice", vec![Value::Int(-3), Value::None]).unwrap();
    assert_eq!(repr(&mut vm, &sl), "slice(-3, None, None)");
    let idx = method(&mut vm, &sl, "indices", vec![Value::Int(10)]).unwrap();
    assert_eq!(repr(&mut vm, &idx), "(7, 10, 1)");
    let single = call(&mut vm, "slice", vec![Value::Int(4)]).unwrap();
    assert_eq!(repr(&mut vm, &single), "slice(None, 4, None)");
}

#[test]
fn test_lazy_iterators() {
    let (mut vm, _io) = setup();
    let e = call_kw(&mut vm, "enumerate", vec![Value::list(vec![s("a"), s("b")])], vec![("start", Value::Int(1))]).unwrap();
    let pairs = Value::list(vm.collect(&e).unwrap());
    assert_eq!(repr(&mut vm, &pairs), "[(1, 'a'), (2, 'b')]");

    let z = call(&mut vm, "zip", vec![ints(&[1, 2, 3]), s("xy")]).unwrap();
    let zipped = Value::list(vm.collect(&z).unwrap());
    assert_eq!(repr(&mut vm, &zipped), "[(1, 'x'), (2, 'y')]");

    let str_ = Value::Object(vm.types().str_.clone());
    let m = call(&mut vm, "map", vec![str_, ints(&[1, 2])]).unwrap();
    assert_eq!(vm.collect(&m).unwrap(), vec![s("1"), s("2")]);

    let f = call(&mut vm, "filter", vec![Value::None, ints(&[0, 1, 0, 2])]).unwrap();
    assert_eq!(vm.collect(&f).unwrap(), vec![Value::Int(1), Value::Int(2)]);
}

// ========== 예외 객체 ==========

#[test]
fn test_exception_args_str_repr() {
    let (mut vm, _io) = setup();
    let value_error = Value::Object(vm.types().exception(ExcKind::ValueError).clone());
    let e = vm.call(&value_error, vec![s("bad"), Value::Int(3)], vec![]).unwrap();
    assert_eq!(vm.to_str(&e).unwrap(), "('bad', 3)");
    assert_eq!(repr(&mut vm, &e), "ValueError('bad', 3)");
    let args = vm.get_attribute(&e, "args").unwrap();
    assert_eq!(repr(&mut vm, &args), "('bad', 3)");

    let single = vm.call(&value_error, vec![s("only")], vec![]).unwrap();
    assert_eq!(vm.to_str(&single).unwrap(), "only");
    let none = vm.call(&value_error, vec![], vec![]).unwrap();
    assert_eq!(vm.to_str(&none).unwrap(), "");

    let exception = vm.types().exception(ExcKind::Exception).clone();
    assert!(vm.isinstance(&e, &exception));
    let r = vm.call(&value_error, vec![], vec![("x".to_string(), Value::None)]);
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_stop_iteration_value() {
    let (mut vm, _io) = setup();
    let stop = Value::Object(vm.types().exception(ExcKind::StopIteration).clone());
    let e = vm.call(&stop, vec![Value::Int(5)], vec![]).unwrap();
    assert_eq!(vm.get_attribute(&e, "value").unwrap(), Value::Int(5));
    let bare = vm.call(&stop, vec![], vec![]).unwrap();
    assert_eq!(vm.get_attribute(&bare, "value").unwrap(), Value::None);
}

// ========== 클래스 생성 ==========

#[test]
fn test_build_class_rejects_custom_metaclass() {
    let (mut vm, _io) = setup();
    let build = builtin(&vm, "__build_class__");
    let len = builtin(&vm, "len");
    let r = vm.call(
        &build,
        vec![len, s("C")],
        vec![("metaclass".to_string(), Value::Int(1))],
    );
    assert_raises(&vm, r, ExcKind::TypeError);
}

#[test]
fn test_builtins_module_contents() {
    let (vm, _io) = setup();
    let module = vm.builtins().clone();
    for name in [
        "print", "len", "isinstance", "__build_class__", "object", "type", "ValueError",
        "ZeroDivisionError", "RecursionError", "ModuleNotFoundError", "None", "Ellipsis",
    ] {
        assert!(module.has_attr(name), "builtins.{} missing", name);
    }
    assert_eq!(module.get_attr("True"), Some(Value::Bool(true)));
}
