//! VM 테스트 모듈
//!
//! 코드 객체는 CPython 3.9가 같은 소스에 대해 내놓는 명령어 열을 그대로 손으로 조립합니다.

use super::*;
use crate::config::InterpreterConfig;
use crate::runtime_io::BufferIo;
use crate::vm::bytecode::{CodeFlags, Constant, Opcode as O};
use crate::vm::value::new_module;
use pretty_assertions::assert_eq;

const MODULE_FLAGS: u32 = 0x40;
const FUNCTION_FLAGS: u32 = 0x43;

fn asm(ops: &[(O, u32)]) -> Vec<u8> {
    ops.iter().flat_map(|&(op, arg)| [op as u8, arg as u8]).collect()
}

fn strs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn code(name: &str, flags: u32, ops: &[(O, u32)], consts: Vec<Constant>) -> CodeObject {
    CodeObject {
        name: name.to_string(),
        filename: "t.py".to_string(),
        flags: CodeFlags::from_bits_truncate(flags),
        code: asm(ops),
        consts,
        stacksize: 8,
        firstlineno: 1,
        ..Default::default()
    }
}

fn setup() -> (Vm, BufferIo) {
    let interp = Interpreter::new(InterpreterConfig::default()).unwrap();
    let io = BufferIo::new();
    let vm = interp.vm("test", Box::new(io.clone()));
    (vm, io)
}

fn run_module(vm: &mut Vm, code: CodeObject) -> ObjRef {
    let module = new_module("t");
    vm.run_module_code(Arc::new(code), &module).unwrap();
    module
}

fn code_const(c: CodeObject) -> Constant {
    Constant::Code(Arc::new(c))
}

fn s(text: &str) -> Constant {
    Constant::Str(text.to_string())
}

/// `<name> = <함수>` 하나만 정의하는 모듈 본문
fn define_one(name: &str, func: CodeObject) -> CodeObject {
    let mut m = code(
        "<module>",
        MODULE_FLAGS,
        &[
            (O::LoadConst, 0),
            (O::LoadConst, 1),
            (O::MakeFunction, 0),
            (O::StoreName, 0),
            (O::LoadConst, 2),
            (O::ReturnValue, 0),
        ],
        vec![code_const(func), s(name), Constant::None],
    );
    m.names = strs(&[name]);
    m
}

// ========== 모듈 실행 ==========

#[test]
fn test_for_loop_and_print_keyword() {
    // t = 0
    // for i in range(4):
    //     t += i
    // print("t", t, sep="=")
    let mut m = code(
        "<module>",
        MODULE_FLAGS,
        &[
            (O::LoadConst, 0),
            (O::StoreName, 0),
            (O::LoadName, 1),
            (O::LoadConst, 1),
            (O::CallFunction, 1),
            (O::GetIter, 0),
            (O::ForIter, 12),
            (O::StoreName, 2),
            (O::LoadName, 0),
            (O::LoadName, 2),
            (O::InplaceAdd, 0),
            (O::StoreName, 0),
            (O::JumpAbsolute, 12),
            (O::LoadName, 3),
            (O::LoadConst, 2),
            (O::LoadName, 0),
            (O::LoadConst, 3),
            (O::LoadConst, 4),
            (O::CallFunctionKw, 3),
            (O::PopTop, 0),
            (O::LoadConst, 5),
            (O::ReturnValue, 0),
        ],
        vec![
            Constant::Int(0),
            Constant::Int(4),
            s("t"),
            s("="),
            Constant::Tuple(vec![s("sep")]),
            Constant::None,
        ],
    );
    m.names = strs(&["t", "range", "i", "print"]);

    let (mut vm, io) = setup();
    let module = run_module(&mut vm, m);
    assert_eq!(module.get_attr("t"), Some(Value::Int(6)));
    assert_eq!(module.get_attr("i"), Some(Value::Int(3)));
    assert_eq!(io.get_output(), "t=6\n");
    assert_eq!(vm.depth(), 0);
}

#[test]
fn test_unknown_opcode_is_internal_fault() {
    let bad = code("<module>", MODULE_FLAGS, &[], vec![]);
    let bad = CodeObject {
        code: vec![0, 0],
        ..bad
    };
    let (mut vm, _io) = setup();
    let module = new_module("t");
    let e = vm.run_module_code(Arc::new(bad), &module).unwrap_err();
    assert!(matches!(
        e,
        VmError::Internal {
            kind: VmErrorKind::BadOpcode,
            ..
        }
    ));
}

// ========== 예외 처리 ==========

/// try:
///     f()
/// except Exception:
///     r = 1
fn try_call_f(f: CodeObject) -> CodeObject {
    let mut m = code(
        "<module>",
        MODULE_FLAGS,
        &[
            (O::LoadConst, 2),
            (O::LoadConst, 3),
            (O::MakeFunction, 0),
            (O::StoreName, 0),
            (O::SetupFinally, 10),
            (O::LoadName, 0),
            (O::CallFunction, 0),
            (O::PopTop, 0),
            (O::PopBlock, 0),
            (O::JumpForward, 22),
            (O::DupTop, 0),
            (O::LoadName, 1),
            (O::JumpIfNotExcMatch, 40),
            (O::PopTop, 0),
            (O::PopTop, 0),
            (O::PopTop, 0),
            (O::LoadConst, 0),
            (O::StoreName, 2),
            (O::PopExcept, 0),
            (O::JumpForward, 2),
            (O::Reraise, 0),
            (O::LoadConst, 1),
            (O::ReturnValue, 0),
        ],
        vec![Constant::Int(1), Constant::None, code_const(f), s("f")],
    );
    m.names = strs(&["f", "Exception", "r"]);
    m
}

#[test]
fn test_except_catches_user_exception() {
    // def f(): raise ValueError()
    let mut f = code(
        "f",
        FUNCTION_FLAGS,
        &[
            (O::LoadGlobal, 0),
            (O::CallFunction, 0),
            (O::RaiseVarargs, 1),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None],
    );
    f.names = strs(&["ValueError"]);

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, try_call_f(f));
    assert_eq!(module.get_attr("r"), Some(Value::Int(1)));
    assert!(vm.exc_info.is_none());
}

#[test]
fn test_except_exception_cannot_catch_internal_fault() {
    let mut f = code("f", FUNCTION_FLAGS, &[], vec![Constant::None]);
    f.code = vec![0, 0];

    let (mut vm, _io) = setup();
    let module = new_module("t");
    let e = vm.run_module_code(Arc::new(try_call_f(f)), &module).unwrap_err();
    assert!(e.is_internal());
    assert!(module.get_attr("r").is_none());
    if let VmError::Internal { frames, .. } = e {
        assert_eq!(frames.first().map(|f| f.name.as_str()), Some("f"));
    }
}

#[test]
fn test_traceback_captures_call_chain() {
    // def c(): raise ValueError("deep")
    // def b(): return c()
    // def a(): return b()
    let mut c = code(
        "c",
        FUNCTION_FLAGS,
        &[
            (O::LoadGlobal, 0),
            (O::LoadConst, 1),
            (O::CallFunction, 1),
            (O::RaiseVarargs, 1),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None, s("deep")],
    );
    c.names = strs(&["ValueError"]);
    let caller = |name: &str, callee: &str| {
        let mut f = code(
            name,
            FUNCTION_FLAGS,
            &[(O::LoadGlobal, 0), (O::CallFunction, 0), (O::ReturnValue, 0)],
            vec![Constant::None],
        );
        f.names = strs(&[callee]);
        f
    };
    let mut m = code(
        "<module>",
        MODULE_FLAGS,
        &[
            (O::LoadConst, 0),
            (O::LoadConst, 1),
            (O::MakeFunction, 0),
            (O::StoreName, 0),
            (O::LoadConst, 2),
            (O::LoadConst, 3),
            (O::MakeFunction, 0),
            (O::StoreName, 1),
            (O::LoadConst, 4),
            (O::LoadConst, 5),
            (O::MakeFunction, 0),
            (O::StoreName, 2),
            (O::LoadConst, 6),
            (O::ReturnValue, 0),
        ],
        vec![
            code_const(c),
            s("c"),
            code_const(caller("b", "c")),
            s("b"),
            code_const(caller("a", "b")),
            s("a"),
            Constant::None,
        ],
    );
    m.names = strs(&["c", "b", "a"]);

    let (mut vm, io) = setup();
    let module = run_module(&mut vm, m);
    let a = module.get_attr("a").unwrap();
    let exit = vm.run_root(&a, vec![]).unwrap();
    assert_eq!(exit.status(), 1);
    let ThreadExit::Unhandled { traceback } = exit else {
        panic!("expected an unhandled exception");
    };
    let names: Vec<&str> = traceback.frames.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["c", "b", "a"]);
    assert_eq!(traceback.exc_type, "ValueError");
    assert_eq!(traceback.args, vec!["deep".to_string()]);
    assert!(io.get_errors().contains("ValueError: deep"));
}

// ========== 제너레이터와 클로저 ==========

#[test]
fn test_generator_send_protocol() {
    // def g():
    //     x = yield 1
    //     yield x + 1
    let mut g = code(
        "g",
        0x63,
        &[
            (O::LoadConst, 1),
            (O::YieldValue, 0),
            (O::StoreFast, 0),
            (O::LoadFast, 0),
            (O::LoadConst, 1),
            (O::BinaryAdd, 0),
            (O::YieldValue, 0),
            (O::PopTop, 0),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None, Constant::Int(1)],
    );
    g.varnames = strs(&["x"]);
    g.nlocals = 1;

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("g", g));
    let gen_fn = module.get_attr("g").unwrap();
    let generator = vm.call(&gen_fn, vec![], vec![]).unwrap();

    assert_eq!(vm.send(&generator, Value::None).unwrap(), Value::Int(1));
    assert_eq!(vm.send(&generator, Value::Int(10)).unwrap(), Value::Int(11));
    let e = vm.send(&generator, Value::None).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::StopIteration));
    // 끝난 제너레이터는 계속 StopIteration
    let e = vm.send(&generator, Value::None).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::StopIteration));
}

#[test]
fn test_generator_keeps_handled_exception_across_yield() {
    // def g():
    //     try:
    //         raise ValueError('x')
    //     except ValueError:
    //         yield 1
    //         raise
    let mut g = code(
        "g",
        0x63,
        &[
            (O::SetupFinally, 12),
            (O::LoadGlobal, 0),
            (O::LoadConst, 1),
            (O::CallFunction, 1),
            (O::RaiseVarargs, 1),
            (O::PopBlock, 0),
            (O::JumpForward, 26),
            (O::DupTop, 0),
            (O::LoadGlobal, 0),
            (O::JumpIfNotExcMatch, 38),
            (O::PopTop, 0),
            (O::PopTop, 0),
            (O::PopTop, 0),
            (O::LoadConst, 2),
            (O::YieldValue, 0),
            (O::PopTop, 0),
            (O::RaiseVarargs, 0),
            (O::PopExcept, 0),
            (O::JumpForward, 2),
            (O::Reraise, 0),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None, s("x"), Constant::Int(1)],
    );
    g.names = strs(&["ValueError"]);

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("g", g));
    let gen_fn = module.get_attr("g").unwrap();
    let generator = vm.call(&gen_fn, vec![], vec![]).unwrap();

    assert_eq!(vm.send(&generator, Value::None).unwrap(), Value::Int(1));
    // 제너레이터가 멈춘 동안 호출자에게는 처리 중 예외가 없다
    assert!(vm.exc_info.is_none());

    let e = vm.send(&generator, Value::None).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::ValueError), "{}", e);
    let VmError::Raised(exc) = &e else {
        panic!("expected the original exception object, got {}", e);
    };
    let ObjectData::Exception(data) = &exc.data else {
        panic!("not an exception object");
    };
    assert_eq!(data.args(), vec![Value::str("x")]);
    assert!(vm.exc_info.is_none());
}

/// `def h(): return 5; yield`
fn returns_five() -> CodeObject {
    code(
        "h",
        0x63,
        &[(O::LoadConst, 1), (O::ReturnValue, 0)],
        vec![Constant::None, Constant::Int(5)],
    )
}

#[test]
fn test_next_keeps_generator_return_value() {
    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("h", returns_five()));
    let gen_fn = module.get_attr("h").unwrap();
    let generator = vm.call(&gen_fn, vec![], vec![]).unwrap();

    let next = vm.builtins().get_attr("next").unwrap();
    let e = vm.call(&next, vec![generator.clone()], vec![]).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::StopIteration));
    assert_eq!(vm.stop_iteration_value(&e), Value::Int(5));
    // 기본값이 있으면 소진된 제너레이터에서도 기본값
    let r = vm.call(&next, vec![generator, Value::Int(0)], vec![]).unwrap();
    assert_eq!(r, Value::Int(0));
}

#[test]
fn test_generator_survives_recursion_limit_on_resume() {
    // def g(): yield 1
    let g = code(
        "g",
        0x63,
        &[
            (O::LoadConst, 1),
            (O::YieldValue, 0),
            (O::PopTop, 0),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None, Constant::Int(1)],
    );
    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("g", g));
    let gen_fn = module.get_attr("g").unwrap();
    let generator = vm.call(&gen_fn, vec![], vec![]).unwrap();

    let limit = vm.max_frames;
    vm.max_frames = 0;
    let e = vm.send(&generator, Value::None).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::RecursionError));

    vm.max_frames = limit;
    assert_eq!(vm.send(&generator, Value::None).unwrap(), Value::Int(1));
}

/// 셀 변수 `x`와 로컬 하나를 가진 `outer`
fn outer_with(ops: &[(O, u32)], consts: Vec<Constant>) -> CodeObject {
    let mut outer = code("outer", 0x3, ops, consts);
    outer.varnames = strs(&["inner"]);
    outer.cellvars = strs(&["x"]);
    outer.nlocals = 1;
    outer
}

#[test]
fn test_closure_write_visible_to_outer() {
    // def outer():
    //     x = 1
    //     def inc():
    //         nonlocal x
    //         x += 1
    //     inc()
    //     return x
    let mut inc = code(
        "inc",
        0x13,
        &[
            (O::LoadDeref, 0),
            (O::LoadConst, 1),
            (O::InplaceAdd, 0),
            (O::StoreDeref, 0),
            (O::LoadConst, 0),
            (O::ReturnValue, 0),
        ],
        vec![Constant::None, Constant::Int(1)],
    );
    inc.freevars = strs(&["x"]);
    let outer = outer_with(
        &[
            (O::LoadConst, 1),
            (O::StoreDeref, 0),
            (O::LoadClosure, 0),
            (O::BuildTuple, 1),
            (O::LoadConst, 2),
            (O::LoadConst, 3),
            (O::MakeFunction, 8),
            (O::StoreFast, 0),
            (O::LoadFast, 0),
            (O::CallFunction, 0),
            (O::PopTop, 0),
            (O::LoadDeref, 0),
            (O::ReturnValue, 0),
        ],
        vec![
            Constant::None,
            Constant::Int(1),
            code_const(inc),
            s("outer.<locals>.inc"),
        ],
    );

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("outer", outer));
    let f = module.get_attr("outer").unwrap();
    assert_eq!(vm.call(&f, vec![], vec![]).unwrap(), Value::Int(2));
}

#[test]
fn test_closure_sees_later_outer_assignment() {
    // def outer():
    //     x = 1
    //     def get():
    //         return x
    //     x = 5
    //     return get()
    let mut get = code(
        "get",
        0x13,
        &[(O::LoadDeref, 0), (O::ReturnValue, 0)],
        vec![Constant::None],
    );
    get.freevars = strs(&["x"]);
    let outer = outer_with(
        &[
            (O::LoadConst, 1),
            (O::StoreDeref, 0),
            (O::LoadClosure, 0),
            (O::BuildTuple, 1),
            (O::LoadConst, 2),
            (O::LoadConst, 3),
            (O::MakeFunction, 8),
            (O::StoreFast, 0),
            (O::LoadConst, 4),
            (O::StoreDeref, 0),
            (O::LoadFast, 0),
            (O::CallFunction, 0),
            (O::ReturnValue, 0),
        ],
        vec![
            Constant::None,
            Constant::Int(1),
            code_const(get),
            s("outer.<locals>.get"),
            Constant::Int(5),
        ],
    );

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, define_one("outer", outer));
    let f = module.get_attr("outer").unwrap();
    assert_eq!(vm.call(&f, vec![], vec![]).unwrap(), Value::Int(5));
}

// ========== 클래스 ==========

#[test]
fn test_user_eq_overrides_identity() {
    // class P:
    //     def __eq__(self, other):
    //         return True
    let mut eq = code(
        "__eq__",
        FUNCTION_FLAGS,
        &[(O::LoadConst, 1), (O::ReturnValue, 0)],
        vec![Constant::None, Constant::Bool(true)],
    );
    eq.argcount = 2;
    eq.nlocals = 2;
    eq.varnames = strs(&["self", "other"]);
    let mut body = code(
        "P",
        MODULE_FLAGS,
        &[
            (O::LoadName, 0),
            (O::StoreName, 1),
            (O::LoadConst, 0),
            (O::StoreName, 2),
            (O::LoadConst, 1),
            (O::LoadConst, 2),
            (O::MakeFunction, 0),
            (O::StoreName, 3),
            (O::LoadConst, 3),
            (O::ReturnValue, 0),
        ],
        vec![s("P"), code_const(eq), s("P.__eq__"), Constant::None],
    );
    body.names = strs(&["__name__", "__module__", "__qualname__", "__eq__"]);
    let mut m = code(
        "<module>",
        MODULE_FLAGS,
        &[
            (O::LoadBuildClass, 0),
            (O::LoadConst, 0),
            (O::LoadConst, 1),
            (O::MakeFunction, 0),
            (O::LoadConst, 1),
            (O::CallFunction, 2),
            (O::StoreName, 0),
            (O::LoadConst, 2),
            (O::ReturnValue, 0),
        ],
        vec![code_const(body), s("P"), Constant::None],
    );
    m.names = strs(&["P"]);

    let (mut vm, _io) = setup();
    let module = run_module(&mut vm, m);
    let class = module.get_attr("P").unwrap();
    assert!(class.is_type());
    let p = vm.call(&class, vec![], vec![]).unwrap();
    assert!(vm.eq(&p, &Value::Int(5)).unwrap());
    assert!(vm.eq(&Value::Int(5), &p).unwrap());

    let object = Value::Object(vm.types().object.clone());
    let o1 = vm.call(&object, vec![], vec![]).unwrap();
    let o2 = vm.call(&object, vec![], vec![]).unwrap();
    assert!(!vm.eq(&o1, &o2).unwrap());
    assert!(vm.eq(&o1, &o1).unwrap());

    // __eq__만 정의한 클래스는 해시 불가능
    let e = vm.hash(&p).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::TypeError));
}

// ========== 재귀 제한 ==========

#[test]
fn test_recursion_limit() {
    // def r(): return r()
    let mut r = code(
        "r",
        FUNCTION_FLAGS,
        &[(O::LoadGlobal, 0), (O::CallFunction, 0), (O::ReturnValue, 0)],
        vec![Constant::None],
    );
    r.names = strs(&["r"]);

    let interp = Interpreter::new(InterpreterConfig {
        max_frames: 20,
        ..Default::default()
    })
    .unwrap();
    let io = BufferIo::new();
    let mut vm = interp.vm("test", Box::new(io.clone()));
    let module = run_module(&mut vm, define_one("r", r));
    let f = module.get_attr("r").unwrap();
    let e = vm.call(&f, vec![], vec![]).unwrap_err();
    assert!(vm.error_matches(&e, ExcKind::RecursionError));
    assert_eq!(vm.depth(), 0);
}
