//! BaseException 계열의 메서드
//!
//! 예외 인스턴스는 `ObjectData::Exception`이고, 사용자 예외 클래스도 `BaseException.__new__`를
//! 거쳐 같은 payload를 갖습니다.

use super::super::exception::{ExcKind, type_error};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods, type_name_of};
use super::super::utils::write;
use super::super::value::{ExceptionData, Object, ObjectData, Value};
use super::super::VmResult;
use super::object::new_property;
use super::{P, SELF, VarKw, VarP};

const BASE_EXCEPTION_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        exception_new,
        &[("cls", P), ("args", VarP), ("kwargs", VarKw)],
    ),
    MethodDef::method(
        "__init__",
        exception_init,
        &[("self", P), ("args", VarP), ("kwargs", VarKw)],
    ),
    MethodDef::method("__str__", exception_str, SELF),
    MethodDef::method("__repr__", exception_repr, SELF),
    MethodDef::method("with_traceback", exception_with_traceback, &[("self", P), ("tb", P)]),
];

const ARGS_GETTER: MethodDef = MethodDef::static_fn("args", args_get, SELF);
const ARGS_SETTER: MethodDef = MethodDef::static_fn("args", args_set, &[("self", P), ("value", P)]);

const KEY_ERROR_METHODS: &[MethodDef] = &[MethodDef::method("__str__", key_error_str, SELF)];

const STOP_ITERATION_METHODS: &[MethodDef] = &[MethodDef::method(
    "__init__",
    stop_iteration_init,
    &[("self", P), ("args", VarP)],
)];

fn data<'a>(b: &'a Bindings, method: &str) -> VmResult<&'a ExceptionData> {
    let v = b.get("self")?;
    match v.as_object().map(|o| &o.data) {
        Some(ObjectData::Exception(data)) => Ok(data),
        _ => Err(super::descriptor_error(method, "BaseException", v)),
    }
}

fn exception_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let cls = b.get("cls")?;
    let base = vm.types().exception(ExcKind::BaseException).clone();
    let Some(class) = cls.as_object().filter(|c| cls.is_type() && vm.issubclass(c, &base)) else {
        return Err(type_error(format!(
            "BaseException.__new__(X): X is not a subtype of BaseException ({})",
            vm.type_name(cls)
        )));
    };
    let args = b.varargs("args")?;
    Ok(Value::Object(Object::new(ObjectData::Exception(
        ExceptionData::new(class.clone(), args),
    ))))
}

/// 키워드 인자는 받지 않는다
fn exception_init(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let data = data(&b, "__init__")?;
    if !b.varkwargs("kwargs")?.is_empty() {
        return Err(type_error(format!(
            "{}() takes no keyword arguments",
            vm.type_name(b.get("self")?)
        )));
    }
    *write(&data.args) = b.varargs("args")?;
    Ok(Value::None)
}

fn exception_str(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let args = data(&b, "__str__")?.args();
    let text = match args.as_slice() {
        [] => String::new(),
        [only] => vm.to_str(only)?,
        _ => vm.repr(&Value::tuple(args))?,
    };
    Ok(Value::str(text))
}

fn exception_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let data = data(&b, "__repr__")?;
    let name = type_name_of(&data.class).to_string();
    let args = data.args();
    let inner = match args.as_slice() {
        [only] => vm.repr(only)?,
        _ => {
            let tuple = vm.repr(&Value::tuple(args))?;
            tuple[1..tuple.len() - 1].to_string()
        }
    };
    Ok(Value::str(format!("{}({})", name, inner)))
}

fn exception_with_traceback(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    data(&b, "with_traceback")?;
    if let Some(o) = this.as_object() {
        o.set_attr("__traceback__", b.get("tb")?.clone());
    }
    Ok(this.clone())
}

fn args_get(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::tuple(data(&b, "args")?.args()))
}

fn args_set(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let data = data(&b, "args")?;
    let items = vm.collect(b.get("value")?)?;
    *write(&data.args) = items;
    Ok(Value::None)
}

/// KeyError는 키를 repr로 보여 준다 (`KeyError: 'x'`)
fn key_error_str(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let args = data(&b, "__str__")?.args();
    match args.as_slice() {
        [only] => Ok(Value::str(vm.repr(only)?)),
        [] => Ok(Value::str("")),
        _ => Ok(Value::str(vm.repr(&Value::tuple(args))?)),
    }
}

/// `value` 속성은 첫 인자 (없으면 None)
fn stop_iteration_init(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let data = data(&b, "__init__")?;
    let args = b.varargs("args")?;
    let value = args.first().cloned().unwrap_or(Value::None);
    *write(&data.args) = args;
    if let Some(o) = b.get("self")?.as_object() {
        o.set_attr("value", value);
    }
    Ok(Value::None)
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    let base = types.exception(ExcKind::BaseException);
    install_methods(base, BASE_EXCEPTION_METHODS)?;
    let getter = ARGS_GETTER.build("BaseException")?;
    let setter = ARGS_SETTER.build("BaseException")?;
    base.set_attr("args", new_property(getter, setter));
    for name in ["__cause__", "__context__", "__traceback__"] {
        base.set_attr(name, Value::None);
    }
    base.set_attr("__suppress_context__", Value::Bool(false));

    install_methods(types.exception(ExcKind::KeyError), KEY_ERROR_METHODS)?;
    install_methods(types.exception(ExcKind::StopIteration), STOP_ITERATION_METHODS)?;
    types
        .exception(ExcKind::StopIteration)
        .set_attr("value", Value::None);
    Ok(())
}
