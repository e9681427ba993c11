//! None, NotImplemented, Ellipsis 싱글턴 타입

use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, install_methods};
use super::super::value::Value;
use super::super::VmResult;
use super::{P, SELF};

const NONE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", none_new, &[("cls", P)]),
    MethodDef::method("__repr__", none_repr, SELF),
    MethodDef::method("__bool__", none_bool, SELF),
];

const NOT_IMPLEMENTED_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", not_implemented_new, &[("cls", P)]),
    MethodDef::method("__repr__", not_implemented_repr, SELF),
];

const ELLIPSIS_METHODS: &[MethodDef] = &[
    MethodDef::static_fn("__new__", ellipsis_new, &[("cls", P)]),
    MethodDef::method("__repr__", ellipsis_repr, SELF),
];

fn none_new(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::None)
}

fn none_repr(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::str("None"))
}

fn none_bool(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::Bool(false))
}

fn not_implemented_new(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::NotImplemented)
}

fn not_implemented_repr(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::str("NotImplemented"))
}

fn ellipsis_new(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::Ellipsis)
}

fn ellipsis_repr(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::str("Ellipsis"))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.none_type, NONE_METHODS)?;
    install_methods(&types.not_implemented_type, NOT_IMPLEMENTED_METHODS)?;
    install_methods(&types.ellipsis_type, ELLIPSIS_METHODS)?;
    Ok(())
}
