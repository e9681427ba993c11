//! object, type, 그리고 함수류/디스크립터 타입의 기본 메서드
//!
//! `object`의 클래스 dict에 있는 메서드가 모든 타입의 기본 동작입니다
//! (`__eq__`는 식별자 비교, `__hash__`는 식별자 해시, `__repr__`은 `<T object at 0x..>`).

use indexmap::IndexMap;
use std::sync::Arc;

use super::super::exception::{runtime_error, type_error};
use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::{BuiltinTypes, MethodDef, TypeFlags, install_methods, new_type, type_data, type_name_of};
use super::super::utils::{expect_str, read, str_repr, write};
use super::super::value::{NativeBinding, ObjRef, Object, ObjectData, Value};
use super::super::VmResult;
use super::{P, Params, SELF, SELF_OTHER, VarKw, VarP, address};

const ARGS_KWARGS: Params = &[("self", P), ("args", VarP), ("kwargs", VarKw)];

// ========== object ==========

const OBJECT_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        object_new,
        &[("cls", P), ("args", VarP), ("kwargs", VarKw)],
    ),
    MethodDef::method("__init__", object_init, ARGS_KWARGS),
    MethodDef::method("__eq__", object_eq, SELF_OTHER),
    MethodDef::method("__ne__", object_ne, SELF_OTHER),
    MethodDef::method("__hash__", object_hash, SELF),
    MethodDef::method("__repr__", object_repr, SELF),
    MethodDef::method("__str__", object_str, SELF),
    MethodDef::method("__format__", object_format, &[("self", P), ("format_spec", P)]),
    MethodDef::method("__dir__", object_dir, SELF),
];

fn same_entry(ty: &ObjRef, name: &str, other: Option<Value>) -> bool {
    match (type_data(ty).and_then(|t| t.lookup(name)), other) {
        (Some(a), Some(b)) => a.is(&b),
        _ => false,
    }
}

fn object_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let cls = b.get("cls")?;
    let Some(cls_obj) = cls.as_object().filter(|_| cls.is_type()) else {
        return Err(type_error(format!(
            "object.__new__(X): X is not a type object ({})",
            vm.type_name(cls)
        )));
    };
    let object = vm.types().object.clone();
    let flags = type_data(cls_obj).map(|t| t.flags).unwrap_or_default();
    if flags.contains(TypeFlags::IMMUTABLE) && !Arc::ptr_eq(cls_obj, &object) {
        let name = type_name_of(cls_obj);
        return Err(type_error(format!(
            "object.__new__({}) is not safe, use {}.__new__()",
            name, name
        )));
    }

    let excess = !b.varargs("args")?.is_empty() || !b.varkwargs("kwargs")?.is_empty();
    if excess {
        let new_overridden = !same_entry(cls_obj, "__new__", object.get_attr("__new__"));
        let init_default = same_entry(cls_obj, "__init__", object.get_attr("__init__"));
        if new_overridden {
            return Err(type_error(
                "object.__new__() takes exactly one argument (the type to instantiate)",
            ));
        }
        if init_default {
            return Err(type_error(format!(
                "{}() takes no arguments",
                type_name_of(cls_obj)
            )));
        }
    }
    Ok(Value::Object(Object::new(ObjectData::Instance {
        class: cls_obj.clone(),
    })))
}

fn object_init(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let excess = !b.varargs("args")?.is_empty() || !b.varkwargs("kwargs")?.is_empty();
    if excess {
        let ty = vm.type_of(b.get("self")?);
        let object = vm.types().object.clone();
        let init_overridden = !same_entry(&ty, "__init__", object.get_attr("__init__"));
        let new_default = same_entry(&ty, "__new__", object.get_attr("__new__"));
        if init_overridden || new_default {
            return Err(type_error(
                "object.__init__() takes exactly one argument (the instance to initialize)",
            ));
        }
    }
    Ok(Value::None)
}

fn object_eq(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    if b.get("self")?.is(b.get("other")?) {
        Ok(Value::Bool(true))
    } else {
        Ok(Value::NotImplemented)
    }
}

/// `__eq__` 결과를 뒤집음. `__eq__`가 NotImplemented면 그대로
fn object_ne(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let other = b.get("other")?.clone();
    match vm.call_special(this, "__eq__", vec![other])? {
        Some(r) if !r.is_not_implemented() => Ok(Value::Bool(!vm.is_true(&r)?)),
        _ => Ok(Value::NotImplemented),
    }
}

fn object_hash(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::Int((b.get("self")?.identity() >> 4) as i64))
}

/// 사용자 클래스는 `__module__`을 붙여 `<__main__.A object at 0x..>`
fn qualified_name(ty: &ObjRef) -> String {
    let name = ty
        .get_attr("__qualname__")
        .and_then(|q| q.as_str().map(str::to_string))
        .unwrap_or_else(|| type_name_of(ty).to_string());
    let module = ty
        .get_attr("__module__")
        .and_then(|m| m.as_str().map(str::to_string))
        .filter(|m| m != "builtins");
    match module {
        Some(m) => format!("{}.{}", m, name),
        None => name,
    }
}

fn object_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let ty = vm.type_of(this);
    Ok(Value::str(format!(
        "<{} object at {}>",
        qualified_name(&ty),
        address(this)
    )))
}

fn object_str(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    Ok(Value::str(vm.repr(b.get("self")?)?))
}

fn object_format(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let spec = expect_str(b.get("format_spec")?, "format spec")?;
    if !spec.is_empty() {
        return Err(type_error(format!(
            "unsupported format string passed to {}.__format__",
            vm.type_name(this)
        )));
    }
    Ok(Value::str(vm.to_str(this)?))
}

fn object_dir(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let mut names: Vec<String> = Vec::new();
    if let Value::Object(o) = this {
        names.extend(o.attr_names());
        if let ObjectData::Type(t) = &o.data {
            for ty in t.mro() {
                names.extend(ty.attr_names());
            }
        }
    }
    let ty = vm.type_of(this);
    if let Some(t) = type_data(&ty) {
        for ty in t.mro() {
            names.extend(ty.attr_names());
        }
    }
    names.sort();
    names.dedup();
    Ok(Value::list(names.into_iter().map(Value::str).collect()))
}

// ========== type ==========

const TYPE_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        type_new,
        &[("cls", P), ("name", P), ("bases", P), ("dict", P)],
    ),
    MethodDef::method("__init__", type_init, ARGS_KWARGS),
    MethodDef::method("__repr__", type_repr, SELF),
    MethodDef::method("mro", type_mro, SELF),
];

/// 3인자 `type(name, bases, dict)`
fn type_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let name = expect_str(b.get("name")?, "type.__new__() argument 1")?.to_string();
    let bases = b
        .get("bases")?
        .tuple_items()
        .ok_or_else(|| type_error("type.__new__() argument 2 must be tuple"))?;
    let dict: IndexMap<String, Value> = b
        .get("dict")?
        .str_keyed_items()
        .ok_or_else(|| type_error("type.__new__() argument 3 must be dict"))?
        .into_iter()
        .collect();
    Ok(Value::Object(make_class(vm, &name, bases, dict)?))
}

fn type_init(_vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::None)
}

fn type_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    match b.get("self")? {
        Value::Object(o) if matches!(o.data, ObjectData::Type(_)) => {
            Ok(Value::str(format!("<class '{}'>", qualified_name(o))))
        }
        other => Err(super::descriptor_error("__repr__", "type", other)),
    }
}

fn type_mro(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let mro = this
        .as_type()
        .map(|t| t.mro().iter().cloned().map(Value::Object).collect())
        .unwrap_or_default();
    Ok(Value::list(mro))
}

/// 클래스 본문 실행 결과로 새 타입 생성
///
/// `__eq__`만 정의하고 `__hash__`를 정의하지 않으면 해시 불가능한 타입이 된다.
/// 본문이 남긴 `__classcell__`에는 새 클래스를 채워 `super()`가 쓸 수 있게 한다.
pub(crate) fn make_class(
    vm: &mut Vm,
    name: &str,
    bases: Vec<Value>,
    mut dict: IndexMap<String, Value>,
) -> VmResult<ObjRef> {
    let mut base_types = Vec::with_capacity(bases.len());
    for base in &bases {
        let Some(ty) = base.as_object().filter(|_| base.is_type()) else {
            return Err(type_error(format!(
                "bases must be types, not '{}'",
                vm.type_name(base)
            )));
        };
        let flags = type_data(ty).map(|t| t.flags).unwrap_or_default();
        if !flags.contains(TypeFlags::BASETYPE) {
            return Err(type_error(format!(
                "type '{}' is not an acceptable base type",
                type_name_of(ty)
            )));
        }
        base_types.push(ty.clone());
    }
    if base_types.is_empty() {
        base_types.push(vm.types().object.clone());
    }

    if dict.contains_key("__eq__") && !dict.contains_key("__hash__") {
        dict.insert("__hash__".to_string(), Value::None);
    }
    let class_cell = dict.shift_remove("__classcell__");

    let cls = new_type(name, base_types, TypeFlags::HAS_DICT | TypeFlags::BASETYPE, dict);
    if let Some(Value::Object(cell)) = class_cell
        && let ObjectData::Cell(cell) = &cell.data
    {
        *write(cell) = Some(Value::Object(cls.clone()));
    }
    Ok(cls)
}

// ========== 함수, 메서드, 코드, 모듈 ==========

const FUNCTION_METHODS: &[MethodDef] = &[MethodDef::method("__repr__", function_repr, SELF)];
const BUILTIN_FUNCTION_METHODS: &[MethodDef] =
    &[MethodDef::method("__repr__", builtin_function_repr, SELF)];
const METHOD_METHODS: &[MethodDef] = &[MethodDef::method("__repr__", method_repr, SELF)];
const CODE_METHODS: &[MethodDef] = &[MethodDef::method("__repr__", code_repr, SELF)];
const CELL_METHODS: &[MethodDef] = &[MethodDef::method("__repr__", cell_repr, SELF)];
const MODULE_METHODS: &[MethodDef] = &[MethodDef::method("__repr__", module_repr, SELF)];

fn function_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    match this.as_object().map(|o| &o.data) {
        Some(ObjectData::Function(f)) => Ok(Value::str(format!(
            "<function {} at {}>",
            f.qualname,
            address(this)
        ))),
        _ => Err(super::descriptor_error("__repr__", "function", this)),
    }
}

fn builtin_function_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    match this.as_object().map(|o| &o.data) {
        Some(ObjectData::NativeFunction(n)) => Ok(Value::str(match n.name.split_once('.') {
            Some((owner, name)) if n.binding == NativeBinding::Method => {
                format!("<method '{}' of '{}' objects>", name, owner)
            }
            _ => format!("<built-in function {}>", n.name),
        })),
        _ => Err(super::descriptor_error("__repr__", "builtin_function_or_method", this)),
    }
}

fn method_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let Some(ObjectData::Method { receiver, func }) = this.as_object().map(|o| &o.data) else {
        return Err(super::descriptor_error("__repr__", "method", this));
    };
    let text = match func.as_object().map(|o| &o.data) {
        Some(ObjectData::NativeFunction(n)) => {
            let short = n.name.rsplit('.').next().unwrap_or(&n.name);
            format!(
                "<built-in method {} of {} object at {}>",
                short,
                vm.type_name(receiver),
                address(receiver)
            )
        }
        Some(ObjectData::Function(f)) => {
            format!("<bound method {} of {}>", f.qualname, vm.repr(receiver)?)
        }
        _ => format!("<bound method of {}>", vm.repr(receiver)?),
    };
    Ok(Value::str(text))
}

fn code_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    match this.as_object().map(|o| &o.data) {
        Some(ObjectData::Code(c)) => Ok(Value::str(format!(
            "<code object {} at {}, file \"{}\", line {}>",
            c.name,
            address(this),
            c.filename,
            c.firstlineno
        ))),
        _ => Err(super::descriptor_error("__repr__", "code", this)),
    }
}

fn cell_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let Some(ObjectData::Cell(cell)) = this.as_object().map(|o| &o.data) else {
        return Err(super::descriptor_error("__repr__", "cell", this));
    };
    let content = read(cell).clone();
    Ok(Value::str(match content {
        Some(v) => format!(
            "<cell at {}: {} object at {}>",
            address(this),
            vm.type_name(&v),
            address(&v)
        ),
        None => format!("<cell at {}: empty>", address(this)),
    }))
}

fn module_repr(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let Some(ObjectData::Module(m)) = this.as_object().map(|o| &o.data) else {
        return Err(super::descriptor_error("__repr__", "module", this));
    };
    Ok(Value::str(match m.path.get() {
        Some(path) => format!("<module {} from {}>", str_repr(&m.name), str_repr(path)),
        None if m.name == "builtins" => "<module 'builtins' (built-in)>".to_string(),
        None => format!("<module {}>", str_repr(&m.name)),
    }))
}

// ========== staticmethod / classmethod / property ==========

const STATICMETHOD_METHODS: &[MethodDef] = &[MethodDef::static_fn(
    "__new__",
    staticmethod_new,
    &[("cls", P), ("function", P)],
)];

const CLASSMETHOD_METHODS: &[MethodDef] = &[MethodDef::static_fn(
    "__new__",
    classmethod_new,
    &[("cls", P), ("function", P)],
)];

const PROPERTY_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        property_new,
        &[("cls", P), ("fget", P), ("fset", P), ("fdel", P), ("doc", P)],
    )
    .with_optional(&["fget", "fset", "fdel", "doc"]),
    MethodDef::method("getter", property_getter, &[("self", P), ("fget", P)]),
    MethodDef::method("setter", property_setter, &[("self", P), ("fset", P)]),
];

fn staticmethod_new(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let f = b.get("function")?.clone();
    Ok(Value::Object(Object::new(ObjectData::StaticMethod(f))))
}

fn classmethod_new(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let f = b.get("function")?.clone();
    Ok(Value::Object(Object::new(ObjectData::ClassMethod(f))))
}

pub(crate) fn new_property(getter: Value, setter: Value) -> Value {
    Value::Object(Object::new(ObjectData::Property { getter, setter }))
}

fn property_parts(v: &Value) -> VmResult<(Value, Value)> {
    match v.as_object().map(|o| &o.data) {
        Some(ObjectData::Property { getter, setter }) => Ok((getter.clone(), setter.clone())),
        _ => Err(super::descriptor_error("setter", "property", v)),
    }
}

fn property_new(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let getter = b.optional("fget").cloned().unwrap_or(Value::None);
    let setter = b.optional("fset").cloned().unwrap_or(Value::None);
    Ok(new_property(getter, setter))
}

fn property_getter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (_, setter) = property_parts(b.get("self")?)?;
    Ok(new_property(b.get("fget")?.clone(), setter))
}

fn property_setter(_vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (getter, _) = property_parts(b.get("self")?)?;
    Ok(new_property(getter, b.get("fset")?.clone()))
}

// ========== super ==========

const SUPER_METHODS: &[MethodDef] = &[
    MethodDef::static_fn(
        "__new__",
        super_new,
        &[("cls", P), ("type", P), ("obj", P)],
    )
    .with_optional(&["type", "obj"]),
    MethodDef::method("__repr__", super_repr, SELF),
];

/// `super()`는 호출한 프레임의 `__class__` 셀과 첫 번째 인자를 사용한다.
fn super_new(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let (class, receiver) = match (b.optional("type"), b.optional("obj")) {
        (Some(ty), Some(obj)) => (ty.clone(), obj.clone()),
        (Some(_), None) => {
            return Err(type_error("super() with one argument is not supported"));
        }
        _ => implicit_super_args(vm)?,
    };
    let Some(class) = class.as_object().filter(|_| class.is_type()).cloned() else {
        return Err(type_error(format!(
            "super() argument 1 must be type, not {}",
            vm.type_name(&class)
        )));
    };
    let valid = match receiver.as_object() {
        Some(o) if receiver.is_type() => vm.issubclass(o, &class),
        _ => vm.isinstance(&receiver, &class),
    };
    if !valid {
        return Err(type_error(
            "super(type, obj): obj must be an instance or subtype of type",
        ));
    }
    Ok(Value::Object(Object::new(ObjectData::Super { class, receiver })))
}

fn implicit_super_args(vm: &Vm) -> VmResult<(Value, Value)> {
    let frame = vm.frame()?;
    let code = &frame.code;
    let class_idx = code
        .freevars
        .iter()
        .position(|n| n == "__class__")
        .map(|i| code.cellvars.len() + i)
        .ok_or_else(|| runtime_error("super(): __class__ cell not found"))?;
    let class = frame
        .cell_value(class_idx)
        .ok_or_else(|| runtime_error("super(): empty __class__ cell"))?;
    if code.argcount == 0 || code.varnames.is_empty() {
        return Err(runtime_error("super(): no arguments"));
    }
    let first = &code.varnames[0];
    let receiver = match code.cellvars.iter().position(|c| c == first) {
        Some(i) => frame.cell_value(i),
        None => frame.fast.first().cloned().flatten(),
    };
    let receiver = receiver.ok_or_else(|| runtime_error("super(): arg[0] deleted"))?;
    Ok((class, receiver))
}

fn super_repr(vm: &mut Vm, b: Bindings) -> VmResult<Value> {
    let this = b.get("self")?;
    let Some(ObjectData::Super { class, receiver }) = this.as_object().map(|o| &o.data) else {
        return Err(super::descriptor_error("__repr__", "super", this));
    };
    Ok(Value::str(format!(
        "<super: <class '{}'>, <{} object>>",
        type_name_of(class),
        vm.type_name(receiver)
    )))
}

pub fn install(types: &BuiltinTypes) -> VmResult<()> {
    install_methods(&types.object, OBJECT_METHODS)?;
    install_methods(&types.type_, TYPE_METHODS)?;
    install_methods(&types.function, FUNCTION_METHODS)?;
    install_methods(&types.builtin_function, BUILTIN_FUNCTION_METHODS)?;
    install_methods(&types.method, METHOD_METHODS)?;
    install_methods(&types.code, CODE_METHODS)?;
    install_methods(&types.cell, CELL_METHODS)?;
    install_methods(&types.module, MODULE_METHODS)?;
    install_methods(&types.staticmethod, STATICMETHOD_METHODS)?;
    install_methods(&types.classmethod, CLASSMETHOD_METHODS)?;
    install_methods(&types.property, PROPERTY_METHODS)?;
    install_methods(&types.super_, SUPER_METHODS)?;
    Ok(())
}
