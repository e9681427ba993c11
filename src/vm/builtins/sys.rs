//! `sys` 모듈
//!
//! `sys.modules`는 인터프리터 레지스트리를 따라가는 dict입니다. 모듈이 등록되면
//! [`publish_module`]로 같은 dict 객체에 넣고, 임포트가 실패하면 [`unpublish_module`]로 뺍니다.

use super::super::machine::Vm;
use super::super::signature::Bindings;
use super::super::type_def::MethodDef;
use super::super::utils::write;
use super::super::value::{DictKey, DictMap, ObjRef, ObjectData, Value, new_module};
use super::super::VmResult;

pub const VERSION: &str = "3.9.18 (hyeonvm)";

const SYS_FUNCTIONS: &[MethodDef] = &[
    MethodDef::static_fn("getrecursionlimit", sys_getrecursionlimit, &[]),
];

/// 빈 `modules`와 주어진 `argv`를 가진 `sys` 모듈
pub fn install(argv: &[String]) -> VmResult<ObjRef> {
    let module = new_module("sys");
    for def in SYS_FUNCTIONS {
        module.set_attr(def.name, def.build("sys")?);
    }
    module.set_attr("modules", Value::dict(DictMap::new()));
    module.set_attr("argv", Value::list(argv.iter().map(Value::str).collect()));
    module.set_attr("version", Value::str(VERSION));
    module.set_attr(
        "version_info",
        Value::tuple(vec![
            Value::Int(3),
            Value::Int(9),
            Value::Int(18),
            Value::str("final"),
            Value::Int(0),
        ]),
    );
    module.set_attr("platform", Value::str(std::env::consts::OS));
    module.set_attr(
        "builtin_module_names",
        Value::tuple(vec![Value::str("builtins"), Value::str("sys")]),
    );
    Ok(module)
}

fn with_modules(sys: &ObjRef, f: impl FnOnce(&mut DictMap)) {
    if let Some(Value::Object(dict)) = sys.get_attr("modules")
        && let ObjectData::Dict(map) = &dict.data
    {
        f(&mut write(map));
    }
}

/// `sys.modules[name] = module`
pub fn publish_module(sys: &ObjRef, name: &str, module: &ObjRef) {
    with_modules(sys, |map| {
        map.insert(
            DictKey::Str(name.to_string()),
            (Value::str(name), Value::Object(module.clone())),
        );
    });
}

/// 본문 실행에 실패한 모듈을 `sys.modules`에서 제거
pub fn unpublish_module(sys: &ObjRef, name: &str) {
    with_modules(sys, |map| {
        map.shift_remove(&DictKey::Str(name.to_string()));
    });
}

fn sys_getrecursionlimit(vm: &mut Vm, _b: Bindings) -> VmResult<Value> {
    Ok(Value::Int(vm.max_frames as i64))
}
