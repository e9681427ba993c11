//! 타입 시스템
//!
//! - **TypeData**: 각 타입의 메타데이터 (이름, 베이스, MRO, 플래그)
//! - **TypeFlags**: 인스턴스 속성 테이블 허용 여부, 수정 가능 여부, 상속 가능 여부
//! - **MethodDef**: Rust로 구현된 메서드 테이블 항목
//! - **BuiltinTypes**: 인터프리터가 소유하는 빌트인 타입 테이블
//!
//! 타입은 그 자체로 `ObjectData::Type` 객체이며, 클래스 dict는 객체의 속성 테이블입니다.

use indexmap::IndexMap;
use std::sync::{Arc, OnceLock};
use strum::IntoEnumIterator;

use super::exception::ExcKind;
use super::signature::{ParamKind, Signature};
use super::value::{
    NativeBinding, NativeFn, NativeFunctionData, ObjRef, Object, ObjectData, Value,
};
use super::VmResult;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u32 {
        /// 인스턴스가 자기 속성 테이블을 가질 수 있음
        const HAS_DICT = 1 << 0;

        /// 생성 후 클래스 dict를 수정할 수 없는 타입 (빌트인)
        const IMMUTABLE = 1 << 1;

        /// 베이스 클래스로 사용할 수 있는 타입
        const BASETYPE  = 1 << 2;
    }
}

pub struct TypeData {
    pub name: String,
    pub bases: Vec<ObjRef>,
    /// 자기 자신을 첫 항목으로 포함
    mro: OnceLock<Vec<ObjRef>>,
    pub flags: TypeFlags,
}

impl TypeData {
    pub fn mro(&self) -> &[ObjRef] {
        self.mro.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_subtype_of(&self, other: &ObjRef) -> bool {
        self.mro().iter().any(|t| Arc::ptr_eq(t, other))
    }

    /// MRO를 따라 클래스 dict 조회 (디스크립터 처리 없음)
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.mro().iter().find_map(|t| t.get_attr(name))
    }

    /// 이름을 정의한 클래스와 값
    pub fn lookup_with_owner(&self, name: &str) -> Option<(ObjRef, Value)> {
        self.mro()
            .iter()
            .find_map(|t| t.get_attr(name).map(|v| (t.clone(), v)))
    }
}

/// 새 타입 객체 생성
///
/// MRO는 C3 선형화로 계산됩니다. 일관된 순서가 없으면 깊이 우선, 처음 나온 것 우선.
/// 타입은 자기 자신을 MRO에 담으므로 순환 참조를 가지며 해제되지 않습니다.
pub fn new_type(
    name: impl Into<String>,
    bases: Vec<ObjRef>,
    flags: TypeFlags,
    dict: IndexMap<String, Value>,
) -> ObjRef {
    let name = name.into();
    let ty = Object::with_attrs(
        ObjectData::Type(TypeData {
            name: name.clone(),
            bases,
            mro: OnceLock::new(),
            flags,
        }),
        dict,
    );
    if let ObjectData::Type(data) = &ty.data {
        let _ = data.mro.set(linearize(&ty, &data.bases));
    }
    if ty.get_attr("__name__").is_none() {
        ty.set_attr("__name__", Value::str(name));
    }
    ty
}

fn linearize(ty: &ObjRef, bases: &[ObjRef]) -> Vec<ObjRef> {
    let base_mros: Vec<&[ObjRef]> = bases
        .iter()
        .filter_map(|b| type_data(b).map(TypeData::mro))
        .collect();
    let mut mro = vec![ty.clone()];
    match c3_merge(base_mros.iter().copied().chain(std::iter::once(bases)).collect()) {
        Some(rest) => mro.extend(rest),
        None => {
            for t in base_mros.iter().flat_map(|m| m.iter()) {
                if !mro.iter().any(|seen| Arc::ptr_eq(seen, t)) {
                    mro.push(t.clone());
                }
            }
        }
    }
    mro
}

/// 각 목록의 머리 중 다른 목록의 꼬리에 없는 것을 차례로 뽑는다
fn c3_merge(mut seqs: Vec<&[ObjRef]>) -> Option<Vec<ObjRef>> {
    let mut out = Vec::new();
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Some(out);
        }
        let head = seqs
            .iter()
            .map(|s| &s[0])
            .find(|h| !seqs.iter().any(|s| s[1..].iter().any(|t| Arc::ptr_eq(t, h))))?
            .clone();
        for s in seqs.iter_mut() {
            let seq: &[ObjRef] = *s;
            if Arc::ptr_eq(&seq[0], &head) {
                *s = &seq[1..];
            }
        }
        out.push(head);
    }
}

pub fn type_data(ty: &ObjRef) -> Option<&TypeData> {
    match &ty.data {
        ObjectData::Type(t) => Some(t),
        _ => None,
    }
}

pub fn type_name_of(ty: &ObjRef) -> &str {
    type_data(ty).map(|t| t.name.as_str()).unwrap_or("?")
}

// ========== 네이티브 메서드 테이블 ==========

/// 빌트인 타입 모듈이 노출하는 메서드 정의
///
/// `params`에는 메서드라면 `self`도 포함된다. `optional`에 나열된 이름은 None이 기본값.
pub struct MethodDef {
    pub name: &'static str,
    pub func: NativeFn,
    pub params: &'static [(&'static str, ParamKind)],
    pub optional: &'static [&'static str],
    pub binding: NativeBinding,
}

impl MethodDef {
    pub const fn method(
        name: &'static str,
        func: NativeFn,
        params: &'static [(&'static str, ParamKind)],
    ) -> Self {
        Self {
            name,
            func,
            params,
            optional: &[],
            binding: NativeBinding::Method,
        }
    }

    pub const fn with_optional(mut self, optional: &'static [&'static str]) -> Self {
        self.optional = optional;
        self
    }

    pub const fn static_fn(
        name: &'static str,
        func: NativeFn,
        params: &'static [(&'static str, ParamKind)],
    ) -> Self {
        Self {
            name,
            func,
            params,
            optional: &[],
            binding: NativeBinding::Static,
        }
    }

    /// 시그니처를 갖춘 NativeFunction 객체로 변환
    pub fn build(&self, owner: &str) -> VmResult<Value> {
        let display = if owner.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", owner, self.name)
        };
        let signature = Signature::from_pairs(display.clone(), self.params, self.optional)?;
        Ok(Value::Object(Object::new(ObjectData::NativeFunction(
            NativeFunctionData {
                name: display,
                func: self.func,
                signature,
                binding: self.binding,
            },
        ))))
    }
}

/// 메서드 테이블을 타입의 클래스 dict에 설치
pub fn install_methods(ty: &ObjRef, defs: &[MethodDef]) -> VmResult<()> {
    let owner = type_name_of(ty).to_string();
    for def in defs {
        ty.set_attr(def.name, def.build(&owner)?);
    }
    Ok(())
}

// ========== 빌트인 타입 테이블 ==========

/// 인터프리터마다 하나씩 존재하는 빌트인 타입 객체들
pub struct BuiltinTypes {
    pub object: ObjRef,
    pub type_: ObjRef,
    pub none_type: ObjRef,
    pub not_implemented_type: ObjRef,
    pub ellipsis_type: ObjRef,
    pub int: ObjRef,
    pub bool_: ObjRef,
    pub float: ObjRef,
    pub str_: ObjRef,
    pub bytes: ObjRef,
    pub tuple: ObjRef,
    pub list: ObjRef,
    pub dict: ObjRef,
    pub set: ObjRef,
    pub frozenset: ObjRef,
    pub range: ObjRef,
    pub slice: ObjRef,
    pub iterator: ObjRef,
    pub function: ObjRef,
    pub builtin_function: ObjRef,
    pub method: ObjRef,
    pub staticmethod: ObjRef,
    pub classmethod: ObjRef,
    pub property: ObjRef,
    pub super_: ObjRef,
    pub code: ObjRef,
    pub cell: ObjRef,
    pub generator: ObjRef,
    pub module: ObjRef,
    pub namespace: ObjRef,
    pub dict_keys: ObjRef,
    pub dict_values: ObjRef,
    pub dict_items: ObjRef,
    pub enumerate: ObjRef,
    pub zip: ObjRef,
    pub map: ObjRef,
    pub filter: ObjRef,
    exceptions: IndexMap<ExcKind, ObjRef>,
}

impl BuiltinTypes {
    /// 빈 클래스 dict를 가진 타입 객체들을 만든다. 메서드는 `builtins::install`이 채운다.
    pub fn new() -> Self {
        let object = new_type(
            "object",
            vec![],
            TypeFlags::IMMUTABLE | TypeFlags::BASETYPE,
            IndexMap::new(),
        );
        let builtin = |name: &str| {
            new_type(
                name,
                vec![object.clone()],
                TypeFlags::IMMUTABLE,
                IndexMap::new(),
            )
        };
        let int = builtin("int");
        let bool_ = new_type("bool", vec![int.clone()], TypeFlags::IMMUTABLE, IndexMap::new());

        let mut exceptions: IndexMap<ExcKind, ObjRef> = IndexMap::new();
        for kind in ExcKind::iter() {
            let bases = match kind.parent() {
                Some(parent) => exceptions.get(&parent).cloned().into_iter().collect(),
                None => vec![object.clone()],
            };
            let ty = new_type(
                kind.name(),
                bases,
                TypeFlags::IMMUTABLE | TypeFlags::BASETYPE | TypeFlags::HAS_DICT,
                IndexMap::new(),
            );
            exceptions.insert(kind, ty);
        }

        Self {
            type_: builtin("type"),
            none_type: builtin("NoneType"),
            not_implemented_type: builtin("NotImplementedType"),
            ellipsis_type: builtin("ellipsis"),
            int,
            bool_,
            float: builtin("float"),
            str_: builtin("str"),
            bytes: builtin("bytes"),
            tuple: builtin("tuple"),
            list: builtin("list"),
            dict: builtin("dict"),
            set: builtin("set"),
            frozenset: builtin("frozenset"),
            range: builtin("range"),
            slice: builtin("slice"),
            iterator: builtin("iterator"),
            function: new_type(
                "function",
                vec![object.clone()],
                TypeFlags::IMMUTABLE | TypeFlags::HAS_DICT,
                IndexMap::new(),
            ),
            builtin_function: builtin("builtin_function_or_method"),
            method: builtin("method"),
            staticmethod: builtin("staticmethod"),
            classmethod: builtin("classmethod"),
            property: builtin("property"),
            super_: builtin("super"),
            code: builtin("code"),
            cell: builtin("cell"),
            generator: builtin("generator"),
            module: new_type(
                "module",
                vec![object.clone()],
                TypeFlags::IMMUTABLE | TypeFlags::HAS_DICT,
                IndexMap::new(),
            ),
            namespace: new_type(
                "namespace",
                vec![object.clone()],
                TypeFlags::IMMUTABLE | TypeFlags::HAS_DICT,
                IndexMap::new(),
            ),
            dict_keys: builtin("dict_keys"),
            dict_values: builtin("dict_values"),
            dict_items: builtin("dict_items"),
            enumerate: builtin("enumerate"),
            zip: builtin("zip"),
            map: builtin("map"),
            filter: builtin("filter"),
            object,
            exceptions,
        }
    }

    pub fn exception(&self, kind: ExcKind) -> &ObjRef {
        // 모든 ExcKind는 생성 시 등록된다
        &self.exceptions[&kind]
    }

    pub fn exceptions(&self) -> impl Iterator<Item = (&ExcKind, &ObjRef)> {
        self.exceptions.iter()
    }

    /// 값의 타입. 인스턴스와 예외는 자기 클래스를, 나머지는 빌트인 타입을 돌려준다.
    pub fn type_of(&self, v: &Value) -> ObjRef {
        let ty = match v {
            Value::None => &self.none_type,
            Value::NotImplemented => &self.not_implemented_type,
            Value::Ellipsis => &self.ellipsis_type,
            Value::Bool(_) => &self.bool_,
            Value::Int(_) => &self.int,
            Value::Float(_) => &self.float,
            Value::Object(o) => match &o.data {
                ObjectData::Instance { class } => class,
                ObjectData::Exception(e) => &e.class,
                ObjectData::Str(_) => &self.str_,
                ObjectData::Bytes(_) => &self.bytes,
                ObjectData::Tuple(_) => &self.tuple,
                ObjectData::List(_) => &self.list,
                ObjectData::Dict(_) => &self.dict,
                ObjectData::Set { frozen: false, .. } => &self.set,
                ObjectData::Set { frozen: true, .. } => &self.frozenset,
                ObjectData::Range { .. } => &self.range,
                ObjectData::Slice { .. } => &self.slice,
                ObjectData::Iterator(_) => &self.iterator,
                ObjectData::Function(_) => &self.function,
                ObjectData::NativeFunction(_) => &self.builtin_function,
                ObjectData::Method { .. } => &self.method,
                ObjectData::StaticMethod(_) => &self.staticmethod,
                ObjectData::ClassMethod(_) => &self.classmethod,
                ObjectData::Property { .. } => &self.property,
                ObjectData::Super { .. } => &self.super_,
                ObjectData::Code(_) => &self.code,
                ObjectData::Cell(_) => &self.cell,
                ObjectData::Generator(_) => &self.generator,
                ObjectData::Module(_) => &self.module,
                ObjectData::Type(_) => &self.type_,
                ObjectData::Namespace => &self.namespace,
            },
        };
        ty.clone()
    }

    /// builtins 모듈에 노출되는 타입 (이름, 객체)
    pub fn exposed(&self) -> Vec<(&str, &ObjRef)> {
        let mut out: Vec<(&str, &ObjRef)> = vec![
            ("object", &self.object),
            ("type", &self.type_),
            ("int", &self.int),
            ("bool", &self.bool_),
            ("float", &self.float),
            ("str", &self.str_),
            ("bytes", &self.bytes),
            ("tuple", &self.tuple),
            ("list", &self.list),
            ("dict", &self.dict),
            ("set", &self.set),
            ("frozenset", &self.frozenset),
            ("range", &self.range),
            ("slice", &self.slice),
            ("staticmethod", &self.staticmethod),
            ("classmethod", &self.classmethod),
            ("property", &self.property),
            ("super", &self.super_),
            ("enumerate", &self.enumerate),
            ("zip", &self.zip),
            ("map", &self.map),
            ("filter", &self.filter),
        ];
        out.extend(self.exceptions.iter().map(|(k, t)| (k.name(), t)));
        out
    }
}

impl Default for BuiltinTypes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ty: &ObjRef) -> Vec<String> {
        type_data(ty)
            .map(|t| t.mro().iter().map(|m| type_name_of(m).to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_mro_diamond_is_c3() {
        let object = new_type("object", vec![], TypeFlags::BASETYPE, IndexMap::new());
        let a = new_type("A", vec![object.clone()], TypeFlags::BASETYPE, IndexMap::new());
        let b = new_type("B", vec![a.clone()], TypeFlags::BASETYPE, IndexMap::new());
        let c = new_type("C", vec![a.clone()], TypeFlags::BASETYPE, IndexMap::new());
        let d = new_type("D", vec![b, c], TypeFlags::BASETYPE, IndexMap::new());

        assert_eq!(names(&d), vec!["D", "B", "C", "A", "object"]);
        // 안정성: 다시 계산해도 같은 결과
        assert_eq!(names(&d), names(&d));
    }

    #[test]
    fn test_builtin_hierarchy() {
        let types = BuiltinTypes::new();
        assert_eq!(names(&types.bool_), vec!["bool", "int", "object"]);
        assert_eq!(
            names(types.exception(ExcKind::ZeroDivisionError)),
            vec![
                "ZeroDivisionError",
                "ArithmeticError",
                "Exception",
                "BaseException",
                "object"
            ]
        );
        let t = type_data(types.exception(ExcKind::RecursionError)).map(|t| t.name.clone());
        assert_eq!(t.as_deref(), Some("RecursionError"));
    }

    #[test]
    fn test_every_type_appears_once_first() {
        let types = BuiltinTypes::new();
        for (_, ty) in types.exposed() {
            let data = type_data(ty).unwrap();
            assert!(Arc::ptr_eq(&data.mro()[0], ty));
            let count = data.mro().iter().filter(|t| Arc::ptr_eq(t, ty)).count();
            assert_eq!(count, 1);
            assert!(data.is_subtype_of(&types.object));
        }
    }

    #[test]
    fn test_type_of() {
        let types = BuiltinTypes::new();
        assert!(Arc::ptr_eq(&types.type_of(&Value::Bool(true)), &types.bool_));
        assert!(Arc::ptr_eq(&types.type_of(&Value::str("x")), &types.str_));
        assert!(Arc::ptr_eq(&types.type_of(&Value::Object(types.int.clone())), &types.type_));
    }
}
