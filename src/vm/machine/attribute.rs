//! 속성 해석
//!
//! 인스턴스 테이블 → 타입 MRO 순서로 찾고, 클래스 dict에서 찾은 값에는
//! 디스크립터 규칙(함수 바인딩, classmethod, staticmethod, property)을 적용합니다.

use std::sync::Arc;

use super::{Vm, VmResult};
use crate::vm::exception::{attribute_error, type_error};
use crate::vm::type_def::{TypeFlags, type_data, type_name_of};
use crate::vm::value::{DictKey, NativeBinding, ObjRef, Object, ObjectData, Value};

impl Vm {
    /// `obj.name`. 없으면 AttributeError
    pub fn get_attribute(&mut self, obj: &Value, name: &str) -> VmResult<Value> {
        match self.find_attribute(obj, name)? {
            Some(v) => Ok(v),
            None => Err(self.missing_attribute(obj, name)),
        }
    }

    /// `obj.name`. 없으면 None
    pub fn find_attribute(&mut self, obj: &Value, name: &str) -> VmResult<Option<Value>> {
        if name == "__class__" {
            return Ok(Some(Value::Object(self.type_of(obj))));
        }

        if let Value::Object(o) = obj {
            match &o.data {
                ObjectData::Type(t) => {
                    match name {
                        "__dict__" => return Ok(Some(attrs_as_dict(o))),
                        "__mro__" => {
                            let mro = t.mro().iter().cloned().map(Value::Object).collect();
                            return Ok(Some(Value::tuple(mro)));
                        }
                        "__bases__" => {
                            let bases = t.bases.iter().cloned().map(Value::Object).collect();
                            return Ok(Some(Value::tuple(bases)));
                        }
                        _ => {}
                    }
                    if let Some(v) = t.lookup(name) {
                        return Ok(Some(bind_on_type(v, obj)));
                    }
                }
                ObjectData::Super { class, receiver } => {
                    if let Some(v) = self.super_lookup(class, receiver, name)? {
                        return Ok(Some(v));
                    }
                }
                _ => {
                    if name == "__dict__" && self.has_instance_dict(obj) {
                        return Ok(Some(attrs_as_dict(o)));
                    }
                    if let Some(v) = o.get_attr(name) {
                        return Ok(Some(v));
                    }
                }
            }
        }

        let ty = self.type_of(obj);
        if let Some(attr) = type_data(&ty).and_then(|t| t.lookup(name)) {
            return self.descriptor_get(attr, obj, &ty).map(Some);
        }

        // 사용자 정의 __getattr__ 훅
        if let Some(hook) = type_data(&ty).and_then(|t| t.lookup("__getattr__")) {
            let bound = self.descriptor_get(hook, obj, &ty)?;
            return match self.call(&bound, vec![Value::str(name)], Vec::new()) {
                Ok(v) => Ok(Some(v)),
                Err(e) if self.error_matches(&e, crate::vm::exception::ExcKind::AttributeError) => {
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }
        Ok(None)
    }

    pub fn has_attribute(&mut self, obj: &Value, name: &str) -> VmResult<bool> {
        Ok(self.find_attribute(obj, name)?.is_some())
    }

    fn missing_attribute(&self, obj: &Value, name: &str) -> crate::vm::VmError {
        match obj {
            Value::Object(o) if matches!(o.data, ObjectData::Type(_)) => attribute_error(format!(
                "type object '{}' has no attribute '{}'",
                type_name_of(o),
                name
            )),
            Value::Object(o) if matches!(o.data, ObjectData::Module(_)) => {
                let module = match &o.data {
                    ObjectData::Module(m) => m.name.clone(),
                    _ => String::new(),
                };
                attribute_error(format!("module '{}' has no attribute '{}'", module, name))
            }
            _ => attribute_error(format!(
                "'{}' object has no attribute '{}'",
                self.type_name(obj),
                name
            )),
        }
    }

    /// 클래스 dict에서 찾은 값에 디스크립터 규칙 적용
    pub(crate) fn descriptor_get(&mut self, attr: Value, obj: &Value, ty: &ObjRef) -> VmResult<Value> {
        let Value::Object(a) = &attr else {
            return Ok(attr);
        };
        match &a.data {
            ObjectData::Function(_) => Ok(bound_method(obj.clone(), attr.clone())),
            ObjectData::NativeFunction(n) if n.binding == NativeBinding::Method => {
                Ok(bound_method(obj.clone(), attr.clone()))
            }
            ObjectData::ClassMethod(inner) => {
                Ok(bound_method(Value::Object(ty.clone()), inner.clone()))
            }
            ObjectData::StaticMethod(inner) => Ok(inner.clone()),
            ObjectData::Property { getter, .. } => {
                if getter.is_none() {
                    return Err(attribute_error("unreadable attribute"));
                }
                let getter = getter.clone();
                self.call(&getter, vec![obj.clone()], Vec::new())
            }
            _ => Ok(attr),
        }
    }

    /// super() 객체에서의 조회: receiver MRO에서 `class` 다음부터 검색
    fn super_lookup(&mut self, class: &ObjRef, receiver: &Value, name: &str) -> VmResult<Option<Value>> {
        let start_type = match receiver {
            Value::Object(o) if matches!(o.data, ObjectData::Type(_)) => o.clone(),
            other => self.type_of(other),
        };
        let mro: Vec<ObjRef> = type_data(&start_type)
            .map(|t| t.mro().to_vec())
            .unwrap_or_default();
        let after = mro
            .iter()
            .position(|t| Arc::ptr_eq(t, class))
            .map(|p| p + 1)
            .unwrap_or(mro.len());
        for ty in &mro[after..] {
            if let Some(attr) = ty.get_attr(name) {
                if receiver.is_type() {
                    return Ok(Some(bind_on_type(attr, receiver)));
                }
                return self.descriptor_get(attr, receiver, &start_type).map(Some);
            }
        }
        Ok(None)
    }

    fn has_instance_dict(&self, obj: &Value) -> bool {
        let ty = self.type_of(obj);
        type_data(&ty).is_some_and(|t| t.flags.contains(TypeFlags::HAS_DICT))
    }

    /// `obj.name = value`
    pub fn set_attribute(&mut self, obj: &Value, name: &str, value: Value) -> VmResult<()> {
        let ty = self.type_of(obj);
        if let Some(prop) = type_data(&ty).and_then(|t| t.lookup(name))
            && let Value::Object(p) = &prop
            && let ObjectData::Property { setter, .. } = &p.data
        {
            if setter.is_none() {
                return Err(attribute_error("can't set attribute"));
            }
            let setter = setter.clone();
            self.call(&setter, vec![obj.clone(), value], Vec::new())?;
            return Ok(());
        }

        match obj {
            Value::Object(o) => match &o.data {
                ObjectData::Type(t) => {
                    if t.flags.contains(TypeFlags::IMMUTABLE) {
                        return Err(type_error(format!(
                            "can't set attributes of built-in/extension type '{}'",
                            t.name
                        )));
                    }
                    o.set_attr(name, value);
                    Ok(())
                }
                _ if self.has_instance_dict(obj) => {
                    o.set_attr(name, value);
                    Ok(())
                }
                _ => Err(self.missing_attribute(obj, name)),
            },
            _ => Err(self.missing_attribute(obj, name)),
        }
    }

    /// `del obj.name`
    pub fn delete_attribute(&mut self, obj: &Value, name: &str) -> VmResult<()> {
        if let Value::Object(o) = obj {
            if let ObjectData::Type(t) = &o.data
                && t.flags.contains(TypeFlags::IMMUTABLE)
            {
                return Err(type_error(format!(
                    "can't set attributes of built-in/extension type '{}'",
                    t.name
                )));
            }
            if o.del_attr(name) {
                return Ok(());
            }
        }
        Err(self.missing_attribute(obj, name))
    }

    // ========== isinstance / issubclass ==========

    /// `object`는 항상 참, `type`은 값이 타입이면 참. 그 외는 MRO 포함 여부
    pub fn isinstance(&self, v: &Value, class: &ObjRef) -> bool {
        let types = self.types();
        if Arc::ptr_eq(class, &types.object) {
            return true;
        }
        if Arc::ptr_eq(class, &types.type_) {
            return v.is_type();
        }
        let ty = self.type_of(v);
        self.issubclass(&ty, class)
    }

    pub fn issubclass(&self, sub: &ObjRef, class: &ObjRef) -> bool {
        if Arc::ptr_eq(class, &self.types().object) {
            return true;
        }
        type_data(sub).is_some_and(|t| t.is_subtype_of(class))
    }
}

fn bound_method(receiver: Value, func: Value) -> Value {
    Value::Object(Object::new(ObjectData::Method { receiver, func }))
}

/// 타입 객체에서 직접 꺼낸 클래스 dict 값: 함수는 바인딩 없이, classmethod는 타입에 바인딩
fn bind_on_type(attr: Value, ty: &Value) -> Value {
    if let Value::Object(a) = &attr {
        match &a.data {
            ObjectData::ClassMethod(inner) => return bound_method(ty.clone(), inner.clone()),
            ObjectData::StaticMethod(inner) => return inner.clone(),
            _ => {}
        }
    }
    attr
}

/// 속성 테이블 스냅샷을 str 키 dict로
fn attrs_as_dict(o: &ObjRef) -> Value {
    let map = o
        .attr_items()
        .into_iter()
        .map(|(k, v)| (DictKey::Str(k.clone()), (Value::str(k), v)))
        .collect();
    Value::dict(map)
}
