//! 호출과 매직 메서드 디스패치
//!
//! 모든 연산자, 진리값, 문자열 변환, 반복은 타입 MRO의 특수 메서드를 거칩니다.
//! 빌트인 타입도 예외 없이 같은 경로(클래스 dict의 네이티브 함수)를 사용합니다.

use indexmap::IndexMap;
use std::sync::Arc;

use super::frame::Frame;
use super::{FrameExit, Vm, VmError, VmErrorKind, VmResult, err};
use crate::vm::exception::{ExcKind, type_error};
use crate::vm::type_def::type_data;
use crate::vm::value::{DictKey, FunctionData, NativeBinding, ObjRef, ObjectData, Value};

// ========== 연산자 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Xor,
    Or,
}

impl BinOp {
    pub fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::MatMul => "__matmul__",
            Self::TrueDiv => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::LShift => "__lshift__",
            Self::RShift => "__rshift__",
            Self::And => "__and__",
            Self::Xor => "__xor__",
            Self::Or => "__or__",
        }
    }

    pub fn reflected(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::Sub => "__rsub__",
            Self::Mul => "__rmul__",
            Self::MatMul => "__rmatmul__",
            Self::TrueDiv => "__rtruediv__",
            Self::FloorDiv => "__rfloordiv__",
            Self::Mod => "__rmod__",
            Self::Pow => "__rpow__",
            Self::LShift => "__rlshift__",
            Self::RShift => "__rrshift__",
            Self::And => "__rand__",
            Self::Xor => "__rxor__",
            Self::Or => "__ror__",
        }
    }

    pub fn inplace(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::Sub => "__isub__",
            Self::Mul => "__imul__",
            Self::MatMul => "__imatmul__",
            Self::TrueDiv => "__itruediv__",
            Self::FloorDiv => "__ifloordiv__",
            Self::Mod => "__imod__",
            Self::Pow => "__ipow__",
            Self::LShift => "__ilshift__",
            Self::RShift => "__irshift__",
            Self::And => "__iand__",
            Self::Xor => "__ixor__",
            Self::Or => "__ior__",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::MatMul => "@",
            Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "** or pow()",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::And => "&",
            Self::Xor => "^",
            Self::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    /// COMPARE_OP 인자에서 변환
    pub fn from_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => Self::Lt,
            1 => Self::Le,
            2 => Self::Eq,
            3 => Self::Ne,
            4 => Self::Gt,
            5 => Self::Ge,
            _ => return None,
        })
    }

    pub fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// 피연산자를 뒤바꿨을 때의 연산
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl Vm {
    // ========== 호출 ==========

    /// 임의의 호출 가능 값 호출. 인자 바인딩은 시그니처 바인더가 담당
    pub fn call(
        &mut self,
        callable: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> VmResult<Value> {
        let Value::Object(obj) = callable else {
            return self.call_via_dunder(callable, args, kwargs);
        };
        match &obj.data {
            ObjectData::Function(f) => self.call_function(f, args, kwargs, None),
            ObjectData::NativeFunction(n) => {
                let bindings = n.signature.bind(args, kwargs)?;
                (n.func)(self, bindings)
            }
            ObjectData::Method { receiver, func } => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend(args);
                self.call(func, full, kwargs)
            }
            ObjectData::Type(_) => self.construct(obj, args, kwargs),
            _ => self.call_via_dunder(callable, args, kwargs),
        }
    }

    fn call_via_dunder(
        &mut self,
        callable: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> VmResult<Value> {
        let ty = self.type_of(callable);
        match type_data(&ty).and_then(|t| t.lookup("__call__")) {
            Some(attr) => {
                let bound = self.descriptor_get(attr, callable, &ty)?;
                self.call(&bound, args, kwargs)
            }
            None => Err(type_error(format!(
                "'{}' object is not callable",
                self.type_name(callable)
            ))),
        }
    }

    /// 사용자 함수 호출: 바인딩 → 프레임 생성 → 실행 (제너레이터 코드는 실행하지 않음)
    pub(crate) fn call_function(
        &mut self,
        f: &FunctionData,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        locals: Option<ObjRef>,
    ) -> VmResult<Value> {
        let bindings = f.signature.bind(args, kwargs)?;
        let mut frame = Frame::new(
            f.code.clone(),
            f.code.name.clone(),
            f.globals.clone(),
            locals,
            &f.closure,
            self.max_stack,
        );
        frame.bind_arguments(bindings);

        if f.code.is_generator() {
            return Ok(self.make_generator(frame, f));
        }
        match self.run_frame(frame)?.0 {
            FrameExit::Return(v) => Ok(v),
            FrameExit::Yield(_) => Err(err(
                VmErrorKind::FrameState,
                format!("non-generator code '{}' yielded", f.code.name),
            )),
        }
    }

    /// 클래스 본문 함수를 이름공간 로컬과 함께 실행
    pub fn run_class_body(&mut self, func: &Value, namespace: &ObjRef) -> VmResult<Value> {
        match func {
            Value::Object(o) => match &o.data {
                ObjectData::Function(f) => {
                    self.call_function(f, Vec::new(), Vec::new(), Some(namespace.clone()))
                }
                _ => Err(type_error("__build_class__: func must be a function")),
            },
            _ => Err(type_error("__build_class__: func must be a function")),
        }
    }

    /// 타입 호출: `__new__`로 만들고, 결과가 그 타입의 인스턴스면 `__init__` 호출
    fn construct(
        &mut self,
        ty: &ObjRef,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> VmResult<Value> {
        if Arc::ptr_eq(ty, &self.types().type_) && args.len() == 1 && kwargs.is_empty() {
            return Ok(Value::Object(self.type_of(&args[0])));
        }
        let Some(data) = type_data(ty) else {
            return Err(type_error("construct: not a type"));
        };
        let new = match data.lookup("__new__") {
            Some(Value::Object(o)) => match &o.data {
                ObjectData::StaticMethod(inner) => inner.clone(),
                _ => Value::Object(o),
            },
            _ => {
                return Err(type_error(format!(
                    "cannot create '{}' instances",
                    data.name
                )));
            }
        };

        let mut new_args = Vec::with_capacity(args.len() + 1);
        new_args.push(Value::Object(ty.clone()));
        new_args.extend(args.iter().cloned());
        let instance = self.call(&new, new_args, kwargs.clone())?;
        if !self.isinstance(&instance, ty) {
            return Ok(instance);
        }

        let inst_ty = self.type_of(&instance);
        if let Some(init) = type_data(&inst_ty).and_then(|t| t.lookup("__init__")) {
            let bound = self.descriptor_get(init, &instance, &inst_ty)?;
            let ret = self.call(&bound, args, kwargs)?;
            if !ret.is_none() {
                return Err(type_error(format!(
                    "__init__() should return None, not '{}'",
                    self.type_name(&ret)
                )));
            }
        }
        Ok(instance)
    }

    /// `obj.name(*args)`
    pub fn call_method(&mut self, obj: &Value, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let method = self.get_attribute(obj, name)?;
        self.call(&method, args, Vec::new())
    }

    /// 타입 MRO에서 특수 메서드를 찾아 receiver와 함께 호출. 정의되지 않았으면 None
    pub fn call_special(&mut self, obj: &Value, name: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        let ty = self.type_of(obj);
        let Some(attr) = type_data(&ty).and_then(|t| t.lookup(name)) else {
            return Ok(None);
        };
        if attr.is_none() {
            return Ok(None);
        }
        let direct = match &attr {
            Value::Object(a) => match &a.data {
                ObjectData::Function(_) => true,
                ObjectData::NativeFunction(n) => n.binding == NativeBinding::Method,
                _ => false,
            },
            _ => false,
        };
        if direct {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(obj.clone());
            full.extend(args);
            return self.call(&attr, full, Vec::new()).map(Some);
        }
        let bound = self.descriptor_get(attr, obj, &ty)?;
        self.call(&bound, args, Vec::new()).map(Some)
    }

    /// 특수 메서드 호출 결과가 NotImplemented가 아니면 Some
    fn try_special(&mut self, obj: &Value, name: &str, other: &Value) -> VmResult<Option<Value>> {
        match self.call_special(obj, name, vec![other.clone()])? {
            Some(v) if !v.is_not_implemented() => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// 오른쪽 피연산자 타입이 왼쪽의 하위 타입이고 반사 메서드를 재정의했는가
    fn reflected_first(&self, ta: &ObjRef, tb: &ObjRef, reflected: &str) -> bool {
        if Arc::ptr_eq(ta, tb) || !self.issubclass(tb, ta) {
            return false;
        }
        let own = type_data(tb).and_then(|t| t.lookup(reflected));
        let base = type_data(ta).and_then(|t| t.lookup(reflected));
        match (own, base) {
            (Some(a), Some(b)) => !a.is(&b),
            (Some(_), None) => true,
            _ => false,
        }
    }

    // ========== 이항/단항 연산 ==========

    pub fn binary_op(&mut self, op: BinOp, a: &Value, b: &Value) -> VmResult<Value> {
        let ta = self.type_of(a);
        let tb = self.type_of(b);
        let same = Arc::ptr_eq(&ta, &tb);
        let reflected_first = self.reflected_first(&ta, &tb, op.reflected());

        if reflected_first && let Some(r) = self.try_special(b, op.reflected(), a)? {
            return Ok(r);
        }
        if let Some(r) = self.try_special(a, op.dunder(), b)? {
            return Ok(r);
        }
        if !same && !reflected_first && let Some(r) = self.try_special(b, op.reflected(), a)? {
            return Ok(r);
        }
        Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            self.type_name(a),
            self.type_name(b)
        )))
    }

    /// 제자리 연산: `__iop__`을 먼저 시도하고 없으면 일반 이항 연산
    pub fn inplace_op(&mut self, op: BinOp, a: &Value, b: &Value) -> VmResult<Value> {
        if let Some(r) = self.try_special(a, op.inplace(), b)? {
            return Ok(r);
        }
        let symbol = format!("{}=", op.symbol());
        self.binary_op(op, a, b).map_err(|e| match e {
            VmError::Pending { kind: ExcKind::TypeError, message }
                if message.starts_with("unsupported operand") =>
            {
                type_error(message.replacen(op.symbol(), &symbol, 1))
            }
            other => other,
        })
    }

    pub fn unary_op(&mut self, name: &str, symbol: &str, v: &Value) -> VmResult<Value> {
        match self.call_special(v, name, Vec::new())? {
            Some(r) => Ok(r),
            None => Err(type_error(format!(
                "bad operand type for unary {}: '{}'",
                symbol,
                self.type_name(v)
            ))),
        }
    }

    // ========== 비교 ==========

    pub fn compare(&mut self, op: CompareOp, a: &Value, b: &Value) -> VmResult<Value> {
        let ta = self.type_of(a);
        let tb = self.type_of(b);
        let swapped = op.swapped();
        let reflected_first = self.reflected_first(&ta, &tb, swapped.dunder());

        if reflected_first && let Some(r) = self.try_special(b, swapped.dunder(), a)? {
            return Ok(r);
        }
        if let Some(r) = self.try_special(a, op.dunder(), b)? {
            return Ok(r);
        }
        if !reflected_first && let Some(r) = self.try_special(b, swapped.dunder(), a)? {
            return Ok(r);
        }
        match op {
            CompareOp::Eq => Ok(Value::Bool(a.is(b))),
            CompareOp::Ne => Ok(Value::Bool(!a.is(b))),
            _ => Err(type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    /// 파이썬 `==`
    pub fn eq(&mut self, a: &Value, b: &Value) -> VmResult<bool> {
        if a.is(b) {
            return Ok(true);
        }
        let r = self.compare(CompareOp::Eq, a, b)?;
        self.is_true(&r)
    }

    // ========== 진리값 / 문자열 ==========

    /// `__bool__` → `__len__` → True
    pub fn is_true(&mut self, v: &Value) -> VmResult<bool> {
        match self.call_special(v, "__bool__", Vec::new())? {
            Some(Value::Bool(b)) => return Ok(b),
            Some(other) => {
                return Err(type_error(format!(
                    "__bool__ should return bool, returned {}",
                    self.type_name(&other)
                )));
            }
            None => {}
        }
        match self.call_special(v, "__len__", Vec::new())? {
            Some(n) => match n.as_int() {
                Some(n) => Ok(n != 0),
                None => Err(type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    self.type_name(&n)
                ))),
            },
            None => Ok(true),
        }
    }

    /// `str(v)`
    pub fn to_str(&mut self, v: &Value) -> VmResult<String> {
        if let Some(s) = v.as_str() {
            return Ok(s.to_string());
        }
        match self.call_special(v, "__str__", Vec::new())? {
            Some(r) => self.expect_string_result(r, "__str__"),
            None => self.repr(v),
        }
    }

    /// `repr(v)`
    pub fn repr(&mut self, v: &Value) -> VmResult<String> {
        match self.call_special(v, "__repr__", Vec::new())? {
            Some(r) => self.expect_string_result(r, "__repr__"),
            None => Ok(format!("<{} object>", self.type_name(v))),
        }
    }

    fn expect_string_result(&self, r: Value, method: &str) -> VmResult<String> {
        match r.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(type_error(format!(
                "{} returned non-string (type {})",
                method,
                self.type_name(&r)
            ))),
        }
    }

    /// `format(v, spec)`
    pub fn format(&mut self, v: &Value, spec: &str) -> VmResult<String> {
        match self.call_special(v, "__format__", vec![Value::str(spec)])? {
            Some(r) => self.expect_string_result(r, "__format__"),
            None => self.to_str(v),
        }
    }

    // ========== 반복 ==========

    /// `iter(v)`
    pub fn iter(&mut self, v: &Value) -> VmResult<Value> {
        match self.call_special(v, "__iter__", Vec::new())? {
            Some(it) => Ok(it),
            None => Err(type_error(format!(
                "'{}' object is not iterable",
                self.type_name(v)
            ))),
        }
    }

    /// `next(it)`. 소진되면 None
    pub fn next(&mut self, it: &Value) -> VmResult<Option<Value>> {
        match self.call_special(it, "__next__", Vec::new()) {
            Ok(Some(v)) => Ok(Some(v)),
            Ok(None) => Err(type_error(format!(
                "'{}' object is not an iterator",
                self.type_name(it)
            ))),
            Err(e) if self.error_matches(&e, ExcKind::StopIteration) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 반복 가능 값의 모든 항목
    pub fn collect(&mut self, v: &Value) -> VmResult<Vec<Value>> {
        let it = self.iter(v)?;
        let mut out = Vec::new();
        while let Some(item) = self.next(&it)? {
            out.push(item);
        }
        Ok(out)
    }

    // ========== 해시 / 컨테이너 ==========

    /// `hash(v)`
    pub fn hash(&mut self, v: &Value) -> VmResult<i64> {
        match self.call_special(v, "__hash__", Vec::new())? {
            Some(h) => h.as_int().ok_or_else(|| {
                type_error("__hash__ method should return an integer")
            }),
            None => Err(type_error(format!("unhashable type: '{}'", self.type_name(v)))),
        }
    }

    /// dict/set 키. 리스트, dict, set은 해시 불가
    pub fn dict_key(&self, v: &Value) -> VmResult<DictKey> {
        DictKey::from_value(v)
            .map_err(|name| type_error(format!("unhashable type: '{}'", name)))
    }

    /// `item in container`
    pub fn contains(&mut self, container: &Value, item: &Value) -> VmResult<bool> {
        if let Some(r) = self.call_special(container, "__contains__", vec![item.clone()])? {
            return self.is_true(&r);
        }
        let ty = self.type_of(container);
        if type_data(&ty).and_then(|t| t.lookup("__iter__")).is_none() {
            return Err(type_error(format!(
                "argument of type '{}' is not iterable",
                self.type_name(container)
            )));
        }
        let it = self.iter(container)?;
        while let Some(x) = self.next(&it)? {
            if self.eq(&x, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn getitem(&mut self, obj: &Value, key: &Value) -> VmResult<Value> {
        if obj.is_type()
            && let Some(hook) = self.find_attribute(obj, "__class_getitem__")?
        {
            return self.call(&hook, vec![key.clone()], Vec::new());
        }
        match self.call_special(obj, "__getitem__", vec![key.clone()])? {
            Some(v) => Ok(v),
            None => Err(type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name(obj)
            ))),
        }
    }

    pub fn setitem(&mut self, obj: &Value, key: &Value, value: Value) -> VmResult<()> {
        match self.call_special(obj, "__setitem__", vec![key.clone(), value])? {
            Some(_) => Ok(()),
            None => Err(type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name(obj)
            ))),
        }
    }

    pub fn delitem(&mut self, obj: &Value, key: &Value) -> VmResult<()> {
        match self.call_special(obj, "__delitem__", vec![key.clone()])? {
            Some(_) => Ok(()),
            None => Err(type_error(format!(
                "'{}' object doesn't support item deletion",
                self.type_name(obj)
            ))),
        }
    }

    /// `len(v)`
    pub fn len(&mut self, v: &Value) -> VmResult<usize> {
        match self.call_special(v, "__len__", Vec::new())? {
            Some(n) => match n.as_int() {
                Some(n) if n >= 0 => Ok(n as usize),
                Some(_) => Err(crate::vm::exception::value_error("__len__() should return >= 0")),
                None => Err(type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    self.type_name(&n)
                ))),
            },
            None => Err(type_error(format!(
                "object of type '{}' has no len()",
                self.type_name(v)
            ))),
        }
    }

    /// 매핑의 (키, 값) 쌍. dict는 직접, 그 외는 `keys()`와 `__getitem__` 사용
    pub fn mapping_items(&mut self, mapping: &Value) -> VmResult<Vec<(Value, Value)>> {
        if let Value::Object(o) = mapping
            && let ObjectData::Dict(map) = &o.data
        {
            return Ok(crate::vm::utils::read(map).values().cloned().collect());
        }
        let keys = self.call_method(mapping, "keys", Vec::new()).map_err(|_| {
            type_error(format!(
                "'{}' object is not a mapping",
                self.type_name(mapping)
            ))
        })?;
        let mut out = Vec::new();
        for k in self.collect(&keys)? {
            let v = self.getitem(mapping, &k)?;
            out.push((k, v));
        }
        Ok(out)
    }

    /// str 키만 허용하는 키워드 인자 목록
    pub fn keyword_items(&mut self, mapping: &Value) -> VmResult<Vec<(String, Value)>> {
        let mut seen: IndexMap<String, Value> = IndexMap::new();
        for (k, v) in self.mapping_items(mapping)? {
            let Some(name) = k.as_str() else {
                return Err(type_error("keywords must be strings"));
            };
            seen.insert(name.to_string(), v);
        }
        Ok(seen.into_iter().collect())
    }
}
