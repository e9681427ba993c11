//! 런타임 값과 객체 모델
//!
//! - **Value**: 즉시값(None, Bool, Int, Float 등) + 힙 객체 참조
//! - **Object**: 타입별 payload(`ObjectData`) + 지연 생성되는 속성 테이블
//! - **ObjectData**: 빌트인 종류의 닫힌 열거형. 확장 지점은 `NativeFunction`과 `Instance`
//!
//! 값은 스레드 간에 공유될 수 있어야 하므로(모듈 레지스트리) `Arc`와 락을 사용합니다.

use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use super::bytecode::CodeObject;
use super::exception::FrameInfo;
use super::machine::Vm;
use super::machine::frame::Frame;
use super::signature::{Bindings, Signature};
use super::type_def::TypeData;
use super::utils::{read, write};
use super::VmResult;

pub type ObjRef = Arc<Object>;

/// 클로저가 공유하는 셀
pub type CellRef = Arc<RwLock<Option<Value>>>;

/// 네이티브 함수 구현. 인자는 시그니처 바인더를 거쳐 이름으로 전달된다.
pub type NativeFn = fn(&mut Vm, Bindings) -> VmResult<Value>;

pub type DictMap = IndexMap<DictKey, (Value, Value)>;
pub type SetMap = IndexMap<DictKey, Value>;

// ========== Value ==========

#[derive(Clone)]
pub enum Value {
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Object(ObjRef),
}

impl Value {
    // ----- 생성 헬퍼 -----

    pub fn str(s: impl Into<String>) -> Value {
        Value::Object(Object::new(ObjectData::Str(s.into())))
    }

    pub fn bytes(b: Vec<u8>) -> Value {
        Value::Object(Object::new(ObjectData::Bytes(b)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Object(Object::new(ObjectData::Tuple(items)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::Object(Object::new(ObjectData::List(RwLock::new(items))))
    }

    pub fn dict(map: DictMap) -> Value {
        Value::Object(Object::new(ObjectData::Dict(RwLock::new(map))))
    }

    pub fn set(items: SetMap, frozen: bool) -> Value {
        Value::Object(Object::new(ObjectData::Set {
            items: RwLock::new(items),
            frozen,
        }))
    }

    /// 상수 풀의 frozenset. 해시 불가능한 항목은 식별자로 키를 만든다.
    pub fn frozenset_from_hashable(items: Vec<Value>) -> Value {
        let map = items
            .into_iter()
            .map(|v| {
                let key = DictKey::from_value(&v).unwrap_or_else(|_| DictKey::identity(&v));
                (key, v)
            })
            .collect();
        Value::set(map, true)
    }

    pub fn code(code: Arc<CodeObject>) -> Value {
        Value::Object(Object::new(ObjectData::Code(code)))
    }

    pub fn cell(cell: CellRef) -> Value {
        Value::Object(Object::new(ObjectData::Cell(cell)))
    }

    pub fn iterator(state: IterState) -> Value {
        Value::Object(Object::new(ObjectData::Iterator(state)))
    }

    // ----- 조회 헬퍼 -----

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Value::NotImplemented)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Object(o) => match &o.data {
                ObjectData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// int 또는 bool을 i64로
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// int, bool, float를 f64로
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match self {
            Value::Object(o) => match &o.data {
                ObjectData::Type(t) => Some(t),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_type(&self) -> bool {
        self.as_type().is_some()
    }

    pub fn tuple_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Object(o) => match &o.data {
                ObjectData::Tuple(items) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// 키가 모두 str인 dict → (이름, 값) 목록
    pub fn str_keyed_items(&self) -> Option<Vec<(String, Value)>> {
        match self {
            Value::Object(o) => match &o.data {
                ObjectData::Dict(map) => read(map)
                    .values()
                    .map(|(k, v)| k.as_str().map(|s| (s.to_string(), v.clone())))
                    .collect(),
                _ => None,
            },
            _ => None,
        }
    }

    /// 식별자 비교 (`is`)
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None)
            | (Value::NotImplemented, Value::NotImplemented)
            | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `id()`에 쓰이는 식별 번호
    pub fn identity(&self) -> usize {
        match self {
            Value::Object(o) => Arc::as_ptr(o) as usize,
            Value::None => 0x10,
            Value::NotImplemented => 0x20,
            Value::Ellipsis => 0x30,
            Value::Bool(b) => 0x40 + *b as usize,
            Value::Int(i) => *i as usize,
            Value::Float(f) => f.to_bits() as usize,
        }
    }
}

/// 테스트/내부 비교용 구조적 동등성 (파이썬 `==` 의미론은 Vm::eq 사용)
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                Arc::ptr_eq(a, b) || a.data.structural_eq(&b.data)
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            _ => self.is(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::NotImplemented => write!(f, "NotImplemented"),
            Value::Ellipsis => write!(f, "Ellipsis"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Object(o) => write!(f, "{:?}", o),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

// ========== Object ==========

pub struct Object {
    pub data: ObjectData,
    /// 지연 생성되는 삽입 순서 유지 속성 테이블
    attrs: RwLock<Option<IndexMap<String, Value>>>,
}

impl Object {
    pub fn new(data: ObjectData) -> ObjRef {
        Arc::new(Self {
            data,
            attrs: RwLock::new(None),
        })
    }

    pub fn with_attrs(data: ObjectData, attrs: IndexMap<String, Value>) -> ObjRef {
        Arc::new(Self {
            data,
            attrs: RwLock::new(Some(attrs)),
        })
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        read(&self.attrs).as_ref().and_then(|t| t.get(name).cloned())
    }

    pub fn set_attr(&self, name: impl Into<String>, value: Value) {
        write(&self.attrs)
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), value);
    }

    pub fn del_attr(&self, name: &str) -> bool {
        write(&self.attrs)
            .as_mut()
            .and_then(|t| t.shift_remove(name))
            .is_some()
    }

    pub fn has_attr(&self, name: &str) -> bool {
        read(&self.attrs)
            .as_ref()
            .is_some_and(|t| t.contains_key(name))
    }

    /// 속성 테이블 스냅샷 (삽입 순서)
    pub fn attr_items(&self) -> Vec<(String, Value)> {
        read(&self.attrs)
            .as_ref()
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn attr_names(&self) -> Vec<String> {
        read(&self.attrs)
            .as_ref()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn kind_name(&self) -> &'static str {
        self.data.kind_name()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ObjectData::Str(s) => write!(f, "Str({:?})", s),
            ObjectData::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            ObjectData::List(items) => f.debug_tuple("List").field(&*read(items)).finish(),
            ObjectData::Type(t) => write!(f, "Type({})", t.name),
            ObjectData::Function(func) => write!(f, "Function({})", func.qualname),
            ObjectData::NativeFunction(n) => write!(f, "NativeFunction({})", n.name),
            ObjectData::Module(m) => write!(f, "Module({})", m.name),
            other => write!(f, "{}@{:p}", other.kind_name(), self),
        }
    }
}

// ========== ObjectData ==========

pub enum ObjectData {
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(RwLock<Vec<Value>>),
    Dict(RwLock<DictMap>),
    Set { items: RwLock<SetMap>, frozen: bool },
    Range { start: i64, stop: i64, step: i64 },
    Slice { start: Value, stop: Value, step: Value },
    Iterator(IterState),
    Function(FunctionData),
    NativeFunction(NativeFunctionData),
    /// 바운드 메서드
    Method { receiver: Value, func: Value },
    StaticMethod(Value),
    ClassMethod(Value),
    Property { getter: Value, setter: Value },
    Super { class: ObjRef, receiver: Value },
    Code(Arc<CodeObject>),
    Cell(CellRef),
    Generator(GeneratorData),
    Module(ModuleData),
    Type(TypeData),
    Instance { class: ObjRef },
    Exception(ExceptionData),
    /// 클래스 본문 실행 중의 로컬 이름공간 (속성 테이블이 곧 이름공간)
    Namespace,
}

impl ObjectData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set { frozen: false, .. } => "set",
            Self::Set { frozen: true, .. } => "frozenset",
            Self::Range { .. } => "range",
            Self::Slice { .. } => "slice",
            Self::Iterator(_) => "iterator",
            Self::Function(_) => "function",
            Self::NativeFunction(_) => "builtin_function_or_method",
            Self::Method { .. } => "method",
            Self::StaticMethod(_) => "staticmethod",
            Self::ClassMethod(_) => "classmethod",
            Self::Property { .. } => "property",
            Self::Super { .. } => "super",
            Self::Code(_) => "code",
            Self::Cell(_) => "cell",
            Self::Generator(_) => "generator",
            Self::Module(_) => "module",
            Self::Type(_) => "type",
            Self::Instance { .. } => "instance",
            Self::Exception(_) => "exception",
            Self::Namespace => "namespace",
        }
    }

    fn structural_eq(&self, other: &ObjectData) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::List(a), Self::List(b)) => *read(a) == *read(b),
            (Self::Dict(a), Self::Dict(b)) => {
                let (a, b) = (read(a), read(b));
                a.len() == b.len()
                    && a.iter().all(|(k, (_, v))| b.get(k).is_some_and(|(_, w)| v == w))
            }
            (Self::Set { items: a, .. }, Self::Set { items: b, .. }) => {
                let (a, b) = (read(a), read(b));
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            (
                Self::Range { start: a, stop: b, step: c },
                Self::Range { start: x, stop: y, step: z },
            ) => (a, b, c) == (x, y, z),
            _ => false,
        }
    }
}

// ========== DictKey ==========

/// dict/set 키. 해시 가능한 빌트인은 값으로, 나머지 객체는 식별자로 구분합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Singleton(u8),
    /// int, bool, 정수값 float (파이썬에서 `1 == 1.0 == True`)
    Int(i64),
    Float(u64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<DictKey>),
    Identity(usize),
}

impl DictKey {
    /// 값에서 키 생성. 해시 불가능하면 타입 이름을 에러로 돌려준다.
    pub fn from_value(v: &Value) -> Result<DictKey, &'static str> {
        Ok(match v {
            Value::None => DictKey::None,
            Value::NotImplemented => DictKey::Singleton(1),
            Value::Ellipsis => DictKey::Singleton(2),
            Value::Bool(b) => DictKey::Int(*b as i64),
            Value::Int(i) => DictKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    DictKey::Int(*f as i64)
                } else {
                    DictKey::Float(f.to_bits())
                }
            }
            Value::Object(o) => match &o.data {
                ObjectData::Str(s) => DictKey::Str(s.clone()),
                ObjectData::Bytes(b) => DictKey::Bytes(b.clone()),
                ObjectData::Tuple(items) => DictKey::Tuple(
                    items
                        .iter()
                        .map(DictKey::from_value)
                        .collect::<Result<_, _>>()?,
                ),
                ObjectData::List(_) => return Err("list"),
                ObjectData::Dict(_) => return Err("dict"),
                ObjectData::Set { frozen: false, .. } => return Err("set"),
                _ => DictKey::identity(v),
            },
        })
    }

    pub fn identity(v: &Value) -> DictKey {
        DictKey::Identity(v.identity())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DictKey::Str(s) => Some(s),
            _ => None,
        }
    }
}

// ========== Iterator ==========

pub enum IterState {
    /// list/tuple을 인덱스로 순회 (list는 변경 사항이 보인다)
    Seq { seq: Value, index: AtomicUsize },
    Range { next: AtomicI64, stop: i64, step: i64 },
    /// 생성 시점의 스냅샷을 순회 (dict 키, set, str 문자)
    Snapshot { items: Vec<Value>, index: AtomicUsize },
}

impl IterState {
    pub fn seq(seq: Value) -> Self {
        Self::Seq {
            seq,
            index: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(items: Vec<Value>) -> Self {
        Self::Snapshot {
            items,
            index: AtomicUsize::new(0),
        }
    }

    pub fn range(start: i64, stop: i64, step: i64) -> Self {
        Self::Range {
            next: AtomicI64::new(start),
            stop,
            step,
        }
    }

    /// 다음 값. 소진되면 None
    pub fn next(&self) -> Option<Value> {
        match self {
            Self::Seq { seq, index } => {
                let i = index.fetch_add(1, Ordering::Relaxed);
                match seq {
                    Value::Object(o) => match &o.data {
                        ObjectData::List(items) => read(items).get(i).cloned(),
                        ObjectData::Tuple(items) => items.get(i).cloned(),
                        _ => None,
                    },
                    _ => None,
                }
            }
            Self::Range { next, stop, step } => {
                let cur = next.load(Ordering::Relaxed);
                let exhausted = if *step > 0 { cur >= *stop } else { cur <= *stop };
                if exhausted {
                    return None;
                }
                next.store(cur.saturating_add(*step), Ordering::Relaxed);
                Some(Value::Int(cur))
            }
            Self::Snapshot { items, index } => {
                let i = index.fetch_add(1, Ordering::Relaxed);
                items.get(i).cloned()
            }
        }
    }
}

// ========== 함수 ==========

pub struct FunctionData {
    pub code: Arc<CodeObject>,
    /// 전역 이름공간을 제공하는 모듈 객체
    pub globals: ObjRef,
    pub name: String,
    pub qualname: String,
    pub defaults: Vec<Value>,
    pub kwdefaults: IndexMap<String, Value>,
    pub closure: Vec<CellRef>,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeBinding {
    /// 인스턴스로 접근하면 receiver에 바인딩됨
    Method,
    /// 바인딩 없음 (`__new__`, 모듈 함수)
    Static,
}

pub struct NativeFunctionData {
    pub name: String,
    pub func: NativeFn,
    pub signature: Signature,
    pub binding: NativeBinding,
}

// ========== 제너레이터 ==========

pub enum GenSlot {
    /// 아직 시작 전이거나 yield에서 멈춘 프레임
    Ready(Box<Frame>),
    Running,
    Finished,
}

pub struct GeneratorData {
    pub name: String,
    pub qualname: String,
    pub slot: Mutex<GenSlot>,
    /// yield로 멈춘 동안 보관하는 제너레이터 자신의 처리 중 예외
    pub exc_state: Mutex<Option<Value>>,
}

// ========== 모듈 ==========

/// 모듈 객체. 전역 이름공간은 객체의 속성 테이블입니다.
pub struct ModuleData {
    pub name: String,
    pub source: OnceLock<Arc<str>>,
    pub path: OnceLock<String>,
}

impl ModuleData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: OnceLock::new(),
            path: OnceLock::new(),
        }
    }

    /// 1부터 시작하는 줄 번호의 소스 줄
    pub fn source_line(&self, line: u32) -> Option<String> {
        let src = self.source.get()?;
        let idx = (line as usize).checked_sub(1)?;
        src.lines().nth(idx).map(|l| l.trim().to_string())
    }
}

pub fn new_module(name: &str) -> ObjRef {
    let module = Object::with_attrs(ObjectData::Module(ModuleData::new(name)), IndexMap::new());
    module.set_attr("__name__", Value::str(name));
    module
}

// ========== 예외 ==========

pub struct ExceptionData {
    pub class: ObjRef,
    pub args: RwLock<Vec<Value>>,
    /// raise 시점의 프레임 체인 스냅샷 (가장 안쪽이 먼저)
    pub frames: RwLock<Vec<FrameInfo>>,
}

impl ExceptionData {
    pub fn new(class: ObjRef, args: Vec<Value>) -> Self {
        Self {
            class,
            args: RwLock::new(args),
            frames: RwLock::new(Vec::new()),
        }
    }

    pub fn args(&self) -> Vec<Value> {
        read(&self.args).clone()
    }

    pub fn frames(&self) -> Vec<FrameInfo> {
        read(&self.frames).clone()
    }

    pub fn set_frames(&self, frames: Vec<FrameInfo>) {
        *write(&self.frames) = frames;
    }
}

pub fn new_cell(value: Option<Value>) -> CellRef {
    Arc::new(RwLock::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_table_is_lazy_and_ordered() {
        let obj = Object::new(ObjectData::Namespace);
        assert!(obj.attr_items().is_empty());
        obj.set_attr("b", Value::Int(1));
        obj.set_attr("a", Value::Int(2));
        obj.set_attr("b", Value::Int(3));
        let names: Vec<String> = obj.attr_items().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(obj.get_attr("b"), Some(Value::Int(3)));
        assert!(obj.del_attr("b"));
        assert!(!obj.del_attr("b"));
    }

    #[test]
    fn test_dict_key_numeric_unification() {
        assert_eq!(DictKey::from_value(&Value::Bool(true)), Ok(DictKey::Int(1)));
        assert_eq!(DictKey::from_value(&Value::Float(2.0)), Ok(DictKey::Int(2)));
        assert_eq!(DictKey::from_value(&Value::list(vec![])), Err("list"));
        let nested = Value::tuple(vec![Value::Int(1), Value::list(vec![])]);
        assert_eq!(DictKey::from_value(&nested), Err("list"));
    }

    #[test]
    fn test_range_iterator() {
        let it = IterState::range(5, 0, -2);
        let got: Vec<Value> = std::iter::from_fn(|| it.next()).collect();
        assert_eq!(got, vec![Value::Int(5), Value::Int(3), Value::Int(1)]);
    }

    #[test]
    fn test_seq_iterator_sees_list_mutation() {
        let list = Value::list(vec![Value::Int(1)]);
        let it = IterState::seq(list.clone());
        assert_eq!(it.next(), Some(Value::Int(1)));
        if let Value::Object(o) = &list
            && let ObjectData::List(items) = &o.data
        {
            write(items).push(Value::Int(2));
        }
        assert_eq!(it.next(), Some(Value::Int(2)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_identity() {
        let a = Value::str("x");
        let b = Value::str("x");
        assert!(a.is(&a.clone()));
        assert!(!a.is(&b));
        assert_eq!(a, b);
    }
}
