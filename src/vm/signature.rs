//! 호출 시그니처와 인자 바인딩
//!
//! 네이티브 함수와 사용자 함수가 같은 [`Signature`]를 공유합니다.
//! 바인더는 호출 지점의 위치 인자/키워드 인자를 선언된 파라미터 이름에 매핑합니다.
//!
//! 채우는 순서는 항상 **위치 인자 → 같은 이름의 키워드 → 기본값** 입니다.

use indexmap::IndexMap;

use super::bytecode::{CodeFlags, CodeObject};
use super::value::{DictKey, Value};
use super::{VmErrorKind, VmResult, err};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 위치 또는 키워드로 채울 수 있는 파라미터
    Positional,
    /// `*args`
    VarPositional,
    /// `*` 뒤에 오는 키워드 전용 파라미터
    KeywordOnly,
    /// `**kwargs`
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BindError {
    pub message: String,
}

impl BindError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// 에러 메시지에 쓰이는 호출 대상 이름
    pub name: String,
    params: Vec<Param>,
    defaults: IndexMap<String, Value>,
    /// 앞쪽 N개의 위치 파라미터는 키워드로 채울 수 없음
    positional_only: usize,
}

impl Signature {
    /// 파라미터 목록으로 시그니처 생성
    ///
    /// `*args`/`**kwargs`는 각각 최대 하나만 허용됩니다.
    pub fn new(
        name: impl Into<String>,
        params: Vec<Param>,
        defaults: IndexMap<String, Value>,
    ) -> VmResult<Self> {
        let name = name.into();
        let count = |kind| params.iter().filter(|p| p.kind == kind).count();
        if count(ParamKind::VarPositional) > 1 || count(ParamKind::VarKeyword) > 1 {
            return Err(err(
                VmErrorKind::SignatureMismatch,
                format!("{}: more than one *args or **kwargs parameter", name),
            ));
        }
        Ok(Self {
            name,
            params,
            defaults,
            positional_only: 0,
        })
    }

    /// `(name, kind)` 쌍으로 간단히 생성 (네이티브 메서드 테이블용)
    pub fn from_pairs(
        name: impl Into<String>,
        pairs: &[(&str, ParamKind)],
        optional: &[&str],
    ) -> VmResult<Self> {
        let params = pairs
            .iter()
            .map(|(n, kind)| Param {
                name: (*n).to_string(),
                kind: *kind,
            })
            .collect();
        let defaults = optional
            .iter()
            .map(|n| ((*n).to_string(), Value::None))
            .collect();
        Self::new(name, params, defaults)
    }

    /// 코드 객체의 varnames 레이아웃에서 시그니처를 만든다.
    ///
    /// varnames = 위치 인자, 키워드 전용 인자, `*args`, `**kwargs` 순서.
    pub fn from_code(
        name: impl Into<String>,
        code: &CodeObject,
        defaults: &[Value],
        kwdefaults: &IndexMap<String, Value>,
    ) -> VmResult<Self> {
        let argc = code.argcount as usize;
        let kwc = code.kwonlyargcount as usize;
        let has_varargs = code.flags.contains(CodeFlags::VARARGS);
        let has_varkw = code.flags.contains(CodeFlags::VARKEYWORDS);
        let needed = argc + kwc + has_varargs as usize + has_varkw as usize;
        if code.varnames.len() < needed {
            return Err(err(
                VmErrorKind::MalformedCode,
                format!(
                    "code object '{}' declares {} parameters but has {} varnames",
                    code.name,
                    needed,
                    code.varnames.len()
                ),
            ));
        }

        let param = |idx: usize, kind| Param {
            name: code.varnames[idx].clone(),
            kind,
        };
        let mut params: Vec<Param> = (0..argc).map(|i| param(i, ParamKind::Positional)).collect();
        if has_varargs {
            params.push(param(argc + kwc, ParamKind::VarPositional));
        }
        params.extend((argc..argc + kwc).map(|i| param(i, ParamKind::KeywordOnly)));
        if has_varkw {
            params.push(param(argc + kwc + has_varargs as usize, ParamKind::VarKeyword));
        }

        // 기본값은 마지막 위치 파라미터들에 정렬된다
        let mut default_map = IndexMap::new();
        if defaults.len() > argc {
            return Err(err(
                VmErrorKind::SignatureMismatch,
                format!("{} defaults for {} positional parameters", defaults.len(), argc),
            ));
        }
        let first_default = argc - defaults.len();
        for (offset, value) in defaults.iter().enumerate() {
            default_map.insert(code.varnames[first_default + offset].clone(), value.clone());
        }
        for (k, v) in kwdefaults {
            default_map.insert(k.clone(), v.clone());
        }

        let mut sig = Self::new(name, params, default_map)?;
        sig.positional_only = code.posonlyargcount as usize;
        Ok(sig)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn defaults(&self) -> &IndexMap<String, Value> {
        &self.defaults
    }

    /// 위치 인자만으로 바인딩 (네이티브 편의 호출 경로)
    pub fn bind_positional(&self, positional: Vec<Value>) -> Result<Bindings, BindError> {
        self.bind(positional, Vec::new())
    }

    /// 스택 호출 지점용 바인딩
    ///
    /// `values`는 push 순서(첫 인자가 앞)로 정렬된 상태여야 하며,
    /// 뒤쪽 `kw_names.len()`개의 값이 키워드 이름과 짝지어집니다.
    pub fn bind_stack(&self, values: Vec<Value>, kw_names: &[String]) -> Result<Bindings, BindError> {
        let (positional, keywords) = split_stack_args(values, kw_names)
            .map_err(|e| BindError::new(format!("{}() {}", self.name, e.message)))?;
        self.bind(positional, keywords)
    }

    /// 위치 인자와 키워드 인자를 파라미터 이름에 매핑
    pub fn bind(
        &self,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Bindings, BindError> {
        let name = &self.name;
        let mut kw: IndexMap<String, Value> = IndexMap::with_capacity(keywords.len());
        for (k, v) in keywords {
            if kw.contains_key(&k) {
                return Err(BindError::new(format!(
                    "{}() got multiple values for keyword argument '{}'",
                    name, k
                )));
            }
            kw.insert(k, v);
        }

        let positional_params: Vec<&Param> = self
            .params
            .iter()
            .filter(|p| p.kind == ParamKind::Positional)
            .collect();
        let var_positional = self.params.iter().find(|p| p.kind == ParamKind::VarPositional);
        let var_keyword = self.params.iter().find(|p| p.kind == ParamKind::VarKeyword);

        let given = positional.len();
        let mut filled: IndexMap<String, Value> = IndexMap::with_capacity(self.params.len());
        let mut excess = Vec::new();

        // 1. 위치 인자
        for (idx, value) in positional.into_iter().enumerate() {
            match positional_params.get(idx) {
                Some(param) => {
                    if idx >= self.positional_only && kw.contains_key(&param.name) {
                        return Err(BindError::new(format!(
                            "{}() got multiple values for argument '{}'",
                            name, param.name
                        )));
                    }
                    filled.insert(param.name.clone(), value);
                }
                None => excess.push(value),
            }
        }

        if !excess.is_empty() && var_positional.is_none() {
            let max = positional_params.len();
            let min = positional_params
                .iter()
                .filter(|p| !self.defaults.contains_key(&p.name))
                .count();
            let takes = if min == max {
                format!("{}", max)
            } else {
                format!("from {} to {}", min, max)
            };
            return Err(BindError::new(format!(
                "{}() takes {} positional argument{} but {} {} given",
                name,
                takes,
                if max == 1 { "" } else { "s" },
                given,
                if given == 1 { "was" } else { "were" }
            )));
        }

        // 2. 키워드 → 3. 기본값
        let mut missing = Vec::new();
        let mut defaulted = Vec::new();
        for (idx, param) in self.params.iter().enumerate() {
            match param.kind {
                ParamKind::Positional | ParamKind::KeywordOnly => {
                    if filled.contains_key(&param.name) {
                        continue;
                    }
                    let keyword_allowed =
                        !(param.kind == ParamKind::Positional && idx < self.positional_only);
                    if keyword_allowed && let Some(v) = kw.shift_remove(&param.name) {
                        filled.insert(param.name.clone(), v);
                    } else if let Some(default) = self.defaults.get(&param.name) {
                        filled.insert(param.name.clone(), default.clone());
                        defaulted.push(param.name.clone());
                    } else {
                        missing.push(param.name.as_str());
                    }
                }
                ParamKind::VarPositional | ParamKind::VarKeyword => {}
            }
        }

        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(|n| format!("'{}'", n))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(BindError::new(format!(
                "{}() missing {} required argument{}: {}",
                name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                names
            )));
        }

        if let Some(param) = var_positional {
            filled.insert(param.name.clone(), Value::tuple(excess));
        }

        match var_keyword {
            Some(param) => {
                let pairs = kw
                    .into_iter()
                    .map(|(k, v)| (DictKey::Str(k.clone()), (Value::str(k), v)))
                    .collect();
                filled.insert(param.name.clone(), Value::dict(pairs));
            }
            None => {
                if let Some((k, _)) = kw.first() {
                    return Err(BindError::new(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        name, k
                    )));
                }
            }
        }

        // 파라미터 선언 순서로 정렬
        let mut values = IndexMap::with_capacity(filled.len());
        for param in &self.params {
            if let Some(v) = filled.shift_remove(&param.name) {
                values.insert(param.name.clone(), v);
            }
        }
        Ok(Bindings { values, defaulted })
    }
}

/// 스택에서 꺼낸 값들을 위치 인자와 키워드 인자로 분리
pub fn split_stack_args(
    mut values: Vec<Value>,
    kw_names: &[String],
) -> Result<(Vec<Value>, Vec<(String, Value)>), BindError> {
    if kw_names.len() > values.len() {
        return Err(BindError::new(format!(
            "expected at least {} arguments for {} keyword names",
            kw_names.len(),
            kw_names.len()
        )));
    }
    let kw_values = values.split_off(values.len() - kw_names.len());
    let keywords = kw_names.iter().cloned().zip(kw_values).collect();
    Ok((values, keywords))
}

/// 바인딩 결과: 파라미터 이름 → 값 (선언 순서 유지)
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: IndexMap<String, Value>,
    /// 호출자가 넘기지 않아 기본값으로 채운 파라미터
    defaulted: Vec<String>,
}

impl Bindings {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.values
    }

    /// 바인딩된 값 조회. 없으면 네이티브/시그니처 불일치 (호스트 내부 오류)
    pub fn get(&self, name: &str) -> VmResult<&Value> {
        self.values.get(name).ok_or_else(|| {
            err(
                VmErrorKind::SignatureMismatch,
                format!("native function expected argument '{}'", name),
            )
        })
    }

    /// 호출자가 실제로 넘긴 선택 인자. 명시적인 `None`도 `Some(&Value::None)`으로 돌려준다
    pub fn optional(&self, name: &str) -> Option<&Value> {
        if self.is_defaulted(name) {
            return None;
        }
        self.values.get(name)
    }

    /// `None`을 생략과 같게 취급하는 선택 인자 (`sep=None`, `key=None` 등)
    pub fn optional_not_none(&self, name: &str) -> Option<&Value> {
        self.optional(name).filter(|v| !v.is_none())
    }

    /// 기본값으로 채워졌는지 여부
    pub fn is_defaulted(&self, name: &str) -> bool {
        self.defaulted.iter().any(|n| n == name)
    }

    /// `*args`로 바인딩된 튜플을 Vec로 꺼냄
    pub fn varargs(&self, name: &str) -> VmResult<Vec<Value>> {
        let value = self.get(name)?;
        value.tuple_items().ok_or_else(|| {
            err(
                VmErrorKind::SignatureMismatch,
                format!("argument '{}' is not a var-positional tuple", name),
            )
        })
    }

    /// `**kwargs`로 바인딩된 dict를 (이름, 값) 목록으로 꺼냄
    pub fn varkwargs(&self, name: &str) -> VmResult<Vec<(String, Value)>> {
        let value = self.get(name)?;
        value.str_keyed_items().ok_or_else(|| {
            err(
                VmErrorKind::SignatureMismatch,
                format!("argument '{}' is not a var-keyword dict", name),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sig(pairs: &[(&str, ParamKind)]) -> Signature {
        Signature::from_pairs("f", pairs, &[]).unwrap()
    }

    #[test]
    fn test_bind_varargs_and_varkw() {
        use ParamKind::*;
        let s = sig(&[("a", Positional), ("b", Positional), ("rest", VarPositional), ("kw", VarKeyword)]);
        let b = s
            .bind(
                vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
                vec![("x".into(), Value::Int(5))],
            )
            .unwrap();

        assert_eq!(b.get("a").unwrap(), &Value::Int(1));
        assert_eq!(b.get("b").unwrap(), &Value::Int(2));
        assert_eq!(b.varargs("rest").unwrap(), vec![Value::Int(3), Value::Int(4)]);
        assert_eq!(b.varkwargs("kw").unwrap(), vec![("x".to_string(), Value::Int(5))]);
    }

    #[test]
    fn test_bind_default() {
        let mut defaults = IndexMap::new();
        defaults.insert("a".to_string(), Value::Int(10));
        let s = Signature::new(
            "f",
            vec![Param { name: "a".into(), kind: ParamKind::Positional }],
            defaults,
        )
        .unwrap();

        assert_eq!(s.bind_positional(vec![]).unwrap().get("a").unwrap(), &Value::Int(10));
        assert_eq!(
            s.bind_positional(vec![Value::Int(7)]).unwrap().get("a").unwrap(),
            &Value::Int(7)
        );
    }

    #[test]
    fn test_missing_argument_named() {
        use ParamKind::*;
        let s = sig(&[("a", Positional), ("b", Positional)]);
        let e = s.bind_positional(vec![Value::Int(1)]).unwrap_err();
        assert!(e.message.contains("'b'"), "{}", e.message);
        assert!(!e.message.contains("'a'"));
    }

    #[test]
    fn test_keyword_fills_positional() {
        use ParamKind::*;
        let s = sig(&[("a", Positional), ("b", Positional)]);
        let b = s
            .bind(vec![Value::Int(1)], vec![("b".into(), Value::Int(2))])
            .unwrap();
        assert_eq!(b.get("b").unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_positional_and_keyword_conflict() {
        use ParamKind::*;
        let s = sig(&[("a", Positional)]);
        let e = s
            .bind(vec![Value::Int(1)], vec![("a".into(), Value::Int(2))])
            .unwrap_err();
        assert_eq!(e.message, "f() got multiple values for argument 'a'");
    }

    #[test]
    fn test_excess_arguments() {
        use ParamKind::*;
        let s = sig(&[("a", Positional)]);
        let e = s.bind_positional(vec![Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(e.message, "f() takes 1 positional argument but 2 were given");

        let e = s
            .bind(vec![Value::Int(1)], vec![("zzz".into(), Value::None)])
            .unwrap_err();
        assert_eq!(e.message, "f() got an unexpected keyword argument 'zzz'");
    }

    #[test]
    fn test_keyword_only_requires_keyword() {
        use ParamKind::*;
        let s = sig(&[("args", VarPositional), ("sep", KeywordOnly)]);
        let e = s.bind_positional(vec![Value::Int(1)]).unwrap_err();
        assert!(e.message.contains("'sep'"));

        let b = s
            .bind(vec![Value::Int(1)], vec![("sep".into(), Value::Int(0))])
            .unwrap();
        assert_eq!(b.varargs("args").unwrap(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_bind_stack_pairs_trailing_values() {
        use ParamKind::*;
        let s = sig(&[("a", Positional), ("b", Positional), ("c", KeywordOnly)]);
        let b = s
            .bind_stack(
                vec![Value::Int(1), Value::Int(3), Value::Int(2)],
                &["c".to_string(), "b".to_string()],
            )
            .unwrap();
        let order: Vec<&String> = b.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(b.get("b").unwrap(), &Value::Int(2));
        assert_eq!(b.get("c").unwrap(), &Value::Int(3));
    }

    #[test]
    fn test_explicit_none_is_not_missing() {
        use ParamKind::*;
        let s = Signature::from_pairs("f", &[("x", Positional)], &["x"]).unwrap();

        let absent = s.bind_positional(vec![]).unwrap();
        assert!(absent.is_defaulted("x"));
        assert_eq!(absent.optional("x"), None);

        let explicit = s.bind_positional(vec![Value::None]).unwrap();
        assert!(!explicit.is_defaulted("x"));
        assert_eq!(explicit.optional("x"), Some(&Value::None));
        assert_eq!(explicit.optional_not_none("x"), None);

        let by_keyword = s.bind(vec![], vec![("x".into(), Value::None)]).unwrap();
        assert_eq!(by_keyword.optional("x"), Some(&Value::None));
    }

    #[test]
    fn test_duplicate_var_positional_rejected() {
        use ParamKind::*;
        assert!(Signature::from_pairs("f", &[("a", VarPositional), ("b", VarPositional)], &[]).is_err());
    }
}
