//! 코드 객체 바이너리 리더 (3.9 marshal 포맷)
//!
//! `.pyc` 파일은 16바이트 헤더(매직, 플래그, 타임스탬프/해시, 크기) 뒤에
//! 코드 객체 하나가 marshal 형식으로 들어 있습니다.

use std::path::Path;
use std::sync::Arc;

use super::bytecode::{CodeFlags, CodeObject, Constant};
use super::machine::{VmError, VmErrorKind};

/// 3.9 `.pyc` 매직 넘버 (리틀 엔디언 u32)
pub const PYC_MAGIC: u32 = 0x0a0d0d61;
pub const PYC_HEADER_LEN: usize = 16;

const FLAG_REF: u8 = 0x80;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("bad magic number {found:#010x} (expected {expected:#010x})")]
    BadMagic { found: u32, expected: u32 },
    #[error("unsupported marshal type code {code:?} at offset {offset}")]
    UnsupportedType { code: char, offset: usize },
    #[error("invalid back-reference index {0}")]
    BadRef(usize),
    #[error("integer constant does not fit in 64 bits")]
    IntOverflow,
    #[error("invalid UTF-8 in string constant at offset {0}")]
    InvalidUtf8(usize),
    #[error("expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid code cache: {0}")]
    Cache(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LoadError> for VmError {
    fn from(e: LoadError) -> Self {
        let kind = match e {
            LoadError::Io(_) => VmErrorKind::Io,
            _ => VmErrorKind::Marshal,
        };
        VmError::Internal {
            kind,
            message: e.to_string(),
            frames: Vec::new(),
        }
    }
}

// ========== 공개 API ==========

/// marshal 데이터에서 최상위 코드 객체를 읽음
pub fn read_code(data: &[u8]) -> Result<Arc<CodeObject>, LoadError> {
    let mut reader = Reader::new(data);
    match reader.read_object()? {
        Constant::Code(code) => Ok(code),
        other => Err(LoadError::UnexpectedValue {
            expected: "code object",
            found: constant_kind(&other),
        }),
    }
}

/// `.pyc` 헤더를 확인하고 코드 객체를 읽음
pub fn read_pyc(data: &[u8]) -> Result<Arc<CodeObject>, LoadError> {
    if data.len() < PYC_HEADER_LEN {
        return Err(LoadError::UnexpectedEof(data.len()));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != PYC_MAGIC {
        return Err(LoadError::BadMagic {
            found: magic,
            expected: PYC_MAGIC,
        });
    }
    read_code(&data[PYC_HEADER_LEN..])
}

pub fn load_pyc_file(path: impl AsRef<Path>) -> Result<Arc<CodeObject>, LoadError> {
    let data = std::fs::read(path)?;
    read_pyc(&data)
}

// ========== 리더 ==========

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    /// FLAG_REF로 표시된 객체들. 읽는 중인 객체는 None으로 예약됨
    refs: Vec<Option<Constant>>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
        }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(LoadError::UnexpectedEof(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.bytes(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, LoadError> {
        let b = self.bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn len32(&mut self) -> Result<usize, LoadError> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| LoadError::UnexpectedEof(self.pos))
    }

    fn string(&mut self, n: usize) -> Result<String, LoadError> {
        let at = self.pos;
        let raw = self.bytes(n)?;
        String::from_utf8(raw.to_vec()).map_err(|_| LoadError::InvalidUtf8(at))
    }

    fn read_object(&mut self) -> Result<Constant, LoadError> {
        let offset = self.pos;
        let byte = self.u8()?;
        let flag = byte & FLAG_REF != 0;
        let code = byte & !FLAG_REF;

        if code == b'r' {
            let idx = self.len32()?;
            return self
                .refs
                .get(idx)
                .cloned()
                .flatten()
                .ok_or(LoadError::BadRef(idx));
        }

        let slot = flag.then(|| {
            self.refs.push(None);
            self.refs.len() - 1
        });
        let value = self.read_payload(code, offset)?;
        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn read_payload(&mut self, code: u8, offset: usize) -> Result<Constant, LoadError> {
        Ok(match code {
            b'N' => Constant::None,
            b'F' => Constant::Bool(false),
            b'T' => Constant::Bool(true),
            b'.' => Constant::Ellipsis,
            b'i' => Constant::Int(self.i32()? as i64),
            b'l' => Constant::Int(self.read_long()?),
            b'g' => {
                let b = self.bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Constant::Float(f64::from_le_bytes(raw))
            }
            b'f' => {
                let n = self.u8()? as usize;
                let text = self.string(n)?;
                Constant::Float(text.parse().map_err(|_| LoadError::InvalidUtf8(offset))?)
            }
            b's' => {
                let n = self.len32()?;
                Constant::Bytes(self.bytes(n)?.to_vec())
            }
            b'u' | b't' | b'a' | b'A' => {
                let n = self.len32()?;
                Constant::Str(self.string(n)?)
            }
            b'z' | b'Z' => {
                let n = self.u8()? as usize;
                Constant::Str(self.string(n)?)
            }
            b'(' => {
                let n = self.len32()?;
                Constant::Tuple(self.read_items(n)?)
            }
            b')' => {
                let n = self.u8()? as usize;
                Constant::Tuple(self.read_items(n)?)
            }
            b'>' => {
                let n = self.len32()?;
                Constant::FrozenSet(self.read_items(n)?)
            }
            b'c' => Constant::Code(Arc::new(self.read_code_body()?)),
            other => {
                return Err(LoadError::UnsupportedType {
                    code: other as char,
                    offset,
                });
            }
        })
    }

    fn read_items(&mut self, n: usize) -> Result<Vec<Constant>, LoadError> {
        let mut items = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    /// 부호 있는 자릿수 개수 + 15비트 자릿수들
    fn read_long(&mut self) -> Result<i64, LoadError> {
        let n = self.i32()?;
        let digits = n.unsigned_abs() as usize;
        let mut value: i128 = 0;
        for i in 0..digits {
            let b = self.bytes(2)?;
            let digit = u16::from_le_bytes([b[0], b[1]]) as i128;
            let shift = 15 * i as u32;
            if shift >= 64 && digit != 0 {
                return Err(LoadError::IntOverflow);
            }
            if shift < 64 {
                value += digit << shift;
            }
        }
        if n < 0 {
            value = -value;
        }
        i64::try_from(value).map_err(|_| LoadError::IntOverflow)
    }

    fn read_code_body(&mut self) -> Result<CodeObject, LoadError> {
        let argcount = self.i32()? as u32;
        let posonlyargcount = self.i32()? as u32;
        let kwonlyargcount = self.i32()? as u32;
        let nlocals = self.i32()? as u32;
        let stacksize = self.i32()? as u32;
        let flags = CodeFlags::from_bits_truncate(self.i32()? as u32);
        let code = expect_bytes(self.read_object()?)?;
        let consts = match self.read_object()? {
            Constant::Tuple(items) => items,
            other => return Err(unexpected("tuple", &other)),
        };
        let names = expect_str_tuple(self.read_object()?)?;
        let varnames = expect_str_tuple(self.read_object()?)?;
        let freevars = expect_str_tuple(self.read_object()?)?;
        let cellvars = expect_str_tuple(self.read_object()?)?;
        let filename = expect_str(self.read_object()?)?;
        let name = expect_str(self.read_object()?)?;
        let firstlineno = self.i32()? as u32;
        let lnotab = expect_bytes(self.read_object()?)?;

        Ok(CodeObject {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            firstlineno,
            lnotab,
            ..Default::default()
        })
    }
}

fn constant_kind(c: &Constant) -> &'static str {
    match c {
        Constant::None => "None",
        Constant::Ellipsis => "Ellipsis",
        Constant::Bool(_) => "bool",
        Constant::Int(_) => "int",
        Constant::Float(_) => "float",
        Constant::Str(_) => "str",
        Constant::Bytes(_) => "bytes",
        Constant::Tuple(_) => "tuple",
        Constant::FrozenSet(_) => "frozenset",
        Constant::Code(_) => "code",
    }
}

fn unexpected(expected: &'static str, found: &Constant) -> LoadError {
    LoadError::UnexpectedValue {
        expected,
        found: constant_kind(found),
    }
}

fn expect_bytes(c: Constant) -> Result<Vec<u8>, LoadError> {
    match c {
        Constant::Bytes(b) => Ok(b),
        other => Err(unexpected("bytes", &other)),
    }
}

fn expect_str(c: Constant) -> Result<String, LoadError> {
    match c {
        Constant::Str(s) => Ok(s),
        other => Err(unexpected("str", &other)),
    }
}

fn expect_str_tuple(c: Constant) -> Result<Vec<String>, LoadError> {
    match c {
        Constant::Tuple(items) => items.into_iter().map(expect_str).collect(),
        other => Err(unexpected("tuple of str", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scalars_and_refs() {
        // (1, 'ab', r0) : 0xa9 = ')' | FLAG_REF
        let data = [
            b')' | FLAG_REF,
            3,
            b'i',
            1,
            0,
            0,
            0,
            b'z' | FLAG_REF,
            2,
            b'a',
            b'b',
            b'r',
            1,
            0,
            0,
            0,
        ];
        let mut r = Reader::new(&data);
        assert_eq!(
            r.read_object().unwrap(),
            Constant::Tuple(vec![
                Constant::Int(1),
                Constant::Str("ab".into()),
                Constant::Str("ab".into()),
            ])
        );
    }

    #[test]
    fn test_long_digits() {
        // 2**40 = digits (0, 0, 1024) base 2**15
        let data = [b'l', 3, 0, 0, 0, 0, 0, 0, 0, 0, 4];
        assert_eq!(Reader::new(&data).read_object().unwrap(), Constant::Int(1 << 40));
        let neg = [b'l', 0xff, 0xff, 0xff, 0xff, 5, 0];
        assert_eq!(Reader::new(&neg).read_object().unwrap(), Constant::Int(-5));
    }

    #[test]
    fn test_unsupported_and_truncated() {
        assert!(matches!(
            Reader::new(b"[").read_object(),
            Err(LoadError::UnsupportedType { code: '[', .. })
        ));
        assert!(matches!(
            Reader::new(&[b'i', 1]).read_object(),
            Err(LoadError::UnexpectedEof(_))
        ));
        assert!(matches!(
            read_pyc(&[0u8; 16]),
            Err(LoadError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_load_error_is_internal_marshal_fault() {
        let e: VmError = LoadError::BadRef(3).into();
        assert!(matches!(
            e,
            VmError::Internal {
                kind: VmErrorKind::Marshal,
                ..
            }
        ));
    }

    #[test]
    fn test_real_pyc_fixture() {
        let data = include_bytes!("../../tests/programs/functions.pyc");
        let module = read_pyc(data).unwrap();
        assert_eq!(module.name, "<module>");
        assert_eq!(module.filename, "functions.py");
        assert_eq!(module.firstlineno, 1);
        assert_eq!(&module.names[..3], &["greet", "print", "args"]);
        assert_eq!(module.consts[0], Constant::Str("Hello".into()));
        assert_eq!(module.consts[2], Constant::Tuple(vec![Constant::Str("punct".into())]));

        let Constant::Code(greet) = &module.consts[3] else {
            panic!("expected a code constant, got {:?}", module.consts[3]);
        };
        assert_eq!(greet.name, "greet");
        assert_eq!((greet.argcount, greet.kwonlyargcount), (2, 1));
        assert_eq!(&greet.varnames[..5], &["name", "greeting", "punct", "args", "kwargs"]);
        assert!(greet.flags.contains(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS));
        assert!(!greet.flags.contains(CodeFlags::GENERATOR));
    }
}
