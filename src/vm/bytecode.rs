//! 바이트코드 정의
//!
//! 외부 컴파일러가 생성한 CPython 3.9 wordcode 형식의 코드 객체를 표현합니다.
//! 명령어는 항상 2바이트 `(opcode, arg)` 쌍이며, 256 이상의 인자는
//! `EXTENDED_ARG` 접두 명령어로 확장됩니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use strum::{Display, FromRepr, IntoStaticStr};

use super::value::Value;
use super::{VmErrorKind, VmResult, err};

// ========== Opcode ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    // 스택 조작
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    RotFour = 6,
    Nop = 9,

    // 단항 연산
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,

    // 이항 연산
    BinaryMatrixMultiply = 16,
    InplaceMatrixMultiply = 17,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,

    Reraise = 48,
    WithExceptStart = 49,
    GetAiter = 50,
    GetAnext = 51,
    BeforeAsyncWith = 52,
    EndAsyncFor = 54,

    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    GetYieldFromIter = 69,
    PrintExpr = 70,
    LoadBuildClass = 71,
    YieldFrom = 72,
    GetAwaitable = 73,
    LoadAssertionError = 74,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    ListToTuple = 82,
    ReturnValue = 83,
    ImportStar = 84,
    SetupAnnotations = 85,
    YieldValue = 86,
    PopBlock = 87,
    PopExcept = 89,

    // ===== 여기부터 인자 있음 (HAVE_ARGUMENT = 90) =====
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    IsOp = 117,
    ContainsOp = 118,
    JumpIfNotExcMatch = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionKw = 141,
    CallFunctionEx = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    SetAdd = 146,
    MapAdd = 147,
    LoadClassderef = 148,
    SetupAsyncWith = 154,
    FormatValue = 155,
    BuildConstKeyMap = 156,
    BuildString = 157,
    LoadMethod = 160,
    CallMethod = 161,
    ListExtend = 162,
    SetUpdate = 163,
    DictMerge = 164,
    DictUpdate = 165,
}

pub const HAVE_ARGUMENT: u8 = 90;

impl Opcode {
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// 인자가 `현재 인덱스 + 1` 기준 상대 바이트 오프셋인 점프
    pub fn is_relative_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward | Self::ForIter | Self::SetupFinally | Self::SetupWith
        )
    }

    /// 인자가 절대 바이트 오프셋인 점프
    pub fn is_absolute_jump(self) -> bool {
        matches!(
            self,
            Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::JumpIfNotExcMatch
        )
    }
}

// ========== Instruction ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// EXTENDED_ARG가 이미 접힌 인자
    pub arg: u32,
}

impl Instruction {
    /// 점프 대상 명령어 인덱스. 점프가 아니면 None
    pub fn jump_target(&self, idx: usize) -> Option<usize> {
        if self.opcode.is_relative_jump() {
            Some(idx + 1 + (self.arg as usize) / 2)
        } else if self.opcode.is_absolute_jump() {
            Some((self.arg as usize) / 2)
        } else {
            None
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opcode.has_arg() {
            write!(f, "{} {}", self.opcode, self.arg)
        } else {
            write!(f, "{}", self.opcode)
        }
    }
}

/// 원시 바이트를 명령어 목록으로 디코딩
///
/// 인덱스가 2바이트 단위와 1:1로 대응하도록 EXTENDED_ARG도 목록에 남겨둡니다.
pub fn decode(code: &[u8]) -> VmResult<Vec<Instruction>> {
    if code.len() % 2 != 0 {
        return Err(err(
            VmErrorKind::MalformedCode,
            format!("bytecode length {} is not a multiple of 2", code.len()),
        ));
    }

    let mut out = Vec::with_capacity(code.len() / 2);
    let mut ext: u32 = 0;
    for (idx, pair) in code.chunks_exact(2).enumerate() {
        let opcode = Opcode::from_repr(pair[0]).ok_or_else(|| {
            err(
                VmErrorKind::BadOpcode,
                format!("unknown opcode {} at byte offset {}", pair[0], idx * 2),
            )
        })?;
        let arg = ext | pair[1] as u32;
        if opcode == Opcode::ExtendedArg {
            ext = arg << 8;
        } else {
            ext = 0;
        }
        out.push(Instruction { opcode, arg });
    }
    Ok(out)
}

// ========== 코드 플래그 ==========

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CodeFlags: u32 {
        const OPTIMIZED          = 1 << 0;
        const NEWLOCALS          = 1 << 1;
        const VARARGS            = 1 << 2;
        const VARKEYWORDS        = 1 << 3;
        const NESTED             = 1 << 4;
        const GENERATOR          = 1 << 5;
        const NOFREE             = 1 << 6;
        const COROUTINE          = 1 << 7;
        const ITERABLE_COROUTINE = 1 << 8;
        const ASYNC_GENERATOR    = 1 << 9;
    }
}

// ========== 상수 풀 ==========

/// 코드 객체 상수 풀의 항목 (직렬화 가능)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    FrozenSet(Vec<Constant>),
    Code(Arc<CodeObject>),
}

impl Constant {
    /// 런타임 값으로 변환
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Ellipsis => Value::Ellipsis,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::str(s.clone()),
            Self::Bytes(b) => Value::bytes(b.clone()),
            Self::Tuple(items) => Value::tuple(items.iter().map(Constant::to_value).collect()),
            Self::FrozenSet(items) => {
                Value::frozenset_from_hashable(items.iter().map(Constant::to_value).collect())
            }
            Self::Code(code) => Value::code(code.clone()),
        }
    }
}

// ========== 코드 객체 ==========

/// 불변 컴파일 함수 기술자
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CodeObject {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub code: Vec<u8>,
    pub consts: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: u32,
    pub lnotab: Vec<u8>,

    #[serde(skip)]
    pub(crate) decoded: OnceLock<Vec<Instruction>>,
    #[serde(skip)]
    pub(crate) const_values: OnceLock<Vec<Value>>,
}

impl PartialEq for CodeObject {
    fn eq(&self, other: &Self) -> bool {
        self.argcount == other.argcount
            && self.posonlyargcount == other.posonlyargcount
            && self.kwonlyargcount == other.kwonlyargcount
            && self.nlocals == other.nlocals
            && self.flags == other.flags
            && self.code == other.code
            && self.consts == other.consts
            && self.names == other.names
            && self.varnames == other.varnames
            && self.freevars == other.freevars
            && self.cellvars == other.cellvars
            && self.name == other.name
            && self.filename == other.filename
            && self.firstlineno == other.firstlineno
            && self.lnotab == other.lnotab
    }
}

impl CodeObject {
    /// 디코딩된 명령어 (최초 호출 시 디코딩 후 캐시)
    pub fn instructions(&self) -> VmResult<&[Instruction]> {
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        let decoded = decode(&self.code)?;
        Ok(self.decoded.get_or_init(|| decoded))
    }

    /// 상수 풀을 런타임 값으로 (최초 호출 시 변환 후 캐시)
    pub fn constants(&self) -> &[Value] {
        self.const_values
            .get_or_init(|| self.consts.iter().map(Constant::to_value).collect())
    }

    pub fn is_generator(&self) -> bool {
        self.flags.intersects(
            CodeFlags::GENERATOR | CodeFlags::COROUTINE | CodeFlags::ITERABLE_COROUTINE,
        )
    }

    /// 셀 변수와 자유 변수 이름 (LOAD_DEREF 인덱스 순서)
    pub fn cell_names(&self) -> impl Iterator<Item = &String> {
        self.cellvars.iter().chain(self.freevars.iter())
    }

    pub fn cell_name(&self, idx: usize) -> Option<&String> {
        self.cell_names().nth(idx)
    }

    /// 명령어 인덱스의 소스 줄 번호
    pub fn line_for(&self, idx: usize) -> u32 {
        line_for(&self.lnotab, self.firstlineno, idx)
    }
}

/// lnotab `(addr_delta, line_delta)` 쌍을 누적하여 줄 번호 계산
///
/// 주소가 `idx * 2`를 넘는 순간 멈춥니다. line_delta는 부호 있는 바이트입니다.
pub fn line_for(lnotab: &[u8], firstlineno: u32, idx: usize) -> u32 {
    let target = idx * 2;
    let mut addr = 0usize;
    let mut line = firstlineno as i64;
    for pair in lnotab.chunks_exact(2) {
        addr += pair[0] as usize;
        if addr > target {
            break;
        }
        line += pair[1] as i8 as i64;
    }
    line.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_folds_extended_arg() {
        let code = [144, 1, 113, 4, 83, 0];
        let ins = decode(&code).unwrap();
        assert_eq!(ins.len(), 3);
        assert_eq!(ins[1].opcode, Opcode::JumpAbsolute);
        assert_eq!(ins[1].arg, 0x104);
        assert_eq!(ins[2].arg, 0);
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let e = decode(&[0, 0]).unwrap_err();
        assert!(e.to_string().contains("unknown opcode 0"));
    }

    #[test]
    fn test_jump_targets() {
        let fwd = Instruction { opcode: Opcode::JumpForward, arg: 6 };
        assert_eq!(fwd.jump_target(4), Some(8));
        let abs = Instruction { opcode: Opcode::PopJumpIfFalse, arg: 12 };
        assert_eq!(abs.jump_target(1), Some(6));
        let none = Instruction { opcode: Opcode::LoadConst, arg: 12 };
        assert_eq!(none.jump_target(1), None);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::BinarySubscr.to_string(), "BINARY_SUBSCR");
        assert_eq!(Opcode::LoadClassderef.to_string(), "LOAD_CLASSDEREF");
        assert_eq!(Opcode::JumpIfNotExcMatch.to_string(), "JUMP_IF_NOT_EXC_MATCH");
    }

    #[test]
    fn test_line_numbers() {
        // def f():         (line 1)
        //     a = 1        (line 2, offset 0)
        //
        //     b = 2        (line 4, offset 4)
        let lnotab = [0, 1, 4, 2];
        assert_eq!(line_for(&lnotab, 1, 0), 2);
        assert_eq!(line_for(&lnotab, 1, 1), 2);
        assert_eq!(line_for(&lnotab, 1, 2), 4);
        assert_eq!(line_for(&lnotab, 1, 9), 4);
    }

    #[test]
    fn test_line_numbers_negative_delta() {
        let lnotab = [0, 3, 6, 0xfe];
        assert_eq!(line_for(&lnotab, 10, 0), 13);
        assert_eq!(line_for(&lnotab, 10, 3), 11);
    }
}
