//! 프레임: 함수 한 번의 실행 상태
//!
//! 코드, fast 로컬 슬롯, 셀(cellvars + freevars), 선택적 이름공간 로컬,
//! 피연산자 스택, 블록 스택, 명령어 인덱스를 가집니다.
//! 제너레이터는 프레임을 통째로 떼어 보관했다가 다시 붙입니다.

use std::sync::Arc;

use super::super::bytecode::CodeObject;
use super::super::disasm::disassemble_frame;
use super::super::exception::{FrameDump, FrameInfo};
use super::super::signature::Bindings;
use super::super::utils::read;
use super::super::value::{CellRef, ObjRef, ObjectData, Value, new_cell};
use super::{VmErrorKind, VmResult, err};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FrameState {
    Created,
    Running,
    Returned,
    Raised,
    /// yield에서 멈춘 제너레이터 프레임
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// SETUP_FINALLY / SETUP_WITH
    Finally,
    /// 예외 처리기 실행 중. 아래 3칸에 이전 예외 상태가 저장됨
    ExceptHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    /// 블록 진입 시점의 스택 깊이
    pub level: usize,
}

pub struct Frame {
    pub code: Arc<CodeObject>,
    /// 함수 이름 (트레이스백용)
    pub name: String,
    pub globals: ObjRef,
    /// 모듈/클래스 본문의 이름공간 로컬
    pub locals: Option<ObjRef>,
    pub fast: Vec<Option<Value>>,
    /// cellvars 다음 freevars
    pub cells: Vec<CellRef>,
    pub stack: Vec<Value>,
    pub blocks: Vec<Block>,
    /// 다음에 실행할 명령어 인덱스
    pub ip: usize,
    /// 마지막으로 실행한 명령어 인덱스
    pub lasti: usize,
    pub state: FrameState,
    max_stack: usize,
}

impl Frame {
    pub fn new(
        code: Arc<CodeObject>,
        name: impl Into<String>,
        globals: ObjRef,
        locals: Option<ObjRef>,
        closure: &[CellRef],
        max_stack: usize,
    ) -> Self {
        let mut cells: Vec<CellRef> = code.cellvars.iter().map(|_| new_cell(None)).collect();
        cells.extend(closure.iter().cloned());
        Self {
            fast: vec![None; code.varnames.len()],
            stack: Vec::with_capacity(code.stacksize as usize),
            name: name.into(),
            code,
            globals,
            locals,
            cells,
            blocks: Vec::new(),
            ip: 0,
            lasti: 0,
            state: FrameState::Created,
            max_stack,
        }
    }

    /// 바인딩된 인자를 fast 슬롯에 배치하고, 셀 변수이기도 한 인자는 셀에 복사
    pub fn bind_arguments(&mut self, bindings: Bindings) {
        for (name, value) in bindings.into_inner() {
            if let Some(slot) = self.code.varnames.iter().position(|v| *v == name) {
                self.fast[slot] = Some(value.clone());
            }
            if let Some(cell_idx) = self.code.cellvars.iter().position(|c| *c == name) {
                *super::super::utils::write(&self.cells[cell_idx]) = Some(value);
            }
        }
    }

    // ========== 스택 연산 ==========

    pub fn push(&mut self, v: Value) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(err(VmErrorKind::StackOverflow, "stack overflow"));
        }
        self.stack.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| err(VmErrorKind::StackUnderflow, "stack underflow"))
    }

    /// 위에서 n개를 push 순서대로 꺼냄
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(err(VmErrorKind::StackUnderflow, "stack underflow"));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    /// 1부터 시작: peek(1)은 TOS
    pub fn peek(&self, n: usize) -> VmResult<&Value> {
        n.checked_sub(1)
            .and_then(|k| self.stack.len().checked_sub(k + 1))
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| err(VmErrorKind::StackUnderflow, "stack underflow"))
    }

    pub fn top_mut(&mut self) -> VmResult<&mut Value> {
        self.stack
            .last_mut()
            .ok_or_else(|| err(VmErrorKind::StackUnderflow, "stack underflow"))
    }

    pub fn truncate(&mut self, level: usize) {
        self.stack.truncate(level);
    }

    // ========== 풀 접근 ==========

    pub fn name_at(&self, idx: u32) -> VmResult<&str> {
        self.code
            .names
            .get(idx as usize)
            .map(String::as_str)
            .ok_or_else(|| pool_error("names", idx))
    }

    pub fn varname_at(&self, idx: u32) -> VmResult<&str> {
        self.code
            .varnames
            .get(idx as usize)
            .map(String::as_str)
            .ok_or_else(|| pool_error("varnames", idx))
    }

    pub fn const_at(&self, idx: u32) -> VmResult<Value> {
        self.code
            .constants()
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| pool_error("consts", idx))
    }

    pub fn cell_at(&self, idx: u32) -> VmResult<&CellRef> {
        self.cells
            .get(idx as usize)
            .ok_or_else(|| pool_error("cells", idx))
    }

    pub fn jump(&mut self, target: usize) {
        self.ip = target;
    }

    // ========== 스냅샷 ==========

    pub fn line(&self) -> u32 {
        self.code.line_for(self.lasti)
    }

    /// 트레이스백용 프레임 정보. 디버그 모드에서는 디스어셈블리와 스택 덤프 포함
    pub fn info(&self, debug: bool) -> FrameInfo {
        let line = self.line();
        let source_line = match &self.globals.data {
            ObjectData::Module(m) => m.source_line(line),
            _ => None,
        };
        let dump = debug.then(|| FrameDump {
            disassembly: disassemble_frame(self),
            stack: self.stack.iter().map(|v| format!("{:?}", v)).collect(),
        });
        FrameInfo {
            name: self.name.clone(),
            filename: self.code.filename.clone(),
            instruction_index: self.lasti,
            line,
            source_line,
            dump,
        }
    }

    /// 셀 내용 (디버그 출력용)
    pub fn cell_value(&self, idx: usize) -> Option<Value> {
        self.cells.get(idx).and_then(|c| read(c).clone())
    }
}

fn pool_error(pool: &str, idx: u32) -> super::VmError {
    err(
        VmErrorKind::PoolIndex,
        format!("{} index {} out of range", pool, idx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::new_module;

    fn frame_for(code: CodeObject) -> Frame {
        Frame::new(Arc::new(code), "f", new_module("m"), None, &[], 4)
    }

    #[test]
    fn test_stack_limits() {
        let mut f = frame_for(CodeObject::default());
        assert!(f.pop().is_err());
        for i in 0..4 {
            f.push(Value::Int(i)).unwrap();
        }
        assert!(f.push(Value::Int(9)).is_err());
        assert_eq!(f.peek(1).unwrap(), &Value::Int(3));
        assert_eq!(f.peek(4).unwrap(), &Value::Int(0));
        assert!(f.peek(5).is_err());
        assert_eq!(f.pop_n(2).unwrap(), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_argument_copied_into_cell() {
        let code = CodeObject {
            argcount: 1,
            varnames: vec!["x".into()],
            cellvars: vec!["x".into()],
            ..Default::default()
        };
        let mut f = frame_for(code);
        let sig = crate::vm::signature::Signature::from_pairs(
            "f",
            &[("x", crate::vm::signature::ParamKind::Positional)],
            &[],
        )
        .unwrap();
        f.bind_arguments(sig.bind_positional(vec![Value::Int(5)]).unwrap());
        assert_eq!(f.fast[0], Some(Value::Int(5)));
        assert_eq!(f.cell_value(0), Some(Value::Int(5)));
    }
}
