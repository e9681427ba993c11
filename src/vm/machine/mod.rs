// machine 모듈 - VM 실행 엔진
//
// 스레드 하나당 Vm 하나가 프레임 체인, 처리 중인 예외, I/O를 소유합니다.
// 인터프리터 전역 상태(빌트인 타입, 모듈 레지스트리)는 Arc<Interpreter>로 주입됩니다.

use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::runtime_io::RuntimeIo;
use crate::vm::bytecode::CodeObject;
use crate::vm::exception::{
    ExcKind, FrameInfo, SourceExcerpt, Traceback, describe_exception, render_dump,
};
use crate::vm::interpreter::Interpreter;
use crate::vm::signature::BindError;
use crate::vm::type_def::BuiltinTypes;
use crate::vm::utils::type_name;
use crate::vm::value::{ExceptionData, ObjRef, Object, ObjectData, Value};

// 서브모듈
mod attribute;
pub mod frame;
mod generator;
mod instruction;
mod method_dispatch;

#[cfg(test)]
mod tests;

pub use frame::{Block, BlockKind, Frame, FrameState};
pub use instruction::ExecutionFlow;
pub use method_dispatch::{BinOp, CompareOp};

// ========== 타입 정의 ==========

/// 사용자 코드가 잡을 수 없는 호스트 내부 오류 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum VmErrorKind {
    StackUnderflow,
    StackOverflow,
    MalformedCode,
    BadOpcode,
    PoolIndex,
    FrameState,
    SignatureMismatch,
    Marshal,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// 아직 객체로 만들어지지 않은 파이썬 예외 (네이티브 코드에서 발생)
    #[error("{kind}: {message}")]
    Pending { kind: ExcKind, message: String },

    /// 프레임 스냅샷을 가진 예외 객체
    #[error("{}", describe_exception(.0))]
    Raised(ObjRef),

    /// 호스트 내부 불변식 위반. 블록 탐색에 걸리지 않고 스레드 루트까지 전파됨
    #[error("internal error ({kind}): {message}")]
    Internal {
        kind: VmErrorKind,
        message: String,
        frames: Vec<FrameInfo>,
    },
}

impl VmError {
    pub fn is_internal(&self) -> bool {
        matches!(self, VmError::Internal { .. })
    }
}

impl From<BindError> for VmError {
    fn from(e: BindError) -> Self {
        VmError::Pending {
            kind: ExcKind::TypeError,
            message: e.message,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// 프레임 실행이 끝난 방식
#[derive(Debug, Clone)]
pub enum FrameExit {
    Return(Value),
    Yield(Value),
}

/// 스레드 루트 실행 결과
#[derive(Debug, Clone)]
pub enum ThreadExit {
    Finished(Value),
    /// 처리되지 않은 예외. 보고서는 이미 에러 채널에 기록됨
    Unhandled { traceback: Traceback },
}

impl ThreadExit {
    /// 임베더용 종료 코드
    pub fn status(&self) -> i32 {
        match self {
            ThreadExit::Finished(_) => 0,
            ThreadExit::Unhandled { .. } => 1,
        }
    }
}

pub struct Vm {
    interp: Arc<Interpreter>,
    pub(crate) frames: Vec<Frame>,
    pub thread_name: String,
    /// 현재 처리 중인 예외 (except 블록 안)
    pub(crate) exc_info: Option<Value>,
    io: Box<dyn RuntimeIo + Send>,
    pub max_frames: usize,
    pub max_stack: usize,
    /// repr 중인 컨테이너의 식별자 (자기 참조 출력용)
    pub(crate) repr_guard: Vec<usize>,
    debug: bool,
}

// ========== 유틸리티 함수 ==========

/// 호스트 내부 오류 생성 헬퍼 함수
pub fn err(kind: VmErrorKind, message: impl Into<String>) -> VmError {
    VmError::Internal {
        kind,
        message: message.into(),
        frames: Vec::new(),
    }
}

// ========== VM 구현 ==========

impl Vm {
    pub fn new(interp: Arc<Interpreter>, thread_name: impl Into<String>, io: Box<dyn RuntimeIo + Send>) -> Self {
        let config = interp.config();
        Self {
            max_frames: config.max_frames,
            max_stack: config.max_stack,
            debug: config.debug_mode,
            interp,
            frames: Vec::with_capacity(32),
            thread_name: thread_name.into(),
            exc_info: None,
            repr_guard: Vec::new(),
            io,
        }
    }

    pub fn interp(&self) -> &Arc<Interpreter> {
        &self.interp
    }

    pub fn types(&self) -> &BuiltinTypes {
        self.interp.types()
    }

    pub fn builtins(&self) -> &ObjRef {
        self.interp.builtins()
    }

    pub fn io(&mut self) -> &mut dyn RuntimeIo {
        &mut *self.io
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn type_of(&self, v: &Value) -> ObjRef {
        self.types().type_of(v)
    }

    pub fn type_name(&self, v: &Value) -> String {
        type_name(v)
    }

    /// 현재 실행 중인 프레임 수
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn frame(&self) -> VmResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| err(VmErrorKind::FrameState, "no active frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| err(VmErrorKind::FrameState, "no active frame"))
    }

    // ========== 스택 연산 (현재 프레임) ==========

    pub(crate) fn push(&mut self, v: Value) -> VmResult<()> {
        self.frame_mut()?.push(v)
    }

    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        self.frame_mut()?.pop()
    }

    pub(crate) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        self.frame_mut()?.pop_n(n)
    }

    pub(crate) fn top(&self) -> VmResult<Value> {
        self.frame()?.peek(1).cloned()
    }

    // ========== 프레임 실행 ==========

    /// 프레임을 하나 더 올릴 수 있는지. 한도에 닿았으면 RecursionError
    pub(crate) fn check_depth(&self) -> VmResult<()> {
        if self.frames.len() >= self.max_frames {
            return Err(crate::vm::exception::pending(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        Ok(())
    }

    /// 프레임을 스레드 체인에 올려 실행하고, 끝나면 내려서 돌려준다.
    ///
    /// 제너레이터는 돌려받은 프레임을 다시 보관한다.
    pub(crate) fn run_frame(&mut self, mut frame: Frame) -> VmResult<(FrameExit, Frame)> {
        self.check_depth()?;
        debug!(name = %frame.name, depth = self.frames.len(), "enter frame");
        frame.state = FrameState::Running;
        self.frames.push(frame);

        let result = self.dispatch();

        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| err(VmErrorKind::FrameState, "frame chain emptied during execution"))?;
        match result {
            Ok(exit) => {
                frame.state = match exit {
                    FrameExit::Return(_) => FrameState::Returned,
                    FrameExit::Yield(_) => FrameState::Suspended,
                };
                debug!(name = %frame.name, state = %frame.state, "leave frame");
                Ok((exit, frame))
            }
            Err(e) => {
                frame.state = FrameState::Raised;
                debug!(name = %frame.name, "frame raised");
                Err(e)
            }
        }
    }

    fn dispatch(&mut self) -> VmResult<FrameExit> {
        loop {
            match self.step() {
                Ok(ExecutionFlow::Continue) => {}
                Ok(ExecutionFlow::Return(v)) => return Ok(FrameExit::Return(v)),
                Ok(ExecutionFlow::Yield(v)) => return Ok(FrameExit::Yield(v)),
                Err(e) => match self.materialize(e) {
                    VmError::Raised(exc) => {
                        if !self.unwind(&exc)? {
                            return Err(VmError::Raised(exc));
                        }
                    }
                    other => return Err(other),
                },
            }
        }
    }

    fn step(&mut self) -> VmResult<ExecutionFlow> {
        let (code, ip) = {
            let frame = self.frame()?;
            (frame.code.clone(), frame.ip)
        };
        let ins = *code.instructions()?.get(ip).ok_or_else(|| {
            err(
                VmErrorKind::FrameState,
                format!("instruction index {} past end of '{}'", ip, code.name),
            )
        })?;
        {
            let frame = self.frame_mut()?;
            frame.lasti = ip;
            frame.ip = ip + 1;
        }
        if self.debug {
            trace!(code = %code.name, ip, instruction = %ins, "step");
        }
        self.execute_instruction(ins)
    }

    /// 코드 객체를 모듈 본문으로 실행 (로컬 = 전역 = 모듈 속성 테이블)
    pub fn run_module_code(&mut self, code: Arc<CodeObject>, module: &ObjRef) -> VmResult<Value> {
        let frame = Frame::new(
            code.clone(),
            code.name.clone(),
            module.clone(),
            Some(module.clone()),
            &[],
            self.max_stack,
        );
        match self.run_frame(frame)?.0 {
            FrameExit::Return(v) => Ok(v),
            FrameExit::Yield(_) => Err(err(VmErrorKind::FrameState, "module body yielded")),
        }
    }

    // ========== 예외 ==========

    /// 현재 프레임 체인 스냅샷 (가장 안쪽이 먼저)
    pub(crate) fn snapshot(&self) -> Vec<FrameInfo> {
        self.frames.iter().rev().map(|f| f.info(self.debug)).collect()
    }

    pub fn new_exception(&self, kind: ExcKind, args: Vec<Value>) -> ObjRef {
        let class = self.types().exception(kind).clone();
        self.new_exception_of(class, args)
    }

    pub fn new_exception_of(&self, class: ObjRef, args: Vec<Value>) -> ObjRef {
        Object::new(ObjectData::Exception(ExceptionData::new(class, args)))
    }

    /// Pending 예외를 객체로 만들고, 스냅샷이 없는 예외에는 현재 체인을 기록
    pub(crate) fn materialize(&mut self, e: VmError) -> VmError {
        match e {
            VmError::Pending { kind, message } => {
                let args = if message.is_empty() {
                    vec![]
                } else {
                    vec![Value::str(message)]
                };
                let exc = self.new_exception(kind, args);
                self.attach_raise_state(&exc);
                VmError::Raised(exc)
            }
            VmError::Raised(exc) => {
                if let ObjectData::Exception(data) = &exc.data
                    && data.frames().is_empty()
                {
                    self.attach_raise_state(&exc);
                }
                VmError::Raised(exc)
            }
            VmError::Internal {
                kind,
                message,
                frames,
            } if frames.is_empty() => VmError::Internal {
                kind,
                message,
                frames: self.snapshot(),
            },
            other => other,
        }
    }

    /// raise 시점 상태 기록: 프레임 스냅샷과 `__context__`
    pub(crate) fn attach_raise_state(&self, exc: &ObjRef) {
        if let ObjectData::Exception(data) = &exc.data {
            data.set_frames(self.snapshot());
        }
        if let Some(Value::Object(ctx)) = &self.exc_info
            && !Arc::ptr_eq(ctx, exc)
            && !exc.has_attr("__context__")
        {
            exc.set_attr("__context__", Value::Object(ctx.clone()));
        }
    }

    /// 현재 프레임의 블록 스택에서 예외를 처리할 블록을 찾는다.
    ///
    /// 찾으면 스택에 (이전 예외 3칸, 새 예외 3칸)을 올리고 처리기로 점프한 뒤 true.
    fn unwind(&mut self, exc: &ObjRef) -> VmResult<bool> {
        let exc_value = Value::Object(exc.clone());
        let exc_type = Value::Object(self.type_of(&exc_value));
        loop {
            let block = match self.frame_mut()?.blocks.pop() {
                Some(b) => b,
                None => return Ok(false),
            };
            match block.kind {
                BlockKind::ExceptHandler => {
                    let frame = self.frame_mut()?;
                    frame.truncate(block.level + 3);
                    let _ty = frame.pop()?;
                    let value = frame.pop()?;
                    let _tb = frame.pop()?;
                    self.exc_info = (!value.is_none()).then_some(value);
                }
                BlockKind::Finally => {
                    let prev = self.exc_info.take();
                    let prev_type = match &prev {
                        Some(v) => Value::Object(self.type_of(v)),
                        None => Value::None,
                    };
                    let frame = self.frame_mut()?;
                    frame.truncate(block.level);
                    let level = frame.stack.len();
                    frame.blocks.push(Block {
                        kind: BlockKind::ExceptHandler,
                        handler: block.handler,
                        level,
                    });
                    frame.push(Value::None)?;
                    frame.push(prev.unwrap_or(Value::None))?;
                    frame.push(prev_type)?;
                    frame.push(Value::None)?;
                    frame.push(exc_value.clone())?;
                    frame.push(exc_type)?;
                    frame.jump(block.handler);
                    self.exc_info = Some(exc_value);
                    return Ok(true);
                }
            }
        }
    }

    /// 에러가 주어진 예외 종류(또는 그 하위)인지 확인
    pub fn error_matches(&self, e: &VmError, kind: ExcKind) -> bool {
        let target = self.types().exception(kind);
        match e {
            VmError::Pending { kind: k, .. } => {
                let class = self.types().exception(*k);
                self.issubclass(class, target)
            }
            VmError::Raised(exc) => match &exc.data {
                ObjectData::Exception(data) => self.issubclass(&data.class, target),
                _ => false,
            },
            VmError::Internal { .. } => false,
        }
    }

    // ========== 스레드 루트 ==========

    /// 스레드 루트에서 callable 실행
    ///
    /// 처리되지 않은 예외는 보고서를 에러 채널에 쓰고 `ThreadExit::Unhandled`로 돌려준다.
    /// 디버그 모드에서는 전체 덤프를 쓴 뒤 원래 에러를 그대로 전파한다.
    pub fn run_root(&mut self, callable: &Value, args: Vec<Value>) -> VmResult<ThreadExit> {
        match self.call(callable, args, Vec::new()) {
            Ok(v) => Ok(ThreadExit::Finished(v)),
            Err(e) => self.handle_root_error(e),
        }
    }

    /// 코드 객체를 모듈로 실행하는 스레드 루트
    pub fn run_root_module(&mut self, code: Arc<CodeObject>, module: &ObjRef) -> VmResult<ThreadExit> {
        match self.run_module_code(code, module) {
            Ok(v) => Ok(ThreadExit::Finished(v)),
            Err(e) => self.handle_root_error(e),
        }
    }

    fn handle_root_error(&mut self, e: VmError) -> VmResult<ThreadExit> {
        let e = self.materialize(e);
        match e {
            VmError::Raised(exc) => {
                let frames = match &exc.data {
                    ObjectData::Exception(data) => data.frames(),
                    _ => Vec::new(),
                };
                if self.debug {
                    let dump = render_dump(&frames);
                    self.io.write_err(&dump);
                    return Err(VmError::Raised(exc));
                }
                let traceback = self.traceback_for(&exc, frames);
                warn!(thread = %self.thread_name, "unhandled exception: {}", traceback.message());
                self.io.write_err(&traceback.render());
                Ok(ThreadExit::Unhandled { traceback })
            }
            VmError::Internal {
                kind,
                message,
                frames,
            } => {
                error!(thread = %self.thread_name, %kind, "internal interpreter error: {}", message);
                self.io.write_err(&render_dump(&frames));
                Err(VmError::Internal {
                    kind,
                    message,
                    frames,
                })
            }
            pending => Err(pending),
        }
    }

    /// 예외 객체에서 트레이스백 보고서 생성 (인자는 `str()`로 변환)
    pub fn traceback_for(&mut self, exc: &ObjRef, frames: Vec<FrameInfo>) -> Traceback {
        let exc_value = Value::Object(exc.clone());
        let exc_type = self.type_name(&exc_value);
        let args = match &exc.data {
            ObjectData::Exception(data) => data.args(),
            _ => Vec::new(),
        };
        let args = args
            .iter()
            .map(|a| {
                self.to_str(a)
                    .unwrap_or_else(|_| format!("<unprintable {} object>", type_name(a)))
            })
            .collect();
        let source = self.excerpt_for(frames.first());
        Traceback {
            thread_name: self.thread_name.clone(),
            frames,
            exc_type,
            args,
            source,
        }
    }

    /// 가장 안쪽 프레임의 모듈 소스를 알면 발췌 정보 생성
    fn excerpt_for(&self, innermost: Option<&FrameInfo>) -> Option<SourceExcerpt> {
        let info = innermost?;
        let registry = self.interp.registry();
        let module = registry.find_by_filename(&info.filename)?;
        match &module.data {
            ObjectData::Module(m) => m.source.get().map(|text| SourceExcerpt {
                filename: info.filename.clone(),
                text: text.clone(),
                line: info.line,
            }),
            _ => None,
        }
    }
}
