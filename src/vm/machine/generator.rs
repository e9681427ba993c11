//! 제너레이터: 프레임을 떼어 보관했다가 send 때 다시 실행
//!
//! 슬롯 상태는 `Ready(frame) → Running → Ready | Finished` 순서로 바뀝니다.
//! 실행 중에는 슬롯에 `Running`만 남으므로 같은 제너레이터를 동시에 재개할 수 없습니다.

use std::mem;
use std::sync::Mutex;
use tracing::debug;

use super::frame::{Frame, FrameState};
use super::{FrameExit, Vm, VmError, VmErrorKind, VmResult, err};
use crate::vm::exception::{ExcKind, runtime_error, stop_iteration, type_error, value_error};
use crate::vm::utils::lock;
use crate::vm::value::{FunctionData, GenSlot, GeneratorData, ObjRef, Object, ObjectData, Value};

/// 제너레이터 한 번 재개의 결과
#[derive(Debug, Clone)]
pub enum GenStep {
    Yielded(Value),
    Returned(Value),
}

impl Vm {
    /// 생성된(아직 실행 전) 프레임을 감싼 제너레이터 객체
    pub(crate) fn make_generator(&self, frame: Frame, f: &FunctionData) -> Value {
        Value::Object(Object::new(ObjectData::Generator(GeneratorData {
            name: f.name.clone(),
            qualname: f.qualname.clone(),
            slot: Mutex::new(GenSlot::Ready(Box::new(frame))),
            exc_state: Mutex::new(None),
        })))
    }

    /// 제너레이터를 다음 yield 또는 return까지 실행
    pub fn resume(&mut self, generator: &ObjRef, value: Value) -> VmResult<GenStep> {
        let ObjectData::Generator(data) = &generator.data else {
            return Err(err(VmErrorKind::FrameState, "resume on a non-generator object"));
        };
        // 프레임을 꺼내기 전에 검사해야 재귀 한도 초과 뒤에도 제너레이터가 살아 있다
        self.check_depth()?;
        let taken = mem::replace(&mut *lock(&data.slot), GenSlot::Running);
        let mut frame = match taken {
            GenSlot::Running => return Err(value_error("generator already executing")),
            GenSlot::Finished => {
                *lock(&data.slot) = GenSlot::Finished;
                return Err(stop_iteration());
            }
            GenSlot::Ready(frame) => frame,
        };

        if frame.state == FrameState::Created {
            if !value.is_none() {
                *lock(&data.slot) = GenSlot::Ready(frame);
                return Err(type_error(
                    "can't send non-None value to a just-started generator",
                ));
            }
        } else if let Err(e) = frame.push(value) {
            *lock(&data.slot) = GenSlot::Finished;
            return Err(e);
        }

        debug!(generator = %data.qualname, "resume generator");
        // 제너레이터의 처리 중 예외를 들여오고, 없으면 호출자의 것이 보인다
        let caller_exc = self.exc_info.take();
        let own_exc = lock(&data.exc_state).take();
        let inherited = own_exc.is_none();
        self.exc_info = own_exc.or_else(|| caller_exc.clone());
        let result = self.run_frame(*frame);
        let left_exc = mem::replace(&mut self.exc_info, caller_exc);

        match result {
            Ok((FrameExit::Yield(v), frame)) => {
                let borrowed = match (&left_exc, &self.exc_info) {
                    (Some(left), Some(caller)) => inherited && left.is(caller),
                    _ => false,
                };
                if !borrowed {
                    *lock(&data.exc_state) = left_exc;
                }
                *lock(&data.slot) = GenSlot::Ready(Box::new(frame));
                Ok(GenStep::Yielded(v))
            }
            Ok((FrameExit::Return(v), _)) => {
                *lock(&data.slot) = GenSlot::Finished;
                Ok(GenStep::Returned(v))
            }
            Err(e) => {
                *lock(&data.slot) = GenSlot::Finished;
                if self.error_matches(&e, ExcKind::StopIteration) {
                    return Err(runtime_error("generator raised StopIteration"));
                }
                Err(e)
            }
        }
    }

    /// `gen.send(value)`. 끝나면 반환값을 가진 StopIteration
    pub fn send(&mut self, generator: &Value, value: Value) -> VmResult<Value> {
        let gen_obj = match generator {
            Value::Object(o) if matches!(o.data, ObjectData::Generator(_)) => o.clone(),
            other => {
                return Err(type_error(format!(
                    "descriptor 'send' requires a 'generator' object but received a '{}'",
                    self.type_name(other)
                )));
            }
        };
        match self.resume(&gen_obj, value)? {
            GenStep::Yielded(v) => Ok(v),
            GenStep::Returned(v) => Err(self.stop_iteration_with(v)),
        }
    }

    /// 제너레이터를 끝난 상태로 만듦. 실행 중이면 ValueError
    pub fn close_generator(&mut self, generator: &ObjRef) -> VmResult<()> {
        let ObjectData::Generator(data) = &generator.data else {
            return Err(err(VmErrorKind::FrameState, "close on a non-generator object"));
        };
        let mut slot = lock(&data.slot);
        if matches!(*slot, GenSlot::Running) {
            return Err(value_error("generator already executing"));
        }
        *slot = GenSlot::Finished;
        lock(&data.exc_state).take();
        Ok(())
    }

    /// `args[0]`과 `value` 속성에 반환값을 담은 StopIteration
    pub fn stop_iteration_with(&self, value: Value) -> VmError {
        let args = if value.is_none() {
            Vec::new()
        } else {
            vec![value.clone()]
        };
        let exc = self.new_exception(ExcKind::StopIteration, args);
        exc.set_attr("value", value);
        VmError::Raised(exc)
    }

    /// StopIteration 에러에서 반환값 추출
    pub fn stop_iteration_value(&self, e: &VmError) -> Value {
        match e {
            VmError::Raised(exc) => exc.get_attr("value").unwrap_or_else(|| match &exc.data {
                ObjectData::Exception(data) => data.args().into_iter().next().unwrap_or(Value::None),
                _ => Value::None,
            }),
            _ => Value::None,
        }
    }

    /// YIELD_FROM 한 단계: 제너레이터에는 send, 그 외 이터레이터에는 `__next__`/`send`
    pub(crate) fn yield_from(&mut self, receiver: &Value, sent: Value) -> VmResult<GenStep> {
        let result = match receiver {
            Value::Object(o) if matches!(o.data, ObjectData::Generator(_)) => {
                match self.resume(o, sent) {
                    Ok(step) => return Ok(step),
                    Err(e) => Err(e),
                }
            }
            _ if sent.is_none() => match self.call_special(receiver, "__next__", Vec::new()) {
                Ok(Some(v)) => Ok(v),
                Ok(None) => {
                    return Err(type_error(format!(
                        "'{}' object is not an iterator",
                        self.type_name(receiver)
                    )));
                }
                Err(e) => Err(e),
            },
            _ => self.call_method(receiver, "send", vec![sent]),
        };
        match result {
            Ok(v) => Ok(GenStep::Yielded(v)),
            Err(e) if self.error_matches(&e, ExcKind::StopIteration) => {
                Ok(GenStep::Returned(self.stop_iteration_value(&e)))
            }
            Err(e) => Err(e),
        }
    }
}
