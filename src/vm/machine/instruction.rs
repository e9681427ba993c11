use indexmap::IndexMap;
use std::sync::RwLock;

use super::generator::GenStep;
use super::{Block, BlockKind, BinOp, CompareOp, Vm, VmError, VmErrorKind, VmResult, err};
use crate::vm::bytecode::{Instruction as I, Opcode};
use crate::vm::exception::{
    ExcKind, attribute_error, name_error, pending, runtime_error, system_error, type_error,
    value_error,
};
use crate::vm::signature::{Signature, split_stack_args};
use crate::vm::type_def::type_data;
use crate::vm::utils::{read, write};
use crate::vm::value::{
    CellRef, DictMap, FunctionData, ObjRef, Object, ObjectData, SetMap, Value,
};

/// 명령어 실행 결과
#[derive(Debug, Clone)]
pub enum ExecutionFlow {
    /// 다음 명령어 계속 실행
    Continue,
    /// 프레임 리턴
    Return(Value),
    /// 제너레이터 중단 (프레임은 그대로 보존)
    Yield(Value),
}

use ExecutionFlow::Continue;

impl Vm {
    /// 단일 명령어 실행 (디스패처)
    pub(super) fn execute_instruction(&mut self, ins: I) -> VmResult<ExecutionFlow> {
        use Opcode as Op;
        match ins.opcode {
            // ===== 스택 조작 =====
            Op::Nop | Op::ExtendedArg => Ok(Continue),
            Op::PopTop => {
                self.pop()?;
                Ok(Continue)
            }
            Op::RotTwo => self.handle_rotate(2),
            Op::RotThree => self.handle_rotate(3),
            Op::RotFour => self.handle_rotate(4),
            Op::DupTop => self.handle_dup_top(),
            Op::DupTopTwo => self.handle_dup_top_two(),

            // ===== 단항 연산 =====
            Op::UnaryPositive => self.handle_unary("__pos__", "+"),
            Op::UnaryNegative => self.handle_unary("__neg__", "-"),
            Op::UnaryInvert => self.handle_unary("__invert__", "~"),
            Op::UnaryNot => self.handle_unary_not(),

            // ===== 이항 연산 =====
            Op::BinaryAdd => self.handle_binary(BinOp::Add),
            Op::BinarySubtract => self.handle_binary(BinOp::Sub),
            Op::BinaryMultiply => self.handle_binary(BinOp::Mul),
            Op::BinaryMatrixMultiply => self.handle_binary(BinOp::MatMul),
            Op::BinaryTrueDivide => self.handle_binary(BinOp::TrueDiv),
            Op::BinaryFloorDivide => self.handle_binary(BinOp::FloorDiv),
            Op::BinaryModulo => self.handle_binary(BinOp::Mod),
            Op::BinaryPower => self.handle_binary(BinOp::Pow),
            Op::BinaryLshift => self.handle_binary(BinOp::LShift),
            Op::BinaryRshift => self.handle_binary(BinOp::RShift),
            Op::BinaryAnd => self.handle_binary(BinOp::And),
            Op::BinaryXor => self.handle_binary(BinOp::Xor),
            Op::BinaryOr => self.handle_binary(BinOp::Or),

            // ===== 제자리 연산 =====
            Op::InplaceAdd => self.handle_inplace(BinOp::Add),
            Op::InplaceSubtract => self.handle_inplace(BinOp::Sub),
            Op::InplaceMultiply => self.handle_inplace(BinOp::Mul),
            Op::InplaceMatrixMultiply => self.handle_inplace(BinOp::MatMul),
            Op::InplaceTrueDivide => self.handle_inplace(BinOp::TrueDiv),
            Op::InplaceFloorDivide => self.handle_inplace(BinOp::FloorDiv),
            Op::InplaceModulo => self.handle_inplace(BinOp::Mod),
            Op::InplacePower => self.handle_inplace(BinOp::Pow),
            Op::InplaceLshift => self.handle_inplace(BinOp::LShift),
            Op::InplaceRshift => self.handle_inplace(BinOp::RShift),
            Op::InplaceAnd => self.handle_inplace(BinOp::And),
            Op::InplaceXor => self.handle_inplace(BinOp::Xor),
            Op::InplaceOr => self.handle_inplace(BinOp::Or),

            // ===== 서브스크립트 =====
            Op::BinarySubscr => self.handle_binary_subscr(),
            Op::StoreSubscr => self.handle_store_subscr(),
            Op::DeleteSubscr => self.handle_delete_subscr(),

            // ===== 비교 =====
            Op::CompareOp => self.handle_compare_op(ins.arg),
            Op::IsOp => self.handle_is_op(ins.arg),
            Op::ContainsOp => self.handle_contains_op(ins.arg),

            // ===== 제어 흐름 =====
            Op::JumpForward | Op::JumpAbsolute => {
                self.jump_to(ins)?;
                Ok(Continue)
            }
            Op::PopJumpIfFalse => self.handle_pop_jump_if(ins, false),
            Op::PopJumpIfTrue => self.handle_pop_jump_if(ins, true),
            Op::JumpIfFalseOrPop => self.handle_jump_if_or_pop(ins, false),
            Op::JumpIfTrueOrPop => self.handle_jump_if_or_pop(ins, true),
            Op::ReturnValue => Ok(ExecutionFlow::Return(self.pop()?)),

            // ===== 반복 / 제너레이터 =====
            Op::GetIter => self.handle_get_iter(),
            Op::GetYieldFromIter => self.handle_get_yield_from_iter(),
            Op::ForIter => self.handle_for_iter(ins),
            Op::YieldValue => Ok(ExecutionFlow::Yield(self.pop()?)),
            Op::YieldFrom => self.handle_yield_from(),

            // ===== 로드 / 저장 =====
            Op::LoadConst => {
                let v = self.frame()?.const_at(ins.arg)?;
                self.push(v)?;
                Ok(Continue)
            }
            Op::LoadFast => self.handle_load_fast(ins.arg),
            Op::StoreFast => self.handle_store_fast(ins.arg),
            Op::DeleteFast => self.handle_delete_fast(ins.arg),
            Op::LoadName => self.handle_load_name(ins.arg),
            Op::StoreName => self.handle_store_name(ins.arg),
            Op::DeleteName => self.handle_delete_name(ins.arg),
            Op::LoadGlobal => self.handle_load_global(ins.arg),
            Op::StoreGlobal => self.handle_store_global(ins.arg),
            Op::DeleteGlobal => self.handle_delete_global(ins.arg),
            Op::LoadAttr => self.handle_load_attr(ins.arg),
            Op::StoreAttr => self.handle_store_attr(ins.arg),
            Op::DeleteAttr => self.handle_delete_attr(ins.arg),
            Op::LoadMethod => self.handle_load_method(ins.arg),

            // ===== 클로저 =====
            Op::LoadClosure => {
                let cell = self.frame()?.cell_at(ins.arg)?.clone();
                self.push(Value::cell(cell))?;
                Ok(Continue)
            }
            Op::LoadDeref => self.handle_load_deref(ins.arg),
            Op::StoreDeref => self.handle_store_deref(ins.arg),
            Op::DeleteDeref => self.handle_delete_deref(ins.arg),
            Op::LoadClassderef => self.handle_load_classderef(ins.arg),

            // ===== 호출 / 함수 생성 =====
            Op::CallFunction => self.handle_call_function(ins.arg),
            Op::CallFunctionKw => self.handle_call_function_kw(ins.arg),
            Op::CallFunctionEx => self.handle_call_function_ex(ins.arg),
            Op::CallMethod => self.handle_call_method(ins.arg),
            Op::MakeFunction => self.handle_make_function(ins.arg),
            Op::LoadBuildClass => self.handle_load_build_class(),

            // ===== 컬렉션 생성 =====
            Op::BuildTuple => {
                let items = self.pop_n(ins.arg as usize)?;
                self.push(Value::tuple(items))?;
                Ok(Continue)
            }
            Op::BuildList => {
                let items = self.pop_n(ins.arg as usize)?;
                self.push(Value::list(items))?;
                Ok(Continue)
            }
            Op::BuildSet => self.handle_build_set(ins.arg),
            Op::BuildMap => self.handle_build_map(ins.arg),
            Op::BuildConstKeyMap => self.handle_build_const_key_map(ins.arg),
            Op::BuildString => self.handle_build_string(ins.arg),
            Op::BuildSlice => self.handle_build_slice(ins.arg),

            // ===== 컬렉션 갱신 =====
            Op::ListAppend => self.handle_list_append(ins.arg),
            Op::SetAdd => self.handle_set_add(ins.arg),
            Op::MapAdd => self.handle_map_add(ins.arg),
            Op::ListExtend => self.handle_list_extend(ins.arg),
            Op::SetUpdate => self.handle_set_update(ins.arg),
            Op::DictUpdate => self.handle_dict_update(ins.arg, false),
            Op::DictMerge => self.handle_dict_update(ins.arg, true),
            Op::ListToTuple => {
                let list = self.pop()?;
                let items = read(list_of(&list)?).clone();
                self.push(Value::tuple(items))?;
                Ok(Continue)
            }

            // ===== 언패킹 / 포맷 =====
            Op::UnpackSequence => self.handle_unpack_sequence(ins.arg),
            Op::UnpackEx => self.handle_unpack_ex(ins.arg),
            Op::FormatValue => self.handle_format_value(ins.arg),

            // ===== 예외 / 블록 =====
            Op::SetupFinally => self.handle_setup_finally(ins),
            Op::SetupWith => self.handle_setup_with(ins),
            Op::WithExceptStart => self.handle_with_except_start(),
            Op::PopBlock => {
                self.frame_mut()?
                    .blocks
                    .pop()
                    .ok_or_else(|| err(VmErrorKind::FrameState, "POP_BLOCK on empty block stack"))?;
                Ok(Continue)
            }
            Op::PopExcept => self.handle_pop_except(),
            Op::Reraise => self.handle_reraise(),
            Op::JumpIfNotExcMatch => self.handle_jump_if_not_exc_match(ins),
            Op::RaiseVarargs => self.handle_raise_varargs(ins.arg),
            Op::LoadAssertionError => {
                let class = self.types().exception(ExcKind::AssertionError).clone();
                self.push(Value::Object(class))?;
                Ok(Continue)
            }

            // ===== 임포트 =====
            Op::ImportName => self.handle_import_name(ins.arg),
            Op::ImportFrom => self.handle_import_from(ins.arg),
            Op::ImportStar => self.handle_import_star(),

            // ===== 기타 =====
            Op::SetupAnnotations => self.handle_setup_annotations(),
            Op::PrintExpr => self.handle_print_expr(),

            Op::GetAiter
            | Op::GetAnext
            | Op::BeforeAsyncWith
            | Op::EndAsyncFor
            | Op::GetAwaitable
            | Op::SetupAsyncWith => Err(system_error(format!(
                "unsupported opcode {}",
                ins.opcode
            ))),
        }
    }

    // ==================== 보조 함수 ====================

    fn jump_target(&self, ins: I) -> VmResult<usize> {
        let idx = self.frame()?.lasti;
        ins.jump_target(idx).ok_or_else(|| {
            err(
                VmErrorKind::MalformedCode,
                format!("{} is not a jump", ins.opcode),
            )
        })
    }

    fn jump_to(&mut self, ins: I) -> VmResult<()> {
        let target = self.jump_target(ins)?;
        self.frame_mut()?.jump(target);
        Ok(())
    }

    /// 현재 프레임의 이름공간 로컬 (모듈/클래스 본문)
    fn namespace(&self) -> VmResult<ObjRef> {
        self.frame()?
            .locals
            .clone()
            .ok_or_else(|| system_error("no locals found"))
    }

    fn current_name(&self, idx: u32) -> VmResult<String> {
        Ok(self.frame()?.name_at(idx)?.to_string())
    }

    /// 타입에서 특수 메서드를 찾아 바인딩. 없으면 AttributeError
    fn lookup_special(&mut self, obj: &Value, name: &str) -> VmResult<Value> {
        let ty = self.type_of(obj);
        match type_data(&ty).and_then(|t| t.lookup(name)) {
            Some(attr) => self.descriptor_get(attr, obj, &ty),
            None => Err(attribute_error(name.to_string())),
        }
    }

    // ==================== 스택 조작 핸들러 ====================

    /// TOS를 n번째 위치로 내림
    fn handle_rotate(&mut self, n: usize) -> VmResult<ExecutionFlow> {
        let frame = self.frame_mut()?;
        if frame.stack.len() < n {
            return Err(err(VmErrorKind::StackUnderflow, "stack underflow"));
        }
        let top = frame.pop()?;
        let at = frame.stack.len() + 1 - n;
        frame.stack.insert(at, top);
        Ok(Continue)
    }

    fn handle_dup_top(&mut self) -> VmResult<ExecutionFlow> {
        let top = self.top()?;
        self.push(top)?;
        Ok(Continue)
    }

    fn handle_dup_top_two(&mut self) -> VmResult<ExecutionFlow> {
        let (a, b) = {
            let frame = self.frame()?;
            (frame.peek(2)?.clone(), frame.peek(1)?.clone())
        };
        self.push(a)?;
        self.push(b)?;
        Ok(Continue)
    }

    // ==================== 연산 핸들러 ====================

    fn handle_unary(&mut self, name: &str, symbol: &str) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let r = self.unary_op(name, symbol, &v)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_unary_not(&mut self) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let truth = self.is_true(&v)?;
        self.push(Value::Bool(!truth))?;
        Ok(Continue)
    }

    fn handle_binary(&mut self, op: BinOp) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.binary_op(op, &a, &b)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_inplace(&mut self, op: BinOp) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.inplace_op(op, &a, &b)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_binary_subscr(&mut self) -> VmResult<ExecutionFlow> {
        let key = self.pop()?;
        let obj = self.pop()?;
        let r = self.getitem(&obj, &key)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_store_subscr(&mut self) -> VmResult<ExecutionFlow> {
        let key = self.pop()?;
        let obj = self.pop()?;
        let value = self.pop()?;
        self.setitem(&obj, &key, value)?;
        Ok(Continue)
    }

    fn handle_delete_subscr(&mut self) -> VmResult<ExecutionFlow> {
        let key = self.pop()?;
        let obj = self.pop()?;
        self.delitem(&obj, &key)?;
        Ok(Continue)
    }

    fn handle_compare_op(&mut self, arg: u32) -> VmResult<ExecutionFlow> {
        let op = CompareOp::from_arg(arg).ok_or_else(|| {
            err(
                VmErrorKind::MalformedCode,
                format!("bad COMPARE_OP argument {}", arg),
            )
        })?;
        let b = self.pop()?;
        let a = self.pop()?;
        let r = self.compare(op, &a, &b)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_is_op(&mut self, invert: u32) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(a.is(&b) != (invert == 1)))?;
        Ok(Continue)
    }

    fn handle_contains_op(&mut self, invert: u32) -> VmResult<ExecutionFlow> {
        let container = self.pop()?;
        let item = self.pop()?;
        let found = self.contains(&container, &item)?;
        self.push(Value::Bool(found != (invert == 1)))?;
        Ok(Continue)
    }

    // ==================== 제어 흐름 핸들러 ====================

    fn handle_pop_jump_if(&mut self, ins: I, when: bool) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        if self.is_true(&v)? == when {
            self.jump_to(ins)?;
        }
        Ok(Continue)
    }

    fn handle_jump_if_or_pop(&mut self, ins: I, when: bool) -> VmResult<ExecutionFlow> {
        let v = self.top()?;
        if self.is_true(&v)? == when {
            self.jump_to(ins)?;
        } else {
            self.pop()?;
        }
        Ok(Continue)
    }

    // ==================== 반복 핸들러 ====================

    fn handle_get_iter(&mut self) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let it = self.iter(&v)?;
        self.push(it)?;
        Ok(Continue)
    }

    fn handle_get_yield_from_iter(&mut self) -> VmResult<ExecutionFlow> {
        let v = self.top()?;
        let is_generator = matches!(&v, Value::Object(o) if matches!(o.data, ObjectData::Generator(_)));
        if !is_generator {
            self.pop()?;
            let it = self.iter(&v)?;
            self.push(it)?;
        }
        Ok(Continue)
    }

    fn handle_for_iter(&mut self, ins: I) -> VmResult<ExecutionFlow> {
        let it = self.top()?;
        match self.next(&it)? {
            Some(v) => self.push(v)?,
            None => {
                self.pop()?;
                self.jump_to(ins)?;
            }
        }
        Ok(Continue)
    }

    /// 내부 이터레이터가 yield하는 동안 같은 명령어를 다시 실행하도록 ip를 되돌림
    fn handle_yield_from(&mut self) -> VmResult<ExecutionFlow> {
        let sent = self.pop()?;
        let receiver = self.top()?;
        match self.yield_from(&receiver, sent)? {
            GenStep::Yielded(v) => {
                let frame = self.frame_mut()?;
                frame.ip = frame.lasti;
                Ok(ExecutionFlow::Yield(v))
            }
            GenStep::Returned(v) => {
                self.pop()?;
                self.push(v)?;
                Ok(Continue)
            }
        }
    }

    // ==================== 로드/저장 핸들러 ====================

    fn handle_load_fast(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let frame = self.frame()?;
        let slot = frame
            .fast
            .get(idx as usize)
            .ok_or_else(|| err(VmErrorKind::PoolIndex, format!("fast slot {} out of range", idx)))?;
        match slot.clone() {
            Some(v) => {
                self.push(v)?;
                Ok(Continue)
            }
            None => Err(pending(
                ExcKind::UnboundLocalError,
                format!(
                    "local variable '{}' referenced before assignment",
                    frame.varname_at(idx)?
                ),
            )),
        }
    }

    fn handle_store_fast(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let frame = self.frame_mut()?;
        let slot = frame
            .fast
            .get_mut(idx as usize)
            .ok_or_else(|| err(VmErrorKind::PoolIndex, format!("fast slot {} out of range", idx)))?;
        *slot = Some(v);
        Ok(Continue)
    }

    fn handle_delete_fast(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let frame = self.frame_mut()?;
        let name = frame.varname_at(idx)?.to_string();
        match frame.fast.get_mut(idx as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(Continue)
            }
            _ => Err(pending(
                ExcKind::UnboundLocalError,
                format!("local variable '{}' referenced before assignment", name),
            )),
        }
    }

    /// 로컬 이름공간 → 전역 → 빌트인
    fn handle_load_name(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let (name, locals, globals) = {
            let frame = self.frame()?;
            (
                frame.name_at(idx)?.to_string(),
                frame.locals.clone(),
                frame.globals.clone(),
            )
        };
        let value = locals
            .and_then(|l| l.get_attr(&name))
            .or_else(|| globals.get_attr(&name))
            .or_else(|| self.builtins().get_attr(&name));
        match value {
            Some(v) => {
                self.push(v)?;
                Ok(Continue)
            }
            None => Err(name_error(format!("name '{}' is not defined", name))),
        }
    }

    fn handle_store_name(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let v = self.pop()?;
        self.namespace()?.set_attr(name, v);
        Ok(Continue)
    }

    fn handle_delete_name(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        if !self.namespace()?.del_attr(&name) {
            return Err(name_error(format!("name '{}' is not defined", name)));
        }
        Ok(Continue)
    }

    fn handle_load_global(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let (name, globals) = {
            let frame = self.frame()?;
            (frame.name_at(idx)?.to_string(), frame.globals.clone())
        };
        match globals
            .get_attr(&name)
            .or_else(|| self.builtins().get_attr(&name))
        {
            Some(v) => {
                self.push(v)?;
                Ok(Continue)
            }
            None => Err(name_error(format!("name '{}' is not defined", name))),
        }
    }

    fn handle_store_global(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let v = self.pop()?;
        self.frame()?.globals.set_attr(name, v);
        Ok(Continue)
    }

    fn handle_delete_global(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        if !self.frame()?.globals.del_attr(&name) {
            return Err(name_error(format!("name '{}' is not defined", name)));
        }
        Ok(Continue)
    }

    fn handle_load_attr(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let obj = self.pop()?;
        let v = self.get_attribute(&obj, &name)?;
        self.push(v)?;
        Ok(Continue)
    }

    fn handle_store_attr(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let obj = self.pop()?;
        let value = self.pop()?;
        self.set_attribute(&obj, &name, value)?;
        Ok(Continue)
    }

    fn handle_delete_attr(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let obj = self.pop()?;
        self.delete_attribute(&obj, &name)?;
        Ok(Continue)
    }

    /// 바인딩된 메서드와 자리 채움 값 하나를 올림. CALL_METHOD가 둘 다 꺼냄
    fn handle_load_method(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let obj = self.pop()?;
        let method = self.get_attribute(&obj, &name)?;
        self.push(method)?;
        self.push(Value::None)?;
        Ok(Continue)
    }

    // ==================== 클로저 핸들러 ====================

    fn deref_unbound(&self, idx: u32) -> VmResult<VmError> {
        let code = &self.frame()?.code;
        let name = code
            .cell_name(idx as usize)
            .cloned()
            .unwrap_or_default();
        Ok(if (idx as usize) < code.cellvars.len() {
            pending(
                ExcKind::UnboundLocalError,
                format!("local variable '{}' referenced before assignment", name),
            )
        } else {
            name_error(format!(
                "free variable '{}' referenced before assignment in enclosing scope",
                name
            ))
        })
    }

    fn handle_load_deref(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let cell: CellRef = self.frame()?.cell_at(idx)?.clone();
        let value = read(&cell).clone();
        match value {
            Some(v) => {
                self.push(v)?;
                Ok(Continue)
            }
            None => Err(self.deref_unbound(idx)?),
        }
    }

    fn handle_store_deref(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let cell = self.frame()?.cell_at(idx)?.clone();
        *write(&cell) = Some(v);
        Ok(Continue)
    }

    fn handle_delete_deref(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let cell = self.frame()?.cell_at(idx)?.clone();
        if write(&cell).take().is_none() {
            return Err(self.deref_unbound(idx)?);
        }
        Ok(Continue)
    }

    /// 클래스 본문: 이름공간에 같은 이름이 있으면 그것을, 아니면 셀 값
    fn handle_load_classderef(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let (name, locals) = {
            let frame = self.frame()?;
            let name = frame.code.cell_name(idx as usize).cloned().ok_or_else(|| {
                err(VmErrorKind::PoolIndex, format!("cells index {} out of range", idx))
            })?;
            (name, frame.locals.clone())
        };
        if let Some(v) = locals.and_then(|l| l.get_attr(&name)) {
            self.push(v)?;
            return Ok(Continue);
        }
        self.handle_load_deref(idx)
    }

    // ==================== 호출 핸들러 ====================

    fn handle_call_function(&mut self, argc: u32) -> VmResult<ExecutionFlow> {
        let args = self.pop_n(argc as usize)?;
        let func = self.pop()?;
        let r = self.call(&func, args, Vec::new())?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_call_function_kw(&mut self, argc: u32) -> VmResult<ExecutionFlow> {
        let names = self.pop()?;
        let names: Vec<String> = names
            .tuple_items()
            .ok_or_else(|| err(VmErrorKind::MalformedCode, "CALL_FUNCTION_KW expects a name tuple"))?
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect::<Option<_>>()
            .ok_or_else(|| err(VmErrorKind::MalformedCode, "keyword names must be strings"))?;
        let values = self.pop_n(argc as usize)?;
        let func = self.pop()?;
        let (positional, keywords) = split_stack_args(values, &names)?;
        let r = self.call(&func, positional, keywords)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_call_function_ex(&mut self, flags: u32) -> VmResult<ExecutionFlow> {
        let kwargs = if flags & 0x01 != 0 {
            let mapping = self.pop()?;
            self.keyword_items(&mapping)?
        } else {
            Vec::new()
        };
        let args = self.pop()?;
        let func = self.pop()?;
        let positional = match args.tuple_items() {
            Some(items) => items,
            None => self.collect(&args)?,
        };
        let r = self.call(&func, positional, kwargs)?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_call_method(&mut self, argc: u32) -> VmResult<ExecutionFlow> {
        let args = self.pop_n(argc as usize)?;
        self.pop()?;
        let method = self.pop()?;
        let r = self.call(&method, args, Vec::new())?;
        self.push(r)?;
        Ok(Continue)
    }

    /// 플래그: 0x01 기본값 튜플, 0x02 키워드 기본값 dict, 0x04 어노테이션, 0x08 클로저
    fn handle_make_function(&mut self, flags: u32) -> VmResult<ExecutionFlow> {
        let qualname = self.pop()?;
        let code_value = self.pop()?;
        let closure: Vec<CellRef> = if flags & 0x08 != 0 {
            let cells = self.pop()?;
            cells
                .tuple_items()
                .unwrap_or_default()
                .iter()
                .map(|c| match c {
                    Value::Object(o) => match &o.data {
                        ObjectData::Cell(cell) => Some(cell.clone()),
                        _ => None,
                    },
                    _ => None,
                })
                .collect::<Option<_>>()
                .ok_or_else(|| err(VmErrorKind::MalformedCode, "closure must be a tuple of cells"))?
        } else {
            Vec::new()
        };
        if flags & 0x04 != 0 {
            self.pop()?;
        }
        let kwdefaults: IndexMap<String, Value> = if flags & 0x02 != 0 {
            let d = self.pop()?;
            d.str_keyed_items().unwrap_or_default().into_iter().collect()
        } else {
            IndexMap::new()
        };
        let defaults = if flags & 0x01 != 0 {
            self.pop()?.tuple_items().unwrap_or_default()
        } else {
            Vec::new()
        };

        let code = match &code_value {
            Value::Object(o) => match &o.data {
                ObjectData::Code(c) => c.clone(),
                _ => return Err(err(VmErrorKind::MalformedCode, "MAKE_FUNCTION expects a code object")),
            },
            _ => return Err(err(VmErrorKind::MalformedCode, "MAKE_FUNCTION expects a code object")),
        };
        let qualname = qualname
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| code.name.clone());
        let globals = self.frame()?.globals.clone();
        let module_name = globals.get_attr("__name__").unwrap_or(Value::None);
        let signature = Signature::from_code(code.name.clone(), &code, &defaults, &kwdefaults)?;

        let func = Object::new(ObjectData::Function(FunctionData {
            name: code.name.clone(),
            qualname: qualname.clone(),
            code: code.clone(),
            globals,
            defaults,
            kwdefaults,
            closure,
            signature,
        }));
        func.set_attr("__name__", Value::str(code.name.clone()));
        func.set_attr("__qualname__", Value::str(qualname));
        func.set_attr("__module__", module_name);
        self.push(Value::Object(func))?;
        Ok(Continue)
    }

    fn handle_load_build_class(&mut self) -> VmResult<ExecutionFlow> {
        let build_class = self
            .builtins()
            .get_attr("__build_class__")
            .ok_or_else(|| name_error("__build_class__ not found"))?;
        self.push(build_class)?;
        Ok(Continue)
    }

    // ==================== 컬렉션 핸들러 ====================

    fn handle_build_set(&mut self, count: u32) -> VmResult<ExecutionFlow> {
        let items = self.pop_n(count as usize)?;
        let mut set = SetMap::with_capacity(items.len());
        for item in items {
            let key = self.dict_key(&item)?;
            set.entry(key).or_insert(item);
        }
        self.push(Value::set(set, false))?;
        Ok(Continue)
    }

    fn handle_build_map(&mut self, count: u32) -> VmResult<ExecutionFlow> {
        let items = self.pop_n(2 * count as usize)?;
        let mut map = DictMap::with_capacity(count as usize);
        for pair in items.chunks_exact(2) {
            let key = self.dict_key(&pair[0])?;
            map.insert(key, (pair[0].clone(), pair[1].clone()));
        }
        self.push(Value::dict(map))?;
        Ok(Continue)
    }

    fn handle_build_const_key_map(&mut self, count: u32) -> VmResult<ExecutionFlow> {
        let keys = self.pop()?;
        let keys = keys
            .tuple_items()
            .filter(|k| k.len() == count as usize)
            .ok_or_else(|| err(VmErrorKind::MalformedCode, "BUILD_CONST_KEY_MAP expects a key tuple"))?;
        let values = self.pop_n(count as usize)?;
        let mut map = DictMap::with_capacity(keys.len());
        for (k, v) in keys.into_iter().zip(values) {
            let key = self.dict_key(&k)?;
            map.insert(key, (k, v));
        }
        self.push(Value::dict(map))?;
        Ok(Continue)
    }

    fn handle_build_string(&mut self, count: u32) -> VmResult<ExecutionFlow> {
        let parts = self.pop_n(count as usize)?;
        let mut out = String::new();
        for p in &parts {
            out.push_str(p.as_str().ok_or_else(|| {
                err(VmErrorKind::MalformedCode, "BUILD_STRING expects str operands")
            })?);
        }
        self.push(Value::str(out))?;
        Ok(Continue)
    }

    fn handle_build_slice(&mut self, argc: u32) -> VmResult<ExecutionFlow> {
        let step = if argc == 3 { self.pop()? } else { Value::None };
        let stop = self.pop()?;
        let start = self.pop()?;
        self.push(Value::Object(Object::new(ObjectData::Slice { start, stop, step })))?;
        Ok(Continue)
    }

    fn handle_list_append(&mut self, depth: u32) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        write(list_of(&target)?).push(v);
        Ok(Continue)
    }

    fn handle_set_add(&mut self, depth: u32) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        let key = self.dict_key(&v)?;
        write(set_of(&target)?).entry(key).or_insert(v);
        Ok(Continue)
    }

    /// 3.9: TOS = 값, TOS1 = 키
    fn handle_map_add(&mut self, depth: u32) -> VmResult<ExecutionFlow> {
        let value = self.pop()?;
        let key = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        let k = self.dict_key(&key)?;
        write(dict_of(&target)?).insert(k, (key, value));
        Ok(Continue)
    }

    fn handle_list_extend(&mut self, depth: u32) -> VmResult<ExecutionFlow> {
        let iterable = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        let items = self.collect(&iterable)?;
        write(list_of(&target)?).extend(items);
        Ok(Continue)
    }

    fn handle_set_update(&mut self, depth: u32) -> VmResult<ExecutionFlow> {
        let iterable = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        let items = self.collect(&iterable)?;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            keyed.push((self.dict_key(&item)?, item));
        }
        let mut set = write(set_of(&target)?);
        for (k, v) in keyed {
            set.entry(k).or_insert(v);
        }
        Ok(Continue)
    }

    /// DICT_UPDATE / DICT_MERGE. merge는 `f(**a, **b)`용으로 중복 키를 거부
    fn handle_dict_update(&mut self, depth: u32, merge: bool) -> VmResult<ExecutionFlow> {
        let update = self.pop()?;
        let target = self.frame()?.peek(depth as usize)?.clone();
        let items = self.mapping_items(&update)?;
        let mut keyed = Vec::with_capacity(items.len());
        for (k, v) in items {
            keyed.push((self.dict_key(&k)?, k, v));
        }
        let duplicate = {
            let mut map = write(dict_of(&target)?);
            let mut duplicate = None;
            for (dk, k, v) in keyed {
                if merge && map.contains_key(&dk) {
                    duplicate = Some(k);
                    break;
                }
                map.insert(dk, (k, v));
            }
            duplicate
        };
        if let Some(k) = duplicate {
            let func = self.frame()?.peek(depth as usize + 2)?.clone();
            let func_name = match self.find_attribute(&func, "__name__")? {
                Some(n) => n.as_str().map(str::to_string).unwrap_or_default(),
                None => self.type_name(&func),
            };
            let key = self.to_str(&k)?;
            return Err(type_error(format!(
                "{}() got multiple values for keyword argument '{}'",
                func_name, key
            )));
        }
        Ok(Continue)
    }

    // ==================== 언패킹 / 포맷 핸들러 ====================

    fn unpack_items(&mut self, seq: &Value) -> VmResult<Vec<Value>> {
        let ty = self.type_of(seq);
        if type_data(&ty).and_then(|t| t.lookup("__iter__")).is_none() {
            return Err(type_error(format!(
                "cannot unpack non-iterable {} object",
                self.type_name(seq)
            )));
        }
        self.collect(seq)
    }

    fn handle_unpack_sequence(&mut self, count: u32) -> VmResult<ExecutionFlow> {
        let seq = self.pop()?;
        let items = self.unpack_items(&seq)?;
        let count = count as usize;
        if items.len() < count {
            return Err(value_error(format!(
                "not enough values to unpack (expected {}, got {})",
                count,
                items.len()
            )));
        }
        if items.len() > count {
            return Err(value_error(format!(
                "too many values to unpack (expected {})",
                count
            )));
        }
        for item in items.into_iter().rev() {
            self.push(item)?;
        }
        Ok(Continue)
    }

    /// 인자 하위 8비트 = 별표 앞 개수, 상위 = 별표 뒤 개수
    fn handle_unpack_ex(&mut self, arg: u32) -> VmResult<ExecutionFlow> {
        let before = (arg & 0xff) as usize;
        let after = (arg >> 8) as usize;
        let seq = self.pop()?;
        let mut items = self.unpack_items(&seq)?;
        if items.len() < before + after {
            return Err(value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                before + after,
                items.len()
            )));
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(before);
        for item in tail.into_iter().rev() {
            self.push(item)?;
        }
        self.push(Value::list(middle))?;
        for item in items.into_iter().rev() {
            self.push(item)?;
        }
        Ok(Continue)
    }

    /// 플래그 하위 2비트: 변환 (0 없음, 1 str, 2 repr, 3 ascii). 0x04: 포맷 지정자 있음
    fn handle_format_value(&mut self, flags: u32) -> VmResult<ExecutionFlow> {
        let spec = if flags & 0x04 != 0 {
            let s = self.pop()?;
            s.as_str().map(str::to_string).unwrap_or_default()
        } else {
            String::new()
        };
        let value = self.pop()?;
        let value = match flags & 0x03 {
            1 => Value::str(self.to_str(&value)?),
            2 | 3 => Value::str(self.repr(&value)?),
            _ => value,
        };
        if spec.is_empty() && value.as_str().is_some() {
            self.push(value)?;
            return Ok(Continue);
        }
        let s = self.format(&value, &spec)?;
        self.push(Value::str(s))?;
        Ok(Continue)
    }

    // ==================== 예외 핸들러 ====================

    fn handle_setup_finally(&mut self, ins: I) -> VmResult<ExecutionFlow> {
        let handler = self.jump_target(ins)?;
        let frame = self.frame_mut()?;
        let level = frame.stack.len();
        frame.blocks.push(Block {
            kind: BlockKind::Finally,
            handler,
            level,
        });
        Ok(Continue)
    }

    /// `__exit__`을 스택에 남기고 `__enter__` 결과를 올림. 블록 레벨은 `__exit__` 위
    fn handle_setup_with(&mut self, ins: I) -> VmResult<ExecutionFlow> {
        let handler = self.jump_target(ins)?;
        let ctx = self.pop()?;
        let enter = self.lookup_special(&ctx, "__enter__")?;
        let exit = self.lookup_special(&ctx, "__exit__")?;
        self.push(exit)?;
        let result = self.call(&enter, Vec::new(), Vec::new())?;
        let frame = self.frame_mut()?;
        let level = frame.stack.len();
        frame.blocks.push(Block {
            kind: BlockKind::Finally,
            handler,
            level,
        });
        frame.push(result)?;
        Ok(Continue)
    }

    /// 스택: TOS 타입, 값, tb, 이전 예외 3칸, 그 아래 `__exit__`
    fn handle_with_except_start(&mut self) -> VmResult<ExecutionFlow> {
        let (exit, ty, val, tb) = {
            let frame = self.frame()?;
            (
                frame.peek(7)?.clone(),
                frame.peek(1)?.clone(),
                frame.peek(2)?.clone(),
                frame.peek(3)?.clone(),
            )
        };
        let r = self.call(&exit, vec![ty, val, tb], Vec::new())?;
        self.push(r)?;
        Ok(Continue)
    }

    fn handle_pop_except(&mut self) -> VmResult<ExecutionFlow> {
        let frame = self.frame_mut()?;
        match frame.blocks.pop() {
            Some(Block {
                kind: BlockKind::ExceptHandler,
                ..
            }) => {}
            _ => {
                return Err(err(
                    VmErrorKind::FrameState,
                    "popped block is not an except handler",
                ));
            }
        }
        let _ty = frame.pop()?;
        let value = frame.pop()?;
        let _tb = frame.pop()?;
        self.exc_info = (!value.is_none()).then_some(value);
        Ok(Continue)
    }

    /// 기존 스냅샷을 유지한 채 다시 던짐
    fn handle_reraise(&mut self) -> VmResult<ExecutionFlow> {
        let _ty = self.pop()?;
        let value = self.pop()?;
        let _tb = self.pop()?;
        match value {
            Value::Object(exc) if matches!(exc.data, ObjectData::Exception(_)) => {
                Err(VmError::Raised(exc))
            }
            _ => Err(err(VmErrorKind::FrameState, "RERAISE without an exception")),
        }
    }

    fn handle_jump_if_not_exc_match(&mut self, ins: I) -> VmResult<ExecutionFlow> {
        let spec = self.pop()?;
        let exc_type = self.pop()?;
        if !self.exception_matches(&exc_type, &spec)? {
            self.jump_to(ins)?;
        }
        Ok(Continue)
    }

    /// except 절 매칭: 클래스 하나 또는 클래스 튜플
    pub(crate) fn exception_matches(&self, exc_type: &Value, spec: &Value) -> VmResult<bool> {
        let candidates = match spec.tuple_items() {
            Some(items) => items,
            None => vec![spec.clone()],
        };
        let base = self.types().exception(ExcKind::BaseException).clone();
        let Value::Object(exc_type) = exc_type else {
            return Ok(false);
        };
        let mut matched = false;
        for c in &candidates {
            match c {
                Value::Object(class)
                    if matches!(class.data, ObjectData::Type(_)) && self.issubclass(class, &base) =>
                {
                    matched |= self.issubclass(exc_type, class);
                }
                _ => {
                    return Err(type_error(
                        "catching classes that do not inherit from BaseException is not allowed",
                    ));
                }
            }
        }
        Ok(matched)
    }

    fn handle_raise_varargs(&mut self, argc: u32) -> VmResult<ExecutionFlow> {
        match argc {
            0 => match self.exc_info.clone() {
                Some(Value::Object(exc)) => Err(VmError::Raised(exc)),
                _ => Err(runtime_error("No active exception to reraise")),
            },
            1 => {
                let v = self.pop()?;
                let exc = self.make_exception(v)?;
                self.attach_raise_state(&exc);
                Err(VmError::Raised(exc))
            }
            2 => {
                let cause = self.pop()?;
                let v = self.pop()?;
                let exc = self.make_exception(v)?;
                let cause = if cause.is_none() {
                    Value::None
                } else {
                    Value::Object(self.make_exception(cause)?)
                };
                exc.set_attr("__cause__", cause);
                self.attach_raise_state(&exc);
                Err(VmError::Raised(exc))
            }
            _ => Err(err(
                VmErrorKind::MalformedCode,
                format!("bad RAISE_VARARGS argument {}", argc),
            )),
        }
    }

    /// raise 대상 정규화: 예외 클래스는 인자 없이 인스턴스화
    pub fn make_exception(&mut self, v: Value) -> VmResult<ObjRef> {
        let base = self.types().exception(ExcKind::BaseException).clone();
        if let Value::Object(o) = &v {
            match &o.data {
                ObjectData::Exception(_) => return Ok(o.clone()),
                ObjectData::Type(_) if self.issubclass(o, &base) => {
                    let inst = self.call(&v, Vec::new(), Vec::new())?;
                    if let Value::Object(e) = &inst
                        && matches!(e.data, ObjectData::Exception(_))
                    {
                        return Ok(e.clone());
                    }
                    return Err(type_error(format!(
                        "calling {} should have returned an instance of BaseException, not {}",
                        self.type_name(&v),
                        self.type_name(&inst)
                    )));
                }
                _ => {}
            }
        }
        Err(type_error("exceptions must derive from BaseException"))
    }

    // ==================== 임포트 핸들러 ====================

    fn handle_import_name(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let _fromlist = self.pop()?;
        let level = self.pop()?;
        if level.as_int().unwrap_or(0) > 0 {
            return Err(pending(
                ExcKind::ImportError,
                "attempted relative import with no known parent package",
            ));
        }
        let interp = self.interp().clone();
        let module = interp.import(self, &name)?;
        self.push(Value::Object(module))?;
        Ok(Continue)
    }

    fn handle_import_from(&mut self, idx: u32) -> VmResult<ExecutionFlow> {
        let name = self.current_name(idx)?;
        let module = self.top()?;
        match self.find_attribute(&module, &name)? {
            Some(v) => {
                self.push(v)?;
                Ok(Continue)
            }
            None => {
                let module_name = match &module {
                    Value::Object(o) => match &o.data {
                        ObjectData::Module(m) => m.name.clone(),
                        _ => self.type_name(&module),
                    },
                    _ => self.type_name(&module),
                };
                Err(pending(
                    ExcKind::ImportError,
                    format!("cannot import name '{}' from '{}'", name, module_name),
                ))
            }
        }
    }

    fn handle_import_star(&mut self) -> VmResult<ExecutionFlow> {
        let module = self.pop()?;
        let locals = self.namespace()?;
        let Value::Object(m) = &module else {
            return Err(type_error("import * expects a module"));
        };
        for (name, value) in m.attr_items() {
            if !name.starts_with('_') {
                locals.set_attr(name, value);
            }
        }
        Ok(Continue)
    }

    // ==================== 기타 핸들러 ====================

    fn handle_setup_annotations(&mut self) -> VmResult<ExecutionFlow> {
        let locals = self.namespace()?;
        if !locals.has_attr("__annotations__") {
            locals.set_attr("__annotations__", Value::dict(DictMap::new()));
        }
        Ok(Continue)
    }

    fn handle_print_expr(&mut self) -> VmResult<ExecutionFlow> {
        let v = self.pop()?;
        if !v.is_none() {
            let text = self.repr(&v)?;
            self.io().write_line(&text);
        }
        Ok(Continue)
    }
}

// ========== 컬렉션 접근 ==========

fn internal_kind_error(expected: &str, v: &Value) -> VmError {
    err(
        VmErrorKind::MalformedCode,
        format!("expected {} on stack, found {:?}", expected, v),
    )
}

fn list_of(v: &Value) -> VmResult<&RwLock<Vec<Value>>> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::List(items) => Ok(items),
            _ => Err(internal_kind_error("list", v)),
        },
        _ => Err(internal_kind_error("list", v)),
    }
}

fn set_of(v: &Value) -> VmResult<&RwLock<SetMap>> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Set { items, .. } => Ok(items),
            _ => Err(internal_kind_error("set", v)),
        },
        _ => Err(internal_kind_error("set", v)),
    }
}

fn dict_of(v: &Value) -> VmResult<&RwLock<DictMap>> {
    match v {
        Value::Object(o) => match &o.data {
            ObjectData::Dict(map) => Ok(map),
            _ => Err(internal_kind_error("dict", v)),
        },
        _ => Err(internal_kind_error("dict", v)),
    }
}
