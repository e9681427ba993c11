use super::bytecode::{CodeObject, Constant, Instruction as I, Opcode};
use super::machine::frame::Frame;
use std::fmt::{self, Write};

/// COMPARE_OP 인자 → 연산자 표기
pub const COMPARE_OPS: [&str; 6] = ["<", "<=", "==", "!=", ">", ">="];

pub fn disassemble_code_to_string(code: &CodeObject) -> String {
    let mut output = String::new();
    let _ = disassemble_code(code, &mut output);
    output
}

/// 코드 객체와 상수 풀에 포함된 중첩 코드 객체를 모두 출력
pub fn disassemble_code(code: &CodeObject, w: &mut impl Write) -> fmt::Result {
    disassemble_one(code, None, w)?;
    for c in &code.consts {
        if let Constant::Code(inner) = c {
            writeln!(w)?;
            disassemble_code(inner, w)?;
        }
    }
    Ok(())
}

/// 현재 실행 위치를 `-->`로 표시한 프레임 디스어셈블리
pub fn disassemble_frame(frame: &Frame) -> String {
    let mut output = String::new();
    let _ = disassemble_one(&frame.code, Some(frame.lasti), &mut output);
    output
}

fn disassemble_one(code: &CodeObject, current: Option<usize>, w: &mut impl Write) -> fmt::Result {
    writeln!(
        w,
        "Code object {} (file={}, line={}, argcount={}, locals={}, flags={:?})",
        code.name, code.filename, code.firstlineno, code.argcount, code.nlocals, code.flags
    )?;
    let instructions = match code.instructions() {
        Ok(ins) => ins,
        Err(e) => return writeln!(w, "  <undecodable: {}>", e),
    };

    let mut last_line = None;
    for (i, ins) in instructions.iter().enumerate() {
        let line = code.line_for(i);
        let line_col = if last_line != Some(line) {
            last_line = Some(line);
            format!("{:>4}", line)
        } else {
            "    ".to_string()
        };
        let marker = if current == Some(i) { "-->" } else { "   " };
        write!(w, "{} {} {:4}: ", line_col, marker, i)?;
        disassemble_instruction(code, i, ins, w)?;
        writeln!(w)?;
    }
    Ok(())
}

fn disassemble_instruction(code: &CodeObject, idx: usize, ins: &I, w: &mut impl Write) -> fmt::Result {
    let name: &'static str = ins.opcode.into();
    if !ins.opcode.has_arg() {
        return write!(w, "{}", name);
    }
    write!(w, "{:<24} {}", name, ins.arg)?;

    let arg = ins.arg as usize;
    if let Some(target) = ins.jump_target(idx) {
        return write!(w, " (to {})", target);
    }
    match ins.opcode {
        Opcode::LoadConst => match code.consts.get(arg) {
            Some(Constant::Code(c)) => write!(w, " (<code {}>)", c.name),
            Some(c) => write!(w, " ({:?})", c),
            None => write!(w, " (<bad const>)"),
        },
        Opcode::LoadName
        | Opcode::StoreName
        | Opcode::DeleteName
        | Opcode::LoadGlobal
        | Opcode::StoreGlobal
        | Opcode::DeleteGlobal
        | Opcode::LoadAttr
        | Opcode::StoreAttr
        | Opcode::DeleteAttr
        | Opcode::LoadMethod
        | Opcode::ImportName
        | Opcode::ImportFrom => match code.names.get(arg) {
            Some(n) => write!(w, " ({})", n),
            None => write!(w, " (<bad name>)"),
        },
        Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => match code.varnames.get(arg) {
            Some(n) => write!(w, " ({})", n),
            None => write!(w, " (<bad local>)"),
        },
        Opcode::LoadDeref
        | Opcode::StoreDeref
        | Opcode::DeleteDeref
        | Opcode::LoadClosure
        | Opcode::LoadClassderef => match code.cell_name(arg) {
            Some(n) => write!(w, " ({})", n),
            None => write!(w, " (<bad cell>)"),
        },
        Opcode::CompareOp => match COMPARE_OPS.get(arg) {
            Some(op) => write!(w, " ({})", op),
            None => Ok(()),
        },
        Opcode::IsOp => write!(w, " ({})", if arg == 1 { "is not" } else { "is" }),
        Opcode::ContainsOp => write!(w, " ({})", if arg == 1 { "not in" } else { "in" }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_disassemble_annotates_args() {
        let inner = CodeObject {
            name: "inner".into(),
            ..Default::default()
        };
        let code = CodeObject {
            name: "<module>".into(),
            filename: "t.py".into(),
            firstlineno: 1,
            // LOAD_CONST 0; STORE_NAME 0; JUMP_ABSOLUTE 0; LOAD_CONST 1
            code: vec![100, 0, 90, 0, 113, 0, 100, 1],
            consts: vec![Constant::Int(7), Constant::Code(Arc::new(inner))],
            names: vec!["x".into()],
            ..Default::default()
        };
        let text = disassemble_code_to_string(&code);
        assert!(text.contains("LOAD_CONST"), "{}", text);
        assert!(text.contains("(Int(7))"), "{}", text);
        assert!(text.contains("STORE_NAME") && text.contains("(x)"), "{}", text);
        assert!(text.contains("(to 0)"), "{}", text);
        assert!(text.contains("(<code inner>)"), "{}", text);
        assert!(text.contains("Code object inner"), "{}", text);
    }
}
