//! 예외 종류, 프레임 스냅샷, 트레이스백 렌더링
//!
//! - **ExcKind**: 빌트인 예외 클래스 계층
//! - **FrameInfo**: raise 시점의 프레임 한 칸 (이름, 파일, 명령 인덱스, 줄)
//! - **Traceback**: 스레드 루트에서 출력하는 처리되지 않은 예외 보고서

use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};
use std::sync::Arc;

use super::machine::VmError;
use super::utils::{float_repr, type_name};
use super::value::{ObjRef, ObjectData, Value};

// ========== 예외 계층 ==========

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
    strum::EnumString,
)]
pub enum ExcKind {
    BaseException,
    Exception,
    StopIteration,
    SystemError,
    AttributeError,
    NameError,
    UnboundLocalError,
    TypeError,
    ValueError,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    MemoryError,
    AssertionError,
    LookupError,
    IndexError,
    KeyError,
    ImportError,
    ModuleNotFoundError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
}

impl ExcKind {
    /// 부모 예외 클래스. BaseException만 None
    pub fn parent(self) -> Option<ExcKind> {
        use ExcKind::*;
        Some(match self {
            BaseException => return None,
            Exception => BaseException,
            UnboundLocalError => NameError,
            ZeroDivisionError | OverflowError => ArithmeticError,
            IndexError | KeyError => LookupError,
            ModuleNotFoundError => ImportError,
            NotImplementedError | RecursionError => RuntimeError,
            _ => Exception,
        })
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

// ========== 예외 생성 헬퍼 ==========

pub fn pending(kind: ExcKind, message: impl Into<String>) -> VmError {
    VmError::Pending {
        kind,
        message: message.into(),
    }
}

pub fn type_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::TypeError, message)
}

pub fn value_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::ValueError, message)
}

pub fn attribute_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::AttributeError, message)
}

pub fn name_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::NameError, message)
}

/// KeyError는 키의 repr을 메시지로 가진다
pub fn key_error(key_repr: impl Into<String>) -> VmError {
    pending(ExcKind::KeyError, key_repr)
}

pub fn index_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::IndexError, message)
}

pub fn runtime_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::RuntimeError, message)
}

pub fn zero_division(message: impl Into<String>) -> VmError {
    pending(ExcKind::ZeroDivisionError, message)
}

pub fn overflow_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::OverflowError, message)
}

pub fn memory_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::MemoryError, message)
}

pub fn system_error(message: impl Into<String>) -> VmError {
    pending(ExcKind::SystemError, message)
}

/// 인자 없는 StopIteration
pub fn stop_iteration() -> VmError {
    VmError::Pending {
        kind: ExcKind::StopIteration,
        message: String::new(),
    }
}

// ========== 프레임 스냅샷 ==========

/// 디버그 모드에서만 채워지는 프레임 덤프
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDump {
    pub disassembly: String,
    pub stack: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub name: String,
    pub filename: String,
    pub instruction_index: usize,
    pub line: u32,
    pub source_line: Option<String>,
    pub dump: Option<FrameDump>,
}

impl FrameInfo {
    /// `File f, instruction idx i, line l, in name` (+ 소스 줄)
    pub fn traceback_string(&self) -> String {
        let mut s = format!(
            "File {}, instruction idx {}, line {}, in {}",
            self.filename, self.instruction_index, self.line, self.name
        );
        if let Some(src) = &self.source_line {
            s.push_str("\n    ");
            s.push_str(src);
        }
        s
    }
}

// ========== 트레이스백 ==========

#[derive(Debug, Clone)]
pub struct SourceExcerpt {
    pub filename: String,
    pub text: Arc<str>,
    pub line: u32,
}

/// 스레드 루트에서 처리되지 않은 예외의 보고서
#[derive(Debug, Clone)]
pub struct Traceback {
    pub thread_name: String,
    /// 가장 안쪽 프레임이 먼저
    pub frames: Vec<FrameInfo>,
    pub exc_type: String,
    /// `str()`로 변환된 예외 인자들
    pub args: Vec<String>,
    pub source: Option<SourceExcerpt>,
}

impl Traceback {
    pub fn message(&self) -> String {
        format!("{}: {}", self.exc_type, self.args.join(" "))
    }

    pub fn render(&self) -> String {
        let mut out = format!("Exception in thread {}\n", self.thread_name);
        out.push_str("Traceback (most recent frame last):\n");
        for frame in self.frames.iter().rev() {
            for line in frame.traceback_string().lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str(&self.message());
        out.push('\n');
        if let Some(excerpt) = &self.source {
            out.push_str(&render_excerpt(excerpt, &self.message()));
        }
        out
    }
}

/// 소스 코드 한 줄을 "raised here" 라벨과 함께 표시
fn render_excerpt(excerpt: &SourceExcerpt, message: &str) -> String {
    let Some(span) = line_span(&excerpt.text, excerpt.line) else {
        return String::new();
    };
    let path = excerpt.filename.as_str();
    let mut buffer = Vec::new();
    Report::build(ReportKind::Error, (path, span.clone()))
        .with_config(
            Config::new()
                .with_color(false)
                .with_index_type(IndexType::Byte),
        )
        .with_message(message)
        .with_label(Label::new((path, span)).with_message("raised here"))
        .finish()
        .write((path, Source::from(&*excerpt.text)), &mut buffer)
        .ok();
    String::from_utf8_lossy(&buffer).to_string()
}

/// 1부터 시작하는 줄 번호의 바이트 범위 (앞뒤 공백 제외)
fn line_span(text: &str, line: u32) -> Option<std::ops::Range<usize>> {
    let idx = (line as usize).checked_sub(1)?;
    let mut offset = 0;
    for (i, l) in text.split_inclusive('\n').enumerate() {
        if i == idx {
            let content = l.trim_end();
            let lead = content.len() - content.trim_start().len();
            let end = offset + content.len();
            let start = (offset + lead).min(end);
            return Some(start..end.max(start + 1).min(text.len()));
        }
        offset += l.len();
    }
    None
}

/// 디버그 모드의 전체 프레임 덤프 (가장 안쪽 프레임이 먼저)
pub fn render_dump(frames: &[FrameInfo]) -> String {
    let mut out = String::from("Fatal interpreter error!\n\nStack (most recent frame first):\n");
    for (idx, frame) in frames.iter().enumerate() {
        out.push_str(&format!("Frame {}:\n", idx));
        for line in frame.traceback_string().lines() {
            out.push_str("   ");
            out.push_str(line);
            out.push('\n');
        }
        if let Some(dump) = &frame.dump {
            out.push_str("\nDisassembly:\n");
            out.push_str(&dump.disassembly);
            if dump.stack.is_empty() {
                out.push_str("Function stack is empty\n");
            } else {
                out.push_str(&format!("Function stack, size: {}\n", dump.stack.len()));
                for (i, v) in dump.stack.iter().enumerate() {
                    out.push_str(&format!("    {}: {}\n", i, v));
                }
            }
        }
        out.push('\n');
    }
    out
}

// ========== Vm 없이 쓰는 간단한 표시 ==========

/// 사용자 `__str__`을 거치지 않는 값 표시 (에러 Display용)
pub fn plain_display(v: &Value) -> String {
    match v {
        Value::None => "None".into(),
        Value::Bool(b) => if *b { "True" } else { "False" }.into(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_repr(*f),
        Value::Object(o) => match &o.data {
            ObjectData::Str(s) => s.clone(),
            _ => format!("<{} object>", type_name(v)),
        },
        other => type_name(other),
    }
}

/// `Type: args` 형태의 한 줄 설명
pub fn describe_exception(exc: &ObjRef) -> String {
    match &exc.data {
        ObjectData::Exception(data) => {
            let class = match &data.class.data {
                ObjectData::Type(t) => t.name.clone(),
                _ => "BaseException".into(),
            };
            let args: Vec<String> = data.args().iter().map(plain_display).collect();
            format!("{}: {}", class, args.join(" "))
        }
        _ => format!("<non-exception {}>", exc.kind_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, line: u32) -> FrameInfo {
        FrameInfo {
            name: name.into(),
            filename: "t.py".into(),
            instruction_index: 4,
            line,
            source_line: Some(format!("{}()", name)),
            dump: None,
        }
    }

    #[test]
    fn test_hierarchy() {
        assert_eq!(ExcKind::ZeroDivisionError.parent(), Some(ExcKind::ArithmeticError));
        assert_eq!(ExcKind::RecursionError.parent(), Some(ExcKind::RuntimeError));
        assert_eq!(ExcKind::Exception.parent(), Some(ExcKind::BaseException));
        assert_eq!(ExcKind::BaseException.parent(), None);
        assert_eq!(ExcKind::KeyError.name(), "KeyError");
    }

    #[test]
    fn test_render_orders_outermost_first() {
        let tb = Traceback {
            thread_name: "main".into(),
            frames: vec![frame("inner", 3), frame("<module>", 7)],
            exc_type: "ValueError".into(),
            args: vec!["bad".into(), "value".into()],
            source: None,
        };
        let text = tb.render();
        let expected = [
            "Exception in thread main",
            "Traceback (most recent frame last):",
            "  File t.py, instruction idx 4, line 7, in <module>",
            "      <module>()",
            "  File t.py, instruction idx 4, line 3, in inner",
            "      inner()",
            "ValueError: bad value",
            "",
        ]
        .join("\n");
        assert_eq!(text, expected);
    }

    #[test]
    fn test_excerpt_mentions_label() {
        let tb = Traceback {
            thread_name: "main".into(),
            frames: vec![frame("<module>", 2)],
            exc_type: "KeyError".into(),
            args: vec!["'k'".into()],
            source: Some(SourceExcerpt {
                filename: "t.py".into(),
                text: Arc::from("x = 1\nd['k']\n"),
                line: 2,
            }),
        };
        let text = tb.render();
        assert!(text.contains("raised here"), "{}", text);
        assert!(text.contains("d['k']"), "{}", text);
    }

    #[test]
    fn test_line_span() {
        assert_eq!(line_span("a\n  bc\n", 2), Some(4..6));
        assert_eq!(line_span("a\n", 5), None);
    }
}
