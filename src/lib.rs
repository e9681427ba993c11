//! hyeonvm: 임베디드 바이트코드 인터프리터
//!
//! CPython 3.9 wordcode로 컴파일된 코드 객체를 실행합니다. 소스 컴파일러는 없고,
//! `.pyc` 파일이나 marshal 데이터, 또는 `save_code`로 만든 캐시에서 코드 객체를 읽습니다.
//!
//! ```no_run
//! use hyeonvm::{InterpreterConfig, Interpreter, runtime_io::StdIo};
//!
//! let config = InterpreterConfig::default().with_env_overrides();
//! hyeonvm::init_logging(&config);
//! let interp = Interpreter::new(config).unwrap();
//! let code = hyeonvm::vm::load_pyc_file("hello.pyc").unwrap();
//! let exit = interp.run_main(code, None, Box::new(StdIo)).unwrap();
//! std::process::exit(exit.status());
//! ```

pub mod config;
pub mod runtime_io;
pub mod vm;

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

pub use config::{ConfigError, InterpreterConfig};
pub use vm::{
    CodeObject, Interpreter, LoadError, MemoryLoader, ModuleLoader, ModuleSource, ThreadExit,
    Traceback, Value, Vm, VmError, VmResult,
};

/// `tracing` 구독자 설치
///
/// `RUST_LOG`가 있으면 그 필터를, 없으면 디버그 모드에 따라 `hyeonvm=trace` 또는 `warn`.
/// 이미 설치된 구독자가 있으면 아무 것도 하지 않는다.
pub fn init_logging(config: &InterpreterConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.debug_mode {
            EnvFilter::new("warn,hyeonvm=trace")
        } else {
            EnvFilter::new("warn")
        }
    });
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ========== 코드 캐시 ==========

pub fn encode_code(code: &CodeObject) -> Result<Vec<u8>, LoadError> {
    let cfg = bincode::config::standard();
    bincode::serde::encode_to_vec(code, cfg).map_err(|e| LoadError::Cache(e.to_string()))
}

pub fn decode_code(bytes: &[u8]) -> Result<Arc<CodeObject>, LoadError> {
    let cfg = bincode::config::standard();
    let (code, _consumed): (CodeObject, usize) =
        bincode::serde::decode_from_slice(bytes, cfg).map_err(|e| LoadError::Cache(e.to_string()))?;
    Ok(Arc::new(code))
}

/// 이미 디코딩한 코드 객체를 bincode로 저장
pub fn save_code(code: &CodeObject, path: impl AsRef<Path>) -> Result<(), LoadError> {
    let bytes = encode_code(code)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_code(path: impl AsRef<Path>) -> Result<Arc<CodeObject>, LoadError> {
    let bytes = std::fs::read(path)?;
    decode_code(&bytes)
}

/// `.pyc` 파일을 `__main__`으로 실행
pub fn run_pyc_file(
    interp: &Arc<Interpreter>,
    path: impl AsRef<Path>,
    io: Box<dyn runtime_io::RuntimeIo + Send>,
) -> VmResult<ThreadExit> {
    let path = path.as_ref();
    let code = vm::load_pyc_file(path)?;
    interp.set_argv(&[path.display().to_string()]);
    // 옆에 원본 .py가 있으면 보고서의 소스 발췌에 쓴다
    let source = std::fs::read_to_string(path.with_extension("py"))
        .ok()
        .map(Arc::<str>::from);
    interp.run_main(code, source, io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::Constant;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_code_cache_roundtrip() {
        let inner = CodeObject {
            name: "f".to_string(),
            varnames: vec!["x".to_string()],
            argcount: 1,
            code: vec![124, 0, 83, 0],
            ..Default::default()
        };
        let code = CodeObject {
            name: "<module>".to_string(),
            filename: "m.py".to_string(),
            consts: vec![
                Constant::Code(Arc::new(inner)),
                Constant::Str("f".to_string()),
                Constant::Tuple(vec![Constant::Int(1), Constant::Float(2.5)]),
                Constant::None,
            ],
            lnotab: vec![0, 1, 4, 1],
            firstlineno: 1,
            ..Default::default()
        };
        let bytes = encode_code(&code).unwrap();
        let back = decode_code(&bytes).unwrap();
        assert_eq!(*back, code);
    }

    #[test]
    fn test_decode_garbage_is_cache_error() {
        assert!(matches!(decode_code(&[0xff, 0xff]), Err(LoadError::Cache(_))));
    }
}
