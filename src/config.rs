//! 인터프리터 설정
//!
//! TOML 파일이나 문자열에서 읽고, 환경 변수로 일부 값을 덮어씁니다.
//!
//! ```toml
//! debug_mode = false
//! max_frames = 256
//! max_stack = 4096
//! main_thread_name = "main"
//! thread_stack_size = 67108864
//! ```

use serde::Deserialize;
use std::path::Path;

pub const DEBUG_ENV: &str = "HYEONVM_DEBUG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// 명령어 단위 trace 로그와, 처리되지 않은 예외의 전체 프레임 덤프
    pub debug_mode: bool,
    /// 스레드당 최대 프레임 깊이 (넘으면 RecursionError)
    pub max_frames: usize,
    /// 프레임당 피연산자 스택 최대 크기
    pub max_stack: usize,
    pub main_thread_name: String,
    /// `Interpreter::spawn`으로 시작하는 스레드의 스택 크기 (바이트)
    pub thread_stack_size: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            max_frames: 256,
            max_stack: 4096,
            main_thread_name: "main".to_string(),
            thread_stack_size: 64 * 1024 * 1024,
        }
    }
}

impl InterpreterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `HYEONVM_DEBUG=1` (또는 true) 이면 디버그 모드를 켬
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(DEBUG_ENV) {
            self.debug_mode = parse_flag(&v).unwrap_or(self.debug_mode);
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "max_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_stack == 0 {
            return Err(ConfigError::Invalid {
                field: "max_stack",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = InterpreterConfig::from_toml_str("debug_mode = true\nmax_frames = 50\n").unwrap();
        assert_eq!(
            config,
            InterpreterConfig {
                debug_mode: true,
                max_frames: 50,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            InterpreterConfig::from_toml_str("max_stack = 0"),
            Err(ConfigError::Invalid { field: "max_stack", .. })
        ));
        assert!(matches!(
            InterpreterConfig::from_toml_str("max_depth = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
