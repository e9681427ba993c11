use std::sync::{Arc, Mutex};

use crate::vm::utils::lock;

/// Abstraction over runtime I/O so the VM can remain pure w.r.t. environment.
///
/// 출력 채널(`write`)과 에러 채널(`write_err`)을 분리합니다.
/// 처리되지 않은 예외 보고서와 디버그 덤프는 에러 채널로 갑니다.
pub trait RuntimeIo {
    fn write(&mut self, s: &str);
    fn write_err(&mut self, s: &str);

    fn write_line(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }
}

/// Default I/O that talks to process stdout/stderr.
pub struct StdIo;

impl RuntimeIo for StdIo {
    fn write(&mut self, s: &str) {
        use std::io::Write;
        print!("{}", s);
        let _ = std::io::stdout().flush();
    }

    fn write_err(&mut self, s: &str) {
        eprint!("{}", s);
    }
}

/// Buffer-based I/O for embedders and tests.
///
/// 복제본끼리 같은 버퍼를 공유하므로, 한 벌은 Vm에 넘기고 다른 한 벌로 결과를 읽습니다.
#[derive(Clone, Default)]
pub struct BufferIo {
    output: Arc<Mutex<String>>,
    errors: Arc<Mutex<String>>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_output(&self) -> String {
        lock(&self.output).clone()
    }

    pub fn get_errors(&self) -> String {
        lock(&self.errors).clone()
    }

    pub fn drain_output(&self) -> String {
        std::mem::take(&mut *lock(&self.output))
    }

    pub fn clear(&self) {
        lock(&self.output).clear();
        lock(&self.errors).clear();
    }
}

impl RuntimeIo for BufferIo {
    fn write(&mut self, s: &str) {
        lock(&self.output).push_str(s);
    }

    fn write_err(&mut self, s: &str) {
        lock(&self.errors).push_str(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_io_clones_share_buffers() {
        let io = BufferIo::new();
        let mut writer = io.clone();
        writer.write_line("hello");
        writer.write("a");
        writer.write_err("boom\n");
        assert_eq!(io.get_output(), "hello\na");
        assert_eq!(io.get_errors(), "boom\n");
        assert_eq!(io.drain_output(), "hello\na");
        assert_eq!(io.get_output(), "");
    }
}
