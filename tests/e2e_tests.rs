use hyeonvm::runtime_io::BufferIo;
use hyeonvm::vm::load_pyc_file;
use hyeonvm::{Interpreter, InterpreterConfig, ModuleLoader, ModuleSource, ThreadExit};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// E2E 통합 테스트: tests/programs/ 디렉터리의 .pyc 파일을 실행하여
/// CPython 3.9이 기록한 .out 파일과 출력을 비교합니다.
///
/// .pyc와 .out은 같은 이름의 .py에서 만든 것입니다. 임포트는 tests/programs/lib/에서 찾습니다.

/// `lib/<name>.pyc`를 읽는 로더
struct PycDirLoader {
    dir: PathBuf,
}

impl ModuleLoader for PycDirLoader {
    fn load(&self, name: &str) -> Option<ModuleSource> {
        let path = self.dir.join(format!("{}.pyc", name));
        let code = load_pyc_file(&path).ok()?;
        let mut source = ModuleSource::new(code).with_path(format!("{}.py", name));
        if let Ok(text) = fs::read_to_string(path.with_extension("py")) {
            source = source.with_source(text);
        }
        Some(source)
    }
}

struct RunOutput {
    stdout: String,
    stderr: String,
    status: i32,
}

fn programs_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/programs")
}

fn get_test_programs() -> Vec<PathBuf> {
    let test_dir = programs_dir();
    let mut programs = vec![];
    if let Ok(entries) = fs::read_dir(&test_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("pyc") {
                programs.push(path);
            }
        }
    }
    programs.sort();
    programs
}

fn new_interpreter() -> Arc<Interpreter> {
    let loader = PycDirLoader {
        dir: programs_dir().join("lib"),
    };
    Interpreter::with_loader(InterpreterConfig::default(), Box::new(loader))
        .expect("interpreter should start")
}

fn run_test_program(path: &Path) -> Result<RunOutput, String> {
    let interp = new_interpreter();
    let io = BufferIo::new();
    let exit = hyeonvm::run_pyc_file(&interp, path, Box::new(io.clone()))
        .map_err(|e| format!("VM error in {}: {}", path.display(), e))?;
    Ok(RunOutput {
        stdout: io.get_output(),
        stderr: io.get_errors(),
        status: exit.status(),
    })
}

fn expected_output(path: &Path) -> String {
    fs::read_to_string(path.with_extension("out")).unwrap_or_default()
}

#[test]
fn test_e2e_all_programs() {
    let programs = get_test_programs();
    assert!(!programs.is_empty(), "no test programs found in tests/programs/");

    let mut passed = 0;
    let mut failed = 0;

    for path in programs {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        print!("Testing {}... ", name);

        match run_test_program(&path) {
            Ok(out) if out.stdout == expected_output(&path) => {
                println!("✓ PASSED");
                passed += 1;
            }
            Ok(out) => {
                println!("✗ OUTPUT MISMATCH\n{}\n{}", out.stdout, out.stderr);
                failed += 1;
            }
            Err(err) => {
                println!("✗ ERROR: {}", err);
                failed += 1;
            }
        }
    }

    println!("\n========================================");
    println!("E2E Test Summary:");
    println!("  Passed: {}", passed);
    println!("  Failed: {}", failed);
    println!("  Total:  {}", passed + failed);
    println!("========================================");

    assert_eq!(failed, 0, "Some E2E tests failed");
}

macro_rules! test_program {
    ($test_name:ident, $filename:literal) => {
        #[test]
        fn $test_name() {
            let path = programs_dir().join($filename);
            let out = run_test_program(&path).unwrap();
            assert_eq!(out.stdout, expected_output(&path), "stderr:\n{}", out.stderr);
            assert_eq!(out.status, 0, "{} should exit cleanly", $filename);
        }
    };

    ($test_name:ident, $filename:literal, status = $status:literal) => {
        #[test]
        fn $test_name() {
            let path = programs_dir().join($filename);
            let out = run_test_program(&path).unwrap();
            assert_eq!(out.stdout, expected_output(&path));
            assert_eq!(out.status, $status);
            // .err의 각 줄이 에러 채널에 있어야 한다
            let expected_err = fs::read_to_string(path.with_extension("err")).unwrap();
            for line in expected_err.lines() {
                assert!(
                    out.stderr.contains(line),
                    "{}: stderr should contain '{}'\nActual stderr:\n{}",
                    $filename,
                    line,
                    out.stderr
                );
            }
        }
    };
}

// Generate tests for each program
test_program!(test_basics, "basics.pyc");
test_program!(test_containers, "containers.pyc");
test_program!(test_functions, "functions.pyc");
test_program!(test_classes, "classes.pyc");
test_program!(test_exceptions, "exceptions.pyc");
test_program!(test_generators, "generators.pyc");
test_program!(test_imports, "imports.pyc");
test_program!(test_uncaught, "uncaught.pyc", status = 1);

#[test]
fn test_uncaught_report_has_source_excerpt() {
    let path = programs_dir().join("uncaught.pyc");
    let out = run_test_program(&path).unwrap();
    assert!(out.stderr.contains("return sum(values) / len(values)"), "{}", out.stderr);
    assert!(out.stderr.contains("raised here"), "{}", out.stderr);
}

#[test]
fn test_traceback_frames_innermost_first() {
    let interp = new_interpreter();
    let code = load_pyc_file(programs_dir().join("uncaught.pyc")).unwrap();
    let exit = interp.run_main(code, None, Box::new(BufferIo::new())).unwrap();
    let ThreadExit::Unhandled { traceback } = exit else {
        panic!("expected an unhandled exception");
    };
    let names: Vec<&str> = traceback.frames.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["average", "<module>"]);
    assert_eq!(traceback.frames[0].line, 7);
    assert_eq!(traceback.frames[1].line, 12);
    assert_eq!(traceback.args, vec!["division by zero".to_string()]);
}

#[test]
fn test_module_body_runs_once_across_threads() {
    let interp = new_interpreter();
    let io = BufferIo::new();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let interp = interp.clone();
            let io = io.clone();
            std::thread::spawn(move || {
                let mut vm = interp.vm(format!("worker-{}", i), Box::new(io));
                interp.import(&mut vm, "helper").map(|m| Arc::as_ptr(&m) as usize)
            })
        })
        .collect();
    let modules: Vec<usize> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert!(modules.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(io.get_output(), "helper loading\n");
}

#[test]
fn test_missing_module_is_module_not_found() {
    let interp = new_interpreter();
    let mut vm = interp.vm("main", Box::new(BufferIo::new()));
    let err = interp.import(&mut vm, "no_such_module").unwrap_err();
    assert!(vm.error_matches(&err, hyeonvm::vm::ExcKind::ModuleNotFoundError));
}
