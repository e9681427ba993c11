//! 인터프리터 컨텍스트와 모듈 레지스트리
//!
//! [`Interpreter`]는 임베딩 하나당 하나씩 만들어 `Arc`로 들고 다닙니다.
//! 빌트인 타입 테이블, `builtins` 모듈, 설정, 모듈 로더, 모듈 레지스트리를 소유하고
//! 모든 [`Vm`]에 주입됩니다. 전역 상태가 없으므로 테스트마다 독립된 인터프리터를 쓸 수 있습니다.
//!
//! # 임포트 순서
//!
//! 1. 레지스트리 락 아래에서 이름을 확인
//! 2. 없으면 현재 스레드가 `Initializing`으로 표시하고, 락을 놓은 뒤 본문 실행
//! 3. 다른 스레드는 `Ready`가 될 때까지 대기, 같은 스레드(순환 임포트)는 미완성 모듈을 받음
//! 4. 본문이 실패하면 항목을 지움

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info};

use super::builtins;
use super::bytecode::CodeObject;
use super::exception::{ExcKind, pending};
use super::machine::{ThreadExit, Vm};
use super::type_def::BuiltinTypes;
use super::utils::{lock, read, write};
use super::value::{ModuleData, ObjRef, ObjectData, Value, new_module};
use super::VmResult;
use crate::config::InterpreterConfig;
use crate::runtime_io::RuntimeIo;

// ========== 모듈 로더 ==========

/// 로더가 돌려주는 모듈 재료
#[derive(Clone)]
pub struct ModuleSource {
    pub code: Arc<CodeObject>,
    /// 트레이스백 발췌용 소스 텍스트
    pub source: Option<Arc<str>>,
    pub path: Option<String>,
}

impl ModuleSource {
    pub fn new(code: Arc<CodeObject>) -> Self {
        Self {
            code,
            source: None,
            path: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// 모듈 이름 → 코드 객체. 찾지 못하면 None (ModuleNotFoundError가 됨)
pub trait ModuleLoader: Send + Sync {
    fn load(&self, name: &str) -> Option<ModuleSource>;
}

/// 메모리에 올려둔 모듈들을 돌려주는 로더
#[derive(Default)]
pub struct MemoryLoader {
    modules: RwLock<HashMap<String, ModuleSource>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, source: ModuleSource) {
        write(&self.modules).insert(name.into(), source);
    }

    pub fn with_module(self, name: impl Into<String>, source: ModuleSource) -> Self {
        self.insert(name, source);
        self
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&self, name: &str) -> Option<ModuleSource> {
        read(&self.modules).get(name).cloned()
    }
}

// ========== 모듈 레지스트리 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleState {
    Initializing(ThreadId),
    Ready,
}

struct ModuleEntry {
    module: ObjRef,
    state: ModuleState,
}

/// [`ModuleRegistry::claim`]의 결과
pub enum Claim {
    /// 이미 있는 모듈 (순환 임포트라면 아직 초기화 중일 수 있음)
    Ready(ObjRef),
    /// 현재 스레드가 본문을 실행해야 하는 새 모듈
    Build(ObjRef),
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: Mutex<IndexMap<String, ModuleEntry>>,
    ready: Condvar,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기화가 끝났거나 초기화 중인 모듈
    pub fn get(&self, name: &str) -> Option<ObjRef> {
        lock(&self.modules).get(name).map(|e| e.module.clone())
    }

    pub fn insert_ready(&self, name: impl Into<String>, module: ObjRef) {
        lock(&self.modules).insert(
            name.into(),
            ModuleEntry {
                module,
                state: ModuleState::Ready,
            },
        );
    }

    /// 이미 등록된 모듈. 다른 스레드가 초기화 중이면 끝날 때까지 기다린다.
    pub fn lookup(&self, name: &str) -> Option<ObjRef> {
        let guard = self.wait_for(lock(&self.modules), name);
        guard.get(name).map(|e| e.module.clone())
    }

    /// 확인 후 생성. 검사와 `Initializing` 표시가 한 번의 락 안에서 일어난다.
    pub fn claim(&self, name: &str, make: impl FnOnce() -> ObjRef) -> Claim {
        let mut modules = self.wait_for(lock(&self.modules), name);
        if let Some(entry) = modules.get(name) {
            return Claim::Ready(entry.module.clone());
        }
        let module = make();
        modules.insert(
            name.to_string(),
            ModuleEntry {
                module: module.clone(),
                state: ModuleState::Initializing(thread::current().id()),
            },
        );
        Claim::Build(module)
    }

    /// 다른 스레드가 `name`을 초기화하는 동안 대기
    fn wait_for<'a>(
        &self,
        mut modules: MutexGuard<'a, IndexMap<String, ModuleEntry>>,
        name: &str,
    ) -> MutexGuard<'a, IndexMap<String, ModuleEntry>> {
        let me = thread::current().id();
        while let Some(ModuleState::Initializing(owner)) = modules.get(name).map(|e| e.state) {
            if owner == me {
                break;
            }
            modules = self
                .ready
                .wait(modules)
                .unwrap_or_else(PoisonError::into_inner);
        }
        modules
    }

    /// 본문 실행 결과 반영. 실패하면 항목을 지워 다음 임포트가 다시 시도하게 한다.
    pub fn finish(&self, name: &str, ok: bool) {
        let mut modules = lock(&self.modules);
        if ok {
            if let Some(entry) = modules.get_mut(name) {
                entry.state = ModuleState::Ready;
            }
        } else {
            modules.shift_remove(name);
        }
        drop(modules);
        self.ready.notify_all();
    }

    /// 파일 이름이 같은 모듈 (트레이스백 소스 발췌용)
    pub fn find_by_filename(&self, filename: &str) -> Option<ObjRef> {
        lock(&self.modules)
            .values()
            .find(|e| match &e.module.data {
                ObjectData::Module(m) => m.path.get().is_some_and(|p| p == filename),
                _ => false,
            })
            .map(|e| e.module.clone())
    }

    /// 등록 순서의 모듈 이름
    pub fn names(&self) -> Vec<String> {
        lock(&self.modules).keys().cloned().collect()
    }
}

// ========== 인터프리터 ==========

pub struct Interpreter {
    config: InterpreterConfig,
    types: BuiltinTypes,
    builtins: ObjRef,
    sys: ObjRef,
    loader: Box<dyn ModuleLoader>,
    registry: ModuleRegistry,
}

impl Interpreter {
    /// 임포트할 모듈이 없는 인터프리터
    pub fn new(config: InterpreterConfig) -> VmResult<Arc<Self>> {
        Self::with_loader(config, Box::new(MemoryLoader::new()))
    }

    pub fn with_loader(
        config: InterpreterConfig,
        loader: Box<dyn ModuleLoader>,
    ) -> VmResult<Arc<Self>> {
        let types = BuiltinTypes::new();
        let builtins = builtins::install(&types)?;
        let sys = builtins::sys::install(&[])?;
        let registry = ModuleRegistry::new();
        for (name, module) in [("builtins", &builtins), ("sys", &sys)] {
            registry.insert_ready(name, module.clone());
            builtins::sys::publish_module(&sys, name, module);
        }
        info!(
            max_frames = config.max_frames,
            debug = config.debug_mode,
            "interpreter initialized"
        );
        Ok(Arc::new(Self {
            config,
            types,
            builtins,
            sys,
            loader,
            registry,
        }))
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn types(&self) -> &BuiltinTypes {
        &self.types
    }

    pub fn builtins(&self) -> &ObjRef {
        &self.builtins
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn sys(&self) -> &ObjRef {
        &self.sys
    }

    /// `sys.argv`의 내용을 바꿈. 리스트 객체는 그대로 둔다
    pub fn set_argv(&self, argv: &[String]) {
        if let Some(Value::Object(list)) = self.sys.get_attr("argv")
            && let ObjectData::List(items) = &list.data
        {
            *write(items) = argv.iter().map(Value::str).collect();
        }
    }

    /// 이 인터프리터에 묶인 스레드 컨텍스트
    pub fn vm(self: &Arc<Self>, thread_name: impl Into<String>, io: Box<dyn RuntimeIo + Send>) -> Vm {
        Vm::new(self.clone(), thread_name, io)
    }

    pub fn main_vm(self: &Arc<Self>, io: Box<dyn RuntimeIo + Send>) -> Vm {
        let name = self.config.main_thread_name.clone();
        self.vm(name, io)
    }

    /// `__main__` 모듈을 만들어 레지스트리에 등록
    pub fn new_main_module(&self, code: &CodeObject, source: Option<Arc<str>>) -> ObjRef {
        let module = new_module("__main__");
        init_module_data(&module, Some(code.filename.clone()), source);
        self.registry.insert_ready("__main__", module.clone());
        builtins::sys::publish_module(&self.sys, "__main__", &module);
        module
    }

    /// 코드 객체를 `__main__`으로 실행하고 스레드 루트 결과를 돌려준다.
    pub fn run_main(
        self: &Arc<Self>,
        code: Arc<CodeObject>,
        source: Option<Arc<str>>,
        io: Box<dyn RuntimeIo + Send>,
    ) -> VmResult<ThreadExit> {
        let module = self.new_main_module(&code, source);
        let mut vm = self.main_vm(io);
        vm.run_root_module(code, &module)
    }

    /// 모듈 임포트. 본문은 레지스트리당 한 번만 실행된다.
    pub fn import(&self, vm: &mut Vm, name: &str) -> VmResult<ObjRef> {
        if let Some(module) = self.registry.lookup(name) {
            return Ok(module);
        }
        let Some(source) = self.loader.load(name) else {
            return Err(pending(
                ExcKind::ModuleNotFoundError,
                format!("No module named '{}'", name),
            ));
        };
        let claim = self.registry.claim(name, || {
            let module = new_module(name);
            let path = source.path.clone().or_else(|| Some(source.code.filename.clone()));
            init_module_data(&module, path, source.source.clone());
            module
        });
        let module = match claim {
            Claim::Ready(module) => return Ok(module),
            Claim::Build(module) => module,
        };
        builtins::sys::publish_module(&self.sys, name, &module);

        debug!(module = %name, thread = %vm.thread_name, "import");
        match vm.run_module_code(source.code.clone(), &module) {
            Ok(_) => {
                self.registry.finish(name, true);
                Ok(module)
            }
            Err(e) => {
                debug!(module = %name, "import failed");
                self.registry.finish(name, false);
                builtins::sys::unpublish_module(&self.sys, name);
                Err(e)
            }
        }
    }

    /// 새 OS 스레드에서 callable을 스레드 루트로 실행
    ///
    /// 스레드 이름은 `name`, 스택 크기는 설정의 `thread_stack_size`.
    pub fn spawn(
        self: &Arc<Self>,
        name: impl Into<String>,
        callable: Value,
        args: Vec<Value>,
        io: Box<dyn RuntimeIo + Send>,
    ) -> std::io::Result<JoinHandle<VmResult<ThreadExit>>> {
        let name = name.into();
        let interp = self.clone();
        thread::Builder::new()
            .name(name.clone())
            .stack_size(self.config.thread_stack_size)
            .spawn(move || {
                let mut vm = interp.vm(name, io);
                vm.run_root(&callable, args)
            })
    }
}

fn init_module_data(module: &ObjRef, path: Option<String>, source: Option<Arc<str>>) {
    if let ObjectData::Module(ModuleData {
        path: slot,
        source: src_slot,
        ..
    }) = &module.data
    {
        if let Some(path) = path {
            module.set_attr("__file__", Value::str(path.clone()));
            let _ = slot.set(path);
        }
        if let Some(source) = source {
            let _ = src_slot.set(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_io::BufferIo;
    use crate::vm::bytecode::{Constant, Opcode};

    #[test]
    fn test_registry_claim_and_finish() {
        let registry = ModuleRegistry::new();
        let made = match registry.claim("m", || new_module("m")) {
            Claim::Build(m) => m,
            Claim::Ready(_) => panic!("expected a fresh module"),
        };
        // 같은 스레드의 재진입은 미완성 모듈을 받는다
        match registry.claim("m", || new_module("other")) {
            Claim::Ready(m) => assert!(Arc::ptr_eq(&m, &made)),
            Claim::Build(_) => panic!("cyclic import must not rebuild"),
        }
        registry.finish("m", true);
        assert_eq!(registry.names(), vec!["m".to_string()]);

        let _ = registry.claim("bad", || new_module("bad"));
        registry.finish("bad", false);
        assert!(registry.get("bad").is_none());
    }

    fn sys_module_names(interp: &Interpreter) -> Vec<String> {
        let Some(Value::Object(dict)) = interp.sys().get_attr("modules") else {
            panic!("sys.modules missing");
        };
        let ObjectData::Dict(map) = &dict.data else {
            panic!("sys.modules is not a dict");
        };
        read(map).values().filter_map(|(k, _)| k.as_str().map(str::to_string)).collect()
    }

    fn module_code(ops: &[(Opcode, u8)], names: &[&str]) -> Arc<CodeObject> {
        Arc::new(CodeObject {
            name: "<module>".to_string(),
            code: ops.iter().flat_map(|&(op, arg)| [op as u8, arg]).collect(),
            consts: vec![Constant::None],
            names: names.iter().map(|n| n.to_string()).collect(),
            stacksize: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_sys_modules_follows_registry() {
        let loader = MemoryLoader::new()
            .with_module(
                "ok",
                ModuleSource::new(module_code(&[(Opcode::LoadConst, 0), (Opcode::ReturnValue, 0)], &[])),
            )
            .with_module(
                "bad",
                ModuleSource::new(module_code(
                    &[(Opcode::LoadName, 0), (Opcode::ReturnValue, 0)],
                    &["undefined_name"],
                )),
            );
        let interp = Interpreter::with_loader(InterpreterConfig::default(), Box::new(loader)).unwrap();
        assert_eq!(sys_module_names(&interp), vec!["builtins", "sys"]);
        assert!(interp.registry().get("sys").is_some_and(|m| Arc::ptr_eq(&m, interp.sys())));

        let mut vm = interp.vm("main", Box::new(BufferIo::new()));
        interp.import(&mut vm, "ok").unwrap();
        assert!(interp.import(&mut vm, "bad").is_err());
        assert_eq!(sys_module_names(&interp), vec!["builtins", "sys", "ok"]);

        interp.set_argv(&["prog.pyc".to_string(), "-v".to_string()]);
        assert_eq!(
            interp.sys().get_attr("argv"),
            Some(Value::list(vec![Value::str("prog.pyc"), Value::str("-v")]))
        );
    }

    #[test]
    fn test_memory_loader() {
        let loader = MemoryLoader::new();
        assert!(loader.load("x").is_none());
        let code = Arc::new(CodeObject::default());
        loader.insert("x", ModuleSource::new(code).with_path("x.py"));
        assert_eq!(loader.load("x").and_then(|s| s.path).as_deref(), Some("x.py"));
    }
}
