pub mod builtins; // 빌트인 타입 메서드와 builtins 모듈
pub mod bytecode;
pub mod disasm; // 디스어셈블러
pub mod exception;
pub mod interpreter;
pub mod machine; // machine/ 디렉토리
pub mod marshal;
pub mod signature;

pub mod type_def;
pub mod utils;
pub mod value;

pub use bytecode::{CodeFlags, CodeObject, Constant, Instruction, Opcode};
pub use exception::{ExcKind, FrameInfo, Traceback};
pub use interpreter::{Interpreter, MemoryLoader, ModuleLoader, ModuleSource};
pub use machine::{ThreadExit, Vm, VmError, VmErrorKind, VmResult, err};
pub use marshal::{LoadError, load_pyc_file, read_code, read_pyc};
pub use signature::{BindError, Bindings, ParamKind, Signature};
pub use type_def::{BuiltinTypes, MethodDef, TypeFlags};
pub use value::{ObjRef, Object, ObjectData, Value};
