use crate::executor::{SandboxExecutor, Toolchain};
use judge_common::types::Language;

pub type PythonExecutor = SandboxExecutor<Python>;

/// CPython 3. A byte-compile pass stands in for the compile step so syntax errors are
/// reported as compilation errors before any test runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Python;

impl Toolchain for Python {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_file(&self) -> &'static str {
        "main.py"
    }

    fn compile_command(&self) -> Option<String> {
        Some("python3 -m py_compile /workspace/main.py".to_string())
    }

    fn run_command(&self) -> String {
        "exec python3 -u /workspace/main.py".to_string()
    }

    fn env(&self, _memory_mb: u32) -> Vec<String> {
        vec!["PYTHONPYCACHEPREFIX=/workspace/.pycache".to_string()]
    }
}
