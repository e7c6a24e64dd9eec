use crate::executor::{SandboxExecutor, Toolchain};
use judge_common::types::Language;

pub type CppExecutor = SandboxExecutor<Cpp>;

/// GNU C++17
#[derive(Debug, Clone, Copy, Default)]
pub struct Cpp;

impl Toolchain for Cpp {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn source_file(&self) -> &'static str {
        "main.cpp"
    }

    fn compile_command(&self) -> Option<String> {
        Some("g++ -std=c++17 -O2 -pipe -o /workspace/main /workspace/main.cpp".to_string())
    }

    fn run_command(&self) -> String {
        "exec /workspace/main".to_string()
    }

    // The assembler and linker need scratch space; /tmp is read-only
    fn env(&self, _memory_mb: u32) -> Vec<String> {
        vec!["TMPDIR=/workspace".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpp_scratch_dir_is_the_workspace() {
        assert_eq!(Cpp.env(256), vec!["TMPDIR=/workspace".to_string()]);
        assert!(Cpp.compile_command().unwrap().contains("-o /workspace/main"));
    }
}
