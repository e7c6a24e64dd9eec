use crate::executor::{SandboxExecutor, Toolchain};
use judge_common::types::Language;

pub type JavaExecutor = SandboxExecutor<Java>;

/// Java 17. The entry class must be `Main`, so the file is `Main.java`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Java;

impl Toolchain for Java {
    fn language(&self) -> Language {
        Language::Java
    }

    fn source_file(&self) -> &'static str {
        "Main.java"
    }

    // Perf data is disabled because /tmp is read-only in the sandbox
    fn compile_command(&self) -> Option<String> {
        Some("javac -J-XX:-UsePerfData -d /workspace /workspace/Main.java".to_string())
    }

    fn run_command(&self) -> String {
        // JAVA_TOOL_OPTIONS makes the JVM print a banner on stderr
        "unset JAVA_TOOL_OPTIONS; exec java -XX:-UsePerfData -cp /workspace Main".to_string()
    }
}
