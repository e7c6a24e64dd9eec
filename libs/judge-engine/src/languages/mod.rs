//! Per-language toolchains. Each one plugs into [`SandboxExecutor`], which runs the shared
//! sandbox protocol.

mod cpp;
mod java;
mod node;
mod python;

pub use cpp::{Cpp, CppExecutor};
pub use java::{Java, JavaExecutor};
pub use node::{Node, NodeExecutor};
pub use python::{Python, PythonExecutor};

use crate::executor::{Executor, ExecutorOptions, SandboxExecutor};
use crate::sandbox::SandboxRuntime;
use judge_common::config::LanguageConfig;
use judge_common::types::Language;
use std::sync::Arc;

/// Build the sandboxed executor for `language`
pub fn executor_for(
    language: Language,
    runtime: Arc<dyn SandboxRuntime>,
    config: LanguageConfig,
    options: ExecutorOptions,
) -> Arc<dyn Executor> {
    match language {
        Language::Java => Arc::new(SandboxExecutor::new(Java, runtime, config, options)),
        Language::Node => Arc::new(SandboxExecutor::new(Node, runtime, config, options)),
        Language::Cpp => Arc::new(SandboxExecutor::new(Cpp, runtime, config, options)),
        Language::Python => Arc::new(SandboxExecutor::new(Python, runtime, config, options)),
    }
}
