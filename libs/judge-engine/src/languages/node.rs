use crate::executor::{SandboxExecutor, Toolchain};
use judge_common::types::Language;

pub type NodeExecutor = SandboxExecutor<Node>;

/// Smallest V8 old-space size handed to node, in MB
const MIN_HEAP_MB: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct Node;

impl Toolchain for Node {
    fn language(&self) -> Language {
        Language::Node
    }

    fn source_file(&self) -> &'static str {
        "main.js"
    }

    fn compile_command(&self) -> Option<String> {
        None
    }

    fn run_command(&self) -> String {
        "exec node /workspace/main.js".to_string()
    }

    // Heap gets three quarters of the sandbox memory
    fn env(&self, memory_mb: u32) -> Vec<String> {
        let heap_mb = (memory_mb / 4 * 3).max(MIN_HEAP_MB);
        vec![format!("NODE_OPTIONS=--max-old-space-size={}", heap_mb)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_heap_follows_memory_limit() {
        assert_eq!(Node.env(256), vec!["NODE_OPTIONS=--max-old-space-size=192".to_string()]);
        assert_eq!(Node.env(1024), vec!["NODE_OPTIONS=--max-old-space-size=768".to_string()]);
        assert_eq!(Node.env(8), vec!["NODE_OPTIONS=--max-old-space-size=16".to_string()]);
    }
}
