//! 命令注册表
//!
//! 进程启动时显式构建一次的静态表（不依赖模块加载顺序的副作用注册），此后不可变。

use std::collections::HashMap;
use std::sync::Arc;

use crate::commands::handlers::{
    AnalyzeCommand, CommandHandler, DraftCommand, SearchCommand, SummarizeCommand,
};

/// 命令类型：一步直出 / 多步编排
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Simple,
    Orchestrated,
}

/// 命令适用的模块集合
#[derive(Debug, Clone)]
pub enum ModuleScope {
    All,
    Only(Vec<&'static str>),
}

impl ModuleScope {
    pub fn allows(&self, module: &str) -> bool {
        match self {
            ModuleScope::All => true,
            ModuleScope::Only(modules) => modules.iter().any(|m| *m == module),
        }
    }
}

/// 编排步骤声明：名称 + 是否为检查点（结构化输出必须通过校验才能继续）
#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub name: &'static str,
    pub checkpoint: bool,
}

impl StepSpec {
    pub const fn step(name: &'static str) -> Self {
        Self {
            name,
            checkpoint: false,
        }
    }

    pub const fn checkpoint(name: &'static str) -> Self {
        Self {
            name,
            checkpoint: true,
        }
    }
}

/// 命令定义：触发词、元信息、前置条件与步骤处理器
pub struct CommandDefinition {
    /// 唯一触发词（不含前缀字符）
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: CommandKind,
    pub modules: ModuleScope,
    pub requires_process: bool,
    pub requires_argument: bool,
    pub handler: Arc<dyn CommandHandler>,
}

/// 按触发词索引的静态注册表
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<CommandDefinition>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register(&mut self, definition: CommandDefinition) {
        self.commands.insert(definition.slug, Arc::new(definition));
    }

    pub fn get(&self, slug: &str) -> Option<Arc<CommandDefinition>> {
        self.commands.get(slug).cloned()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<CommandDefinition>> {
        self.commands.values()
    }

    /// 内置命令表：启动时构建一次
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(CommandDefinition {
            slug: "draft",
            name: "Draft document",
            description: "Draft a legal document in four stages: fact audit, precedent lookup, reasoning, drafting",
            kind: CommandKind::Orchestrated,
            modules: ModuleScope::Only(vec!["draft", "cases"]),
            requires_process: false,
            requires_argument: true,
            handler: Arc::new(DraftCommand),
        });

        registry.register(CommandDefinition {
            slug: "analyze",
            name: "Analyze case",
            description: "Analyze the linked case: overview, risk audit, recommendations",
            kind: CommandKind::Orchestrated,
            modules: ModuleScope::Only(vec!["cases"]),
            requires_process: true,
            requires_argument: false,
            handler: Arc::new(AnalyzeCommand),
        });

        registry.register(CommandDefinition {
            slug: "summarize",
            name: "Summarize conversation",
            description: "Summarize the recent conversation",
            kind: CommandKind::Simple,
            modules: ModuleScope::All,
            requires_process: false,
            requires_argument: false,
            handler: Arc::new(SummarizeCommand),
        });

        registry.register(CommandDefinition {
            slug: "search",
            name: "Search knowledge base",
            description: "Hybrid search over the document library",
            kind: CommandKind::Simple,
            modules: ModuleScope::All,
            requires_process: false,
            requires_argument: true,
            handler: Arc::new(SearchCommand),
        });

        registry
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let registry = CommandRegistry::builtin();
        assert!(registry.get("draft").is_some());
        assert!(registry.get("analyze").is_some());
        assert!(registry.get("summarize").is_some());
        assert!(registry.get("search").is_some());
        assert!(registry.get("unknown").is_none());

        let draft = registry.get("draft").unwrap();
        assert_eq!(draft.kind, CommandKind::Orchestrated);
        assert!(draft.requires_argument);
        assert_eq!(draft.handler.steps().len(), 4);
    }

    #[test]
    fn test_module_scope() {
        let scope = ModuleScope::Only(vec!["draft", "cases"]);
        assert!(scope.allows("draft"));
        assert!(!scope.allows("library"));
        assert!(ModuleScope::All.allows("anything"));
    }
}
