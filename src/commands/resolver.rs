//! 命令解析器：把用户输入解析为执行计划，纯函数、无副作用
//!
//! 回退链：系统命令 → 用户保存的提示词 → 普通聊天。
//! 解析阶段不获取锁、不发事件、不调用 LLM。

use std::sync::Arc;

use crate::commands::context::CommandContext;
use crate::commands::error::ResolveError;
use crate::commands::registry::{CommandDefinition, CommandRegistry};
use crate::store::{normalize_prompt_title, PromptStore};

/// 命令前缀字符
pub const COMMAND_PREFIX: char = '/';

/// 解析结果：三种执行路径之一
pub enum ExecutionPlan {
    /// 命中系统命令；process_missing 表示缺少前置的案件关联，执行层直接提示用户
    SystemCommand {
        definition: Arc<CommandDefinition>,
        argument: String,
        process_missing: bool,
    },
    /// 命中用户保存的提示词：内容作为前置模板进入聊天路径
    SavedPrompt { content: String },
    /// 普通聊天
    Chat,
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPlan::SystemCommand {
                definition,
                argument,
                process_missing,
            } => f
                .debug_struct("SystemCommand")
                .field("slug", &definition.slug)
                .field("argument", argument)
                .field("process_missing", process_missing)
                .finish(),
            ExecutionPlan::SavedPrompt { content } => f
                .debug_struct("SavedPrompt")
                .field("content", content)
                .finish(),
            ExecutionPlan::Chat => f.write_str("Chat"),
        }
    }
}

/// 解析输入。未以前缀开头的输入一律走聊天；触发词大小写不敏感。
pub async fn resolve(
    input: &str,
    ctx: &CommandContext,
    registry: &CommandRegistry,
    prompts: &dyn PromptStore,
) -> Result<ExecutionPlan, ResolveError> {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix(COMMAND_PREFIX) else {
        return Ok(ExecutionPlan::Chat);
    };
    let (trigger, argument) = match rest.split_once(char::is_whitespace) {
        Some((t, a)) => (t, a.trim()),
        None => (rest, ""),
    };
    if trigger.is_empty() {
        return Ok(ExecutionPlan::Chat);
    }
    let trigger_lower = trigger.to_lowercase();

    if let Some(definition) = registry.get(&trigger_lower) {
        if !definition.modules.allows(&ctx.active_module) {
            return Err(ResolveError::ModuleNotSupported {
                slug: definition.slug.to_string(),
                module: ctx.active_module.clone(),
            });
        }
        if definition.requires_argument && argument.is_empty() {
            return Err(ResolveError::MissingArgument {
                slug: definition.slug.to_string(),
            });
        }
        let process_missing = definition.requires_process && ctx.process_id.is_none();
        return Ok(ExecutionPlan::SystemCommand {
            definition,
            argument: argument.to_string(),
            process_missing,
        });
    }

    // 非系统命令的触发词按归一化标题在用户保存的提示词里查找
    if let Some(prompt) = prompts
        .find_by_title(&ctx.user_id, &normalize_prompt_title(&trigger_lower))
        .await?
    {
        return Ok(ExecutionPlan::SavedPrompt {
            content: prompt.content,
        });
    }

    Ok(ExecutionPlan::Chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPromptStore, SavedPrompt};

    fn ctx(module: &str) -> CommandContext {
        CommandContext::new("u1", "c1", module)
    }

    #[tokio::test]
    async fn test_plain_text_is_chat() {
        let registry = CommandRegistry::builtin();
        let prompts = InMemoryPromptStore::new();
        let plan = resolve("what is Rule 10?", &ctx("cases"), &registry, &prompts)
            .await
            .unwrap();
        assert!(matches!(plan, ExecutionPlan::Chat));
        // 只有前缀也走聊天
        let plan = resolve("/", &ctx("cases"), &registry, &prompts).await.unwrap();
        assert!(matches!(plan, ExecutionPlan::Chat));
    }

    #[tokio::test]
    async fn test_system_command_hit() {
        let registry = CommandRegistry::builtin();
        let prompts = InMemoryPromptStore::new();
        let plan = resolve("/Draft  a reply brief ", &ctx("draft"), &registry, &prompts)
            .await
            .unwrap();
        match plan {
            ExecutionPlan::SystemCommand {
                definition,
                argument,
                process_missing,
            } => {
                assert_eq!(definition.slug, "draft");
                assert_eq!(argument, "a reply brief");
                assert!(!process_missing);
            }
            _ => panic!("expected system command"),
        }
    }

    #[tokio::test]
    async fn test_module_and_argument_guards() {
        let registry = CommandRegistry::builtin();
        let prompts = InMemoryPromptStore::new();

        let err = resolve("/draft something", &ctx("library"), &registry, &prompts)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ModuleNotSupported { .. }));

        let err = resolve("/draft", &ctx("draft"), &registry, &prompts)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingArgument { .. }));
    }

    #[tokio::test]
    async fn test_process_missing_flag() {
        let registry = CommandRegistry::builtin();
        let prompts = InMemoryPromptStore::new();
        let plan = resolve("/analyze", &ctx("cases"), &registry, &prompts)
            .await
            .unwrap();
        assert!(matches!(
            plan,
            ExecutionPlan::SystemCommand {
                process_missing: true,
                ..
            }
        ));

        let with_process = ctx("cases").with_process("p-1");
        let plan = resolve("/analyze", &with_process, &registry, &prompts)
            .await
            .unwrap();
        assert!(matches!(
            plan,
            ExecutionPlan::SystemCommand {
                process_missing: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_saved_prompt_fallback_then_chat() {
        let registry = CommandRegistry::builtin();
        let prompts = InMemoryPromptStore::new();
        prompts.insert(
            "u1",
            SavedPrompt {
                title: "Meu Modelo".to_string(),
                content: "Use formal register.".to_string(),
            },
        );

        let plan = resolve("/meu_modelo", &ctx("cases"), &registry, &prompts)
            .await
            .unwrap();
        match plan {
            ExecutionPlan::SavedPrompt { content } => {
                assert_eq!(content, "Use formal register.")
            }
            _ => panic!("expected saved prompt"),
        }

        let plan = resolve("/unknown_thing", &ctx("cases"), &registry, &prompts)
            .await
            .unwrap();
        assert!(matches!(plan, ExecutionPlan::Chat));
    }
}
