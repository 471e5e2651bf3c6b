//! 顶层引擎：解析 → 前置校验 → 锁 → 编排/聊天 → 持久化
//!
//! handle 立即返回事件接收端，执行在后台任务中进行；调用方消费事件流即可。
//! 编排命令执行期间持有用户锁（Drop 守卫保证任何退出路径都释放），
//! 一步直出命令与聊天不加锁。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::commands::{
    resolve, run_command, CommandContext, CommandError, CommandEvent, CommandKind,
    CommandLock, CommandRegistry, ExecutionPlan, ResolveError, StepDeps,
};
use crate::config::AppConfig;
use crate::conversation::Message;
use crate::intent::RagScope;
use crate::store::{ConversationStore, PromptStore};

/// 会话引擎：单条用户输入进，事件流出
#[derive(Clone)]
pub struct AssistantEngine {
    registry: Arc<CommandRegistry>,
    lock: Arc<CommandLock>,
    deps: Arc<StepDeps>,
    conversations: Arc<dyn ConversationStore>,
    prompts: Arc<dyn PromptStore>,
    max_history_turns: usize,
}

impl AssistantEngine {
    pub fn new(
        deps: StepDeps,
        conversations: Arc<dyn ConversationStore>,
        prompts: Arc<dyn PromptStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry: Arc::new(CommandRegistry::builtin()),
            lock: Arc::new(CommandLock::new(std::time::Duration::from_secs(
                config.commands.lock_timeout_secs,
            ))),
            deps: Arc::new(deps),
            conversations,
            prompts,
            max_history_turns: config.app.max_history_turns,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// 处理一条用户输入，返回事件接收端；后台任务结束时通道关闭
    pub fn handle(&self, ctx: CommandContext, input: String) -> mpsc::UnboundedReceiver<CommandEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.handle_inner(ctx, input, tx).await;
        });
        rx
    }

    async fn handle_inner(
        &self,
        mut ctx: CommandContext,
        input: String,
        tx: mpsc::UnboundedSender<CommandEvent>,
    ) {
        if ctx.recent_history.is_empty() {
            match self
                .conversations
                .recent_history(&ctx.conversation_id, self.max_history_turns)
                .await
            {
                Ok(history) => ctx.recent_history = history,
                Err(err) => tracing::warn!("failed to load conversation history: {}", err),
            }
        }

        let plan = match resolve(&input, &ctx, &self.registry, self.prompts.as_ref()).await {
            Ok(plan) => plan,
            Err(err) => {
                let command = match &err {
                    ResolveError::ModuleNotSupported { slug, .. }
                    | ResolveError::MissingArgument { slug } => slug.clone(),
                    ResolveError::Store(_) => "resolve".to_string(),
                };
                let _ = tx.send(CommandEvent::CommandError {
                    command,
                    message: err.to_string(),
                });
                return;
            }
        };

        match plan {
            ExecutionPlan::SystemCommand {
                definition,
                argument,
                process_missing,
            } => {
                if process_missing {
                    let _ = tx.send(CommandEvent::CommandError {
                        command: definition.slug.to_string(),
                        message: format!(
                            "command '/{}' requires a linked case; link one and try again",
                            definition.slug
                        ),
                    });
                    return;
                }
                ctx.argument = argument;

                // 编排命令才加锁，一步直出命令不会长时间占用
                let guard = match definition.kind {
                    CommandKind::Orchestrated => {
                        match self.lock.guard(&ctx.user_id, definition.slug) {
                            Some(guard) => Some(guard),
                            None => {
                                let _ = tx.send(CommandEvent::CommandError {
                                    command: definition.slug.to_string(),
                                    message: "another command is already running for this user"
                                        .to_string(),
                                });
                                return;
                            }
                        }
                    }
                    CommandKind::Simple => None,
                };

                let result = run_command(&definition, &ctx, &self.deps, &tx).await;
                drop(guard);
                if let Ok(output) = result {
                    self.persist(&ctx.conversation_id, &output).await;
                }
            }
            ExecutionPlan::SavedPrompt { content } => {
                self.chat(&ctx, &input, Some(&content), &tx).await;
            }
            ExecutionPlan::Chat => {
                self.chat(&ctx, &input, None, &tx).await;
            }
        }
    }

    /// 聊天路径：知识库检索增强 + 历史上下文 + 可选的保存提示词前置模板
    async fn chat(
        &self,
        ctx: &CommandContext,
        input: &str,
        preamble: Option<&str>,
        tx: &mpsc::UnboundedSender<CommandEvent>,
    ) {
        let started = Instant::now();
        let _ = tx.send(CommandEvent::CommandStart {
            command: "chat".to_string(),
            total_steps: 1,
        });
        match self.chat_inner(ctx, input, preamble).await {
            Ok(output) => {
                let _ = tx.send(CommandEvent::ContentComplete {
                    content: output.clone(),
                });
                let _ = tx.send(CommandEvent::CommandComplete {
                    command: "chat".to_string(),
                    output: output.clone(),
                    steps: Vec::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                self.persist(&ctx.conversation_id, &output).await;
            }
            Err(err) => {
                tracing::error!("chat failed: {}", err);
                let _ = tx.send(CommandEvent::CommandError {
                    command: "chat".to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn chat_inner(
        &self,
        ctx: &CommandContext,
        input: &str,
        preamble: Option<&str>,
    ) -> Result<String, CommandError> {
        let hits = crate::commands::handlers::retrieve(&self.deps, &RagScope::Library, input).await?;

        let mut system = String::from(
            "You are a legal assistant. Answer precisely and cite the reference material when it applies.",
        );
        if let Some(template) = preamble {
            system.push_str("\n\n");
            system.push_str(template);
        }
        let block = crate::commands::handlers::context_block(&hits);
        if !block.is_empty() {
            system.push_str("\n\n");
            system.push_str(&block);
        }

        let mut messages = vec![Message::system(system)];
        messages.extend(ctx.recent_history.iter().cloned());
        messages.push(Message::user(input));
        crate::commands::handlers::complete_with_retry(&self.deps, &messages).await
    }

    async fn persist(&self, conversation_id: &str, content: &str) {
        if let Err(err) = self
            .conversations
            .persist_assistant_message(conversation_id, content)
            .await
        {
            tracing::warn!("failed to persist assistant message: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentClassifier;
    use crate::llm::MockLlmClient;
    use crate::retrieval::{RetrievalEngine, SearchOptions};
    use crate::retry::RetryOptions;
    use crate::store::{
        InMemoryConversationStore, InMemoryDocumentStore, InMemoryPromptStore,
        InMemoryThesisStore, SavedPrompt,
    };

    fn test_engine(llm: Arc<MockLlmClient>) -> (AssistantEngine, Arc<InMemoryConversationStore>, Arc<InMemoryPromptStore>) {
        let conversations = Arc::new(InMemoryConversationStore::new());
        let prompts = Arc::new(InMemoryPromptStore::new());
        let deps = StepDeps {
            llm: llm.clone(),
            retrieval: Arc::new(RetrievalEngine::new(None)),
            documents: Arc::new(InMemoryDocumentStore::new()),
            theses: Arc::new(InMemoryThesisStore::new()),
            intent: Arc::new(IntentClassifier::new(llm)),
            retry: RetryOptions {
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                ..RetryOptions::default()
            },
            search: SearchOptions::default(),
        };
        let engine = AssistantEngine::new(
            deps,
            conversations.clone(),
            prompts.clone(),
            &AppConfig::default(),
        );
        (engine, conversations, prompts)
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<CommandEvent>) -> Vec<CommandEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn types(events: &[CommandEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chat_path_persists_answer() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_response("Rule 10 governs costs.");
        let (engine, conversations, _) = test_engine(llm);
        let ctx = CommandContext::new("u1", "c1", "cases");
        let events = collect(engine.handle(ctx, "what does Rule 10 say?".to_string())).await;
        assert_eq!(
            types(&events),
            vec!["command_start", "content_complete", "command_complete"]
        );
        let history = conversations.recent_history("c1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Rule 10 governs costs.");
    }

    #[tokio::test]
    async fn test_saved_prompt_feeds_chat() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_response("Formal answer.");
        let (engine, _, prompts) = test_engine(llm);
        prompts.insert(
            "u1",
            SavedPrompt {
                title: "meu modelo".to_string(),
                content: "Always answer in formal register.".to_string(),
            },
        );
        let ctx = CommandContext::new("u1", "c1", "cases");
        let events = collect(engine.handle(ctx, "/meu_modelo".to_string())).await;
        assert_eq!(
            types(&events),
            vec!["command_start", "content_complete", "command_complete"]
        );
    }

    #[tokio::test]
    async fn test_orchestrated_command_is_locked_per_user() {
        let llm = Arc::new(MockLlmClient::new());
        let (engine, _, _) = test_engine(llm);
        // 模拟同一用户已有编排命令在执行
        let _held = engine.lock.guard("u1", "draft").unwrap();
        let ctx = CommandContext::new("u1", "c1", "draft");
        let events = collect(engine.handle(ctx, "/draft a reply brief".to_string())).await;
        assert_eq!(types(&events), vec!["command_error"]);
        match &events[0] {
            CommandEvent::CommandError { message, .. } => {
                assert!(message.contains("already running"));
            }
            _ => panic!("expected command_error"),
        }
    }

    #[tokio::test]
    async fn test_process_missing_is_user_facing_error() {
        let llm = Arc::new(MockLlmClient::new());
        let (engine, _, _) = test_engine(llm);
        let ctx = CommandContext::new("u1", "c1", "cases");
        let events = collect(engine.handle(ctx, "/analyze".to_string())).await;
        assert_eq!(types(&events), vec!["command_error"]);
        match &events[0] {
            CommandEvent::CommandError { command, message } => {
                assert_eq!(command, "analyze");
                assert!(message.contains("linked case"));
            }
            _ => panic!("expected command_error"),
        }
    }

    #[tokio::test]
    async fn test_resolve_error_surfaces_as_event() {
        let llm = Arc::new(MockLlmClient::new());
        let (engine, _, _) = test_engine(llm);
        let ctx = CommandContext::new("u1", "c1", "library");
        let events = collect(engine.handle(ctx, "/draft something".to_string())).await;
        assert_eq!(types(&events), vec!["command_error"]);
    }
}
