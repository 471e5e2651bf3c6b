//! 命令执行上下文：由单次执行独占，结束即丢弃

use tokio_util::sync::CancellationToken;

use crate::conversation::Message;
use crate::intent::IntentContext;

/// 单次命令执行的上下文
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub user_id: String,
    pub conversation_id: String,
    /// 已关联的案件标识（可选）
    pub process_id: Option<String>,
    /// 本次请求是否带附件（附件即「有具体案情」的信号）
    pub has_attachment: bool,
    /// 当前激活模块
    pub active_module: String,
    /// 触发词之后的自由文本
    pub argument: String,
    /// 最近若干轮对话（有界）
    pub recent_history: Vec<Message>,
    /// 取消信号：编排器在步骤之间检查
    pub cancel_token: CancellationToken,
}

impl CommandContext {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        active_module: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            process_id: None,
            has_attachment: false,
            active_module: active_module.into(),
            argument: String::new(),
            recent_history: Vec::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_process(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    pub fn with_attachment(mut self) -> Self {
        self.has_attachment = true;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.recent_history = history;
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = argument.into();
        self
    }

    pub fn intent_context(&self) -> IntentContext {
        IntentContext {
            has_process: self.process_id.is_some(),
            has_attachment: self.has_attachment,
        }
    }
}
