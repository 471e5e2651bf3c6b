//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按入队顺序弹出预置回复（可以是错误，用于重试/降级测试）；队列为空时回显最后一条 User 消息。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::conversation::{Message, Role};
use crate::llm::{LlmClient, LlmError};

/// Mock 客户端：预置回复队列 + 回显兜底
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一条成功回复
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(content.into()));
    }

    /// 入队一条失败（用于模拟限流/超时等）
    pub fn push_failure(&self, err: LlmError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// 累计 complete 调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(queued) = self.responses.lock().unwrap().pop_front() {
            return queued;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures_util::Stream<Item = Result<String, LlmError>> + Send>>, LlmError>
    {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
