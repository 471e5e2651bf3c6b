//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。
//! 错误统一为 LlmError，带可选 HTTP 状态码，供重试执行器分类。

use std::pin::Pin;

use async_openai::error::OpenAIError;
use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::conversation::Message;

/// LLM 层错误：消息文本 + 可选状态码（429/503/5xx 等用于重试分类）
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<OpenAIError> for LlmError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(e) => {
                let message = e.to_string();
                match e.status() {
                    Some(status) => LlmError::with_status(status.as_u16(), message),
                    None => LlmError::new(message),
                }
            }
            OpenAIError::ApiError(api) => {
                let status = api_error_status(api.code.as_deref(), api.r#type.as_deref());
                match status {
                    Some(code) => LlmError::with_status(code, api.message),
                    None => LlmError::new(api.message),
                }
            }
            other => LlmError::new(other.to_string()),
        }
    }
}

/// OpenAI 的错误对象不携带 HTTP 状态；从 code/type 标签恢复已知类别的状态码
fn api_error_status(code: Option<&str>, kind: Option<&str>) -> Option<u16> {
    let tag = code.or(kind)?;
    if let Ok(numeric) = tag.parse::<u16>() {
        return Some(numeric);
    }
    match tag {
        "rate_limit_exceeded" | "insufficient_quota" => Some(429),
        "server_error" => Some(500),
        "service_unavailable" | "engine_overloaded" => Some(503),
        _ => None,
    }
}

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成，返回 Token 流
    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>, LlmError>;
}
