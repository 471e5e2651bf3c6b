//! 命令层错误：解析错误直接面向用户，执行错误由编排器转为 command_error 事件

use thiserror::Error;

use crate::retry::RetryError;
use crate::store::StoreError;

/// 解析错误：输入对命中的命令结构上不合法，直接提示用户，绝不重试
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("command '/{slug}' is not available in module '{module}'")]
    ModuleNotSupported { slug: String, module: String },

    #[error("command '/{slug}' requires an argument")]
    MissingArgument { slug: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 命令执行错误：任何一个都会让当前执行失败，但永远不会越过锁释放
#[derive(Debug, Error)]
pub enum CommandError {
    /// 检查点失败：LLM 输出不满足要求的结构（数据质量问题，区别于基础设施故障）
    #[error("step '{step}' produced malformed output: {reason}")]
    Checkpoint { step: String, reason: String },

    /// 用户取消；步骤之间检查
    #[error("command cancelled")]
    Cancelled,

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
