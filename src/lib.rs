//! Juris - 法律智能助手后端
//!
//! 模块划分：
//! - **commands**: 命令注册表、解析器、用户锁、步骤编排器与内置命令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 对话消息与有界历史
//! - **engine**: 顶层流程（解析 → 锁 → 编排 → 持久化）
//! - **intent**: 意图识别（具体/抽象两条路径，启发式 + LLM 兜底）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与嵌入
//! - **retrieval**: 混合检索（精确引用 + 词法打分 + 向量余弦）
//! - **retry**: 带退避与抖动的重试执行器
//! - **store**: 持久化边界（trait + 内存实现）

pub mod commands;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod retrieval;
pub mod retry;
pub mod store;

pub use engine::AssistantEngine;
