//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `JURIS__*` 覆盖（双下划线表示嵌套，如 `JURIS__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// [app] 段：应用名、对话历史轮数上限
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话历史保留轮数（注入 LLM 上下文的上限）
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_max_history_turns() -> usize {
    20
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai 兼容端点；无 API Key 时退化为 Mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [embedding] 段：向量模型（与 LLM 共用 OPENAI_API_KEY / base_url）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmbeddingSection {
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// [retrieval] 段：检索结果上限与相似度门槛
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrievalSection {
    #[serde(default = "default_retrieval_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_similarity: f32,
}

fn default_retrieval_limit() -> usize {
    5
}

/// [commands] 段：用户锁安全超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CommandsSection {
    /// 锁条目过期时间（秒）；过期条目在下次 acquire/has_lock 时惰性清除
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    300
}

/// [retry] 段：LLM 调用的重试参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl RetrySection {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryOptions::default()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            embedding: EmbeddingSection::default(),
            retrieval: RetrievalSection::default(),
            commands: CommandsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 JURIS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 JURIS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("JURIS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_ms, 1_000);
        assert_eq!(cfg.retry.max_delay_ms, 10_000);
        assert_eq!(cfg.commands.lock_timeout_secs, 300);
        assert_eq!(cfg.retrieval.limit, 5);
    }
}
