//! 持久化边界：对话历史、用户保存的提示词、文档集合、论点记录
//!
//! 核心只依赖这些窄 trait，不内嵌任何 SQL 或存储 schema 知识。
//! 内存实现供测试与本地 REPL 使用。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::conversation::{Message, RecentHistory};
use crate::intent::RagScope;
use crate::retrieval::Document;

/// 存储层错误（后端细节折叠为文本）
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(String),
}

/// 用户保存的提示词
#[derive(Debug, Clone)]
pub struct SavedPrompt {
    pub title: String,
    pub content: String,
}

/// 从推理步骤中沉淀的论点记录（结构化产物）
#[derive(Debug, Clone)]
pub struct ThesisRecord {
    pub id: String,
    pub user_id: String,
    pub process_id: Option<String>,
    pub thesis: String,
    pub created_at: DateTime<Utc>,
}

impl ThesisRecord {
    pub fn new(user_id: impl Into<String>, process_id: Option<String>, thesis: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            process_id,
            thesis: thesis.into(),
            created_at: Utc::now(),
        }
    }
}

/// 对话存储：加载历史、持久化最终助手消息
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn recent_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn persist_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), StoreError>;
}

/// 论点存储
#[async_trait]
pub trait ThesisStore: Send + Sync {
    async fn save_thesis(&self, record: ThesisRecord) -> Result<(), StoreError>;
}

/// 提示词存储：按归一化标题查找（大小写不敏感，下划线等同空格）
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn find_by_title(
        &self,
        user_id: &str,
        normalized_title: &str,
    ) -> Result<Option<SavedPrompt>, StoreError>;
}

/// 文档存储：按检索范围取文档集合
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn documents(&self, scope: &RagScope) -> Result<Vec<Document>, StoreError>;
}

/// 提示词标题归一化：小写 + 下划线折叠为空格
pub fn normalize_prompt_title(title: &str) -> String {
    title.to_lowercase().replace('_', " ")
}

/// 内存对话存储
#[derive(Default)]
pub struct InMemoryConversationStore {
    messages: Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, conversation_id: &str, message: Message) {
        self.messages
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn recent_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let map = self.messages.lock().unwrap();
        let all = map.get(conversation_id).cloned().unwrap_or_default();
        Ok(RecentHistory::from_messages(all, limit).messages().to_vec())
    }

    async fn persist_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        self.push(conversation_id, Message::assistant(content));
        Ok(())
    }
}

/// 内存论点存储
#[derive(Default)]
pub struct InMemoryThesisStore {
    records: Mutex<Vec<ThesisRecord>>,
}

impl InMemoryThesisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ThesisRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ThesisStore for InMemoryThesisStore {
    async fn save_thesis(&self, record: ThesisRecord) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// 内存提示词存储
#[derive(Default)]
pub struct InMemoryPromptStore {
    prompts: Mutex<HashMap<String, Vec<SavedPrompt>>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: &str, prompt: SavedPrompt) {
        self.prompts
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .push(prompt);
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn find_by_title(
        &self,
        user_id: &str,
        normalized_title: &str,
    ) -> Result<Option<SavedPrompt>, StoreError> {
        let map = self.prompts.lock().unwrap();
        Ok(map.get(user_id).and_then(|prompts| {
            prompts
                .iter()
                .find(|p| normalize_prompt_title(&p.title) == normalized_title)
                .cloned()
        }))
    }
}

/// 内存文档存储
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: Mutex<Vec<(RagScope, Document)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, scope: RagScope, doc: Document) {
        self.docs.lock().unwrap().push((scope, doc));
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn documents(&self, scope: &RagScope) -> Result<Vec<Document>, StoreError> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prompt_lookup_is_normalized() {
        let store = InMemoryPromptStore::new();
        store.insert(
            "u1",
            SavedPrompt {
                title: "Meu Modelo".to_string(),
                content: "template".to_string(),
            },
        );
        let found = store
            .find_by_title("u1", &normalize_prompt_title("meu_modelo"))
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(store
            .find_by_title("u2", "meu modelo")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recent_history_bounded() {
        let store = InMemoryConversationStore::new();
        for i in 0..10 {
            store.push("c1", Message::user(format!("m{}", i)));
        }
        let history = store.recent_history("c1", 2).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "m6");
    }
}
