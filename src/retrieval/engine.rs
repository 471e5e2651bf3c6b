//! 混合检索引擎
//!
//! 词法与语义两路打分，合并策略：
//! - 查询为精确引用时，标题加权 ≥ 5 的词法结果视为权威精确匹配排在最前，余位用语义结果补齐；
//! - 否则有嵌入的文档按余弦相似度排序，缺嵌入的文档退化为词法分；
//! - 嵌入提供方失败时整体降级为纯词法，绝不让检索失败拖垮外层命令。
//! 输入文档只读，引擎自身无跨调用共享状态。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::llm::EmbeddingProvider;
use crate::retrieval::lexical::{is_exact_reference, lexical_score, title_boost, tokenize};

/// 检索文档（由文档存储协作方拥有）
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub doc_type: String,
    /// 定长向量，并非每篇文档都有
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            doc_type: doc_type.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// 命中来源：词法精确路 / 语义向量路
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Exact,
    Semantic,
}

/// 检索结果；similarity 为非负无界分数（加权可超过 1.0），非概率
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub similarity: f32,
    pub method: SearchMethod,
    pub doc_type: String,
}

/// 检索选项
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_similarity: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            min_similarity: 0.0,
        }
    }
}

/// 余弦相似度；长度不一致或为空时返回 0 而非报错
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 混合检索引擎；embedder 缺席时只做词法
pub struct RetrievalEngine {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl RetrievalEngine {
    pub fn new(embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { embedder }
    }

    pub async fn search(
        &self,
        documents: &[Document],
        query: &str,
        options: &SearchOptions,
    ) -> Vec<SearchResult> {
        let query_tokens = tokenize(query);
        let exact_query = is_exact_reference(query);

        // 词法两元组：(分数含加权, 加权)
        let lexical: Vec<(f32, f32)> = documents
            .iter()
            .map(|d| {
                let doc_tokens = tokenize(&format!("{} {}", d.title, d.content));
                let boost = title_boost(query, &d.title);
                (lexical_score(&query_tokens, &doc_tokens) + boost, boost)
            })
            .collect();

        // 查询向量；嵌入失败只降级，不失败
        let query_embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(query).await {
                Ok(v) if !v.is_empty() => Some(v),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("embedding provider failed, degrading to lexical-only: {}", e);
                    None
                }
            },
            None => None,
        };
        let semantic: Vec<Option<f32>> = documents
            .iter()
            .map(|d| match (&query_embedding, &d.embedding) {
                (Some(q), Some(e)) => Some(cosine_similarity(q, e)),
                _ => None,
            })
            .collect();

        let mut results: Vec<SearchResult> = Vec::new();
        if exact_query {
            // 精确匹配优先
            let mut exact_hits: Vec<(usize, f32)> = lexical
                .iter()
                .enumerate()
                .filter(|(_, (score, boost))| *boost >= 5.0 && *score > 0.0)
                .map(|(i, (score, _))| (i, *score))
                .collect();
            exact_hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let included: HashSet<usize> = exact_hits.iter().map(|(i, _)| *i).collect();
            for (i, score) in exact_hits {
                results.push(to_result(&documents[i], score, SearchMethod::Exact));
            }
            // 余位补齐：有语义走语义，否则用剩余词法
            for (i, doc) in documents.iter().enumerate() {
                if included.contains(&i) {
                    continue;
                }
                match semantic[i] {
                    Some(sim) if sim > 0.0 => {
                        results.push(to_result(doc, sim, SearchMethod::Semantic));
                    }
                    None if query_embedding.is_none() && lexical[i].0 > 0.0 => {
                        results.push(to_result(doc, lexical[i].0, SearchMethod::Exact));
                    }
                    _ => {}
                }
            }
        } else {
            // 非精确查询：语义优先，缺嵌入的文档退化为词法分
            for (i, doc) in documents.iter().enumerate() {
                match semantic[i] {
                    Some(sim) if sim > 0.0 => {
                        results.push(to_result(doc, sim, SearchMethod::Semantic));
                    }
                    Some(_) => {}
                    None if lexical[i].0 > 0.0 => {
                        results.push(to_result(doc, lexical[i].0, SearchMethod::Exact));
                    }
                    None => {}
                }
            }
        }

        results.retain(|r| r.similarity >= options.min_similarity);
        // 加权后的精确命中分数 ≥ 5，天然排在余弦分（≤ 1）之前
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(options.limit);
        results
    }
}

fn to_result(doc: &Document, similarity: f32, method: SearchMethod) -> SearchResult {
    SearchResult {
        id: doc.id.clone(),
        title: doc.title.clone(),
        content: doc.content.clone(),
        similarity,
        method,
        doc_type: doc.doc_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::LlmError;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::new("connection reset by peer"))
        }
    }

    struct StaticEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for StaticEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn rule_docs() -> Vec<Document> {
        vec![
            Document::new("1", "Rule 10", "Costs follow the event on appeal.", "rule"),
            Document::new("2", "Rule 100", "Deadlines for filing counterclaims.", "rule"),
            Document::new("3", "Rule 1000", "Electronic service of process.", "rule"),
        ]
    }

    #[tokio::test]
    async fn test_boost_non_collision() {
        let engine = RetrievalEngine::new(None);
        let results = engine
            .search(&rule_docs(), "Rule 10", &SearchOptions::default())
            .await;
        assert!(!results.is_empty());
        assert_eq!(results[0].title, "Rule 10");
        assert_eq!(results[0].method, SearchMethod::Exact);
    }

    #[tokio::test]
    async fn test_ranking_order_and_min_similarity() {
        let engine = RetrievalEngine::new(None);
        let options = SearchOptions {
            limit: 10,
            min_similarity: 0.01,
        };
        let results = engine.search(&rule_docs(), "Rule 10", &options).await;
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(results.iter().all(|r| r.similarity >= options.min_similarity));
    }

    #[tokio::test]
    async fn test_semantic_degradation_on_embedder_failure() {
        let engine = RetrievalEngine::new(Some(std::sync::Arc::new(FailingEmbedder)));
        let docs = vec![
            Document::new("1", "Appeal costs", "Costs are awarded on appeal.", "note")
                .with_embedding(vec![1.0, 0.0]),
        ];
        let results = engine
            .search(&docs, "appeal costs", &SearchOptions::default())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method, SearchMethod::Exact);
    }

    #[tokio::test]
    async fn test_semantic_ranking_with_lexical_fallback() {
        let engine = RetrievalEngine::new(Some(std::sync::Arc::new(StaticEmbedder(vec![
            1.0, 0.0,
        ]))));
        let docs = vec![
            Document::new("1", "Liability", "Tort liability principles.", "note")
                .with_embedding(vec![1.0, 0.0]),
            Document::new("2", "Contracts", "Formation of contracts.", "note")
                .with_embedding(vec![0.0, 1.0]),
            // 无嵌入 => 词法退化
            Document::new("3", "Damages overview", "Measure of damages in tort.", "note"),
        ];
        let results = engine
            .search(&docs, "tort damages", &SearchOptions::default())
            .await;
        let first = &results[0];
        assert_eq!(first.id, "1");
        assert_eq!(first.method, SearchMethod::Semantic);
        assert!(results.iter().any(|r| r.id == "3" && r.method == SearchMethod::Exact));
    }

    #[tokio::test]
    async fn test_mismatched_embedding_length_scores_zero() {
        let engine = RetrievalEngine::new(Some(std::sync::Arc::new(StaticEmbedder(vec![
            1.0, 0.0,
        ]))));
        // 维度不匹配 => 余弦为 0，被过滤而非报错
        let docs = vec![
            Document::new("1", "Odd vector", "irrelevant", "note").with_embedding(vec![1.0, 0.0, 0.0]),
        ];
        let results = engine
            .search(&docs, "anything else entirely", &SearchOptions::default())
            .await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
