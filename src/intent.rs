//! 意图识别
//!
//! 两条路径：
//! - **Concrete**：上下文带已关联案件或附件（附件本身即足以触发，即使还没有案件记录）。
//!   先走启发式规则，命不中再用 LLM 做结构化分类，逐项决定激活哪些处理引擎（motor）。
//! - **Abstract**：无案件无附件，输出固定词表中的单一意图标签与置信度。
//! 分类永不报错：LLM 失败或输出不可解析时回落到保守默认值。

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::llm::LlmClient;

/// 处理引擎（逻辑阶段），按请求选择性激活
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motor {
    FactAudit,
    PrecedentLookup,
    Reasoning,
    Drafting,
}

/// 检索范围：本次请求允许搜索的文档集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagScope {
    CaseFile,
    Precedents,
    Library,
    None,
}

/// 分类路径：有具体案情（案件或附件）走 Concrete，否则 Abstract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Abstract,
    Concrete,
}

/// 分类结果
#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: String,
    pub motors: BTreeSet<Motor>,
    pub rag_scope: RagScope,
    pub confidence: f32,
    pub path: PathKind,
}

/// 分类所需的最小上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentContext {
    pub has_process: bool,
    /// 附件内容本身就是「有具体案情」的信号，即使还没有案件记录
    pub has_attachment: bool,
}

/// LLM 结构化分类的期望输出
#[derive(Debug, Deserialize)]
struct ConcreteClassification {
    intent: String,
    motors: Vec<Motor>,
    #[serde(default)]
    confidence: Option<f32>,
}

fn drafting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(draft|write|petition|motion|appeal|reply|brief|letter)\b").unwrap()
    })
}

fn precedent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(precedent|ruling|case law|jurisprudence|rule \d+|theme \d+)\b").unwrap()
    })
}

fn facts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(facts?|evidence|timeline|chronology|deadline|documents?)\b").unwrap()
    })
}

fn question_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(what|when|how|why|can i|is it|does|explain)\b|\?").unwrap()
    })
}

/// 意图识别器
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    /// 启用快速规则匹配（不调用 LLM）
    enable_fast_match: bool,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            enable_fast_match: true,
        }
    }

    /// 识别意图；ctx 决定 Concrete / Abstract 路径
    pub async fn classify(&self, message: &str, ctx: &IntentContext) -> IntentResult {
        if ctx.has_process || ctx.has_attachment {
            self.classify_concrete(message).await
        } else {
            self.classify_abstract(message).await
        }
    }

    async fn classify_concrete(&self, message: &str) -> IntentResult {
        if self.enable_fast_match {
            if let Some(motors) = self.fast_match_motors(message) {
                return IntentResult {
                    intent: "case_work".to_string(),
                    motors,
                    rag_scope: RagScope::CaseFile,
                    confidence: 0.9,
                    path: PathKind::Concrete,
                };
            }
        }

        match self.llm_classify_concrete(message).await {
            Ok(result) => result,
            Err(reason) => {
                tracing::debug!("concrete intent fallback: {}", reason);
                // 保守默认：审核事实并推理
                IntentResult {
                    intent: "case_work".to_string(),
                    motors: [Motor::FactAudit, Motor::Reasoning].into_iter().collect(),
                    rag_scope: RagScope::CaseFile,
                    confidence: 0.3,
                    path: PathKind::Concrete,
                }
            }
        }
    }

    /// 启发式：逐引擎独立判定；一个都命不中则交给 LLM
    fn fast_match_motors(&self, message: &str) -> Option<BTreeSet<Motor>> {
        let mut motors = BTreeSet::new();
        if facts_re().is_match(message) {
            motors.insert(Motor::FactAudit);
        }
        if precedent_re().is_match(message) {
            motors.insert(Motor::PrecedentLookup);
        }
        if drafting_re().is_match(message) {
            motors.insert(Motor::Drafting);
            motors.insert(Motor::Reasoning);
        }
        if question_re().is_match(message) {
            motors.insert(Motor::Reasoning);
        }
        if motors.is_empty() {
            None
        } else {
            Some(motors)
        }
    }

    async fn llm_classify_concrete(&self, message: &str) -> Result<IntentResult, String> {
        let system_prompt = r#"You are an intent classifier for a legal assistant working on a concrete case.
Decide independently which processing stages the request needs.

Output ONLY a JSON object, no explanation:
{"intent": "<short label>", "motors": ["fact_audit"|"precedent_lookup"|"reasoning"|"drafting", ...], "confidence": 0.0-1.0}"#;

        let messages = vec![
            Message::system(system_prompt),
            Message::user(format!("User request: {}", message)),
        ];

        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| e.to_string())?;

        let json = extract_json_object(&response).ok_or("no JSON object in response")?;
        let parsed: ConcreteClassification =
            serde_json::from_str(json).map_err(|e| e.to_string())?;

        Ok(IntentResult {
            intent: parsed.intent,
            motors: parsed.motors.into_iter().collect(),
            rag_scope: RagScope::CaseFile,
            confidence: parsed.confidence.unwrap_or(0.7),
            path: PathKind::Concrete,
        })
    }

    async fn classify_abstract(&self, message: &str) -> IntentResult {
        if self.enable_fast_match {
            if let Some(result) = self.fast_match_abstract(message) {
                return result;
            }
        }

        let label = self
            .llm_classify_abstract(message)
            .await
            .unwrap_or_else(|_| "general_chat".to_string());
        abstract_result(&label, 0.6)
    }

    /// 抽象路径的固定词表：legal_question / document_review / drafting_help / general_chat
    fn fast_match_abstract(&self, message: &str) -> Option<IntentResult> {
        if drafting_re().is_match(message) {
            return Some(abstract_result("drafting_help", 0.85));
        }
        if precedent_re().is_match(message) || question_re().is_match(message) {
            return Some(abstract_result("legal_question", 0.8));
        }
        if facts_re().is_match(message) {
            return Some(abstract_result("document_review", 0.75));
        }
        None
    }

    async fn llm_classify_abstract(&self, message: &str) -> Result<String, String> {
        let system_prompt = r#"You are an intent classifier for a legal assistant. Classify the user's input.

Output ONLY one of these labels (no explanation):
- legal_question: Abstract legal question or doctrine discussion
- document_review: Reviewing or summarizing a document
- drafting_help: Help drafting a legal text
- general_chat: Anything else"#;

        let messages = vec![
            Message::system(system_prompt),
            Message::user(format!("User input: {}", message)),
        ];

        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.trim().to_lowercase())
    }
}

fn abstract_result(label: &str, confidence: f32) -> IntentResult {
    let (motors, rag_scope): (BTreeSet<Motor>, RagScope) = match label {
        "legal_question" => (
            [Motor::Reasoning, Motor::PrecedentLookup].into_iter().collect(),
            RagScope::Library,
        ),
        "document_review" => (
            [Motor::FactAudit, Motor::Reasoning].into_iter().collect(),
            RagScope::Library,
        ),
        "drafting_help" => (
            [Motor::Drafting, Motor::Reasoning].into_iter().collect(),
            RagScope::Library,
        ),
        _ => (BTreeSet::new(), RagScope::None),
    };
    let label = if matches!(
        label,
        "legal_question" | "document_review" | "drafting_help" | "general_chat"
    ) {
        label
    } else {
        "general_chat"
    };
    IntentResult {
        intent: label.to_string(),
        motors,
        rag_scope,
        confidence,
        path: PathKind::Abstract,
    }
}

/// 从 LLM 输出中提取首个顶层 JSON 对象（容忍 ```json 围栏与前后缀文本）
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
