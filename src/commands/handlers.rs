//! 命令处理器：每个命令一个 CommandHandler，声明步骤序列并逐步执行
//!
//! 步骤典型形态：检索上下文（retrieval）→ LLM 调用（包一层 retry）→ 解析/校验结果。
//! 检查点步骤要求 LLM 输出严格的 JSON 结构，不满足则整条命令失败（数据质量失败，
//! 面向用户的提示区别于供应商故障）。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::commands::context::CommandContext;
use crate::commands::error::CommandError;
use crate::commands::events::StepResult;
use crate::commands::registry::StepSpec;
use crate::conversation::Message;
use crate::intent::{extract_json_object, IntentClassifier, Motor, RagScope};
use crate::llm::LlmClient;
use crate::retrieval::{RetrievalEngine, SearchOptions, SearchResult};
use crate::retry::{self, RetryOptions};
use crate::store::{DocumentStore, ThesisRecord, ThesisStore};

/// 步骤执行所需的协作方集合（注册表保持静态，依赖在运行时注入）
pub struct StepDeps {
    pub llm: Arc<dyn LlmClient>,
    pub retrieval: Arc<RetrievalEngine>,
    pub documents: Arc<dyn DocumentStore>,
    pub theses: Arc<dyn ThesisStore>,
    pub intent: Arc<IntentClassifier>,
    pub retry: RetryOptions,
    pub search: SearchOptions,
}

/// 单步输出
pub struct StepOutput {
    pub output: String,
    pub motors: BTreeSet<Motor>,
    /// false 表示提前成功收尾（后续步骤不再执行）
    pub should_continue: bool,
}

impl StepOutput {
    pub fn new(output: impl Into<String>, motors: impl IntoIterator<Item = Motor>) -> Self {
        Self {
            output: output.into(),
            motors: motors.into_iter().collect(),
            should_continue: true,
        }
    }
}

/// 命令处理器：固定步骤序列 + 逐步执行 + 最终文本组装
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn steps(&self) -> &'static [StepSpec];

    async fn run_step(
        &self,
        index: usize,
        ctx: &CommandContext,
        deps: &StepDeps,
        prior: &[StepResult],
    ) -> Result<StepOutput, CommandError>;

    /// 组装最终文本；默认取最后一步输出
    fn assemble(&self, results: &[StepResult]) -> String {
        results
            .last()
            .map(|r| r.output.clone())
            .unwrap_or_default()
    }
}

/// LLM 调用统一包一层重试；进度通过 tracing 上报
pub(crate) async fn complete_with_retry(
    deps: &StepDeps,
    messages: &[Message],
) -> Result<String, CommandError> {
    let text = retry::with_retry(
        || deps.llm.complete(messages),
        &deps.retry,
        Some(&retry::log_observer),
    )
    .await?;
    Ok(text)
}

/// 按范围检索；范围为 None 时不检索
pub(crate) async fn retrieve(
    deps: &StepDeps,
    scope: &RagScope,
    query: &str,
) -> Result<Vec<SearchResult>, CommandError> {
    if matches!(scope, RagScope::None) {
        return Ok(Vec::new());
    }
    let docs = deps.documents.documents(scope).await?;
    Ok(deps.retrieval.search(&docs, query, &deps.search).await)
}

/// 将检索结果拼成提示中的参考材料段
pub(crate) fn context_block(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut block = String::from("Relevant reference material:\n");
    for (i, r) in results.iter().enumerate() {
        block.push_str(&format!(
            "[{}] {} (score {:.2})\n{}\n\n",
            i + 1,
            r.title,
            r.similarity,
            r.content
        ));
    }
    block
}

/// 检查点校验：输出必须含顶层 JSON 对象且带全部必需字段，返回提取出的 JSON 文本
pub(crate) fn validate_checkpoint(
    step: &str,
    response: &str,
    required: &[&str],
) -> Result<String, CommandError> {
    let json = extract_json_object(response).ok_or_else(|| CommandError::Checkpoint {
        step: step.to_string(),
        reason: "no JSON object in output".to_string(),
    })?;
    let value: Value = serde_json::from_str(json).map_err(|e| CommandError::Checkpoint {
        step: step.to_string(),
        reason: e.to_string(),
    })?;
    for field in required {
        if value.get(field).is_none() {
            return Err(CommandError::Checkpoint {
                step: step.to_string(),
                reason: format!("missing required field '{}'", field),
            });
        }
    }
    Ok(json.to_string())
}

fn step_error(name: &str) -> CommandError {
    CommandError::Checkpoint {
        step: name.to_string(),
        reason: "step index out of range".to_string(),
    }
}

// ---------------------------------------------------------------------------
// /draft：四步编排 - 事实审核（检查点）→ 先例检索 → 法律推理 → 成文
// ---------------------------------------------------------------------------

pub struct DraftCommand;

const DRAFT_STEPS: &[StepSpec] = &[
    StepSpec::checkpoint("fact_audit"),
    StepSpec::step("precedent_lookup"),
    StepSpec::step("legal_reasoning"),
    StepSpec::step("drafting"),
];

#[async_trait]
impl CommandHandler for DraftCommand {
    fn steps(&self) -> &'static [StepSpec] {
        DRAFT_STEPS
    }

    async fn run_step(
        &self,
        index: usize,
        ctx: &CommandContext,
        deps: &StepDeps,
        prior: &[StepResult],
    ) -> Result<StepOutput, CommandError> {
        let spec = DRAFT_STEPS.get(index).ok_or_else(|| step_error("draft"))?;
        match spec.name {
            "fact_audit" => {
                let intent = deps.intent.classify(&ctx.argument, &ctx.intent_context()).await;
                let hits = retrieve(deps, &intent.rag_scope, &ctx.argument).await?;
                let system = "You are a meticulous legal fact auditor. From the request and the \
                              reference material, list the established facts and the open points.\n\
                              Output ONLY a JSON object: {\"facts\": [...], \"open_points\": [...]}";
                let user = format!("{}Request: {}", context_block(&hits), ctx.argument);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                let output = validate_checkpoint(spec.name, &response, &["facts"])?;
                Ok(StepOutput::new(output, [Motor::FactAudit]))
            }
            "precedent_lookup" => {
                let hits = retrieve(deps, &RagScope::Precedents, &ctx.argument).await?;
                if hits.is_empty() {
                    // 无先例可引时不额外烧一次 LLM
                    return Ok(StepOutput::new(
                        "No relevant precedents found.",
                        [Motor::PrecedentLookup],
                    ));
                }
                let system = "You are a legal research assistant. Summarize how the precedents \
                              below bear on the request, citing each by title.";
                let user = format!("{}Request: {}", context_block(&hits), ctx.argument);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                Ok(StepOutput::new(response, [Motor::PrecedentLookup]))
            }
            "legal_reasoning" => {
                let facts = prior_output(prior, "fact_audit");
                let precedents = prior_output(prior, "precedent_lookup");
                let system = "You are a senior litigator. Develop the legal reasoning that \
                              supports the request, building on the audited facts and precedents.";
                let user = format!(
                    "Facts:\n{}\n\nPrecedents:\n{}\n\nRequest: {}",
                    facts, precedents, ctx.argument
                );
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                // 推理产物沉淀为论点记录
                deps.theses
                    .save_thesis(ThesisRecord::new(
                        &ctx.user_id,
                        ctx.process_id.clone(),
                        &response,
                    ))
                    .await?;
                Ok(StepOutput::new(response, [Motor::Reasoning]))
            }
            "drafting" => {
                let reasoning = prior_output(prior, "legal_reasoning");
                let system = "You are a legal drafter. Produce the final document requested, \
                              formal register, following the reasoning provided.";
                let user = format!("Reasoning:\n{}\n\nRequest: {}", reasoning, ctx.argument);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                Ok(StepOutput::new(response, [Motor::Drafting]))
            }
            other => Err(step_error(other)),
        }
    }
}

fn prior_output<'a>(prior: &'a [StepResult], step: &str) -> &'a str {
    prior
        .iter()
        .find(|r| r.step == step)
        .map(|r| r.output.as_str())
        .unwrap_or("(none)")
}

// ---------------------------------------------------------------------------
// /analyze：三步编排 - 案件概览 → 风险审核（检查点）→ 行动建议
// ---------------------------------------------------------------------------

pub struct AnalyzeCommand;

const ANALYZE_STEPS: &[StepSpec] = &[
    StepSpec::step("case_overview"),
    StepSpec::checkpoint("risk_audit"),
    StepSpec::step("recommendations"),
];

#[async_trait]
impl CommandHandler for AnalyzeCommand {
    fn steps(&self) -> &'static [StepSpec] {
        ANALYZE_STEPS
    }

    async fn run_step(
        &self,
        index: usize,
        ctx: &CommandContext,
        deps: &StepDeps,
        prior: &[StepResult],
    ) -> Result<StepOutput, CommandError> {
        let spec = ANALYZE_STEPS.get(index).ok_or_else(|| step_error("analyze"))?;
        let query = if ctx.argument.is_empty() {
            "case overview"
        } else {
            ctx.argument.as_str()
        };
        match spec.name {
            "case_overview" => {
                let hits = retrieve(deps, &RagScope::CaseFile, query).await?;
                let system = "You are a case analyst. Give a concise overview of the case from \
                              the material below: parties, posture, what is being asked.";
                let user = format!("{}Focus: {}", context_block(&hits), query);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                Ok(StepOutput::new(response, [Motor::FactAudit]))
            }
            "risk_audit" => {
                let overview = prior_output(prior, "case_overview");
                let system = "You are a risk auditor. Identify the legal and procedural risks in \
                              this case.\nOutput ONLY a JSON object: {\"risks\": [...]}";
                let user = format!("Case overview:\n{}", overview);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                let output = validate_checkpoint(spec.name, &response, &["risks"])?;
                Ok(StepOutput::new(output, [Motor::FactAudit, Motor::Reasoning]))
            }
            "recommendations" => {
                let overview = prior_output(prior, "case_overview");
                let risks = prior_output(prior, "risk_audit");
                let system = "You are a senior litigator. Recommend the next procedural steps \
                              given the overview and the audited risks.";
                let user = format!("Overview:\n{}\n\nRisks:\n{}", overview, risks);
                let messages = vec![Message::system(system), Message::user(user)];
                let response = complete_with_retry(deps, &messages).await?;
                Ok(StepOutput::new(response, [Motor::Reasoning]))
            }
            other => Err(step_error(other)),
        }
    }

    fn assemble(&self, results: &[StepResult]) -> String {
        results
            .iter()
            .map(|r| r.output.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// /summarize：一步直出 - 总结最近对话
// ---------------------------------------------------------------------------

pub struct SummarizeCommand;

const SUMMARIZE_STEPS: &[StepSpec] = &[StepSpec::step("summarize")];

#[async_trait]
impl CommandHandler for SummarizeCommand {
    fn steps(&self) -> &'static [StepSpec] {
        SUMMARIZE_STEPS
    }

    async fn run_step(
        &self,
        _index: usize,
        ctx: &CommandContext,
        deps: &StepDeps,
        _prior: &[StepResult],
    ) -> Result<StepOutput, CommandError> {
        let mut messages = vec![Message::system(
            "Summarize the conversation below for the user: main questions, answers given, \
             pending items. Be brief.",
        )];
        messages.extend(ctx.recent_history.iter().cloned());
        messages.push(Message::user("Summarize the conversation above."));
        let response = complete_with_retry(deps, &messages).await?;
        Ok(StepOutput::new(response, [Motor::Reasoning]))
    }
}

// ---------------------------------------------------------------------------
// /search：一步直出 - 混合检索知识库，直接返回格式化结果（不经 LLM）
// ---------------------------------------------------------------------------

pub struct SearchCommand;

const SEARCH_STEPS: &[StepSpec] = &[StepSpec::step("search")];

#[async_trait]
impl CommandHandler for SearchCommand {
    fn steps(&self) -> &'static [StepSpec] {
        SEARCH_STEPS
    }

    async fn run_step(
        &self,
        _index: usize,
        ctx: &CommandContext,
        deps: &StepDeps,
        _prior: &[StepResult],
    ) -> Result<StepOutput, CommandError> {
        let hits = retrieve(deps, &RagScope::Library, &ctx.argument).await?;
        if hits.is_empty() {
            return Ok(StepOutput::new(
                "No matching documents found.",
                [Motor::PrecedentLookup],
            ));
        }
        let mut output = String::new();
        for r in &hits {
            output.push_str(&format!(
                "• {} [{}] (score {:.2})\n  {}\n",
                r.title,
                r.doc_type,
                r.similarity,
                crate::commands::events::preview(&r.content)
            ));
        }
        Ok(StepOutput::new(output, [Motor::PrecedentLookup]))
    }
}
