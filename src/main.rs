//! Juris REPL：本地交互入口
//!
//! 有 OPENAI_API_KEY 时接 OpenAI 兼容端点，否则退化为 Mock（离线可用）。
//! 文档库用内存实现并预置少量演示文档。

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use juris::commands::{CommandContext, CommandEvent, StepDeps};
use juris::config::load_config;
use juris::intent::{IntentClassifier, RagScope};
use juris::llm::{create_embedder_from_config, LlmClient, MockLlmClient, OpenAiClient};
use juris::observability;
use juris::retrieval::{Document, RetrievalEngine, SearchOptions};
use juris::store::{
    InMemoryConversationStore, InMemoryDocumentStore, InMemoryPromptStore, InMemoryThesisStore,
};
use juris::AssistantEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let config = load_config(None)?;

    let llm: Arc<dyn LlmClient> = if std::env::var("OPENAI_API_KEY").is_ok() {
        Arc::new(
            OpenAiClient::new(config.llm.base_url.as_deref(), &config.llm.model, None)
                .with_timeouts(
                    Duration::from_secs(config.llm.timeouts.request),
                    Duration::from_secs(config.llm.timeouts.stream),
                ),
        )
    } else {
        tracing::warn!("OPENAI_API_KEY not set, using mock LLM");
        Arc::new(MockLlmClient::new())
    };
    let embedder = create_embedder_from_config(
        config.llm.base_url.as_deref(),
        &config.embedding.model,
        None,
    );

    let documents = Arc::new(InMemoryDocumentStore::new());
    seed_documents(&documents);

    let deps = StepDeps {
        llm: llm.clone(),
        retrieval: Arc::new(RetrievalEngine::new(embedder)),
        documents,
        theses: Arc::new(InMemoryThesisStore::new()),
        intent: Arc::new(IntentClassifier::new(llm)),
        retry: config.retry.to_options(),
        search: SearchOptions {
            limit: config.retrieval.limit,
            min_similarity: config.retrieval.min_similarity,
        },
    };
    let conversations = Arc::new(InMemoryConversationStore::new());
    let prompts = Arc::new(InMemoryPromptStore::new());
    let engine = AssistantEngine::new(deps, conversations, prompts, &config);

    println!("juris — /draft <request>, /analyze, /summarize, /search <query>, or plain chat. 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let ctx = CommandContext::new("local", "repl", "cases").with_process("demo-case");
        let mut rx = engine.handle(ctx, input);
        while let Some(event) = rx.recv().await {
            render(event);
        }
    }
    Ok(())
}

fn render(event: CommandEvent) {
    match event {
        CommandEvent::CommandStart {
            command,
            total_steps,
        } => println!("[/{} started, {} step(s)]", command, total_steps),
        CommandEvent::StepStart { step, index, total } => {
            println!("[step {}/{}: {}]", index, total, step)
        }
        CommandEvent::StepComplete {
            step, duration_ms, ..
        } => println!("[step {} done at {}ms]", step, duration_ms),
        CommandEvent::ContentComplete { content } => println!("\n{}\n", content),
        CommandEvent::CommandComplete { duration_ms, .. } => {
            println!("[done in {}ms]", duration_ms)
        }
        CommandEvent::CommandError { message, .. } => eprintln!("error: {}", message),
    }
}

/// 演示文档：检索与 /search 离线可验
fn seed_documents(store: &InMemoryDocumentStore) {
    store.insert(
        RagScope::Library,
        Document::new(
            "lib-1",
            "Rule 10",
            "Costs follow the event unless the court orders otherwise.",
            "rule",
        ),
    );
    store.insert(
        RagScope::Library,
        Document::new(
            "lib-2",
            "Súmula 100",
            "Prazo decadencial para ação rescisória conta da última decisão.",
            "summary",
        ),
    );
    store.insert(
        RagScope::Precedents,
        Document::new(
            "prec-1",
            "Appeal 2021/445",
            "Late filing excused where the electronic docket was unavailable.",
            "precedent",
        ),
    );
    store.insert(
        RagScope::CaseFile,
        Document::new(
            "case-1",
            "Demo case record",
            "Plaintiff seeks damages for breach of a services contract signed in 2023.",
            "case_file",
        ),
    );
}
