//! 步骤编排器：按声明顺序执行步骤并发出严格有序的生命周期事件
//!
//! 事件序列：command_start → (step_start → step_complete)* →
//! content_complete → command_complete，失败则以 command_error 终结。
//! 取消只在步骤之间检查，已在执行中的步骤跑完为止。

use std::time::Instant;

use tokio::sync::mpsc;

use crate::commands::context::CommandContext;
use crate::commands::error::CommandError;
use crate::commands::events::{preview, CommandEvent, StepResult};
use crate::commands::handlers::StepDeps;
use crate::commands::registry::CommandDefinition;

/// 执行一条命令，事件写入 event_tx；成功返回最终组装文本
pub async fn run_command(
    definition: &CommandDefinition,
    ctx: &CommandContext,
    deps: &StepDeps,
    event_tx: &mpsc::UnboundedSender<CommandEvent>,
) -> Result<String, CommandError> {
    let total = definition.handler.steps().len();
    let started = Instant::now();
    let _ = event_tx.send(CommandEvent::CommandStart {
        command: definition.slug.to_string(),
        total_steps: total,
    });

    let mut results: Vec<StepResult> = Vec::with_capacity(total);
    match run_steps(definition, ctx, deps, event_tx, &mut results).await {
        Ok(()) => {
            let output = definition.handler.assemble(&results);
            let _ = event_tx.send(CommandEvent::ContentComplete {
                content: output.clone(),
            });
            let _ = event_tx.send(CommandEvent::CommandComplete {
                command: definition.slug.to_string(),
                output: output.clone(),
                steps: results,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            Ok(output)
        }
        Err(err) => {
            tracing::error!("command /{} failed: {}", definition.slug, err);
            let _ = event_tx.send(CommandEvent::CommandError {
                command: definition.slug.to_string(),
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

async fn run_steps(
    definition: &CommandDefinition,
    ctx: &CommandContext,
    deps: &StepDeps,
    event_tx: &mpsc::UnboundedSender<CommandEvent>,
    results: &mut Vec<StepResult>,
) -> Result<(), CommandError> {
    let steps = definition.handler.steps();
    let total = steps.len();
    let started = Instant::now();

    for (index, spec) in steps.iter().enumerate() {
        if ctx.cancel_token.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        let _ = event_tx.send(CommandEvent::StepStart {
            step: spec.name.to_string(),
            index: index + 1,
            total,
        });
        tracing::info!("/{} step {}/{}: {}", definition.slug, index + 1, total, spec.name);

        let output = definition.handler.run_step(index, ctx, deps, results).await?;
        let result = StepResult {
            step: spec.name.to_string(),
            motors: output.motors.into_iter().collect(),
            output: output.output,
            should_continue: output.should_continue,
        };
        let _ = event_tx.send(CommandEvent::StepComplete {
            step: spec.name.to_string(),
            index: index + 1,
            total,
            motors: result.motors.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            preview: preview(&result.output),
        });

        let keep_going = result.should_continue;
        results.push(result);
        if !keep_going {
            break;
        }
    }
    Ok(())
}
