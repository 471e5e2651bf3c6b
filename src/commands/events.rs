//! 命令生命周期事件：编排进度对外可见的唯一通道
//!
//! 事件按步骤严格有序发出，恰好以一个 command_complete 或 command_error 终结。

use serde::Serialize;

use crate::intent::Motor;

/// 步骤结果：按序累积，完整列表随 command_complete 返回作为审计轨迹
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    pub motors: Vec<Motor>,
    pub output: String,
    pub should_continue: bool,
}

/// 生命周期事件（可序列化为 JSON 供前端/API 展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandEvent {
    /// 命令开始
    CommandStart { command: String, total_steps: usize },
    /// 步骤开始
    StepStart {
        step: String,
        index: usize,
        total: usize,
    },
    /// 步骤完成（preview 截断，避免过长）
    StepComplete {
        step: String,
        index: usize,
        total: usize,
        motors: Vec<Motor>,
        duration_ms: u64,
        preview: String,
    },
    /// 最终文本组装完成
    ContentComplete { content: String },
    /// 命令成功终结：最终输出 + 全部步骤结果 + 总耗时
    CommandComplete {
        command: String,
        output: String,
        steps: Vec<StepResult>,
        duration_ms: u64,
    },
    /// 命令失败终结
    CommandError { command: String, message: String },
}

/// 预览最大字符数
pub const PREVIEW_CHARS: usize = 200;

/// 按字符截断预览（UTF-8 安全）
pub fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = CommandEvent::StepStart {
            step: "fact_audit".to_string(),
            index: 1,
            total: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_start");
        assert_eq!(json["step"], "fact_audit");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert!(p.chars().count() <= PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
