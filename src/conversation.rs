//! 对话消息与有界历史
//!
//! 保留最近 N 轮对话（user/assistant 对），超出时自动剪枝，供 LLM 上下文使用。
//! 对话本身的存储由外部协作方负责（见 store 模块）。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 有界历史：最近 N 轮对话（每轮含 user + assistant，故实际保留约 max_turns*2 条消息）
#[derive(Clone, Debug)]
pub struct RecentHistory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl RecentHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn from_messages(messages: Vec<Message>, max_turns: usize) -> Self {
        let mut history = Self {
            messages,
            max_turns,
        };
        history.prune();
        history
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出 max_turns*2 时丢弃最旧的消息，保留最近部分
    fn prune(&mut self) {
        if self.messages.len() > self.max_turns * 2 {
            let keep = self.max_turns * 2;
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_recent() {
        let mut history = RecentHistory::new(2);
        for i in 0..10 {
            history.push(Message::user(format!("q{}", i)));
            history.push(Message::assistant(format!("a{}", i)));
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.messages()[0].content, "q8");
    }

    #[test]
    fn test_from_messages_prunes() {
        let msgs = (0..8).map(|i| Message::user(format!("m{}", i))).collect();
        let history = RecentHistory::from_messages(msgs, 2);
        assert_eq!(history.len(), 4);
        assert_eq!(history.messages()[0].content, "m4");
    }
}
