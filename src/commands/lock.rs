//! 用户命令锁
//!
//! 进程内内存锁：每个用户同一时刻至多持有一把，非阻塞 try-lock——
//! 同一用户的第二条编排命令立即被拒（面向用户提示「已有命令在执行」），绝不排队。
//! 超过安全超时的条目在下次 acquire/has_lock 时惰性清除，崩溃的处理器不会永久占锁。
//! 锁只按用户键控，不按会话：同一用户跨会话也不能并行跑两条编排命令。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 锁条目：命令名 + 开始时刻
#[derive(Debug, Clone)]
pub struct LockEntry {
    pub command: String,
    pub started_at: Instant,
}

/// 每用户至多一个条目的内存锁表
pub struct CommandLock {
    entries: Mutex<HashMap<String, LockEntry>>,
    timeout: Duration,
}

impl CommandLock {
    /// 默认安全超时：5 分钟
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// 非阻塞获取：该用户已持锁时立即返回 false
    pub fn acquire(&self, user_id: &str, command: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        Self::evict_expired(&mut entries, self.timeout);
        if entries.contains_key(user_id) {
            return false;
        }
        entries.insert(
            user_id.to_string(),
            LockEntry {
                command: command.to_string(),
                started_at: Instant::now(),
            },
        );
        true
    }

    /// 幂等释放：未持锁时调用也安全
    pub fn release(&self, user_id: &str) {
        self.entries.lock().unwrap().remove(user_id);
    }

    pub fn has_lock(&self, user_id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        Self::evict_expired(&mut entries, self.timeout);
        entries.contains_key(user_id)
    }

    /// 获取并包装成 Drop 守卫；失败返回 None
    pub fn guard(self: &Arc<Self>, user_id: &str, command: &str) -> Option<LockGuard> {
        if self.acquire(user_id, command) {
            Some(LockGuard {
                lock: Arc::clone(self),
                user_id: user_id.to_string(),
            })
        } else {
            None
        }
    }

    fn evict_expired(entries: &mut HashMap<String, LockEntry>, timeout: Duration) {
        entries.retain(|user, entry| {
            let keep = entry.started_at.elapsed() < timeout;
            if !keep {
                tracing::warn!(
                    "evicting stale command lock for user {} (command '{}')",
                    user,
                    entry.command
                );
            }
            keep
        });
    }
}

impl Default for CommandLock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

/// 锁守卫：Drop 即释放，保证任何提前返回或 panic 都不会漏释放
pub struct LockGuard {
    lock: Arc<CommandLock>,
    user_id: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_exclusivity() {
        let lock = CommandLock::default();
        assert!(lock.acquire("u1", "draft"));
        assert!(!lock.acquire("u1", "analyze"));
        // 不同用户互不影响
        assert!(lock.acquire("u2", "draft"));
        lock.release("u1");
        assert!(lock.acquire("u1", "analyze"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let lock = CommandLock::default();
        lock.release("nobody");
        assert!(lock.acquire("nobody", "draft"));
        lock.release("nobody");
        lock.release("nobody");
        assert!(!lock.has_lock("nobody"));
    }

    #[test]
    fn test_stale_entry_self_heals() {
        let lock = CommandLock::new(Duration::from_millis(5));
        assert!(lock.acquire("u1", "draft"));
        std::thread::sleep(Duration::from_millis(10));
        // 过期条目在下一次检查时被清除，无需显式 release
        assert!(!lock.has_lock("u1"));
        assert!(lock.acquire("u1", "analyze"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = Arc::new(CommandLock::default());
        {
            let _guard = lock.guard("u1", "draft").unwrap();
            assert!(lock.guard("u1", "draft").is_none());
        }
        assert!(!lock.has_lock("u1"));
    }
}
