//! 命令子系统：注册表、解析器、用户锁、生命周期事件与步骤编排器

pub mod context;
pub mod error;
pub mod events;
pub mod handlers;
pub mod lock;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

pub use context::CommandContext;
pub use error::{CommandError, ResolveError};
pub use events::{CommandEvent, StepResult};
pub use handlers::{CommandHandler, StepDeps, StepOutput};
pub use lock::{CommandLock, LockGuard};
pub use orchestrator::run_command;
pub use registry::{CommandDefinition, CommandKind, CommandRegistry, ModuleScope, StepSpec};
pub use resolver::{resolve, ExecutionPlan, COMMAND_PREFIX};
