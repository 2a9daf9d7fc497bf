//! 记忆层：对话记录类型与按线程的检查点存储

pub mod checkpoint;
pub mod conversation;

pub use checkpoint::{
    create_checkpoint_store, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    ThreadLocks,
};
pub use conversation::{Message, Role, ToolCall};
