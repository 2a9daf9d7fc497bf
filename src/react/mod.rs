//! 编排层：Generation / Tool / Reflection 三个节点、路由与重试策略、单轮主循环

pub mod events;
pub mod generation;
pub mod intent;
pub mod loop_;
pub mod reflection;
pub mod router;
pub mod tool_node;

pub use events::{NodeKind, TurnEvent};
pub use generation::{parse_model_output, GenerationNode, GenerationOutput, DEFAULT_SYSTEM_PROMPT};
pub use intent::{IntentClassifier, IntentMatch, ToolRequirement, UNKNOWN_CATEGORY};
pub use loop_::{run_turn_loop, TurnOutcome, TurnSession};
pub use reflection::ReflectionNode;
pub use router::{NodeState, RetryPolicy};
pub use tool_node::ToolNode;
