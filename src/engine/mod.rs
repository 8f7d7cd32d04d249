//! The reactive execution engine (components E/F/G, §4-§5): the part
//! of this crate that actually runs a job.

mod combine;
mod engine;
mod graph_builder;
mod node;

pub use combine::CombineLatest;
pub use engine::{Engine, EngineRegistry};
pub use graph_builder::{build, BuiltGraph};
pub use node::{AnyNode, EngineContext, JobNode, NodeHandles, TaskNode, Trigger};
