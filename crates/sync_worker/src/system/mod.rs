pub mod initialization;
pub mod queue;
pub mod tracing;
