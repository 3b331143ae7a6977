pub mod binding;
pub mod envelope;
pub mod report;

pub use binding::{QueueBinding, RoutingKey, EXCHANGE};
pub use envelope::{EnvelopeError, Task, TaskEnvelope, TaskKind};
pub use report::{MessageResult, RunReport, SweepReport};
