pub mod collaborators;
pub mod publisher;
pub mod supervisor;
pub mod worker;

pub use collaborators::Collaborators;
pub use publisher::TaskPublisher;
pub use supervisor::{ServeScope, Supervisor};
pub use worker::{DispatchError, TaskDispatcher, WorkerDispatch};
