pub mod request;
pub mod response;

pub use request::{ImportMethod, ImportRequest};
pub use response::ImportOutcome;
