pub mod executor;
pub mod pacing;
pub mod processors;
pub mod wildberries_api_client;

pub use executor::ImportExecutor;
pub use wildberries_api_client::WildberriesApiClient;
