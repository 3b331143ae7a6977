pub mod site_api_client;

pub use site_api_client::SiteApiClient;
