pub mod broker;
pub mod config;
pub mod data;
pub mod settings;
