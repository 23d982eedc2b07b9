pub mod config;
pub mod errors;
pub mod ingestion;
pub mod models;
pub mod observability;
pub mod processor;
pub mod symbols;
