pub mod chapter;
pub mod config;
pub mod convert;
pub mod fetcher;
pub mod humanize;
pub mod layout;
pub mod locator;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod progress;
pub mod retry;
