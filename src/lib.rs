pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod output;
pub mod parser;
pub mod project;
pub mod publish;
pub mod record;
pub mod store;
