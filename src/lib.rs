pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod configs;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod release;
pub mod store;
pub mod validation;
