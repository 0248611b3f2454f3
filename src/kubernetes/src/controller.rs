pub mod backend;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod lb_manager;
pub mod metrics;
pub mod migration;
pub mod reconciler;
pub mod server;
pub mod service;
pub mod webhook;
