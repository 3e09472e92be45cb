pub mod api;
pub mod app;
pub mod broker;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod notification;
pub mod queue;
pub mod utils;
