#![doc = include_str!("../README.md")]

pub mod app;
pub mod config;
pub mod http;
pub mod stdio;

pub use app::{App, BootstrapError};
pub use config::AppConfig;
