#![doc = include_str!("../README.md")]

mod adapter;
mod auth;
mod config;
mod extract;
mod robots;

pub use adapter::WebAdapter;
pub use auth::AuthConfig;
pub use config::WebConfig;
pub use extract::{Extracted, classify, extract_content};
pub use robots::RobotsPolicy;
