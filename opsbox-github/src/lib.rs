#![doc = include_str!("../README.md")]

mod adapter;
mod config;

pub use adapter::GitHubAdapter;
pub use config::GitHubConfig;
