pub mod config;
pub mod init;
pub mod models;
pub mod permissions;

pub use anyhow::Result;
