#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod forward;
pub mod logging;
pub mod notify;
pub mod schedule;
pub mod scheduler;
pub mod store;
