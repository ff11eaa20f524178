//! # Syncboard API Library
//!
//! This library provides the core functionality for the Syncboard service:
//! sync application management, job lifecycle tracking, worker dispatch,
//! and cron-driven schedule evaluation.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod invoker;
pub mod models;
pub mod repositories;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod sweeper;
pub mod telemetry;
pub mod worker;
pub use migration;
