pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod scheduler;
pub mod util;
