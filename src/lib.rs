#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod cache;
pub mod config;
pub mod digest;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod schema;
pub mod store;
