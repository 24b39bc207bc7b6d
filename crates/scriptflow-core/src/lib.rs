pub mod account;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod project;
pub mod prompt;
pub mod registry;
pub mod step;
pub mod store;
pub mod tracker;
pub mod types;
pub mod webhook;

pub use error::{FlowError, Result};
