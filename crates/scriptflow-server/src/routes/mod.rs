pub mod accounts;
pub mod events;
pub mod health;
pub mod models;
pub mod projects;
pub mod prompts;
pub mod steps;
pub mod webhook;
