pub mod models;
pub mod project;
pub mod prompt;
pub mod serve;
pub mod step;
