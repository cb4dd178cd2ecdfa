pub mod errors;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod tools;
