pub mod config;
pub mod health;
pub mod queue;
pub mod task;
pub mod tools;
