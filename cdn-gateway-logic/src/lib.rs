#[macro_use]
extern crate lazy_static;

pub mod actors;
pub mod aliases;
pub mod context;
pub mod error;
pub mod external;
mod metrics;
pub mod progress;
pub mod queue;
pub mod repository;
pub mod schemas;
pub mod service;
pub mod settings;
pub mod state;

#[cfg(test)]
mod tests;
