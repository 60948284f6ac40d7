pub mod chain;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod generator;
pub mod learner;
pub mod policy;
pub mod sampling;
pub mod store;
pub mod tokenizer;
pub mod types;
pub mod vocabulary;

pub use engine::{Engine, Outcome};
