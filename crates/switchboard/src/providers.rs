pub mod anthropic;
pub mod base;
pub mod configs;
pub mod factory;
pub mod openai;
pub mod registry;
pub mod stream;
pub mod utils;

#[cfg(test)]
pub mod mock;
