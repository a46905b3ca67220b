//! Conversational workflow synthesis: natural language in, validated and
//! deployable node-graph workflows out.

pub mod deploy;
pub mod extractor;
pub mod gateway;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod tools;
pub mod types;
pub mod validator;
