//! Marquee - questions about a movie collection, answered from retrieved documents
//!
//! A query is resolved by keyword search, falling back to vector search over
//! query embeddings and then to case-insensitive substring matching. The
//! retrieved documents feed a text-generation prompt, or an extractive
//! summary when generation is unavailable, and the answer can be wrapped in
//! a conversational bot response envelope.

pub mod cli;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod retrieval;
pub mod store;

pub use error::{MarqueeError, Result};
pub use pipeline::Pipeline;
