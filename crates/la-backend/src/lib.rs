//! la-backend: llama-server inference backend for llama-agent

pub mod llama;

pub use llama::LlamaServerBackend;
