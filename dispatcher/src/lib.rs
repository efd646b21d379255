//! LlamaGrid dispatcher: worker registry, request routing with timeout
//! correlation, the worker gateway, and the OpenAI-compatible HTTP API.

pub mod announce;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod pending;
pub mod registry;
pub mod state;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use errors::{DispatcherError, Result};
pub use gateway::Gateway;
pub use pending::PendingRequests;
pub use registry::{Registry, RegistryEvent, WorkerRecord};
pub use state::AppState;
