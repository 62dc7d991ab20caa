//! Side-by-side streaming comparison of two chat models.
//!
//! The relay (`server`, `upstream`, `relay`) forwards a prompt to a
//! chat-completions API and re-encodes its SSE stream as
//! `data: {"content": ...}` events. The consumer side (`consumer`, `duel`)
//! reads those events into one buffer per model column.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod display;
pub mod duel;
pub mod error;
pub mod http;
pub mod providers;
pub mod relay;
pub mod server;
pub mod sse;
pub mod upstream;

pub use config::RelayConfig;
pub use consumer::{ColumnSession, Phase, StreamState};
pub use duel::DuelSession;
pub use error::{ConsumerError, FramingError, RelayError};
pub use providers::{DeltaEvent, ModelSelector};
