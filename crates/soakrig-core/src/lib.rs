//! soakrig-core: serial console supervision and fault capture for
//! hardware-in-the-loop endurance rigs.
//!
//! # Architecture
//!
//! ```text
//! CycleController → (UI action) → FaultOrchestrator → ProbeClient → LineChannel → device
//!                                                         ↑              │
//!                                                         └─ RingBuffer ◀┘ (reader thread)
//! ```
//!
//! # Modules
//!
//! - `transport`: Byte-level device access (serial2, scripted loopback)
//! - `line_codec`: Chunk-to-line decoding with line-ending normalization
//! - `ring_buffer`: Bounded line history with a monotonic read cursor
//! - `channel`: One supervised console (reader thread, session log, buffer)
//! - `wait`: Polling pattern waiters
//! - `probe`: Tagged marker protocol (exists, capture, pull, core copy)
//! - `orchestrator`: Per-cycle fault scan and artifact collection
//! - `controller`: The endurance loop state machine
//! - `artifacts`: Run directory layout
//! - `summary`: Run summary and stop reasons
//! - `ui_action`: External per-cycle device action
//! - `config`: Typed TOML configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod artifacts;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod line_codec;
pub mod logging;
pub mod orchestrator;
pub mod probe;
pub mod ring_buffer;
pub mod summary;
pub mod transport;
pub mod ui_action;
pub mod wait;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
