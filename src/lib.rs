//! # kurasync
//!
//! A live-codeable audio engine whose rendering clock stays in phase with
//! any number of peers, without a central clock authority.
//!
//! - [`AudioGraphController`] drives the lifecycle of the rendering context
//!   and is the entry point for everything else.
//! - The rendering context is a [`RenderGraph`] hosting a
//!   [`RenderProcessor`](nodes::RenderProcessor), fed over a lock-free
//!   [`bridge`].
//! - Programs are hot-swapped with [`EvalCommand`]s, all or nothing.
//! - [`clock::ClockSyncEngine`] keeps peers in phase with the Kuramoto model.
//!
//! ## Example
//!
//! ```
//! use kurasync::backend::OfflineBackend;
//! use kurasync::{AudioGraphController, EngineConfig, LifecycleState, UserGesture};
//!
//! let (backend, mut renderer) = OfflineBackend::new(44_100, 2);
//! let mut engine = AudioGraphController::new(EngineConfig::default(), backend);
//!
//! engine.init(UserGesture::new(), 2).unwrap();
//! engine.submit_program("f = 220", "out = sin(tau * f * t) * 0.2").unwrap();
//!
//! let block = renderer.render_blocks(4);
//! engine.pump();
//!
//! assert_eq!(engine.state(), LifecycleState::Running);
//! assert!(block.iter().any(|&s| s != 0.0));
//! ```

extern crate alloc;

pub mod backend;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod eval;
pub mod events;
pub mod graph;
pub mod message;
pub mod node;
pub mod nodes;
pub mod runtime;
pub mod samples;

use core::str::FromStr;

pub use config::{ClockConfig, EngineConfig, LogConfig, RenderNodeOptions};
pub use controller::{
    AudioGraphController, InitTicket, LifecycleState, PeerTransport, StatusObserver, TracingObserver, UserGesture,
};
pub use error::{Error, Result};
pub use eval::EvalCommand;
pub use events::ControlEvent;
pub use graph::RenderGraph;
pub use message::{Message, StatusKind};
pub use node::{AudioNode, NodeId, ProcessContext};

/// Install a `tracing-subscriber` fmt subscriber at `config.level`.
///
/// Returns false if a global subscriber was already set (the call is then a no-op).
pub fn init_tracing(config: &LogConfig) -> bool {
    let level = tracing::Level::from_str(&config.level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).try_init().is_ok()
}
