// crates/client/src/session/mod.rs
//! Streaming session with the diffusion worker.
//!
//! Provides:
//! - `StreamSession`: owner of the single live worker connection
//! - `SessionState`: explicit lifecycle with one transition function
//! - `SessionEvent`: generation-tagged events delivered to the coordinator

pub mod events;
pub mod state;
pub mod stream;

pub use events::{Generation, SessionEvent, StreamEvent};
pub use state::{next_state, SessionState, Transition};
pub use stream::StreamSession;
