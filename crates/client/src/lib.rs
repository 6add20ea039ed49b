// crates/client/src/lib.rs
//! Streaming diffusion client: one live worker stream at a time, per-subject
//! timelines, and the coordinator that ties them to subject switches.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod image;
pub mod logging;
pub mod session;
pub mod subjects;
pub mod worker;

pub use config::ClientConfig;
pub use coordinator::{RunMode, SessionCoordinator, ViewState, ViewUpdate};
pub use error::{ClientError, TransportError};
pub use session::{Generation, SessionEvent, SessionState, StreamEvent, StreamSession};
pub use subjects::{HttpSubjectDirectory, SubjectDirectory, SubjectRecord};
pub use worker::WorkerClient;
