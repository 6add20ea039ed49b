// crates/core/src/lib.rs
pub mod error;
pub mod frame;
pub mod frame_store;
pub mod job;
pub mod paths;
pub mod protocol;
pub mod store;
pub mod subject_cache;

pub use error::*;
pub use frame::*;
pub use frame_store::*;
pub use job::*;
pub use protocol::*;
pub use store::*;
pub use subject_cache::*;
