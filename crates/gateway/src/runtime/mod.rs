//! The runtime: the background runner, send pipeline, and the concurrency
//! and recovery primitives they share.

pub mod background;
pub mod cancel;
pub mod executor;
pub mod reasoner;
pub mod recovery;
pub mod send_pipeline;
pub mod session_lock;

pub use send_pipeline::{send, start_run, SendReply};
