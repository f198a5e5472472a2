//! Thread module

pub mod ops;
pub mod periodic;
pub mod stack;
pub mod state;
pub mod thread;

pub use periodic::RtConfig;
pub use stack::Stack;
pub use state::ThreadState;
pub use thread::{Elevation, SynchList, Thread, ThreadConfig, ThreadId, ThreadStats};
