//! Thread-shared state for running tracking next to a mapping thread.

pub mod shared_state;

pub use shared_state::SharedMapper;
