//! Shared infrastructure utilities for Chorus.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename) used by
//!   the engine's file-backed transcript store.

pub mod atomic_write;

pub use atomic_write::{
    AtomicWriteOptions, PersistMode, atomic_write, atomic_write_with_options, read_if_exists,
    recover_bak_file,
};
