//! # lzpack Core
//!
//! Core components shared by the lzpack codecs.
//!
//! - [`error`]: the [`LzError`] result codes and the [`Result`] alias
//! - [`traits`]: cooperative progress reporting
//! - [`io`]: a bounded sink over a caller-provided buffer
//! - [`memory`]: fallible allocation of large tables
//!
//! ## Example
//!
//! ```rust
//! use lzpack_core::io::SliceSink;
//! use std::io::Write;
//!
//! let mut buf = [0u8; 4];
//! let mut sink = SliceSink::new(&mut buf);
//! assert!(sink.write_all(b"too long").is_err());
//! assert!(sink.overflowed());
//! assert_eq!(sink.written(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod io;
pub mod memory;
pub mod traits;

// Re-exports for convenience
pub use error::{LzError, Result};
pub use io::SliceSink;
pub use traits::{NoProgress, Progress};
