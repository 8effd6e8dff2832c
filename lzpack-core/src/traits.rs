//! Progress reporting for long-running encodes.
//!
//! Cancellation is cooperative: the encoder calls [`Progress::report`] after
//! each internal block, and a `ControlFlow::Break` ends the session with
//! [`LzError::Aborted`](crate::error::LzError::Aborted).

use std::ops::ControlFlow;

/// Receives progress updates from an encoding session.
pub trait Progress {
    /// Report the number of input bytes consumed and output bytes produced.
    fn report(&mut self, processed_in: u64, processed_out: u64) -> ControlFlow<()>;
}

impl<F> Progress for F
where
    F: FnMut(u64, u64) -> ControlFlow<()>,
{
    fn report(&mut self, processed_in: u64, processed_out: u64) -> ControlFlow<()> {
        self(processed_in, processed_out)
    }
}

/// A progress sink that never stops the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _processed_in: u64, _processed_out: u64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}
