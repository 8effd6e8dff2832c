//! Fallible allocation of session tables.
//!
//! Windows, hash tables and probability arrays can run to hundreds of
//! megabytes for large dictionaries, so they are reserved with
//! `try_reserve_exact` and an allocation failure is reported as
//! [`LzError::OutOfMemory`] instead of aborting the process.

use crate::error::{LzError, Result};

/// Allocate a vector of `len` copies of `value`.
pub fn try_filled_vec<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|_| LzError::out_of_memory(len.saturating_mul(size_of::<T>())))?;
    items.resize(len, value);
    Ok(items)
}

/// Allocate an empty vector able to hold `capacity` items without growing.
pub fn try_with_capacity<T>(capacity: usize) -> Result<Vec<T>> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(capacity)
        .map_err(|_| LzError::out_of_memory(capacity.saturating_mul(size_of::<T>())))?;
    Ok(items)
}
