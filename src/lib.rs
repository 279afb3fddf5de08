/*
 * This file is part of Anillo OS
 * Copyright (C) 2023 Anillo OS Developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A binary buddy memory allocator core.
//!
//! [`Pool`] manages a single, fixed-size, power-of-two region of memory,
//! serving allocations by splitting free blocks down to size and coalescing
//! freed buddies back together. The core itself carries no internal
//! synchronization or backing-memory opinions — [`backing::BackingMemory`]
//! abstracts over how the region is obtained, and [`global::LockedBuddyPool`]
//! is the opt-in `Sync` wrapper for use as a `#[global_allocator]`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod header;
mod order;
mod pool;

pub mod backing;
pub mod error;
pub mod global;

#[cfg(test)]
mod tests;

pub use backing::{AllocBacking, BackingError, BackingMemory};
pub use error::{AllocError, AllocResult};
pub use global::LockedBuddyPool;
pub use order::{order_for, DEFAULT_K, MAX_K, MIN_K, SMALLEST_K};
pub use pool::Pool;

pub(crate) const BLOCK_HEADER_SIZE: usize = core::mem::size_of::<header::BlockHeader>();
