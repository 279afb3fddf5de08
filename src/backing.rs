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

//! Acquisition and release of the pool's backing region.
//!
//! The pool itself never decides how its backing memory is obtained; it
//! asks a [`BackingMemory`] for `2^order` aligned bytes at init time and
//! gives them back at drop time. [`AllocBacking`] is the default
//! implementation, routing through the global allocator; a host embedding
//! the pool over raw `mmap`'d memory, a fixed static array, or a hardware
//! memory region can supply its own.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

/// Failures acquiring or releasing backing memory.
///
/// Unlike [`crate::error::AllocError`], these are not meant to be handled by
/// ordinary control flow: losing backing memory mid-lifetime leaves the pool
/// in no recoverable state, so `Pool::init` and `Pool::drop` treat a
/// `BackingError` as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingError {
	/// The requested size/alignment could not be expressed as a valid
	/// [`Layout`].
	LayoutOverflow,
	/// The underlying allocator returned null.
	AllocFailed,
}

impl fmt::Display for BackingError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackingError::LayoutOverflow => write!(f, "backing region layout overflowed"),
			BackingError::AllocFailed => write!(f, "backing allocator returned null"),
		}
	}
}

/// Supplies and reclaims the contiguous, `2^order`-byte, `2^order`-aligned
/// region a [`crate::Pool`] manages.
///
/// Implementations are not required to zero the returned memory; the pool
/// never reads a block's payload bytes before handing it out; only header
/// bytes, which it always writes itself before reading.
pub trait BackingMemory {
	/// Acquires a fresh region of `2^order` bytes aligned to `2^order`.
	fn acquire(&self, order: usize) -> Result<NonNull<u8>, BackingError>;

	/// Releases a region previously returned by `acquire` with the same
	/// `order`.
	///
	/// # Safety
	///
	/// `ptr` must be a still-valid region obtained from this same
	/// `BackingMemory` via `acquire(order)`, not already released.
	unsafe fn release(&self, ptr: NonNull<u8>, order: usize);
}

/// Default [`BackingMemory`] backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocBacking;

impl AllocBacking {
	fn layout_for(order: usize) -> Result<Layout, BackingError> {
		let size = 1usize
			.checked_shl(order as u32)
			.ok_or(BackingError::LayoutOverflow)?;
		Layout::from_size_align(size, size).map_err(|_| BackingError::LayoutOverflow)
	}
}

impl BackingMemory for AllocBacking {
	fn acquire(&self, order: usize) -> Result<NonNull<u8>, BackingError> {
		let layout = Self::layout_for(order)?;
		// SAFETY: layout has non-zero size, since order::MIN_K > 0 rules out
		// a zero-order request ever reaching here through Pool::init.
		let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
		NonNull::new(ptr).ok_or(BackingError::AllocFailed)
	}

	unsafe fn release(&self, ptr: NonNull<u8>, order: usize) {
		let layout = Self::layout_for(order).expect("order was valid at acquire time");
		// SAFETY: caller guarantees ptr/order match a prior acquire().
		unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
	}
}
