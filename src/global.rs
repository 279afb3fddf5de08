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

//! A `Sync`, `GlobalAlloc`-compatible wrapper around [`Pool`].
//!
//! `Pool` itself carries no internal synchronization, by design (see the
//! crate's concurrency notes). Registering it as `#[global_allocator]`
//! requires `Sync`, so this wrapper supplies exactly one `spin::Mutex` and
//! nothing else.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

use crate::backing::{AllocBacking, BackingMemory};
use crate::order::order_for;
use crate::pool::Pool;
use crate::BLOCK_HEADER_SIZE;

/// Wraps a [`Pool`] in a spinlock so it can be registered as a
/// `#[global_allocator]`.
pub struct LockedBuddyPool<B: BackingMemory + Send = AllocBacking> {
	inner: Mutex<Pool<B>>,
}

impl<B: BackingMemory + Send> LockedBuddyPool<B> {
	pub fn new(pool: Pool<B>) -> Self {
		LockedBuddyPool {
			inner: Mutex::new(pool),
		}
	}
}

impl LockedBuddyPool<AllocBacking> {
	/// Builds a pool of `requested_bytes` (see [`Pool::init`]) and wraps it.
	pub fn init(requested_bytes: usize) -> Self {
		LockedBuddyPool::new(Pool::init(requested_bytes))
	}
}

unsafe impl<B: BackingMemory + Send> GlobalAlloc for LockedBuddyPool<B> {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		// A block of order k is naturally aligned to 2^k; any alignment
		// request <= the order's own alignment is free. A stricter request
		// is satisfied by bumping the requested size up so order_for picks
		// an order whose natural alignment covers it.
		let mut size = layout.size();
		let natural_order = order_for(size + BLOCK_HEADER_SIZE);
		if (1usize << natural_order) < layout.align() {
			size = layout.align();
		}

		match self.inner.lock().malloc(size) {
			Ok(ptr) => ptr.as_ptr(),
			Err(_) => ptr::null_mut(),
		}
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
		if let Some(nn) = core::ptr::NonNull::new(ptr) {
			unsafe { self.inner.lock().free(nn) };
		}
	}
}
