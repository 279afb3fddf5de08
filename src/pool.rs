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

//! The buddy pool itself: free-list table, split-on-demand allocation, and
//! coalescing free.

use core::ptr::NonNull;

use crate::backing::{AllocBacking, BackingMemory};
use crate::error::{AllocError, AllocResult};
use crate::header::{BlockHeader, Link, Tag};
use crate::order::{buddy_offset, order_for, DEFAULT_K, MAX_K, MIN_K};
use crate::BLOCK_HEADER_SIZE;

/// A binary buddy allocator managing a single, fixed-size, power-of-two
/// region of memory.
///
/// `Pool` carries no internal synchronization: callers must serialize access
/// themselves, or wrap it in [`crate::global::LockedBuddyPool`] to register
/// it as a [`core::alloc::GlobalAlloc`].
pub struct Pool<B: BackingMemory = AllocBacking> {
	base: NonNull<u8>,
	max_order: usize,
	byte_count: u64,
	avail: [BlockHeader; MAX_K + 1],
	backing: B,
}

// SAFETY: a `Pool` owns its backing region exclusively and holds no thread-local
// state; moving it to another thread is sound as long as `B` itself is `Send`.
unsafe impl<B: BackingMemory + Send> Send for Pool<B> {}

impl<B: BackingMemory> Pool<B> {
	/// Constructs a pool of approximately `requested_bytes`, rounded up to
	/// the nearest power of two and clamped to `[MIN_K, MAX_K - 1]`, using
	/// `backing` to acquire the region. `requested_bytes == 0` selects
	/// `DEFAULT_K`.
	///
	/// Aborts the process if `backing` cannot supply the region; there is no
	/// recourse for a caller when the pool's own substrate is unavailable.
	pub fn init_with(requested_bytes: usize, backing: B) -> Self {
		let max_order = if requested_bytes == 0 {
			DEFAULT_K
		} else {
			order_for(requested_bytes).clamp(MIN_K, MAX_K - 1)
		};

		let base = match backing.acquire(max_order) {
			Ok(ptr) => ptr,
			Err(err) => panic!("failed to acquire buddy pool backing region: {err}"),
		};

		let mut avail = [BlockHeader::sentinel(0); MAX_K + 1];
		for (order, slot) in avail.iter_mut().enumerate() {
			*slot = BlockHeader::sentinel(order as u8);
		}

		let mut pool = Pool {
			base,
			max_order,
			byte_count: 1u64 << max_order,
			avail,
			backing,
		};

		// SAFETY: offset 0 is the whole freshly-acquired region; nothing else
		// references it yet.
		unsafe {
			pool.push_front(max_order, Link::block(0));
		}

		log::debug!(
			"buddy pool initialized: max_order={}, bytes={}",
			max_order,
			pool.byte_count
		);

		pool
	}

	/// Resolves a [`Link`] to the header it names: either a sentinel owned by
	/// this `Pool` or a block header embedded at an offset in the backing
	/// region.
	///
	/// # Safety
	///
	/// `link` must be a sentinel for an order `<= MAX_K`, or a block offset
	/// previously written by this pool and still within `[0, byte_count)`.
	unsafe fn resolve(&self, link: Link) -> *mut BlockHeader {
		if link.is_sentinel() {
			&self.avail[link.sentinel_order()] as *const BlockHeader as *mut BlockHeader
		} else {
			// SAFETY: offset is within the backing region per caller contract.
			unsafe { self.base.as_ptr().add(link.block_offset() as usize) as *mut BlockHeader }
		}
	}

	unsafe fn tag_of(&self, link: Link) -> Tag {
		unsafe { (*self.resolve(link)).tag }
	}

	unsafe fn order_of(&self, link: Link) -> u8 {
		unsafe { (*self.resolve(link)).order }
	}

	unsafe fn next_of(&self, link: Link) -> Link {
		unsafe { (*self.resolve(link)).next }
	}

	unsafe fn prev_of(&self, link: Link) -> Link {
		unsafe { (*self.resolve(link)).prev }
	}

	unsafe fn set_tag(&mut self, link: Link, tag: Tag) {
		unsafe { (*self.resolve(link)).tag = tag };
	}

	unsafe fn set_order(&mut self, link: Link, order: u8) {
		unsafe { (*self.resolve(link)).order = order };
	}

	unsafe fn set_next(&mut self, link: Link, next: Link) {
		unsafe { (*self.resolve(link)).next = next };
	}

	unsafe fn set_prev(&mut self, link: Link, prev: Link) {
		unsafe { (*self.resolve(link)).prev = prev };
	}

	unsafe fn is_empty(&self, order: usize) -> bool {
		let sentinel = Link::sentinel(order);
		unsafe { self.next_of(sentinel) == sentinel }
	}

	/// Splices `block` at the head of the free list for `order`, marking it
	/// `Avail` with that order.
	///
	/// # Safety
	///
	/// `block` must not already be linked into any list.
	unsafe fn push_front(&mut self, order: usize, block: Link) {
		let sentinel = Link::sentinel(order);
		unsafe {
			let old_first = self.next_of(sentinel);
			self.set_next(sentinel, block);
			self.set_prev(block, sentinel);
			self.set_next(block, old_first);
			self.set_prev(old_first, block);
			self.set_order(block, order as u8);
			self.set_tag(block, Tag::Avail);
		}
	}

	/// Removes `block` from whichever list it is currently linked into.
	///
	/// # Safety
	///
	/// `block` must currently be linked into a list (i.e. `Avail`).
	unsafe fn unlink(&mut self, block: Link) {
		unsafe {
			let prev = self.prev_of(block);
			let next = self.next_of(block);
			self.set_next(prev, next);
			self.set_prev(next, prev);
		}
	}

	unsafe fn pop_front(&mut self, order: usize) -> Option<Link> {
		let sentinel = Link::sentinel(order);
		// SAFETY: sentinel is always a valid link for any order <= MAX_K.
		let first = unsafe { self.next_of(sentinel) };
		if first == sentinel {
			None
		} else {
			unsafe { self.unlink(first) };
			Some(first)
		}
	}

	/// Returns the offset of `block_offset`'s buddy at `order`.
	///
	/// # Panics
	///
	/// Panics if `order >= max_order`: the whole region has no buddy.
	pub(crate) fn buddy_of(&self, block_offset: u64, order: usize) -> u64 {
		assert!(order < self.max_order, "no buddy at max_order");
		buddy_offset(block_offset, order)
	}

	unsafe fn offset_of(&self, ptr: NonNull<u8>) -> u32 {
		let byte_offset =
			ptr.as_ptr() as usize - self.base.as_ptr() as usize - BLOCK_HEADER_SIZE;
		byte_offset as u32
	}

	unsafe fn data_ptr(&self, block_offset: u32) -> NonNull<u8> {
		unsafe {
			NonNull::new_unchecked(
				self.base.as_ptr().add(block_offset as usize + BLOCK_HEADER_SIZE),
			)
		}
	}

	/// Allocates a block of at least `user_bytes` usable bytes.
	///
	/// Returns `Err(AllocError::InvalidArgument)` for a zero-byte request
	/// without mutating the pool. Returns `Err(AllocError::OutOfMemory)` if
	/// no free block of sufficient order exists and none can be split down
	/// to size.
	pub fn malloc(&mut self, user_bytes: usize) -> AllocResult<NonNull<u8>> {
		if user_bytes == 0 {
			return Err(AllocError::InvalidArgument);
		}

		let need = match user_bytes.checked_add(BLOCK_HEADER_SIZE) {
			Some(n) => n,
			None => return Err(AllocError::InvalidArgument),
		};
		let k = order_for(need);

		// R1: search for the smallest non-empty list at or above k. If k
		// itself already exceeds max_order (the request can never fit
		// regardless of fragmentation), the loop below falls straight
		// through to the out-of-memory case.
		let mut i = k;
		// SAFETY: reading header tags/links for bookkeeping only.
		while i <= self.max_order && unsafe { self.is_empty(i) } {
			i += 1;
		}
		if i > self.max_order {
			log::warn!("pool exhausted servicing a {user_bytes} byte request");
			return Err(AllocError::OutOfMemory);
		}

		// R2: detach the head of that list.
		// SAFETY: the search above established avail[i] is non-empty.
		let mut block = unsafe { self.pop_front(i) }.expect("non-empty per search above");

		// R3: split down to the requested order, freeing the upper half at
		// each step.
		while i > k {
			i -= 1;
			let lower_offset = block.block_offset();
			let upper_offset = self.buddy_of(lower_offset as u64, i) as u32;
			let upper = Link::block(upper_offset);
			// SAFETY: upper_offset is block's buddy at order i, disjoint from
			// block and not referenced by anything else.
			unsafe {
				self.push_front(i, upper);
				self.set_order(block, i as u8);
			}
			log::trace!(
				"split order {} block at offset {lower_offset} into kept={lower_offset} freed={upper_offset}",
				i + 1
			);
		}

		// R4: commit.
		// SAFETY: block was just detached and fully split down to order k.
		unsafe { self.set_tag(block, Tag::Reserved) };
		log::trace!("allocated order {} block at offset {}", k, block.block_offset());

		// SAFETY: block's offset plus header size is within the backing region.
		Ok(unsafe { self.data_ptr(block.block_offset()) })
	}

	/// Releases a block previously returned by [`Pool::malloc`] on this pool,
	/// coalescing it with its buddy repeatedly while possible.
	///
	/// # Safety
	///
	/// `ptr` must have been returned by `malloc` on this same pool and not
	/// already passed to `free`.
	pub fn free(&mut self, ptr: NonNull<u8>) {
		// SAFETY: caller contract guarantees ptr came from this pool's malloc.
		let offset = unsafe { self.offset_of(ptr) };
		let mut link = Link::block(offset);

		// SAFETY: reading the tag to validate the caller's contract.
		debug_assert!(
			unsafe { self.tag_of(link) } == Tag::Reserved,
			"double free or pointer not obtained from this pool"
		);

		// SAFETY: offset was derived from a pointer this pool handed out.
		let mut k = unsafe { self.order_of(link) } as usize;
		unsafe { self.set_tag(link, Tag::Avail) };

		while k < self.max_order {
			let buddy_offset = self.buddy_of(link.block_offset() as u64, k) as u32;
			let buddy = Link::block(buddy_offset);
			// SAFETY: buddy_offset is within the region whenever k < max_order.
			let buddy_matches =
				unsafe { self.tag_of(buddy) == Tag::Avail && self.order_of(buddy) as usize == k };
			if !buddy_matches {
				break;
			}

			// SAFETY: buddy_matches confirmed buddy is currently Avail, hence linked.
			unsafe { self.unlink(buddy) };
			let merged_offset = link.block_offset().min(buddy_offset);
			k += 1;
			link = Link::block(merged_offset);
			log::trace!("coalesced into order {k} block at offset {merged_offset}");
		}

		// SAFETY: link now names an unlinked block of order k, not on any list.
		unsafe { self.push_front(k, link) };
		log::trace!("freed block at offset {} (order {})", link.block_offset(), k);
	}
}

#[cfg(test)]
impl<B: BackingMemory> Pool<B> {
	pub(crate) fn max_order(&self) -> usize {
		self.max_order
	}

	pub(crate) fn byte_count(&self) -> u64 {
		self.byte_count
	}

	/// Order recorded in `ptr`'s header. Whitebox test helper.
	pub(crate) fn block_order(&self, ptr: NonNull<u8>) -> u8 {
		unsafe {
			let link = Link::block(self.offset_of(ptr));
			self.order_of(link)
		}
	}

	/// Tag recorded in `ptr`'s header. Whitebox test helper.
	pub(crate) fn block_tag(&self, ptr: NonNull<u8>) -> Tag {
		unsafe {
			let link = Link::block(self.offset_of(ptr));
			self.tag_of(link)
		}
	}

	/// Walks the free list for `order` forward and backward, returning the
	/// set of block offsets seen each way. Used to check P1 (list
	/// well-formedness): both traversals must agree.
	pub(crate) fn free_list_offsets(&self, order: usize) -> (alloc::vec::Vec<u32>, alloc::vec::Vec<u32>) {
		let sentinel = Link::sentinel(order);
		let mut forward = alloc::vec::Vec::new();
		let mut cur = unsafe { self.next_of(sentinel) };
		while cur != sentinel {
			assert_eq!(unsafe { self.tag_of(cur) }, Tag::Avail);
			assert_eq!(unsafe { self.order_of(cur) } as usize, order);
			forward.push(cur.block_offset());
			cur = unsafe { self.next_of(cur) };
		}

		let mut backward = alloc::vec::Vec::new();
		let mut cur = unsafe { self.prev_of(sentinel) };
		while cur != sentinel {
			backward.push(cur.block_offset());
			cur = unsafe { self.prev_of(cur) };
		}

		(forward, backward)
	}

	/// True iff every order other than `populated_order` has an empty,
	/// self-linked sentinel and `populated_order`'s list holds exactly one
	/// block at offset 0. Used to check P4/P5 (full-pool shape).
	pub(crate) fn is_fresh_shape(&self, populated_order: usize) -> bool {
		for order in 0..=self.max_order {
			let (forward, _) = self.free_list_offsets(order);
			if order == populated_order {
				if forward != [0u32] {
					return false;
				}
			} else if !forward.is_empty() {
				return false;
			}
		}
		true
	}

	/// Total bytes currently reachable through the free lists. Used, paired
	/// with the test's own tally of outstanding reservations, to check P2
	/// (partition).
	pub(crate) fn free_bytes(&self) -> u64 {
		let mut total = 0u64;
		for order in 0..=self.max_order {
			let (forward, _) = self.free_list_offsets(order);
			total += forward.len() as u64 * (1u64 << order);
		}
		total
	}
}

impl Pool<AllocBacking> {
	/// Constructs a pool backed by the global allocator. See
	/// [`Pool::init_with`] for the sizing rule.
	pub fn init(requested_bytes: usize) -> Self {
		Self::init_with(requested_bytes, AllocBacking)
	}
}

impl<B: BackingMemory> Drop for Pool<B> {
	fn drop(&mut self) {
		// SAFETY: base/max_order match the region acquired in init_with, and
		// this is the only place that releases it (ownership prevents reuse).
		unsafe { self.backing.release(self.base, self.max_order) };
	}
}
