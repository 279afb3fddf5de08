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

use crate::header::Tag;
use crate::order::{DEFAULT_K, MAX_K, MIN_K, SMALLEST_K};
use crate::{AllocError, Pool};

fn fresh(order: usize) -> Pool {
	Pool::init(1usize << order)
}

// P1: traversing a free list forward and backward visits the same blocks.
#[test]
fn p1_list_well_formedness() {
	let mut pool = fresh(MIN_K);
	let a = pool.malloc(1).unwrap();
	let b = pool.malloc(1).unwrap();
	let _c = pool.malloc(1).unwrap();
	pool.free(a);
	pool.free(b);

	for order in 0..=pool.max_order() {
		let (mut forward, mut backward) = pool.free_list_offsets(order);
		backward.reverse();
		assert_eq!(forward, backward, "order {order} list not symmetric");
		forward.sort_unstable();
		forward.dedup();
		assert_eq!(
			forward.len(),
			pool.free_list_offsets(order).0.len(),
			"order {order} list has duplicate entries"
		);
	}
}

// P2: free bytes plus reserved bytes exactly cover the region at every step.
#[test]
fn p2_partition() {
	let mut pool = fresh(MIN_K);
	let mut reserved_bytes = 0u64;

	let mut ptrs = alloc::vec::Vec::new();
	for _ in 0..6 {
		let p = pool.malloc(3).unwrap();
		reserved_bytes += 1u64 << pool.block_order(p);
		ptrs.push(p);
		assert_eq!(pool.free_bytes() + reserved_bytes, pool.byte_count());
	}
	for p in ptrs {
		reserved_bytes -= 1u64 << pool.block_order(p);
		pool.free(p);
		assert_eq!(pool.free_bytes() + reserved_bytes, pool.byte_count());
	}
	assert_eq!(pool.free_bytes(), pool.byte_count());
}

// P3: a block's buddy's buddy is itself, at the pool level (not just the
// pure order::buddy_offset function, which is covered separately).
#[test]
fn p3_buddy_symmetry() {
	let pool = fresh(MIN_K);
	for order in 0..pool.max_order() {
		let buddy = pool.buddy_of(0, order);
		assert_eq!(pool.buddy_of(buddy, order), 0);
	}
}

// P4: a freshly initialized pool has exactly one block, at max order, offset 0.
#[test]
fn p4_full_pool_shape() {
	let pool = fresh(MIN_K);
	assert!(pool.is_fresh_shape(MIN_K));
	assert_eq!(pool.byte_count(), 1u64 << MIN_K);
}

// P5: matched malloc/free pairs in any order return the pool to its initial shape.
#[test]
fn p5_round_trip_any_order() {
	let mut pool = fresh(MIN_K);
	let a = pool.malloc(10).unwrap();
	let b = pool.malloc(100).unwrap();
	let c = pool.malloc(1000).unwrap();
	pool.free(b);
	pool.free(a);
	pool.free(c);
	assert!(pool.is_fresh_shape(MIN_K));
}

// P6: the smallest possible request is served at SMALLEST_K.
#[test]
fn p6_minimum_order() {
	let mut pool = fresh(MIN_K);
	let p = pool.malloc(1).unwrap();
	assert_eq!(pool.block_order(p), SMALLEST_K as u8);
	pool.free(p);
}

// Scenario 1: init/destroy round-trip across the usable order range.
#[test]
fn scenario_init_destroy_round_trip() {
	for k in MIN_K..=DEFAULT_K {
		let pool = fresh(k);
		assert!(pool.is_fresh_shape(k));
		assert_eq!(pool.max_order(), k);
		drop(pool);
	}
}

// Scenario 2: one-byte round-trip.
#[test]
fn scenario_one_byte_round_trip() {
	let mut pool = fresh(MIN_K);
	let p = pool.malloc(1).unwrap();
	assert_eq!(pool.block_order(p), SMALLEST_K as u8);
	pool.free(p);
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 3: allocating the whole pool leaves no room for anything else.
#[test]
fn scenario_whole_pool_allocation() {
	let mut pool = fresh(MIN_K);
	let whole = (1usize << MIN_K) - crate::BLOCK_HEADER_SIZE;
	let p = pool.malloc(whole).unwrap();
	assert_eq!(pool.block_order(p), MIN_K as u8);
	assert_eq!(pool.block_tag(p), Tag::Reserved);

	assert_eq!(pool.malloc(5), Err(AllocError::OutOfMemory));

	pool.free(p);
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 4: ten small allocations, freed in allocation order.
#[test]
fn scenario_ten_small_allocations() {
	let mut pool = fresh(MIN_K);
	let ptrs: alloc::vec::Vec<_> = (0..10).map(|_| pool.malloc(1).unwrap()).collect();
	for p in ptrs {
		pool.free(p);
	}
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 5: buddy coalescing, freed in allocation order.
#[test]
fn scenario_buddy_coalescing_forward() {
	let mut pool = fresh(MIN_K);
	let half = (1usize << (MIN_K - 1)) - crate::BLOCK_HEADER_SIZE;
	let a = pool.malloc(half).unwrap();
	let b = pool.malloc(half).unwrap();
	pool.free(a);
	pool.free(b);
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 6: buddy coalescing, freed in reverse order.
#[test]
fn scenario_buddy_coalescing_reverse() {
	let mut pool = fresh(MIN_K);
	let half = (1usize << (MIN_K - 1)) - crate::BLOCK_HEADER_SIZE;
	let a = pool.malloc(half).unwrap();
	let b = pool.malloc(half).unwrap();
	pool.free(b);
	pool.free(a);
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 7: odd, non-power-of-two request sizes still round-trip cleanly.
#[test]
fn scenario_odd_request_sizes() {
	let mut pool = fresh(MIN_K);
	let ptrs: alloc::vec::Vec<_> = [13usize, 1, 255, 4097, 9]
		.iter()
		.map(|&n| pool.malloc(n).unwrap())
		.collect();
	for p in ptrs {
		pool.free(p);
	}
	assert!(pool.is_fresh_shape(MIN_K));
}

// Scenario 9: AllocError's Display strings are non-empty and distinct.
#[test]
fn scenario_alloc_error_display() {
	use alloc::string::ToString;

	let invalid = AllocError::InvalidArgument.to_string();
	let oom = AllocError::OutOfMemory.to_string();
	assert!(!invalid.is_empty());
	assert!(!oom.is_empty());
	assert_ne!(invalid, oom);
	assert_eq!(AllocError::InvalidArgument, AllocError::InvalidArgument);
	assert_ne!(AllocError::InvalidArgument, AllocError::OutOfMemory);
}

#[test]
fn malloc_zero_bytes_is_invalid_argument() {
	let mut pool = fresh(MIN_K);
	assert_eq!(pool.malloc(0), Err(AllocError::InvalidArgument));
	assert!(pool.is_fresh_shape(MIN_K));
}

#[test]
fn malloc_oversized_request_is_out_of_memory() {
	let mut pool = fresh(MIN_K);
	assert_eq!(
		pool.malloc(1usize << MAX_K),
		Err(AllocError::OutOfMemory)
	);
	assert!(pool.is_fresh_shape(MIN_K));
}
