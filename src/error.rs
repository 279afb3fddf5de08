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

//! Errors returned by [`crate::Pool::malloc`].

use core::fmt;

/// Recoverable failures from the allocator's request-serving path.
///
/// Backing-memory failures are deliberately not representable here: per the
/// pool's design, losing the ability to grow or shrink its backing region is
/// treated as fatal rather than surfaced to callers (see
/// [`crate::backing::BackingError`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
	/// The request was zero bytes, or larger than the pool can ever satisfy
	/// regardless of fragmentation.
	InvalidArgument,
	/// The request was valid in principle but no free block of sufficient
	/// order was available and none could be split to produce one.
	OutOfMemory,
}

impl fmt::Display for AllocError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AllocError::InvalidArgument => write!(f, "invalid allocation request"),
			AllocError::OutOfMemory => write!(f, "pool exhausted"),
		}
	}
}

/// Result type for the pool's allocation path.
pub type AllocResult<T> = Result<T, AllocError>;
