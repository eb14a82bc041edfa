//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod index_vec;

pub trait LossyInto<T> {
	fn lossy_into(self) -> T;
}

#[allow(clippy::cast_precision_loss)]
impl LossyInto<f32> for usize {
	fn lossy_into(self) -> f32 {
		self as f32
	}
}

/// Marks the error branches. Stable stand-in for `std::hint::cold_path()`.
#[cold]
#[inline(never)]
pub fn cold_path() {}
