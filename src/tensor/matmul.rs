//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::util::cold_path;

use super::error::err_shape_mismatch;
use super::{Shape, Tensor, TensorOpError, alloc_buffer};

//--------------------------------------------------------------------------------------------------

/// `[b0, b1, b2, rows, k] x [c0, c1, c2, k, cols] -> [b0, b1, b2, rows, cols]`
///
/// Each `ci` must be equal to `bi` or 1. A size-1 batch axis on the right
/// operand shares the same matrix across the whole batch.
pub fn matmul_shape(a: &Shape, b: &Shape) -> Result<Shape, ErrPack<TensorOpError>> {
	let [a0, a1, a2, rows, k] = *a.dims();
	let [b0, b1, b2, bk, cols] = *b.dims();
	let batch_ok = [(a0, b0), (a1, b1), (a2, b2)].iter().all(|&(x, y)| x == y || y == 1);
	if k != bk || !batch_ok {
		cold_path();
		return Err(err_shape_mismatch("matmul", a, b));
	}
	Shape::new([a0, a1, a2, rows, cols])
}

impl Tensor {
	/// Batched matrix multiply over the last two axes.
	#[allow(clippy::indexing_slicing)]
	pub fn matmul(&self, rhs: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		let out_shape = matmul_shape(self.shape(), rhs.shape())?;
		let [d0, d1, d2, rows, cols] = *out_shape.dims();
		let k = self.dims()[4];
		let [r0, r1, r2, _, _] = *rhs.dims();

		let a = self.data();
		let b = rhs.data();
		let mut data = alloc_buffer(out_shape.count())?;
		for i0 in 0..d0 {
			for i1 in 0..d1 {
				for i2 in 0..d2 {
					let a_off = self.shape().linear_index([i0, i1, i2, 0, 0]);
					let b_off = rhs.shape().linear_index([
						if r0 == 1 { 0 } else { i0 },
						if r1 == 1 { 0 } else { i1 },
						if r2 == 1 { 0 } else { i2 },
						0,
						0,
					]);
					for r in 0..rows {
						let a_row = &a[a_off + r * k..a_off + (r + 1) * k];
						for c in 0..cols {
							let mut acc = 0.0;
							for (j, &x) in a_row.iter().enumerate() {
								acc += x * b[b_off + j * cols + c];
							}
							data.push(acc);
						}
					}
				}
			}
		}
		Self::new(out_shape, data)
	}
}

//--------------------------------------------------------------------------------------------------
