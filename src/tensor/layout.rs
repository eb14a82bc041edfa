//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::util::cold_path;

use super::error::err_shape_mismatch;
use super::shape::check_axis;
use super::{CHANNEL, FRAME, HEIGHT, NDIM, SAMPLE, Shape, Tensor, TensorOpError, WIDTH};

//--------------------------------------------------------------------------------------------------

pub fn reshape_shape(from: &Shape, to: &Shape) -> Result<Shape, ErrPack<TensorOpError>> {
	if from.count() != to.count() {
		cold_path();
		return Err(err_shape_mismatch("reshape", from, to));
	}
	Ok(*to)
}

/// Output dimension `i` is input dimension `order[i]`.
pub fn permute_shape(from: &Shape, order: [usize; NDIM]) -> Result<Shape, ErrPack<TensorOpError>> {
	let mut seen = [false; NDIM];
	for &axis in &order {
		match seen.get_mut(axis) {
			Some(s) if !*s => *s = true,
			_ => {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::ShapeMismatch,
					format!("permute: {order:?} is not a permutation of 0..{NDIM}"),
				));
			},
		}
	}
	let dims = from.dims();
	Shape::new(order.map(|axis| dims.get(axis).copied().unwrap_or(1)))
}

pub fn pad_shape(from: &Shape, pw: usize, ph: usize) -> Result<Shape, ErrPack<TensorOpError>> {
	let [n, f, w, h, c] = *from.dims();
	Shape::new([n, f, w + 2 * pw, h + 2 * ph, c])
}

pub fn clip_shape(from: &Shape, margin: usize) -> Result<Shape, ErrPack<TensorOpError>> {
	let [n, f, w, h, c] = *from.dims();
	if 2 * margin >= w || 2 * margin >= h {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::InvalidValue,
			format!("clipping: margin {margin} leaves nothing of [{from}]"),
		));
	}
	Shape::new([n, f, w - 2 * margin, h - 2 * margin, c])
}

//--------------------------------------------------------------------------------------------------

impl Tensor {
	/// Reinterprets the row-major buffer with a new shape of the same element count.
	pub fn reshape(&self, shape: &Shape) -> Result<Self, ErrPack<TensorOpError>> {
		let shape = reshape_shape(self.shape(), shape)?;
		Self::new(shape, self.data().to_vec())
	}

	pub fn permute(&self, order: [usize; NDIM]) -> Result<Self, ErrPack<TensorOpError>> {
		let shape = permute_shape(self.shape(), order)?;
		Self::from_fn(shape, |index| {
			let mut src = [0; NDIM];
			for (&axis, &i) in order.iter().zip(&index) {
				if let Some(s) = src.get_mut(axis) {
					*s = i;
				}
			}
			self.at(src)
		})
	}

	/// Merges the axes `axis..NDIM` into the channel axis.
	pub fn flatten(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let shape = self.shape().flatten_from(axis)?;
		self.reshape(&shape)
	}

	/// Swaps the last two axes.
	pub fn transpose(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.permute([SAMPLE, FRAME, WIDTH, CHANNEL, HEIGHT])
	}

	/// Copies the range `start..end` along `axis`.
	pub fn slice(&self, start: usize, end: usize, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let axis = check_axis(axis)?;
		let dim = self.shape().dim(axis)?;
		if start >= end || end > dim {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::IndexOutOfBounds,
				format!("slice: range {start}..{end} is not within 0..{dim} on axis {axis}"),
			));
		}
		let shape = self.shape().with_dim(axis, end - start)?;
		Self::from_fn(shape, |mut index| {
			if let Some(i) = index.get_mut(axis) {
				*i += start;
			}
			self.at(index)
		})
	}

	/// Symmetric zero padding of the width and height axes.
	pub fn padding(&self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.pad2(width, width)
	}

	pub fn pad2(&self, pw: usize, ph: usize) -> Result<Self, ErrPack<TensorOpError>> {
		if pw == 0 && ph == 0 {
			return Ok(self.clone());
		}
		let shape = pad_shape(self.shape(), pw, ph)?;
		let [_, _, w, h, _] = *self.dims();
		Self::from_fn(shape, |[n, f, i, j, c]| {
			if i < pw || j < ph || i - pw >= w || j - ph >= h {
				0.0
			} else {
				self.at([n, f, i - pw, j - ph, c])
			}
		})
	}

	/// Symmetric crop of the width and height axes.
	pub fn clipping(&self, margin: usize) -> Result<Self, ErrPack<TensorOpError>> {
		if margin == 0 {
			return Ok(self.clone());
		}
		let shape = clip_shape(self.shape(), margin)?;
		Self::from_fn(shape, |[n, f, i, j, c]| self.at([n, f, i + margin, j + margin, c]))
	}

	/// Reverses the traversal order of the width and height axes.
	pub fn rotate180(&self) -> Result<Self, ErrPack<TensorOpError>> {
		let [_, _, w, h, _] = *self.dims();
		Self::from_fn(*self.shape(), |[n, f, i, j, c]| self.at([n, f, w - 1 - i, h - 1 - j, c]))
	}

	/// Inserts `stride - 1` zeros between neighbouring elements on the width and height axes.
	pub fn dilate(&self, stride: usize) -> Result<Self, ErrPack<TensorOpError>> {
		if stride == 0 {
			cold_path();
			return Err(ErrPack::with_message(TensorOpError::InvalidValue, "dilate: zero stride"));
		}
		if stride == 1 {
			return Ok(self.clone());
		}
		let [n, f, w, h, c] = *self.dims();
		let shape = Shape::new([n, f, (w - 1) * stride + 1, (h - 1) * stride + 1, c])?;
		Self::from_fn(shape, |[n, f, i, j, c]| {
			if i % stride == 0 && j % stride == 0 {
				self.at([n, f, i / stride, j / stride, c])
			} else {
				0.0
			}
		})
	}

	/// Zero-extends every axis up to `shape`, keeping the data at the origin.
	pub fn extend_to(&self, shape: &Shape) -> Result<Self, ErrPack<TensorOpError>> {
		if self.dims().iter().zip(shape.dims()).any(|(&have, &want)| have > want) {
			cold_path();
			return Err(err_shape_mismatch("extend_to", self.shape(), shape));
		}
		if self.shape() == shape {
			return Ok(self.clone());
		}
		Self::from_fn(*shape, |index| self.get(index).unwrap_or(0.0))
	}
}

//--------------------------------------------------------------------------------------------------
