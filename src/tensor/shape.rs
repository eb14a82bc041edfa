//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::str::FromStr;

use crate::ErrPack;
use crate::util::cold_path;

use super::TensorOpError;

//--------------------------------------------------------------------------------------------------

pub const NDIM: usize = 5;

pub const SAMPLE: usize = 0;
pub const FRAME: usize = 1;
pub const WIDTH: usize = 2;
pub const HEIGHT: usize = 3;
pub const CHANNEL: usize = 4;

pub fn check_axis(axis: usize) -> Result<usize, ErrPack<TensorOpError>> {
	if axis < NDIM {
		Ok(axis)
	} else {
		cold_path();
		Err(ErrPack::with_message(
			TensorOpError::UnsupportedAxis,
			format!("axis {axis} is out of range 0..{NDIM}"),
		))
	}
}

//--------------------------------------------------------------------------------------------------

/// Fixed-rank shape: (sample, frame, width, height, channel).
///
/// Every dimension is at least 1 and the element count fits into `usize`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Shape {
	dims: [usize; NDIM],
}

impl Shape {
	pub fn new(dims: [usize; NDIM]) -> Result<Self, ErrPack<TensorOpError>> {
		let mut count: usize = 1;
		for &dim in &dims {
			if dim == 0 {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::InvalidShape,
					format!("zero-sized dimension in {dims:?}"),
				));
			}
			let Some(c) = count.checked_mul(dim) else {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::InvalidShape,
					format!("element count of {dims:?} overflows"),
				));
			};
			count = c;
		}
		Ok(Self { dims })
	}

	/// Shape with a single element.
	pub const fn scalar() -> Self {
		Self { dims: [1; NDIM] }
	}

	/// `rows x cols` matrix in the last two axes.
	pub fn matrix(rows: usize, cols: usize) -> Result<Self, ErrPack<TensorOpError>> {
		Self::new([1, 1, 1, rows, cols])
	}

	pub fn dims(&self) -> &[usize; NDIM] {
		&self.dims
	}

	pub fn dim(&self, axis: usize) -> Result<usize, ErrPack<TensorOpError>> {
		let axis = check_axis(axis)?;
		Ok(self.dims.get(axis).copied().unwrap_or(1))
	}

	/// Total number of elements.
	pub fn count(&self) -> usize {
		self.dims.iter().product()
	}

	/// Row-major strides, the last axis has stride 1.
	pub fn strides(&self) -> [usize; NDIM] {
		let [_, d1, d2, d3, d4] = self.dims;
		let s3 = d4;
		let s2 = s3 * d3;
		let s1 = s2 * d2;
		let s0 = s1 * d1;
		[s0, s1, s2, s3, 1]
	}

	pub fn linear_index(&self, index: [usize; NDIM]) -> usize {
		let [_, d1, d2, d3, d4] = self.dims;
		let [i0, i1, i2, i3, i4] = index;
		(((i0 * d1 + i1) * d2 + i2) * d3 + i3) * d4 + i4
	}

	pub fn with_dim(&self, axis: usize, size: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let axis = check_axis(axis)?;
		let mut dims = self.dims;
		if let Some(d) = dims.get_mut(axis) {
			*d = size;
		}
		Self::new(dims)
	}

	/// Collapses the axes `axis..NDIM` into the channel axis.
	/// The collapsed axes other than the channel are left with size 1.
	pub fn flatten_from(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let axis = check_axis(axis)?;
		let mut dims = self.dims;
		let mut merged = 1;
		for d in dims.iter_mut().skip(axis) {
			merged *= *d;
			*d = 1;
		}
		dims[CHANNEL] = merged;
		Self::new(dims)
	}
}

impl std::fmt::Display for Shape {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let [d0, d1, d2, d3, d4] = self.dims;
		write!(f, "{d0} {d1} {d2} {d3} {d4}")
	}
}

impl FromStr for Shape {
	type Err = ErrPack<TensorOpError>;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut dims = [0; NDIM];
		let mut tokens = s.split_whitespace();
		for d in &mut dims {
			let Some(token) = tokens.next() else {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::ParseError,
					format!("expected {NDIM} dimensions in {s:?}"),
				));
			};
			*d = token.parse()?;
		}
		if tokens.next().is_some() {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::ParseError,
				format!("trailing tokens after shape in {s:?}"),
			));
		}
		Self::new(dims)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_linear_index_is_row_major() {
		let shape = Shape::new([2, 3, 4, 5, 6]).unwrap();
		let strides = shape.strides();
		assert_eq!(strides, [360, 120, 30, 6, 1]);
		assert_eq!(shape.linear_index([0, 0, 0, 0, 1]), 1);
		assert_eq!(shape.linear_index([1, 2, 3, 4, 5]), 360 + 240 + 90 + 24 + 5);
		assert_eq!(shape.linear_index([1, 2, 3, 4, 5]), shape.count() - 1);
	}

	#[test]
	fn test_zero_dim_is_rejected() {
		let err = Shape::new([1, 0, 1, 1, 1]).unwrap_err();
		assert_eq!(err.code, TensorOpError::InvalidShape);
	}

	#[test]
	fn test_flatten_from() {
		let shape = Shape::new([2, 3, 4, 5, 6]).unwrap();
		assert_eq!(*shape.flatten_from(WIDTH).unwrap().dims(), [2, 3, 1, 1, 120]);
		assert_eq!(*shape.flatten_from(SAMPLE).unwrap().dims(), [1, 1, 1, 1, 720]);
		assert_eq!(shape.flatten_from(CHANNEL).unwrap(), shape);
		assert_eq!(shape.flatten_from(5).unwrap_err().code, TensorOpError::UnsupportedAxis);
	}

	#[test]
	fn test_text_round_trip() {
		let shape = Shape::new([1, 2, 3, 4, 5]).unwrap();
		let text = shape.to_string();
		assert_eq!(text, "1 2 3 4 5");
		assert_eq!(text.parse::<Shape>().unwrap(), shape);
		assert_eq!("1 2 3".parse::<Shape>().unwrap_err().code, TensorOpError::ParseError);
		assert_eq!("1 2 x 4 5".parse::<Shape>().unwrap_err().code, TensorOpError::ParseError);
	}
}
