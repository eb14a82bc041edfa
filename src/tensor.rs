//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::rng::Rng;
use crate::util::cold_path;

pub mod conv;
pub mod error;
pub mod io;
pub mod layout;
pub mod math;
pub mod matmul;
pub mod shape;

#[cfg(test)]
mod tests;

pub use error::TensorOpError;
pub use shape::{CHANNEL, FRAME, HEIGHT, NDIM, SAMPLE, Shape, WIDTH};

use error::err_shape_mismatch;

//--------------------------------------------------------------------------------------------------

/// Two tensors compare equal when every pair of elements differs by at most this much.
pub const EQ_TOLERANCE: f32 = 1e-6;

/// Reserves the whole buffer up front so that running out of memory is reported
/// as an error instead of aborting the process.
pub(crate) fn alloc_buffer(count: usize) -> Result<Vec<f32>, ErrPack<TensorOpError>> {
	let mut data = Vec::new();
	data.try_reserve_exact(count)?;
	Ok(data)
}

/// Calls `f` for every index of `shape` in row-major order.
pub(crate) fn for_each_index(shape: &Shape, mut f: impl FnMut([usize; NDIM])) {
	let [d0, d1, d2, d3, d4] = *shape.dims();
	for i0 in 0..d0 {
		for i1 in 0..d1 {
			for i2 in 0..d2 {
				for i3 in 0..d3 {
					for i4 in 0..d4 {
						f([i0, i1, i2, i3, i4]);
					}
				}
			}
		}
	}
}

/// Replaces the index on `axis` with 0.
pub(crate) fn collapse_axis(mut index: [usize; NDIM], axis: usize) -> [usize; NDIM] {
	if let Some(i) = index.get_mut(axis) {
		*i = 0;
	}
	index
}

/// Shape of a binary elementwise result.
///
/// At most one axis may differ and on that axis one of the operands must have
/// size 1. Returns the output shape and the broadcast axis, if any.
pub fn broadcast_shape(
	a: &Shape,
	b: &Shape,
) -> Result<(Shape, Option<usize>), ErrPack<TensorOpError>> {
	let mut axis = None;
	for (i, (&da, &db)) in a.dims().iter().zip(b.dims()).enumerate() {
		if da != db {
			if axis.is_some() || (da != 1 && db != 1) {
				cold_path();
				return Err(err_shape_mismatch("broadcast", a, b));
			}
			axis = Some(i);
		}
	}
	match axis {
		Some(i) if a.dims().get(i) == Some(&1) => Ok((*b, axis)),
		_ => Ok((*a, axis)),
	}
}

//--------------------------------------------------------------------------------------------------

/// Dense tensor of `f32` elements with a fixed-rank-5 shape.
///
/// The buffer length always equals `shape.count()`. Every operation returns a
/// newly allocated tensor; nothing is shared between tensors.
#[derive(Clone, Debug)]
pub struct Tensor {
	shape: Shape,
	data: Vec<f32>,
}

impl Tensor {
	pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self, ErrPack<TensorOpError>> {
		if data.len() != shape.count() {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::InvalidShape,
				format!("buffer of {} elements does not fit shape [{shape}]", data.len()),
			));
		}
		Ok(Self { shape, data })
	}

	pub fn full(shape: Shape, value: f32) -> Result<Self, ErrPack<TensorOpError>> {
		let count = shape.count();
		let mut data = alloc_buffer(count)?;
		data.resize(count, value);
		Ok(Self { shape, data })
	}

	pub fn zeros(shape: Shape) -> Result<Self, ErrPack<TensorOpError>> {
		Self::full(shape, 0.0)
	}

	pub fn ones(shape: Shape) -> Result<Self, ErrPack<TensorOpError>> {
		Self::full(shape, 1.0)
	}

	/// Single-element tensor.
	pub fn scalar(value: f32) -> Self {
		Self { shape: Shape::scalar(), data: vec![value] }
	}

	/// Uniformly distributed values in `[0.0, 1.0)`.
	pub fn random(shape: Shape, rng: &mut Rng) -> Result<Self, ErrPack<TensorOpError>> {
		let mut t = Self::zeros(shape)?;
		rng.fill_uniform(&mut t.data);
		Ok(t)
	}

	/// `n x n` identity matrix in the last two axes.
	pub fn identity(n: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let shape = Shape::matrix(n, n)?;
		Self::from_fn(shape, |[_, _, _, r, c]| if r == c { 1.0 } else { 0.0 })
	}

	/// Random 0/1 mask where each element is 0 with probability `rate`.
	pub fn mask(shape: Shape, rate: f32, rng: &mut Rng) -> Result<Self, ErrPack<TensorOpError>> {
		let mut t = Self::random(shape, rng)?;
		for v in &mut t.data {
			*v = if *v < rate { 0.0 } else { 1.0 };
		}
		Ok(t)
	}

	/// Builds a tensor by evaluating `f` at every index in row-major order.
	pub fn from_fn(
		shape: Shape,
		mut f: impl FnMut([usize; NDIM]) -> f32,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let mut data = alloc_buffer(shape.count())?;
		for_each_index(&shape, |index| data.push(f(index)));
		Ok(Self { shape, data })
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}

	pub fn dims(&self) -> &[usize; NDIM] {
		self.shape.dims()
	}

	pub fn count(&self) -> usize {
		self.data.len()
	}

	pub fn data(&self) -> &[f32] {
		&self.data
	}

	pub fn data_mut(&mut self) -> &mut [f32] {
		&mut self.data
	}

	pub fn into_data(self) -> Vec<f32> {
		self.data
	}

	fn in_bounds(&self, index: [usize; NDIM]) -> bool {
		index.iter().zip(self.dims()).all(|(&i, &d)| i < d)
	}

	pub fn get(&self, index: [usize; NDIM]) -> Option<f32> {
		if self.in_bounds(index) {
			self.data.get(self.shape.linear_index(index)).copied()
		} else {
			None
		}
	}

	pub fn set(&mut self, index: [usize; NDIM], value: f32) -> Result<(), ErrPack<TensorOpError>> {
		if !self.in_bounds(index) {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::IndexOutOfBounds,
				format!("index {index:?} is outside of [{}]", self.shape),
			));
		}
		let i = self.shape.linear_index(index);
		if let Some(v) = self.data.get_mut(i) {
			*v = value;
		}
		Ok(())
	}

	/// The value of a single-element tensor.
	pub fn item(&self) -> Option<f32> {
		if self.data.len() == 1 { self.data.first().copied() } else { None }
	}

	/// Unchecked read. The caller guarantees that `index` is within the shape.
	#[inline]
	#[allow(clippy::indexing_slicing)]
	pub(crate) fn at(&self, index: [usize; NDIM]) -> f32 {
		self.data[self.shape.linear_index(index)]
	}

	pub fn map(&self, f: impl Fn(f32) -> f32) -> Result<Self, ErrPack<TensorOpError>> {
		let mut data = alloc_buffer(self.data.len())?;
		data.extend(self.data.iter().map(|&v| f(v)));
		Ok(Self { shape: self.shape, data })
	}

	/// Binary elementwise operation with single-axis broadcasting.
	pub fn zip(
		&self,
		other: &Self,
		f: impl Fn(f32, f32) -> f32,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let (out_shape, axis) = broadcast_shape(&self.shape, &other.shape)?;
		let Some(axis) = axis else {
			let mut data = alloc_buffer(self.data.len())?;
			data.extend(self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)));
			return Ok(Self { shape: out_shape, data });
		};
		let a_is_broadcast = self.dims().get(axis) == Some(&1);
		Self::from_fn(out_shape, |index| {
			if a_is_broadcast {
				f(self.at(collapse_axis(index, axis)), other.at(index))
			} else {
				f(self.at(index), other.at(collapse_axis(index, axis)))
			}
		})
	}

	pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
		self.shape == other.shape
			&& self.data.iter().zip(&other.data).all(|(&a, &b)| (a - b).abs() <= tolerance)
	}
}

impl PartialEq for Tensor {
	fn eq(&self, other: &Self) -> bool {
		self.approx_eq(other, EQ_TOLERANCE)
	}
}

//--------------------------------------------------------------------------------------------------

macro_rules! impl_binary_op {
	($Trait:ident, $method:ident, $op:tt) => {
		impl std::ops::$Trait<&Tensor> for &Tensor {
			type Output = Result<Tensor, ErrPack<TensorOpError>>;

			fn $method(self, rhs: &Tensor) -> Self::Output {
				self.zip(rhs, |a, b| a $op b)
			}
		}

		impl std::ops::$Trait<f32> for &Tensor {
			type Output = Result<Tensor, ErrPack<TensorOpError>>;

			fn $method(self, rhs: f32) -> Self::Output {
				self.map(|a| a $op rhs)
			}
		}

		impl std::ops::$Trait<&Tensor> for f32 {
			type Output = Result<Tensor, ErrPack<TensorOpError>>;

			fn $method(self, rhs: &Tensor) -> Self::Output {
				rhs.map(|b| self $op b)
			}
		}
	};
}

impl_binary_op!(Add, add, +);
impl_binary_op!(Sub, sub, -);
impl_binary_op!(Mul, mul, *);
impl_binary_op!(Div, div, /);

//--------------------------------------------------------------------------------------------------
