//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::collections::HashMap;

use crate::ErrPack;
use crate::util::{LossyInto, cold_path};

use super::error::err_shape_mismatch;
use super::shape::check_axis;
use super::{CHANNEL, FRAME, NDIM, Shape, Tensor, TensorOpError, alloc_buffer, for_each_index};

//--------------------------------------------------------------------------------------------------

/// Parameters of the clipped, leaky rectifier.
///
///     x >= max_value              ->  max_value
///     threshold <= x < max_value  ->  x
///     x < threshold               ->  negative_slope * (x - threshold)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReluParams {
	pub max_value: f32,
	pub threshold: f32,
	pub negative_slope: f32,
}

impl ReluParams {
	pub fn apply(&self, x: f32) -> f32 {
		if x >= self.max_value {
			self.max_value
		} else if x >= self.threshold {
			x
		} else {
			self.negative_slope * (x - self.threshold)
		}
	}

	pub fn derivative(&self, x: f32) -> f32 {
		if x >= self.max_value {
			0.0
		} else if x >= self.threshold {
			1.0
		} else {
			self.negative_slope
		}
	}
}

impl Default for ReluParams {
	fn default() -> Self {
		Self {
			max_value: f32::INFINITY,
			threshold: 0.0,
			negative_slope: 0.1,
		}
	}
}

pub fn sigmoid(x: f32) -> f32 {
	1.0 / (1.0 + (-x).exp())
}

//--------------------------------------------------------------------------------------------------

impl Tensor {
	pub fn exp(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(f32::exp)
	}

	pub fn log(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(f32::ln)
	}

	pub fn sigmoid(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(sigmoid)
	}

	pub fn tanh(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(f32::tanh)
	}

	pub fn relu(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| if x > 0.0 { x } else { 0.0 })
	}

	/// Derivative of `relu()` evaluated at every element.
	pub fn relu_mask(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| if x > 0.0 { 1.0 } else { 0.0 })
	}

	pub fn relu_with(&self, params: ReluParams) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| params.apply(x))
	}

	/// Derivative of `relu_with()` evaluated at every element.
	pub fn relu_with_mask(&self, params: ReluParams) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| params.derivative(x))
	}

	pub fn pow(&self, k: i32) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| x.powi(k))
	}

	pub fn neg(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| -x)
	}

	/// `max(0, 1 - t * x)`
	pub fn hinge(&self, t: f32) -> Result<Self, ErrPack<TensorOpError>> {
		self.map(|x| (1.0 - t * x).max(0.0))
	}

	pub fn find_min(&self) -> f32 {
		self.data().iter().copied().fold(f32::INFINITY, f32::min)
	}

	pub fn find_max(&self) -> f32 {
		self.data().iter().copied().fold(f32::NEG_INFINITY, f32::max)
	}

	/// `exp(x) / reduce_sum(exp(x), FRAME)`
	pub fn softmax(&self) -> Result<Self, ErrPack<TensorOpError>> {
		self.softmax_along(FRAME)
	}

	pub fn softmax_along(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		// shifting by the maximum does not change the result, but keeps `exp()` finite
		let max = self.reduce_max(axis)?;
		let e = (self - &max)?.exp()?;
		let sum = e.reduce_sum(axis)?;
		&e / &sum
	}

	/// Adds `bias[c]` to every element in channel `c`.
	///
	/// `bias` must have the shape `[1, 1, 1, 1, channels]`.
	pub fn add_channel_bias(&self, bias: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		let channels = self.dims()[CHANNEL];
		if *bias.dims() != [1, 1, 1, 1, channels] {
			cold_path();
			return Err(err_shape_mismatch("add_channel_bias", self.shape(), bias.shape()));
		}
		let mut data = alloc_buffer(self.count())?;
		for row in self.data().chunks_exact(channels) {
			data.extend(row.iter().zip(bias.data()).map(|(&x, &b)| x + b));
		}
		Self::new(*self.shape(), data)
	}

	/// Replaces every element with a one-hot vector along the channel axis.
	///
	/// Codes are assigned to distinct values in the order in which they first appear.
	pub fn one_hot(&self, num: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let [n, f, w, h, c] = *self.dims();
		if c != 1 {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::ShapeMismatch,
				format!("one_hot: expected a single channel, got [{}]", self.shape()),
			));
		}
		let mut out = Self::zeros(Shape::new([n, f, w, h, num])?)?;
		let mut codes: HashMap<i64, usize> = HashMap::new();
		let mut overflow = false;
		for_each_index(self.shape(), |[i0, i1, i2, i3, _]| {
			#[allow(clippy::cast_possible_truncation)]
			let value = self.at([i0, i1, i2, i3, 0]) as i64;
			let next = codes.len();
			let code = *codes.entry(value).or_insert(next);
			if code < num {
				let i = out.shape().linear_index([i0, i1, i2, i3, code]);
				if let Some(v) = out.data_mut().get_mut(i) {
					*v = 1.0;
				}
			} else {
				overflow = true;
			}
		});
		if overflow {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::InvalidValue,
				format!("one_hot: more than {num} distinct values"),
			));
		}
		Ok(out)
	}

	//----------------------------------------------------------------------------------------------

	/// Collapses `axis` to size 1, combining the elements with `f`.
	pub fn reduce(
		&self,
		axis: usize,
		init: f32,
		f: impl Fn(f32, f32) -> f32,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let axis = check_axis(axis)?;
		let out_shape = self.shape().with_dim(axis, 1)?;
		let mut out = Self::full(out_shape, init)?;
		for_each_index(self.shape(), |index| {
			let mut o = index;
			if let Some(i) = o.get_mut(axis) {
				*i = 0;
			}
			let i = out_shape.linear_index(o);
			let value = self.at(index);
			if let Some(acc) = out.data_mut().get_mut(i) {
				*acc = f(*acc, value);
			}
		});
		Ok(out)
	}

	pub fn reduce_sum(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.reduce(axis, 0.0, |a, b| a + b)
	}

	pub fn reduce_mean(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let n: f32 = self.shape().dim(axis)?.lossy_into();
		&self.reduce_sum(axis)? / n
	}

	pub fn reduce_max(&self, axis: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.reduce(axis, f32::NEG_INFINITY, f32::max)
	}

	pub fn sum_all(&self) -> f32 {
		self.data().iter().sum()
	}

	pub fn mean_all(&self) -> f32 {
		let n: f32 = self.count().lossy_into();
		self.sum_all() / n
	}

	/// Sums over every axis where `target` has size 1 and `self` does not.
	///
	/// This undoes a broadcast when propagating gradients back to the smaller operand.
	pub fn sum_to_shape(&self, target: &Shape) -> Result<Self, ErrPack<TensorOpError>> {
		let mut result: Option<Self> = None;
		for axis in 0..NDIM {
			let have = result.as_ref().unwrap_or(self).dims().get(axis).copied().unwrap_or(1);
			let want = target.dims().get(axis).copied().unwrap_or(1);
			if have == want {
				continue;
			}
			if want != 1 {
				cold_path();
				return Err(err_shape_mismatch("sum_to_shape", self.shape(), target));
			}
			let reduced = result.as_ref().unwrap_or(self).reduce_sum(axis)?;
			result = Some(reduced);
		}
		match result {
			Some(t) => Ok(t),
			None => Ok(self.clone()),
		}
	}
}

//--------------------------------------------------------------------------------------------------
