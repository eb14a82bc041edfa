//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use log::warn;

use crate::ErrPack;
use crate::util::{LossyInto, cold_path};

use super::error::err_shape_mismatch;
use super::{
	CHANNEL, FRAME, HEIGHT, NDIM, SAMPLE, Shape, Tensor, TensorOpError, WIDTH, for_each_index,
};

//--------------------------------------------------------------------------------------------------
// Sliding window arithmetic
//
//     input:  [samples, frames, width, height, channels]
//     filter: [filters, window_frames, window_width, window_height, channels]
//     bias:   [1, 1, 1, 1, filters]
//     output: [samples, out_frames, out_width, out_height, filters]
//
// `out = (in - window) / stride + 1` on every sliding axis. Conv2D keeps the
// frame axis as is (window of one frame with stride 1), Conv3D slides over it
// with the same stride as over width and height.

fn check_stride(stride: usize) -> Result<(), ErrPack<TensorOpError>> {
	if stride == 0 {
		cold_path();
		return Err(ErrPack::with_message(TensorOpError::InvalidValue, "convolution: zero stride"));
	}
	Ok(())
}

fn window_shape(
	input: &Shape,
	filter: &Shape,
	frame_stride: usize,
	stride: usize,
) -> Result<Shape, ErrPack<TensorOpError>> {
	check_stride(stride)?;
	check_stride(frame_stride)?;
	let [n, f, w, h, c] = *input.dims();
	let [k, ff, fw, fh, fc] = *filter.dims();
	if fc != c || ff > f || fw > w || fh > h {
		cold_path();
		return Err(err_shape_mismatch("convolution", input, filter));
	}
	Shape::new([
		n,
		(f - ff) / frame_stride + 1,
		(w - fw) / stride + 1,
		(h - fh) / stride + 1,
		k,
	])
}

fn check_bias(filter: &Shape, bias: &Shape) -> Result<(), ErrPack<TensorOpError>> {
	let k = filter.dims()[SAMPLE];
	if *bias.dims() != [1, 1, 1, 1, k] {
		cold_path();
		return Err(err_shape_mismatch("convolution bias", filter, bias));
	}
	Ok(())
}

fn check_single_frame(filter: &Shape) -> Result<(), ErrPack<TensorOpError>> {
	if filter.dims()[FRAME] != 1 {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::ShapeMismatch,
			format!("conv2d: filter [{filter}] must span a single frame"),
		));
	}
	Ok(())
}

pub fn conv2d_shape(
	input: &Shape,
	filter: &Shape,
	bias: &Shape,
	stride: usize,
) -> Result<Shape, ErrPack<TensorOpError>> {
	check_single_frame(filter)?;
	check_bias(filter, bias)?;
	window_shape(input, filter, 1, stride)
}

pub fn conv3d_shape(
	input: &Shape,
	filter: &Shape,
	bias: &Shape,
	stride: usize,
) -> Result<Shape, ErrPack<TensorOpError>> {
	check_bias(filter, bias)?;
	window_shape(input, filter, stride, stride)
}

pub fn pool_shape(input: &Shape, width: usize) -> Result<Shape, ErrPack<TensorOpError>> {
	let [n, f, w, h, c] = *input.dims();
	if width == 0 {
		cold_path();
		return Err(ErrPack::with_message(TensorOpError::InvalidValue, "pooling: zero width"));
	}
	if width > w || width > h {
		cold_path();
		return Err(ErrPack::with_message(
			TensorOpError::ShapeMismatch,
			format!("pooling: window {width}x{width} does not fit into [{input}]"),
		));
	}
	Shape::new([n, f, w / width, h / width, c])
}

//--------------------------------------------------------------------------------------------------

impl Tensor {
	fn correlate(
		&self,
		filter: &Self,
		bias: &Self,
		out_shape: Shape,
		frame_stride: usize,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let [_, ff, fw, fh, fc] = *filter.dims();
		Self::from_fn(out_shape, |[n, t, i, j, k]| {
			let mut acc = 0.0;
			for r in 0..ff {
				for p in 0..fw {
					for q in 0..fh {
						for c in 0..fc {
							let x = self.at([n, t * frame_stride + r, i * stride + p, j * stride + q, c]);
							acc += x * filter.at([k, r, p, q, c]);
						}
					}
				}
			}
			acc + bias.at([0, 0, 0, 0, k])
		})
	}

	/// Valid cross-correlation over width and height, one bias value per output channel.
	pub fn conv2d(
		&self,
		filter: &Self,
		bias: &Self,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let out_shape = conv2d_shape(self.shape(), filter.shape(), bias.shape(), stride)?;
		self.correlate(filter, bias, out_shape, 1, stride)
	}

	/// Like `conv2d()`, but the window also slides over the frame axis.
	pub fn conv3d(
		&self,
		filter: &Self,
		bias: &Self,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let out_shape = conv3d_shape(self.shape(), filter.shape(), bias.shape(), stride)?;
		self.correlate(filter, bias, out_shape, stride, stride)
	}

	//----------------------------------------------------------------------------------------------

	fn correlate_filter_grad(
		&self,
		d_out: &Self,
		filter_shape: &Shape,
		frame_stride: usize,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let expected = window_shape(self.shape(), filter_shape, frame_stride, stride)?;
		if *d_out.shape() != expected {
			cold_path();
			return Err(err_shape_mismatch("convolution filter gradient", d_out.shape(), &expected));
		}
		let [on, of, ow, oh, _] = *d_out.dims();
		Self::from_fn(*filter_shape, |[k, r, p, q, c]| {
			let mut acc = 0.0;
			for n in 0..on {
				for t in 0..of {
					for i in 0..ow {
						for j in 0..oh {
							let x = self.at([n, t * frame_stride + r, i * stride + p, j * stride + q, c]);
							acc += x * d_out.at([n, t, i, j, k]);
						}
					}
				}
			}
			acc
		})
	}

	/// Gradient of `conv2d()` with respect to the filter, `self` being the forward input.
	pub fn conv2d_filter_grad(
		&self,
		d_out: &Self,
		filter_shape: &Shape,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		check_single_frame(filter_shape)?;
		self.correlate_filter_grad(d_out, filter_shape, 1, stride)
	}

	/// Gradient of `conv3d()` with respect to the filter, `self` being the forward input.
	pub fn conv3d_filter_grad(
		&self,
		d_out: &Self,
		filter_shape: &Shape,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		self.correlate_filter_grad(d_out, filter_shape, stride, stride)
	}

	/// Gradient of `conv2d()` with respect to its input, `self` being the output gradient.
	///
	/// The gradient is dilated by the stride, padded by the filter size minus one and
	/// cross-correlated with the filter rotated by 180 degrees, with the roles of
	/// filters and channels swapped. Input rows that no window reached get zeros.
	pub fn conv2d_input_grad(
		&self,
		filter: &Self,
		input_shape: &Shape,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		check_single_frame(filter.shape())?;
		let expected = window_shape(input_shape, filter.shape(), 1, stride)?;
		if *self.shape() != expected {
			cold_path();
			return Err(err_shape_mismatch("conv2d input gradient", self.shape(), &expected));
		}
		let [_, _, fw, fh, c] = *filter.dims();
		let flipped = filter.rotate180()?.permute([CHANNEL, FRAME, WIDTH, HEIGHT, SAMPLE])?;
		let no_bias = Self::zeros(Shape::new([1, 1, 1, 1, c])?)?;
		let full = self.dilate(stride)?.pad2(fw - 1, fh - 1)?.conv2d(&flipped, &no_bias, 1)?;
		full.extend_to(input_shape)
	}

	/// Gradient of `conv3d()` with respect to its input, `self` being the output gradient.
	pub fn conv3d_input_grad(
		&self,
		filter: &Self,
		input_shape: &Shape,
		stride: usize,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let expected = window_shape(input_shape, filter.shape(), stride, stride)?;
		if *self.shape() != expected {
			cold_path();
			return Err(err_shape_mismatch("conv3d input gradient", self.shape(), &expected));
		}
		let [_, ff, fw, fh, fc] = *filter.dims();
		let mut d_inp = Self::zeros(*input_shape)?;
		for_each_index(self.shape(), |[n, t, i, j, k]| {
			let g = self.at([n, t, i, j, k]);
			for r in 0..ff {
				for p in 0..fw {
					for q in 0..fh {
						for c in 0..fc {
							let at = [n, t * stride + r, i * stride + p, j * stride + q, c];
							let idx = input_shape.linear_index(at);
							if let Some(v) = d_inp.data_mut().get_mut(idx) {
								*v += g * filter.at([k, r, p, q, c]);
							}
						}
					}
				}
			}
		});
		Ok(d_inp)
	}

	//----------------------------------------------------------------------------------------------

	fn pool(
		&self,
		width: usize,
		init: f32,
		f: impl Fn(f32, f32) -> f32,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let out_shape = pool_shape(self.shape(), width)?;
		let [_, _, w, h, _] = *self.dims();
		if w % width != 0 || h % width != 0 {
			warn!("pooling: [{}] is not divisible by {width}, trailing rows are dropped", self.shape());
		}
		Self::from_fn(out_shape, |[n, t, i, j, c]| {
			let mut acc = init;
			for p in 0..width {
				for q in 0..width {
					acc = f(acc, self.at([n, t, i * width + p, j * width + q, c]));
				}
			}
			acc
		})
	}

	/// Maximum over non-overlapping `width x width` windows.
	pub fn max_pooling(&self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.pool(width, f32::NEG_INFINITY, f32::max)
	}

	pub fn min_pooling(&self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.pool(width, f32::INFINITY, f32::min)
	}

	pub fn avg_pooling(&self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		let area: f32 = (width * width).lossy_into();
		&self.pool(width, 0.0, |a, b| a + b)? / area
	}

	fn unpool_selected(
		&self,
		input: &Self,
		width: usize,
		better: impl Fn(f32, f32) -> bool,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let expected = pool_shape(input.shape(), width)?;
		if *self.shape() != expected {
			cold_path();
			return Err(err_shape_mismatch("upsampling", self.shape(), &expected));
		}
		let mut out = Self::zeros(*input.shape())?;
		for_each_index(self.shape(), |[n, t, i, j, c]| {
			let mut best = [n, t, i * width, j * width, c];
			let mut best_value = input.at(best);
			for p in 0..width {
				for q in 0..width {
					let at = [n, t, i * width + p, j * width + q, c];
					let value = input.at(at);
					if better(value, best_value) {
						best = at;
						best_value = value;
					}
				}
			}
			let idx = input.shape().linear_index(best);
			if let Some(v) = out.data_mut().get_mut(idx) {
				*v += self.at([n, t, i, j, c]);
			}
		});
		Ok(out)
	}

	/// Routes every element of `self` (shaped like `input.max_pooling(width)`)
	/// to the position of the first maximum of its window in `input`.
	pub fn max_upsampling(&self, input: &Self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.unpool_selected(input, width, |value, best| value > best)
	}

	pub fn min_upsampling(&self, input: &Self, width: usize) -> Result<Self, ErrPack<TensorOpError>> {
		self.unpool_selected(input, width, |value, best| value < best)
	}

	/// Spreads every element evenly over its `width x width` window.
	pub fn avg_upsampling(
		&self,
		width: usize,
		input_shape: &Shape,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let expected = pool_shape(input_shape, width)?;
		if *self.shape() != expected {
			cold_path();
			return Err(err_shape_mismatch("upsampling", self.shape(), &expected));
		}
		let area: f32 = (width * width).lossy_into();
		let spread = Self::full(Shape::new([1, 1, width, width, 1])?, 1.0 / area)?;
		self.kronecker(&spread)?.extend_to(input_shape)
	}

	/// Kronecker product over all five axes.
	pub fn kronecker(&self, other: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		let a = self.dims();
		let b = other.dims();
		let mut dims = [0; NDIM];
		for (d, (&x, &y)) in dims.iter_mut().zip(a.iter().zip(b)) {
			*d = x * y;
		}
		let shape = Shape::new(dims)?;
		Self::from_fn(shape, |index| {
			let mut outer = [0; NDIM];
			let mut inner = [0; NDIM];
			for (axis, &i) in index.iter().enumerate() {
				let bd = b.get(axis).copied().unwrap_or(1);
				if let (Some(o), Some(n)) = (outer.get_mut(axis), inner.get_mut(axis)) {
					*o = i / bd;
					*n = i % bd;
				}
			}
			self.at(outer) * other.at(inner)
		})
	}
}

//--------------------------------------------------------------------------------------------------
