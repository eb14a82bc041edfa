//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::{SmallVec, smallvec};

use crate::ErrPack;
use crate::tensor::conv::{conv2d_shape, conv3d_shape, pool_shape};
use crate::tensor::error::err_shape_mismatch;
use crate::tensor::layout::{pad_shape, reshape_shape};
use crate::tensor::math::ReluParams;
use crate::tensor::matmul::matmul_shape;
use crate::tensor::shape::check_axis;
use crate::tensor::{CHANNEL, Shape, Tensor, TensorOpError, broadcast_shape};
use crate::util::cold_path;

//--------------------------------------------------------------------------------------------------

/// Predictions are clamped to `[CE_EPSILON, 1 - CE_EPSILON]` before taking the logarithm.
pub const CE_EPSILON: f32 = 1e-7;

/// Gradient for every input slot. `None` marks an input that receives no gradient.
pub type InputGrads = SmallVec<[Option<Tensor>; 3]>;

/// The operation catalog.
///
/// Operations with weights (`Conv2D`, `Conv3D`, `FullConnected`) take a single
/// data input when created. The weights are appended as two more inputs by the
/// build step once the shape of the data input is known:
///
///     Conv2D / Conv3D:  [x, filter, bias]
///     FullConnected:    [x, weight, bias]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpKind {
	Add,
	MatMul,
	Conv2D { filters: usize, width: usize, padding: usize, stride: usize },
	Conv3D { filters: usize, width: usize, padding: usize, stride: usize },
	MaxPooling { width: usize },
	MinPooling { width: usize },
	AvgPooling { width: usize },
	Reshape { shape: Shape },
	Flatten { axis: usize },
	FullConnected { outputs: usize },
	Sigmoid,
	ReLU,
	LeakyReLU { params: ReluParams },
	Softmax { axis: usize },
	MSE,
	CrossEntropy,
}

#[cold]
#[inline(never)]
fn err_arity(op: &str, expected: usize, got: usize) -> ErrPack<TensorOpError> {
	ErrPack::with_message(
		TensorOpError::InvalidValue,
		format!("{op}: expected {expected} inputs, got {got}"),
	)
}

fn check_same_shape(op: &str, a: &Shape, b: &Shape) -> Result<(), ErrPack<TensorOpError>> {
	if a != b {
		cold_path();
		return Err(err_shape_mismatch(op, a, b));
	}
	Ok(())
}

impl OpKind {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Add => "Add",
			Self::MatMul => "MatMul",
			Self::Conv2D { .. } => "Conv2D",
			Self::Conv3D { .. } => "Conv3D",
			Self::MaxPooling { .. } => "MaxPooling",
			Self::MinPooling { .. } => "MinPooling",
			Self::AvgPooling { .. } => "AvgPooling",
			Self::Reshape { .. } => "Reshape",
			Self::Flatten { .. } => "Flatten",
			Self::FullConnected { .. } => "FullConnected",
			Self::Sigmoid => "Sigmoid",
			Self::ReLU => "ReLU",
			Self::LeakyReLU { .. } => "LeakyReLU",
			Self::Softmax { .. } => "Softmax",
			Self::MSE => "MSE",
			Self::CrossEntropy => "CrossEntropy",
		}
	}

	/// Number of inputs of a fully built operation, weights included.
	pub fn input_count(&self) -> usize {
		match self {
			Self::Conv2D { .. } | Self::Conv3D { .. } | Self::FullConnected { .. } => 3,
			Self::Add | Self::MatMul | Self::MSE | Self::CrossEntropy => 2,
			_ => 1,
		}
	}

	pub fn weight_count(&self) -> usize {
		match self {
			Self::Conv2D { .. } | Self::Conv3D { .. } | Self::FullConnected { .. } => 2,
			_ => 0,
		}
	}

	/// Names and shapes of the weights created by the build step.
	pub fn weight_shapes(
		&self,
		input: &Shape,
	) -> Result<SmallVec<[(&'static str, Shape); 2]>, ErrPack<TensorOpError>> {
		let channels = input.dims()[CHANNEL];
		let shapes = match *self {
			Self::Conv2D { filters, width, .. } => smallvec![
				("filter", Shape::new([filters, 1, width, width, channels])?),
				("bias", Shape::new([1, 1, 1, 1, filters])?),
			],
			Self::Conv3D { filters, width, .. } => smallvec![
				("filter", Shape::new([filters, width, width, width, channels])?),
				("bias", Shape::new([1, 1, 1, 1, filters])?),
			],
			Self::FullConnected { outputs } => smallvec![
				("weight", Shape::new([1, 1, 1, channels, outputs])?),
				("bias", Shape::new([1, 1, 1, 1, outputs])?),
			],
			_ => SmallVec::new(),
		};
		Ok(shapes)
	}

	fn args<const N: usize, T: Copy>(&self, inputs: &[T]) -> Result<[T; N], ErrPack<TensorOpError>> {
		<[T; N]>::try_from(inputs).map_err(|_| err_arity(self.name(), N, inputs.len()))
	}

	//----------------------------------------------------------------------------------------------

	/// Static shape inference.
	pub fn output_shape(&self, inputs: &[Shape]) -> Result<Shape, ErrPack<TensorOpError>> {
		match *self {
			Self::Add => {
				let [x, y] = self.args::<2, _>(inputs)?;
				Ok(broadcast_shape(&x, &y)?.0)
			},
			Self::MatMul => {
				let [x, y] = self.args::<2, _>(inputs)?;
				matmul_shape(&x, &y)
			},
			Self::Conv2D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				conv2d_shape(&pad_shape(&x, padding, padding)?, &filter, &bias, stride)
			},
			Self::Conv3D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				conv3d_shape(&pad_shape(&x, padding, padding)?, &filter, &bias, stride)
			},
			Self::MaxPooling { width } | Self::MinPooling { width } | Self::AvgPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				pool_shape(&x, width)
			},
			Self::Reshape { shape } => {
				let [x] = self.args::<1, _>(inputs)?;
				reshape_shape(&x, &shape)
			},
			Self::Flatten { axis } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.flatten_from(axis)
			},
			Self::FullConnected { outputs } => {
				let [x, weight, bias] = self.args::<3, _>(inputs)?;
				check_same_shape("FullConnected bias", &bias, &Shape::new([1, 1, 1, 1, outputs])?)?;
				matmul_shape(&x, &weight)
			},
			Self::Sigmoid | Self::ReLU | Self::LeakyReLU { .. } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(x)
			},
			Self::Softmax { axis } => {
				let [x] = self.args::<1, _>(inputs)?;
				check_axis(axis)?;
				Ok(x)
			},
			Self::MSE | Self::CrossEntropy => {
				let [pred, target] = self.args::<2, _>(inputs)?;
				check_same_shape(self.name(), &pred, &target)?;
				Ok(Shape::scalar())
			},
		}
	}

	pub fn compute(&self, inputs: &[&Tensor]) -> Result<Tensor, ErrPack<TensorOpError>> {
		match *self {
			Self::Add => {
				let [x, y] = self.args::<2, _>(inputs)?;
				x + y
			},
			Self::MatMul => {
				let [x, y] = self.args::<2, _>(inputs)?;
				x.matmul(y)
			},
			Self::Conv2D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				x.padding(padding)?.conv2d(filter, bias, stride)
			},
			Self::Conv3D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				x.padding(padding)?.conv3d(filter, bias, stride)
			},
			Self::MaxPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.max_pooling(width)
			},
			Self::MinPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.min_pooling(width)
			},
			Self::AvgPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.avg_pooling(width)
			},
			Self::Reshape { shape } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.reshape(&shape)
			},
			Self::Flatten { axis } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.flatten(axis)
			},
			Self::FullConnected { .. } => {
				let [x, weight, bias] = self.args::<3, _>(inputs)?;
				x.matmul(weight)?.add_channel_bias(bias)
			},
			Self::Sigmoid => {
				let [x] = self.args::<1, _>(inputs)?;
				x.sigmoid()
			},
			Self::ReLU => {
				let [x] = self.args::<1, _>(inputs)?;
				x.relu()
			},
			Self::LeakyReLU { params } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.relu_with(params)
			},
			Self::Softmax { axis } => {
				let [x] = self.args::<1, _>(inputs)?;
				x.softmax_along(axis)
			},
			Self::MSE => {
				let [pred, target] = self.args::<2, _>(inputs)?;
				check_same_shape("MSE", pred.shape(), target.shape())?;
				let err = pred.zip(target, |p, t| (p - t) * (p - t))?;
				Ok(Tensor::scalar(err.mean_all()))
			},
			Self::CrossEntropy => {
				let [pred, target] = self.args::<2, _>(inputs)?;
				check_same_shape("CrossEntropy", pred.shape(), target.shape())?;
				let err = pred.zip(target, |p, t| {
					let p = p.clamp(CE_EPSILON, 1.0 - CE_EPSILON);
					-(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
				})?;
				Ok(Tensor::scalar(err.mean_all()))
			},
		}
	}

	/// Reverse-mode step: maps the gradient of the output to the gradients of the inputs.
	///
	/// `inputs` and `output` are the values cached by the forward pass.
	#[allow(clippy::too_many_lines)]
	pub fn gradient(
		&self,
		d_out: &Tensor,
		inputs: &[&Tensor],
		output: &Tensor,
	) -> Result<InputGrads, ErrPack<TensorOpError>> {
		match *self {
			Self::Add => {
				let [x, y] = self.args::<2, _>(inputs)?;
				let dx = d_out.sum_to_shape(x.shape())?;
				let dy = d_out.sum_to_shape(y.shape())?;
				Ok(smallvec![Some(dx), Some(dy)])
			},
			Self::MatMul => {
				let [x, y] = self.args::<2, _>(inputs)?;
				let dx = d_out.matmul(&y.transpose()?)?;
				let dy = x.transpose()?.matmul(d_out)?.sum_to_shape(y.shape())?;
				Ok(smallvec![Some(dx), Some(dy)])
			},
			Self::Conv2D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				let padded = x.padding(padding)?;
				let dx = d_out.conv2d_input_grad(filter, padded.shape(), stride)?.clipping(padding)?;
				let d_filter = padded.conv2d_filter_grad(d_out, filter.shape(), stride)?;
				let d_bias = d_out.sum_to_shape(bias.shape())?;
				Ok(smallvec![Some(dx), Some(d_filter), Some(d_bias)])
			},
			Self::Conv3D { padding, stride, .. } => {
				let [x, filter, bias] = self.args::<3, _>(inputs)?;
				let padded = x.padding(padding)?;
				let dx = d_out.conv3d_input_grad(filter, padded.shape(), stride)?.clipping(padding)?;
				let d_filter = padded.conv3d_filter_grad(d_out, filter.shape(), stride)?;
				let d_bias = d_out.sum_to_shape(bias.shape())?;
				Ok(smallvec![Some(dx), Some(d_filter), Some(d_bias)])
			},
			Self::MaxPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some(d_out.max_upsampling(x, width)?)])
			},
			Self::MinPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some(d_out.min_upsampling(x, width)?)])
			},
			Self::AvgPooling { width } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some(d_out.avg_upsampling(width, x.shape())?)])
			},
			Self::Reshape { .. } | Self::Flatten { .. } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some(d_out.reshape(x.shape())?)])
			},
			Self::FullConnected { .. } => {
				let [x, weight, bias] = self.args::<3, _>(inputs)?;
				let dx = d_out.matmul(&weight.transpose()?)?;
				let d_weight = x.transpose()?.matmul(d_out)?.sum_to_shape(weight.shape())?;
				let d_bias = d_out.sum_to_shape(bias.shape())?;
				Ok(smallvec![Some(dx), Some(d_weight), Some(d_bias)])
			},
			Self::Sigmoid => {
				let ds = output.map(|s| s * (1.0 - s))?;
				Ok(smallvec![Some((d_out * &ds)?)])
			},
			Self::ReLU => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some((d_out * &x.relu_mask()?)?)])
			},
			Self::LeakyReLU { params } => {
				let [x] = self.args::<1, _>(inputs)?;
				Ok(smallvec![Some((d_out * &x.relu_with_mask(params)?)?)])
			},
			Self::Softmax { axis } => {
				// dx = s * (d_out - sum(d_out * s))
				let dot = (d_out * output)?.reduce_sum(axis)?;
				let dx = (output * &(d_out - &dot)?)?;
				Ok(smallvec![Some(dx)])
			},
			Self::MSE | Self::CrossEntropy => {
				// the loss is paired with its activation, so the delta is the plain difference
				let [pred, target] = self.args::<2, _>(inputs)?;
				let delta = (pred - target)?;
				Ok(smallvec![Some((&delta * d_out.sum_all())?), None])
			},
		}
	}
}

//--------------------------------------------------------------------------------------------------
