//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::io::Cursor;

use assert_approx_eq::assert_approx_eq;

use crate::ErrPack;
use crate::rng::Rng;

use super::math::ReluParams;
use super::{FRAME, HEIGHT, NDIM, Shape, Tensor, TensorOpError, WIDTH};

//--------------------------------------------------------------------------------------------------

fn shape(dims: [usize; NDIM]) -> Result<Shape, ErrPack<TensorOpError>> {
	Shape::new(dims)
}

fn counting(dims: [usize; NDIM]) -> Result<Tensor, ErrPack<TensorOpError>> {
	let s = shape(dims)?;
	let data = (1..=s.count()).map(|i| i as f32).collect();
	Tensor::new(s, data)
}

fn random(dims: [usize; NDIM], seed: u64) -> Result<Tensor, ErrPack<TensorOpError>> {
	let mut rng = Rng::seed_from_u64(seed);
	Tensor::random(shape(dims)?, &mut rng)
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_zeros_reduce_sum() -> Result<(), ErrPack<TensorOpError>> {
	for dims in [[1, 1, 1, 1, 1], [2, 3, 4, 5, 6], [3, 1, 2, 1, 4]] {
		for axis in 0..NDIM {
			let r = Tensor::zeros(shape(dims)?)?.reduce_sum(axis)?;
			assert_eq!(r.shape().dim(axis)?, 1);
			for other in (0..NDIM).filter(|&a| a != axis) {
				assert_eq!(r.shape().dim(other)?, dims[other]);
			}
			assert!(r.data().iter().all(|&v| v == 0.0));
		}
	}
	Ok(())
}

#[test]
fn test_reduce_sum_and_mean() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 1, 2, 3])?;
	let s = t.reduce_sum(HEIGHT)?;
	assert_eq!(*s.dims(), [1, 1, 1, 1, 3]);
	assert_eq!(s.data(), &[5.0, 7.0, 9.0]);
	let m = t.reduce_mean(4)?;
	assert_eq!(m.data(), &[2.0, 5.0]);
	Ok(())
}

#[test]
fn test_reshape_round_trip() -> Result<(), ErrPack<TensorOpError>> {
	let t = random([2, 3, 1, 4, 2], 1)?;
	for dims in [[1, 1, 1, 1, 48], [48, 1, 1, 1, 1], [2, 2, 2, 2, 3], [4, 1, 3, 4, 1]] {
		let back = t.reshape(&shape(dims)?)?.reshape(t.shape())?;
		assert_eq!(back.data(), t.data());
		assert_eq!(back.shape(), t.shape());
	}
	Ok(())
}

#[test]
fn test_permute_inverse() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([2, 3, 4, 1, 5])?;
	for order in [[2, 0, 4, 1, 3], [4, 3, 2, 1, 0], [0, 1, 2, 4, 3], [1, 2, 3, 4, 0]] {
		let mut inverse = [0; NDIM];
		for (i, &axis) in order.iter().enumerate() {
			inverse[axis] = i;
		}
		let p = t.permute(order)?;
		for (i, &axis) in order.iter().enumerate() {
			assert_eq!(p.shape().dim(i)?, t.shape().dim(axis)?);
		}
		let back = p.permute(inverse)?;
		assert_eq!(back.shape(), t.shape());
		assert_eq!(back.data(), t.data());
	}
	Ok(())
}

#[test]
fn test_transpose() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 1, 2, 3])?.transpose()?;
	assert_eq!(*t.dims(), [1, 1, 1, 3, 2]);
	assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
	Ok(())
}

#[test]
fn test_add_commutes() -> Result<(), ErrPack<TensorOpError>> {
	let a = random([2, 1, 3, 3, 2], 7)?;
	let b = random([2, 1, 3, 3, 2], 8)?;
	assert_eq!((&a + &b)?, (&b + &a)?);
	let k = 0.25;
	assert_eq!((&(&a + k)? + &b)?, (&(&a + &b)? + k)?);
	Ok(())
}

#[test]
fn test_scalar_ops() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 1, 1, 3])?;
	assert_eq!((&t * 2.0)?.data(), &[2.0, 4.0, 6.0]);
	assert_eq!((&t - 1.0)?.data(), &[0.0, 1.0, 2.0]);
	assert_eq!((1.0 - &t)?.data(), &[0.0, -1.0, -2.0]);
	assert_eq!((6.0 / &t)?.data(), &[6.0, 3.0, 2.0]);
	Ok(())
}

#[test]
fn test_single_axis_broadcast() -> Result<(), ErrPack<TensorOpError>> {
	let a = counting([1, 2, 1, 1, 3])?;
	let b = counting([1, 1, 1, 1, 3])?;
	let sum = (&a + &b)?;
	assert_eq!(*sum.dims(), [1, 2, 1, 1, 3]);
	assert_eq!(sum.data(), &[2.0, 4.0, 6.0, 5.0, 7.0, 9.0]);

	// the smaller operand may also be on the left
	let diff = (&b - &a)?;
	assert_eq!(diff.data(), &[0.0, 0.0, 0.0, -3.0, -3.0, -3.0]);
	Ok(())
}

#[test]
fn test_broadcast_errors() -> Result<(), ErrPack<TensorOpError>> {
	let a = Tensor::zeros(shape([1, 2, 1, 1, 3])?)?;

	let two_axes = Tensor::zeros(shape([1, 1, 1, 1, 1])?)?;
	assert_eq!((&a + &two_axes).unwrap_err().code, TensorOpError::ShapeMismatch);

	let no_unit = Tensor::zeros(shape([1, 3, 1, 1, 3])?)?;
	assert_eq!((&a * &no_unit).unwrap_err().code, TensorOpError::ShapeMismatch);
	Ok(())
}

#[test]
fn test_shape_op_errors() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 2, 3, 4])?;
	let bad = t.reshape(&shape([1, 1, 1, 5, 5])?).unwrap_err();
	assert_eq!(bad.code, TensorOpError::ShapeMismatch);
	assert_eq!(t.permute([0, 1, 2, 3, 3]).unwrap_err().code, TensorOpError::ShapeMismatch);
	assert_eq!(t.permute([0, 1, 2, 3, 5]).unwrap_err().code, TensorOpError::ShapeMismatch);
	assert_eq!(t.reduce_sum(5).unwrap_err().code, TensorOpError::UnsupportedAxis);
	assert_eq!(t.slice(0, 1, 7).unwrap_err().code, TensorOpError::UnsupportedAxis);
	assert_eq!(t.slice(2, 5, 4).unwrap_err().code, TensorOpError::IndexOutOfBounds);
	assert_eq!(Shape::new([1, 0, 1, 1, 1]).unwrap_err().code, TensorOpError::InvalidShape);
	Ok(())
}

#[test]
fn test_flatten() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([2, 3, 4, 5, 6])?;
	let f = t.flatten(WIDTH)?;
	assert_eq!(*f.dims(), [2, 3, 1, 1, 120]);
	assert_eq!(f.data(), t.data());
	Ok(())
}

#[test]
fn test_slice() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 1, 3, 2])?;
	let s = t.slice(1, 3, HEIGHT)?;
	assert_eq!(*s.dims(), [1, 1, 1, 2, 2]);
	assert_eq!(s.data(), &[3.0, 4.0, 5.0, 6.0]);
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_matmul_matches_ndarray() -> Result<(), ErrPack<TensorOpError>> {
	let a = random([2, 1, 3, 3, 4], 11)?;
	let b = random([1, 1, 1, 4, 5], 12)?;
	let c = a.matmul(&b)?;
	assert_eq!(*c.dims(), [2, 1, 3, 3, 5]);

	let b_nd = ndarray::Array2::from_shape_vec((4, 5), b.data().to_vec()).unwrap();
	for (batch, a_block) in a.data().chunks_exact(12).enumerate() {
		let a_nd = ndarray::Array2::from_shape_vec((3, 4), a_block.to_vec()).unwrap();
		let expected = a_nd.dot(&b_nd);
		let got = &c.data()[batch * 15..(batch + 1) * 15];
		for (g, e) in got.iter().zip(expected.iter()) {
			assert_approx_eq!(*g, *e, 1e-5);
		}
	}
	Ok(())
}

#[test]
fn test_matmul_identity() -> Result<(), ErrPack<TensorOpError>> {
	let a = random([1, 1, 1, 3, 4], 3)?;
	assert_eq!(a.matmul(&Tensor::identity(4)?)?, a);
	assert_eq!(Tensor::identity(3)?.matmul(&a)?, a);
	let err = a.matmul(&Tensor::identity(3)?).unwrap_err();
	assert_eq!(err.code, TensorOpError::ShapeMismatch);
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_conv2d_identity_filter() -> Result<(), ErrPack<TensorOpError>> {
	let input = random([2, 1, 3, 4, 2], 5)?;
	let filter = Tensor::from_fn(shape([2, 1, 1, 1, 2])?, |[k, _, _, _, c]| {
		if k == c { 1.0 } else { 0.0 }
	})?;
	let bias = Tensor::zeros(shape([1, 1, 1, 1, 2])?)?;
	assert_eq!(input.conv2d(&filter, &bias, 1)?, input);
	Ok(())
}

#[test]
fn test_conv2d_values_and_sizes() -> Result<(), ErrPack<TensorOpError>> {
	let input = counting([1, 1, 3, 3, 1])?;
	let filter = Tensor::ones(shape([1, 1, 2, 2, 1])?)?;
	let bias = Tensor::full(shape([1, 1, 1, 1, 1])?, 0.5)?;
	let out = input.conv2d(&filter, &bias, 1)?;
	assert_eq!(*out.dims(), [1, 1, 2, 2, 1]);
	assert_eq!(out.data(), &[12.5, 16.5, 24.5, 28.5]);

	let input = Tensor::zeros(shape([1, 2, 7, 5, 1])?)?;
	let filter = Tensor::zeros(shape([3, 1, 3, 3, 1])?)?;
	let bias = Tensor::zeros(shape([1, 1, 1, 1, 3])?)?;
	let out = input.conv2d(&filter, &bias, 2)?;
	assert_eq!(*out.dims(), [1, 2, 3, 2, 3]);

	let deep = Tensor::zeros(shape([3, 2, 3, 3, 1])?)?;
	assert_eq!(input.conv2d(&deep, &bias, 1).unwrap_err().code, TensorOpError::ShapeMismatch);
	let wrong_bias = Tensor::zeros(shape([1, 1, 1, 1, 2])?)?;
	assert_eq!(
		input.conv2d(&filter, &wrong_bias, 1).unwrap_err().code,
		TensorOpError::ShapeMismatch
	);
	Ok(())
}

#[test]
fn test_conv3d_slides_over_frames() -> Result<(), ErrPack<TensorOpError>> {
	let input = Tensor::ones(shape([1, 4, 4, 4, 1])?)?;
	let filter = Tensor::ones(shape([1, 2, 2, 2, 1])?)?;
	let bias = Tensor::full(shape([1, 1, 1, 1, 1])?, 0.5)?;
	let out = input.conv3d(&filter, &bias, 2)?;
	assert_eq!(*out.dims(), [1, 2, 2, 2, 1]);
	assert!(out.data().iter().all(|&v| v == 8.5));
	Ok(())
}

#[test]
fn test_conv2d_input_grad_matches_scatter() -> Result<(), ErrPack<TensorOpError>> {
	// with a single frame, conv2d and conv3d compute the same thing
	let input_shape = shape([2, 1, 7, 6, 3])?;
	let filter = random([4, 1, 3, 2, 3], 21)?;
	let d_out = random([2, 1, 3, 3, 4], 22)?;
	let by_composition = d_out.conv2d_input_grad(&filter, &input_shape, 2)?;
	let by_scatter = d_out.conv3d_input_grad(&filter, &input_shape, 2)?;
	assert_eq!(by_composition.shape(), &input_shape);
	assert!(by_composition.approx_eq(&by_scatter, 1e-5));
	Ok(())
}

#[test]
fn test_conv_filter_grad_of_sum() -> Result<(), ErrPack<TensorOpError>> {
	// d(sum(conv))/d(filter[k, 0, p, q, c]) is the sum of the inputs the tap touches
	let input = counting([1, 1, 3, 3, 1])?;
	let d_out = Tensor::ones(shape([1, 1, 2, 2, 2])?)?;
	let g = input.conv2d_filter_grad(&d_out, &shape([2, 1, 2, 2, 1])?, 1)?;
	assert_eq!(g.data(), &[12.0, 16.0, 24.0, 28.0, 12.0, 16.0, 24.0, 28.0]);
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_max_pooling_scenario() -> Result<(), ErrPack<TensorOpError>> {
	let x = counting([1, 1, 2, 2, 1])?;
	let m = x.max_pooling(2)?;
	assert_eq!(*m.dims(), [1, 1, 1, 1, 1]);
	assert_eq!(m.item(), Some(4.0));
	assert_eq!(x.min_pooling(2)?.item(), Some(1.0));
	assert_eq!(x.avg_pooling(2)?.item(), Some(2.5));
	Ok(())
}

#[test]
fn test_pooling_windows() -> Result<(), ErrPack<TensorOpError>> {
	let w = 2;
	let x = random([2, 1, 4, 6, 3], 31)?;
	let max = x.max_pooling(w)?;
	let avg = x.avg_pooling(w)?;
	assert_eq!(*max.dims(), [2, 1, 2, 3, 3]);
	let window_sum = Tensor::from_fn(*max.shape(), |[n, t, i, j, c]| {
		let mut s = 0.0;
		for p in 0..w {
			for q in 0..w {
				s += x.get([n, t, i * w + p, j * w + q, c]).unwrap_or(0.0);
			}
		}
		s
	})?;
	let window_max = Tensor::from_fn(*max.shape(), |[n, t, i, j, c]| {
		let mut m = f32::NEG_INFINITY;
		for p in 0..w {
			for q in 0..w {
				m = m.max(x.get([n, t, i * w + p, j * w + q, c]).unwrap_or(f32::NEG_INFINITY));
			}
		}
		m
	})?;
	assert_eq!(max, window_max);
	assert!((&avg * 4.0)?.approx_eq(&window_sum, 1e-5));
	Ok(())
}

#[test]
fn test_pooling_drops_trailing_rows() -> Result<(), ErrPack<TensorOpError>> {
	let x = counting([1, 1, 3, 3, 1])?;
	let m = x.max_pooling(2)?;
	assert_eq!(*m.dims(), [1, 1, 1, 1, 1]);
	assert_eq!(m.item(), Some(5.0));
	assert_eq!(x.max_pooling(4).unwrap_err().code, TensorOpError::ShapeMismatch);
	assert_eq!(x.max_pooling(0).unwrap_err().code, TensorOpError::InvalidValue);
	Ok(())
}

#[test]
fn test_upsampling() -> Result<(), ErrPack<TensorOpError>> {
	let x = Tensor::new(shape([1, 1, 2, 2, 1])?, vec![1.0, 4.0, 3.0, 4.0])?;
	let g = Tensor::scalar(5.0);
	// ties go to the first maximum
	assert_eq!(g.max_upsampling(&x, 2)?.data(), &[0.0, 5.0, 0.0, 0.0]);
	assert_eq!(g.min_upsampling(&x, 2)?.data(), &[5.0, 0.0, 0.0, 0.0]);

	let input_shape = shape([1, 1, 3, 2, 1])?;
	let a = Tensor::scalar(8.0).avg_upsampling(2, &input_shape)?;
	assert_eq!(a.shape(), &input_shape);
	assert_eq!(a.data(), &[2.0, 2.0, 2.0, 2.0, 0.0, 0.0]);
	Ok(())
}

#[test]
fn test_kronecker() -> Result<(), ErrPack<TensorOpError>> {
	let a = counting([1, 1, 2, 1, 1])?;
	let b = Tensor::ones(shape([1, 1, 1, 2, 1])?)?;
	let k = a.kronecker(&b)?;
	assert_eq!(*k.dims(), [1, 1, 2, 2, 1]);
	assert_eq!(k.data(), &[1.0, 1.0, 2.0, 2.0]);
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_padding_and_clipping() -> Result<(), ErrPack<TensorOpError>> {
	let t = random([1, 2, 3, 4, 2], 41)?;
	let p = t.padding(2)?;
	assert_eq!(*p.dims(), [1, 2, 7, 8, 2]);
	assert_eq!(p.get([0, 1, 0, 5, 1]), Some(0.0));
	assert_eq!(p.get([0, 1, 2, 2, 1]), t.get([0, 1, 0, 0, 1]));
	assert_eq!(p.clipping(2)?, t);
	assert_eq!(t.clipping(2).unwrap_err().code, TensorOpError::InvalidValue);
	Ok(())
}

#[test]
fn test_rotate180() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 2, 3, 1])?;
	let r = t.rotate180()?;
	assert_eq!(r.data(), &[6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
	assert_eq!(r.rotate180()?, t);
	Ok(())
}

#[test]
fn test_dilate() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([1, 1, 2, 2, 1])?;
	let d = t.dilate(2)?;
	assert_eq!(*d.dims(), [1, 1, 3, 3, 1]);
	assert_eq!(d.data(), &[1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 4.0]);
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[test]
fn test_relu_params() {
	let p = ReluParams { max_value: 6.0, threshold: 1.0, negative_slope: 0.5 };
	assert_approx_eq!(p.apply(7.0), 6.0);
	assert_approx_eq!(p.apply(3.0), 3.0);
	assert_approx_eq!(p.apply(-1.0), -1.0);
	assert_approx_eq!(p.derivative(7.0), 0.0);
	assert_approx_eq!(p.derivative(3.0), 1.0);
	assert_approx_eq!(p.derivative(0.0), 0.5);
}

#[test]
fn test_elementwise_math() -> Result<(), ErrPack<TensorOpError>> {
	let t = Tensor::new(shape([1, 1, 1, 1, 3])?, vec![-2.0, 0.0, 3.0])?;
	assert_eq!(t.relu()?.data(), &[0.0, 0.0, 3.0]);
	assert_eq!(t.relu_mask()?.data(), &[0.0, 0.0, 1.0]);
	assert_eq!(t.pow(2)?.data(), &[4.0, 0.0, 9.0]);
	assert_eq!(t.neg()?.data(), &[2.0, 0.0, -3.0]);
	assert_eq!(t.hinge(1.0)?.data(), &[3.0, 1.0, 0.0]);
	let s = t.sigmoid()?;
	assert_approx_eq!(s.data()[1], 0.5);
	assert_approx_eq!(s.data()[2], 0.952_574_1, 1e-6);
	let e = t.exp()?.log()?;
	assert_approx_eq!(e.data()[0], -2.0, 1e-5);
	assert_approx_eq!(t.find_min(), -2.0);
	assert_approx_eq!(t.find_max(), 3.0);
	Ok(())
}

#[test]
fn test_softmax_sums_to_one() -> Result<(), ErrPack<TensorOpError>> {
	let t = (&random([2, 4, 1, 1, 3], 51)? * 50.0)?;
	let s = t.softmax()?;
	let sums = s.reduce_sum(FRAME)?;
	for &v in sums.data() {
		assert_approx_eq!(v, 1.0, 1e-5);
	}
	assert!(s.data().iter().all(|&v| v > 0.0 && v <= 1.0));
	Ok(())
}

#[test]
fn test_sum_to_shape() -> Result<(), ErrPack<TensorOpError>> {
	let t = counting([2, 1, 1, 2, 3])?;
	let s = t.sum_to_shape(&shape([1, 1, 1, 1, 3])?)?;
	assert_eq!(s.data(), &[22.0, 26.0, 30.0]);
	assert_eq!(t.sum_to_shape(t.shape())?, t);
	Ok(())
}

#[test]
fn test_one_hot() -> Result<(), ErrPack<TensorOpError>> {
	let t = Tensor::new(shape([1, 1, 1, 3, 1])?, vec![7.0, 2.0, 7.0])?;
	let h = t.one_hot(2)?;
	assert_eq!(*h.dims(), [1, 1, 1, 3, 2]);
	assert_eq!(h.data(), &[1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
	assert_eq!(t.one_hot(1).unwrap_err().code, TensorOpError::InvalidValue);
	Ok(())
}

#[test]
fn test_equality_tolerance() -> Result<(), ErrPack<TensorOpError>> {
	let t = random([1, 1, 2, 2, 2], 61)?;
	assert_eq!((&t + 5e-7)?, t);
	assert_ne!((&t + 1e-5)?, t);
	assert_ne!(t.reshape(&shape([1, 1, 1, 4, 2])?)?, t);
	Ok(())
}

#[test]
fn test_random_and_mask() -> Result<(), ErrPack<TensorOpError>> {
	let mut rng = Rng::seed_from_u64(71);
	let r = Tensor::random(shape([4, 1, 1, 1, 50])?, &mut rng)?;
	assert!(r.data().iter().all(|&v| (0.0..1.0).contains(&v)));
	let m = Tensor::mask(shape([4, 1, 1, 1, 50])?, 0.5, &mut rng)?;
	assert!(m.data().iter().all(|&v| v == 0.0 || v == 1.0));
	Ok(())
}

#[test]
fn test_text_round_trip() -> Result<(), ErrPack<TensorOpError>> {
	let t = (&random([1, 2, 1, 3, 2], 81)? - 0.5)?;
	let mut buf = Vec::new();
	t.write_to(&mut buf)?;
	let text = String::from_utf8(buf).unwrap();
	assert!(text.starts_with("1 2 1 3 2\n"));
	let back = Tensor::read_from(&mut Cursor::new(text.as_bytes()))?;
	assert_eq!(back.shape(), t.shape());
	assert_eq!(back.data(), t.data());

	let short = "1 1 1 1 3\n1.0 2.0\n";
	let err = Tensor::read_from(&mut Cursor::new(short.as_bytes())).unwrap_err();
	assert_eq!(err.code, TensorOpError::ParseError);
	Ok(())
}

#[test]
fn test_display() -> Result<(), ErrPack<TensorOpError>> {
	let text = counting([1, 1, 1, 1, 2])?.to_string();
	assert!(text.starts_with("Tensor<1 1 1 1 2>("));
	assert!(text.contains("[ 1.0000000,  2.0000000]"));
	Ok(())
}

//--------------------------------------------------------------------------------------------------
