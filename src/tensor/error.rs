//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;
use std::collections::TryReserveError;
use std::num::{ParseFloatError, ParseIntError};

use crate::{ErrExtra, ErrPack};

use super::Shape;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TensorOpError {
	/// Operand shapes cannot be combined.
	ShapeMismatch,
	/// A shape that cannot exist or does not fit the buffer.
	InvalidShape,
	UnsupportedAxis,
	IndexOutOfBounds,
	AllocFailed,
	InvalidValue,
	IOError,
	ParseError,
}

#[cold]
#[inline(never)]
pub fn err_shape_mismatch(op: &str, a: &Shape, b: &Shape) -> ErrPack<TensorOpError> {
	ErrPack::with_message(
		TensorOpError::ShapeMismatch,
		format!("{op}: incompatible shapes [{a}] and [{b}]"),
	)
}

impl From<TryReserveError> for ErrPack<TensorOpError> {
	#[cold]
	#[inline(never)]
	fn from(err: TryReserveError) -> Self {
		Self {
			code: TensorOpError::AllocFailed,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("tensor buffer allocation failed"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

impl From<std::io::Error> for ErrPack<TensorOpError> {
	fn from(err: std::io::Error) -> Self {
		Self {
			code: TensorOpError::IOError,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("IO error occurred"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

impl From<ParseIntError> for ErrPack<TensorOpError> {
	fn from(err: ParseIntError) -> Self {
		Self {
			code: TensorOpError::ParseError,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("invalid integer"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

impl From<ParseFloatError> for ErrPack<TensorOpError> {
	fn from(err: ParseFloatError) -> Self {
		Self {
			code: TensorOpError::ParseError,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("invalid number"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

//--------------------------------------------------------------------------------------------------
