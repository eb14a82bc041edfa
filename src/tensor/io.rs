//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::ErrPack;
use crate::util::cold_path;

use super::{NDIM, Shape, Tensor, TensorOpError, alloc_buffer};

//--------------------------------------------------------------------------------------------------
// Text format:
//
//     <five space separated dims>\n
//     <elements in row-major order, separated by spaces>
//
// Elements are written with 18 significant digits.

impl Tensor {
	pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), ErrPack<TensorOpError>> {
		writeln!(out, "{}", self.shape())?;
		for v in self.data() {
			write!(out, "{v:.17e} ")?;
		}
		writeln!(out)?;
		Ok(())
	}

	pub fn read_from<R: BufRead>(input: &mut R) -> Result<Self, ErrPack<TensorOpError>> {
		let mut line = String::new();
		input.read_line(&mut line)?;
		let shape: Shape = line.trim().parse()?;

		let mut rest = String::new();
		input.read_to_string(&mut rest)?;
		let mut data = alloc_buffer(shape.count())?;
		for token in rest.split_whitespace() {
			if data.len() == shape.count() {
				cold_path();
				return Err(ErrPack::with_message(
					TensorOpError::ParseError,
					format!("more than {} elements for shape [{shape}]", shape.count()),
				));
			}
			data.push(token.parse::<f32>()?);
		}
		if data.len() != shape.count() {
			cold_path();
			return Err(ErrPack::with_message(
				TensorOpError::ParseError,
				format!("expected {} elements, found {}", shape.count(), data.len()),
			));
		}
		Self::new(shape, data)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ErrPack<TensorOpError>> {
		let mut out = BufWriter::new(File::create(path)?);
		self.write_to(&mut out)?;
		out.flush()?;
		Ok(())
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, ErrPack<TensorOpError>> {
		let mut input = BufReader::new(File::open(path)?);
		Self::read_from(&mut input)
	}
}

//--------------------------------------------------------------------------------------------------

fn fmt_one(f: &mut std::fmt::Formatter, val: f32) -> std::fmt::Result {
	let alignment = if val < 0.0 { "" } else { " " };
	write!(f, "{alignment}{val:.7}")
}

fn fmt_nd(
	f: &mut std::fmt::Formatter,
	tensor: &Tensor,
	axis: usize,
	index: [usize; NDIM],
	indent: usize,
) -> std::fmt::Result {
	let dim = tensor.dims().get(axis).copied().unwrap_or(1);
	if axis == NDIM - 1 {
		write!(f, "[")?;
		for i in 0..dim {
			if i != 0 {
				write!(f, ", ")?;
			}
			let mut at = index;
			if let Some(last) = at.last_mut() {
				*last = i;
			}
			fmt_one(f, tensor.at(at))?;
		}
		write!(f, "]")
	} else {
		writeln!(f, "[")?;
		for i in 0..dim {
			for _ in 0..=indent {
				write!(f, "\t")?;
			}
			let mut at = index;
			if let Some(a) = at.get_mut(axis) {
				*a = i;
			}
			fmt_nd(f, tensor, axis + 1, at, indent + 1)?;
			writeln!(f, ",")?;
		}
		for _ in 0..indent {
			write!(f, "\t")?;
		}
		write!(f, "]")
	}
}

impl std::fmt::Display for Tensor {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "Tensor<{}>(", self.shape())?;
		fmt_nd(f, self, 0, [0; NDIM], 0)?;
		write!(f, ")")
	}
}

//--------------------------------------------------------------------------------------------------
