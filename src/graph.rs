//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use smallvec::SmallVec;
use thin_vec::ThinVec;

use crate::rng::Rng;
use crate::tensor::error::err_shape_mismatch;
use crate::tensor::math::ReluParams;
use crate::tensor::{FRAME, Shape, Tensor, TensorOpError, WIDTH};
use crate::util::cold_path;
use crate::util::index_vec::IndexVec;
use crate::{ErrPack, define_index_type};

pub mod collect;
pub mod error;
pub mod ops;
pub mod session;


pub use collect::{CollectedGraph, GraphCollector};
pub use error::GraphError;
pub use ops::OpKind;
pub use session::{Feed, Session};

use error::err_invalid_node;

//--------------------------------------------------------------------------------------------------

define_index_type!(NodeIndex);

/// Trainable (or frozen) parameter. The gradient accumulates over backward passes
/// until it is cleared with `zero_grad()`.
pub struct Variable {
	name: String,
	value: Tensor,
	grad: Tensor,
	trainable: bool,
}

impl Variable {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn value(&self) -> &Tensor {
		&self.value
	}

	/// Replaces the value. The shape cannot change.
	pub fn set_value(&mut self, value: Tensor) -> Result<(), ErrPack<TensorOpError>> {
		if value.shape() != self.value.shape() {
			cold_path();
			return Err(err_shape_mismatch(
				"Variable::set_value",
				self.value.shape(),
				value.shape(),
			));
		}
		self.value = value;
		Ok(())
	}

	pub fn grad(&self) -> &Tensor {
		&self.grad
	}

	pub fn zero_grad(&mut self) {
		self.grad.data_mut().fill(0.0);
	}

	pub fn trainable(&self) -> bool {
		self.trainable
	}

	fn accumulate_grad(&mut self, grad: &Tensor) -> Result<(), ErrPack<TensorOpError>> {
		if grad.shape() != self.grad.shape() {
			cold_path();
			return Err(err_shape_mismatch(
				"Variable gradient",
				self.grad.shape(),
				grad.shape(),
			));
		}
		for (acc, &g) in self.grad.data_mut().iter_mut().zip(grad.data()) {
			*acc += g;
		}
		Ok(())
	}
}

/// Input slot. Its value comes from the feed of every run.
pub struct Placeholder {
	name: String,
	shape: Shape,
}

impl Placeholder {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn shape(&self) -> &Shape {
		&self.shape
	}
}

pub struct Operation {
	kind: OpKind,
	inputs: SmallVec<[NodeIndex; 3]>,
}

impl Operation {
	pub fn kind(&self) -> &OpKind {
		&self.kind
	}

	pub fn inputs(&self) -> &[NodeIndex] {
		&self.inputs
	}

	/// False until the build step has created the weights.
	pub fn is_built(&self) -> bool {
		self.inputs.len() == self.kind.input_count()
	}
}

pub enum NodeKind {
	Variable(Variable),
	Placeholder(Placeholder),
	Operation(Operation),
}

pub struct Node {
	kind: NodeKind,
	output: Option<Tensor>,
	consumers: ThinVec<NodeIndex>,
}

impl Node {
	fn new(kind: NodeKind) -> Self {
		Self { kind, output: None, consumers: ThinVec::new() }
	}

	pub fn kind(&self) -> &NodeKind {
		&self.kind
	}

	pub fn name(&self) -> &str {
		match &self.kind {
			NodeKind::Variable(v) => &v.name,
			NodeKind::Placeholder(p) => &p.name,
			NodeKind::Operation(op) => op.kind.name(),
		}
	}

	pub fn inputs(&self) -> &[NodeIndex] {
		match &self.kind {
			NodeKind::Operation(op) => &op.inputs,
			NodeKind::Variable(_) | NodeKind::Placeholder(_) => &[],
		}
	}

	/// Operations that use this node as an input. An operation that uses the
	/// node in several slots is listed once per slot.
	pub fn consumers(&self) -> &[NodeIndex] {
		&self.consumers
	}

	/// Output of the last forward run.
	pub fn output(&self) -> Option<&Tensor> {
		self.output.as_ref()
	}
}

//--------------------------------------------------------------------------------------------------

/// Arena owning every node. Nodes refer to each other by `NodeIndex` and are
/// never removed.
pub struct Graph {
	nodes: IndexVec<NodeIndex, Node>,
	rng: Rng,
}

impl Default for Graph {
	fn default() -> Self {
		Self::new()
	}
}

impl Graph {
	pub fn new() -> Self {
		Self::with_rng(Rng::default())
	}

	/// Weights are initialized from `rng`.
	pub fn with_rng(rng: Rng) -> Self {
		Self { nodes: IndexVec::new(), rng }
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, index: NodeIndex) -> Result<&Node, ErrPack<GraphError>> {
		self.nodes.get(index).ok_or_else(|| err_invalid_node(index, "not in the graph"))
	}

	fn node_mut(&mut self, index: NodeIndex) -> Result<&mut Node, ErrPack<GraphError>> {
		self.nodes.get_mut(index).ok_or_else(|| err_invalid_node(index, "not in the graph"))
	}

	pub fn variable(&self, index: NodeIndex) -> Result<&Variable, ErrPack<GraphError>> {
		match &self.node(index)?.kind {
			NodeKind::Variable(v) => Ok(v),
			_ => Err(err_invalid_node(index, "not a variable")),
		}
	}

	pub fn variable_mut(&mut self, index: NodeIndex) -> Result<&mut Variable, ErrPack<GraphError>> {
		match &mut self.node_mut(index)?.kind {
			NodeKind::Variable(v) => Ok(v),
			_ => Err(err_invalid_node(index, "not a variable")),
		}
	}

	pub fn operation(&self, index: NodeIndex) -> Result<&Operation, ErrPack<GraphError>> {
		match &self.node(index)?.kind {
			NodeKind::Operation(op) => Ok(op),
			_ => Err(err_invalid_node(index, "not an operation")),
		}
	}

	pub fn variables(&self) -> impl Iterator<Item = (NodeIndex, &Variable)> {
		self.nodes.iter_indexed().filter_map(|(i, node)| match &node.kind {
			NodeKind::Variable(v) => Some((i, v)),
			_ => None,
		})
	}

	pub fn zero_grads(&mut self) {
		for node in &mut self.nodes {
			if let NodeKind::Variable(v) = &mut node.kind {
				v.zero_grad();
			}
		}
	}

	pub(crate) fn accumulate_grad(
		&mut self,
		index: NodeIndex,
		grad: &Tensor,
	) -> Result<(), ErrPack<GraphError>> {
		let v = self.variable_mut(index)?;
		if v.trainable {
			v.accumulate_grad(grad)?;
		}
		Ok(())
	}

	//----------------------------------------------------------------------------------------------

	/// New variable with a random value in `[0, 1)` and a zero gradient.
	pub fn new_variable(
		&mut self,
		name: impl Into<String>,
		shape: Shape,
		trainable: bool,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		let value = Tensor::random(shape, &mut self.rng)?;
		self.variable_from(name, value, trainable)
	}

	pub fn variable_from(
		&mut self,
		name: impl Into<String>,
		value: Tensor,
		trainable: bool,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		let grad = Tensor::zeros(*value.shape())?;
		let var = Variable { name: name.into(), value, grad, trainable };
		Ok(self.nodes.push(Node::new(NodeKind::Variable(var))))
	}

	pub fn new_placeholder(&mut self, name: impl Into<String>, shape: Shape) -> NodeIndex {
		let p = Placeholder { name: name.into(), shape };
		self.nodes.push(Node::new(NodeKind::Placeholder(p)))
	}

	/// Adds an operation and registers it as a consumer of each input.
	///
	/// Operations with weights accept either just the data input or the data
	/// input followed by explicit weight nodes.
	pub fn add_op(
		&mut self,
		kind: OpKind,
		inputs: &[NodeIndex],
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		let full = kind.input_count();
		let unbuilt = full - kind.weight_count();
		if inputs.len() != full && inputs.len() != unbuilt {
			cold_path();
			return Err(ErrPack::with_message(
				GraphError::InvalidNode,
				format!("{}: expected {full} inputs, got {}", kind.name(), inputs.len()),
			));
		}
		for &i in inputs {
			self.node(i)?;
		}
		let index = self.nodes.next_index();
		for &i in inputs {
			self.node_mut(i)?.consumers.push(index);
		}
		let op = Operation { kind, inputs: inputs.iter().copied().collect() };
		Ok(self.nodes.push(Node::new(NodeKind::Operation(op))))
	}

	/// Creates the weights of an unbuilt operation, sized from the shape of its data input.
	///
	/// Returns false if there was nothing to build.
	pub(crate) fn build_operation(
		&mut self,
		index: NodeIndex,
		input_shape: &Shape,
	) -> Result<bool, ErrPack<GraphError>> {
		let op = self.operation(index)?;
		if op.is_built() {
			return Ok(false);
		}
		let kind = op.kind;
		let mut weights: SmallVec<[NodeIndex; 2]> = SmallVec::new();
		for (name, shape) in kind.weight_shapes(input_shape)? {
			let w = self.new_variable(format!("{}{index}.{name}", kind.name()), shape, true)?;
			self.node_mut(w)?.consumers.push(index);
			weights.push(w);
		}
		if let NodeKind::Operation(op) = &mut self.node_mut(index)?.kind {
			op.inputs.extend(weights);
		}
		Ok(true)
	}

	//----------------------------------------------------------------------------------------------

	pub fn add(&mut self, x: NodeIndex, y: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Add, &[x, y])
	}

	pub fn matmul(&mut self, x: NodeIndex, y: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::MatMul, &[x, y])
	}

	/// `filters` filters of `width x width`, applied after zero-padding the input by `padding`.
	pub fn conv2d(
		&mut self,
		x: NodeIndex,
		width: usize,
		padding: usize,
		stride: usize,
		filters: usize,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Conv2D { filters, width, padding, stride }, &[x])
	}

	pub fn conv3d(
		&mut self,
		x: NodeIndex,
		width: usize,
		padding: usize,
		stride: usize,
		filters: usize,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Conv3D { filters, width, padding, stride }, &[x])
	}

	pub fn max_pooling(&mut self, x: NodeIndex, width: usize) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::MaxPooling { width }, &[x])
	}

	pub fn min_pooling(&mut self, x: NodeIndex, width: usize) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::MinPooling { width }, &[x])
	}

	pub fn avg_pooling(&mut self, x: NodeIndex, width: usize) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::AvgPooling { width }, &[x])
	}

	pub fn reshape(&mut self, x: NodeIndex, shape: Shape) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Reshape { shape }, &[x])
	}

	/// Keeps the sample and frame axes and merges width, height and channel into the channel axis.
	pub fn flatten(&mut self, x: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Flatten { axis: WIDTH }, &[x])
	}

	pub fn full_connected(
		&mut self,
		x: NodeIndex,
		outputs: usize,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::FullConnected { outputs }, &[x])
	}

	pub fn sigmoid(&mut self, x: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Sigmoid, &[x])
	}

	pub fn relu(&mut self, x: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::ReLU, &[x])
	}

	pub fn leaky_relu(
		&mut self,
		x: NodeIndex,
		params: ReluParams,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::LeakyReLU { params }, &[x])
	}

	/// Softmax along the frame axis.
	pub fn softmax(&mut self, x: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::Softmax { axis: FRAME }, &[x])
	}

	pub fn mse(&mut self, pred: NodeIndex, target: NodeIndex) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::MSE, &[pred, target])
	}

	pub fn cross_entropy(
		&mut self,
		pred: NodeIndex,
		target: NodeIndex,
	) -> Result<NodeIndex, ErrPack<GraphError>> {
		self.add_op(OpKind::CrossEntropy, &[pred, target])
	}
}

//--------------------------------------------------------------------------------------------------
