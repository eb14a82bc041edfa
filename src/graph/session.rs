//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::collections::HashMap;

use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::ErrPack;
use crate::tensor::error::err_shape_mismatch;
use crate::tensor::{Shape, Tensor};
use crate::util::cold_path;

use super::error::{err_invalid_node, err_not_evaluated};
use super::ops::InputGrads;
use super::{CollectedGraph, Graph, GraphCollector, GraphError, NodeIndex, NodeKind};

//--------------------------------------------------------------------------------------------------

/// Values of placeholders for one run.
pub type Feed = HashMap<NodeIndex, Tensor>;

/// Evaluates one root of a graph.
///
/// Creating a session compiles the graph for the root: it collects the
/// evaluation plan, infers the shapes of all operations and builds the weights
/// of operations that have not been built yet.
pub struct Session<'g> {
	graph: &'g mut Graph,
	plan: CollectedGraph,
	evaluated: bool,
	grads: HashMap<NodeIndex, Tensor>,
	input_grads: HashMap<NodeIndex, InputGrads>,
}

impl<'g> Session<'g> {
	pub fn new(graph: &'g mut Graph, root: NodeIndex) -> Result<Self, ErrPack<GraphError>> {
		let plan = GraphCollector::collect(graph, root)?;
		let mut shapes: HashMap<NodeIndex, Shape> = HashMap::with_capacity(plan.order().len());
		let mut built_any = false;
		for &index in plan.order() {
			let unbuilt = match graph.node(index)?.kind() {
				NodeKind::Operation(op) if !op.is_built() => Some(op.inputs().first().copied()),
				_ => None,
			};
			if let Some(data_input) = unbuilt {
				let Some(&data_shape) = data_input.and_then(|i| shapes.get(&i)) else {
					cold_path();
					return Err(err_invalid_node(index, "operation has no data input"));
				};
				if graph.build_operation(index, &data_shape)? {
					debug!("session: built weights of {index} for input [{data_shape}]");
					built_any = true;
				}
			}
			let shape = match graph.node(index)?.kind() {
				NodeKind::Placeholder(p) => *p.shape(),
				NodeKind::Variable(v) => *v.value().shape(),
				NodeKind::Operation(op) => {
					let mut in_shapes: SmallVec<[Shape; 3]> = SmallVec::new();
					for &i in op.inputs() {
						let shape = match shapes.get(&i) {
							Some(s) => *s,
							None => match graph.node(i)?.kind() {
								// weights created by the build step above
								NodeKind::Variable(v) => *v.value().shape(),
								_ => return Err(err_invalid_node(i, "input shape is unknown")),
							},
						};
						in_shapes.push(shape);
					}
					op.kind().output_shape(&in_shapes)?
				},
			};
			shapes.insert(index, shape);
		}
		let plan = if built_any { GraphCollector::collect(graph, root)? } else { plan };
		debug!(
			"session: root {root}, {} placeholders, {} variables, {} operations",
			plan.placeholders().len(),
			plan.variables().len(),
			plan.operations().len()
		);
		Ok(Self {
			graph,
			plan,
			evaluated: false,
			grads: HashMap::new(),
			input_grads: HashMap::new(),
		})
	}

	pub fn root(&self) -> NodeIndex {
		self.plan.root()
	}

	pub fn plan(&self) -> &CollectedGraph {
		&self.plan
	}

	pub fn graph(&self) -> &Graph {
		&*self.graph
	}

	/// Access to the graph between runs, e.g. to update variable values.
	pub fn graph_mut(&mut self) -> &mut Graph {
		&mut *self.graph
	}

	//----------------------------------------------------------------------------------------------

	/// Forward pass. Returns the output of the root.
	///
	/// Every node in the plan is evaluated exactly once and its output is cached.
	/// Gradients of a previous backward pass are discarded.
	pub fn run(&mut self, feed: &Feed) -> Result<&Tensor, ErrPack<GraphError>> {
		self.evaluated = false;
		self.grads.clear();
		self.input_grads.clear();

		for &p in self.plan.placeholders() {
			let NodeKind::Placeholder(placeholder) = self.graph.node(p)?.kind() else {
				return Err(err_invalid_node(p, "not a placeholder"));
			};
			let Some(value) = feed.get(&p) else {
				cold_path();
				return Err(ErrPack::with_message(
					GraphError::UnboundPlaceholder,
					format!("placeholder {p} ({}) has no value in the feed", placeholder.name()),
				));
			};
			if value.shape() != placeholder.shape() {
				cold_path();
				let err = err_shape_mismatch(placeholder.name(), placeholder.shape(), value.shape());
				return Err(err.into());
			}
		}
		for key in feed.keys() {
			if !self.plan.contains(*key) {
				warn!("session: feed entry for {key}, which the root {} does not use", self.root());
			}
		}

		debug!("session: run root {}", self.root());
		for &index in self.plan.order() {
			let node = self.graph.node(index)?;
			let output = match node.kind() {
				NodeKind::Placeholder(_) => match feed.get(&index) {
					Some(value) => value.clone(),
					None => return Err(err_invalid_node(index, "placeholder lost its value")),
				},
				NodeKind::Variable(v) => v.value().clone(),
				NodeKind::Operation(op) => {
					let mut inputs: SmallVec<[&Tensor; 3]> = SmallVec::new();
					for &i in op.inputs() {
						let value = self.graph.node(i)?.output();
						inputs.push(value.ok_or_else(|| err_not_evaluated(i, "output"))?);
					}
					op.kind().compute(&inputs)?
				},
			};
			trace!("session: {index} {} -> [{}]", node.name(), output.shape());
			self.graph.node_mut(index)?.output = Some(output);
		}

		self.evaluated = true;
		self.output(self.root())
	}

	/// Backward pass from the root, seeded with ones.
	///
	/// Nodes are visited in reverse evaluation order, so every consumer of a node
	/// has produced its input gradients before the node sums them up. Gradients
	/// of trainable variables are added to their accumulators.
	pub fn backward(&mut self) -> Result<(), ErrPack<GraphError>> {
		let root = self.root();
		if !self.evaluated {
			cold_path();
			return Err(err_not_evaluated(root, "forward output"));
		}
		self.grads.clear();
		self.input_grads.clear();

		debug!("session: backward from root {root}");
		for &index in self.plan.order().iter().rev() {
			let grad = self.collect_grad(index)?;

			let node = self.graph.node(index)?;
			match node.kind() {
				NodeKind::Operation(op) => {
					let output = node.output().ok_or_else(|| err_not_evaluated(index, "output"))?;
					let mut inputs: SmallVec<[&Tensor; 3]> = SmallVec::new();
					for &i in op.inputs() {
						let value = self.graph.node(i)?.output();
						inputs.push(value.ok_or_else(|| err_not_evaluated(i, "output"))?);
					}
					let input_grads = op.kind().gradient(&grad, &inputs, output)?;
					trace!("session: {index} {} gradient [{}]", node.name(), grad.shape());
					self.input_grads.insert(index, input_grads);
				},
				NodeKind::Variable(_) => {
					self.graph.accumulate_grad(index, &grad)?;
				},
				NodeKind::Placeholder(_) => {},
			}
			self.grads.insert(index, grad);
		}
		Ok(())
	}

	/// Sums the contributions of all consumers of `index` that are part of the plan.
	fn collect_grad(&self, index: NodeIndex) -> Result<Tensor, ErrPack<GraphError>> {
		let node = self.graph.node(index)?;
		let output = node.output().ok_or_else(|| err_not_evaluated(index, "output"))?;
		if index == self.root() {
			return Ok(Tensor::ones(*output.shape())?);
		}

		let mut consumers: SmallVec<[NodeIndex; 4]> =
			node.consumers().iter().copied().filter(|&c| self.plan.contains(c)).collect();
		consumers.sort_unstable();
		consumers.dedup();

		let mut sum: Option<Tensor> = None;
		for c in consumers {
			let Some(grads) = self.input_grads.get(&c) else {
				cold_path();
				return Err(err_not_evaluated(c, "input gradient"));
			};
			let slots = self.graph.node(c)?.inputs();
			for (&input, grad) in slots.iter().zip(grads) {
				if input != index {
					continue;
				}
				if let Some(grad) = grad {
					sum = Some(match sum {
						Some(acc) => (&acc + grad)?,
						None => grad.clone(),
					});
				}
			}
		}
		match sum {
			Some(grad) => Ok(grad),
			None => Ok(Tensor::zeros(*output.shape())?),
		}
	}

	//----------------------------------------------------------------------------------------------

	/// Output of a node in the plan, as computed by the last `run()`.
	pub fn output(&self, node: NodeIndex) -> Result<&Tensor, ErrPack<GraphError>> {
		if !self.plan.contains(node) {
			cold_path();
			return Err(err_invalid_node(node, "not part of this session"));
		}
		if !self.evaluated {
			cold_path();
			return Err(err_not_evaluated(node, "output"));
		}
		self.graph.node(node)?.output().ok_or_else(|| err_not_evaluated(node, "output"))
	}

	/// Gradient of the root with respect to the output of `node`, as computed by
	/// the last `backward()`.
	pub fn gradient(&self, node: NodeIndex) -> Result<&Tensor, ErrPack<GraphError>> {
		if !self.plan.contains(node) {
			cold_path();
			return Err(err_invalid_node(node, "not part of this session"));
		}
		self.grads.get(&node).ok_or_else(|| err_not_evaluated(node, "gradient"))
	}
}

//--------------------------------------------------------------------------------------------------
