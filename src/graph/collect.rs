//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use bit_set::BitSet;

use crate::ErrPack;

use super::{Graph, GraphError, NodeIndex, NodeKind};

//--------------------------------------------------------------------------------------------------

/// Everything the root depends on, in dependency order.
///
/// Each node appears exactly once. In `order`, every node comes after all of its inputs.
pub struct CollectedGraph {
	root: NodeIndex,
	placeholders: Vec<NodeIndex>,
	variables: Vec<NodeIndex>,
	operations: Vec<NodeIndex>,
	order: Vec<NodeIndex>,
	members: BitSet,
}

impl CollectedGraph {
	pub fn root(&self) -> NodeIndex {
		self.root
	}

	pub fn placeholders(&self) -> &[NodeIndex] {
		&self.placeholders
	}

	pub fn variables(&self) -> &[NodeIndex] {
		&self.variables
	}

	pub fn operations(&self) -> &[NodeIndex] {
		&self.operations
	}

	/// All nodes in evaluation order.
	pub fn order(&self) -> &[NodeIndex] {
		&self.order
	}

	pub fn contains(&self, node: NodeIndex) -> bool {
		self.members.contains(node.raw)
	}
}

//--------------------------------------------------------------------------------------------------

/// Post-order depth-first traversal from a root.
///
/// The traversal keeps an explicit stack instead of recursing, so deep chains
/// of operations cannot overflow the call stack.
pub struct GraphCollector<'a> {
	graph: &'a Graph,
	visited: BitSet,
	// (node, index of the next input to visit)
	stack: Vec<(NodeIndex, usize)>,
	result: CollectedGraph,
}

impl<'a> GraphCollector<'a> {
	pub fn collect(graph: &'a Graph, root: NodeIndex) -> Result<CollectedGraph, ErrPack<GraphError>> {
		graph.node(root)?;
		let mut collector = Self {
			graph,
			visited: BitSet::with_capacity(graph.len()),
			stack: Vec::new(),
			result: CollectedGraph {
				root,
				placeholders: Vec::new(),
				variables: Vec::new(),
				operations: Vec::new(),
				order: Vec::new(),
				members: BitSet::new(),
			},
		};
		collector.visit(root)?;
		Ok(collector.result)
	}

	fn visit(&mut self, root: NodeIndex) -> Result<(), ErrPack<GraphError>> {
		self.visited.insert(root.raw);
		self.stack.push((root, 0));
		while let Some((node, next)) = self.stack.last_mut() {
			let node = *node;
			let inputs = self.graph.node(node)?.inputs();
			if let Some(&child) = inputs.get(*next) {
				*next += 1;
				if self.visited.insert(child.raw) {
					self.stack.push((child, 0));
				}
			} else {
				self.stack.pop();
				self.emit(node)?;
			}
		}
		Ok(())
	}

	fn emit(&mut self, node: NodeIndex) -> Result<(), ErrPack<GraphError>> {
		let result = &mut self.result;
		match self.graph.node(node)?.kind() {
			NodeKind::Placeholder(_) => result.placeholders.push(node),
			NodeKind::Variable(_) => result.variables.push(node),
			NodeKind::Operation(_) => result.operations.push(node),
		}
		result.order.push(node);
		result.members.insert(node.raw);
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------
