//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::tensor::TensorOpError;

use super::NodeIndex;

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
	/// A placeholder reachable from the root has no entry in the feed.
	UnboundPlaceholder,
	/// Outputs or gradients were requested before they were computed.
	NotEvaluated,
	InvalidNode,
	TensorOp(TensorOpError),
}

impl From<ErrPack<TensorOpError>> for ErrPack<GraphError> {
	fn from(err: ErrPack<TensorOpError>) -> Self {
		Self { code: GraphError::TensorOp(err.code), extra: err.extra }
	}
}

#[cold]
#[inline(never)]
pub fn err_invalid_node(node: NodeIndex, problem: &str) -> ErrPack<GraphError> {
	ErrPack::with_message(GraphError::InvalidNode, format!("node {node}: {problem}"))
}

#[cold]
#[inline(never)]
pub fn err_not_evaluated(node: NodeIndex, what: &str) -> ErrPack<GraphError> {
	ErrPack::with_message(GraphError::NotEvaluated, format!("node {node}: {what} is not available"))
}

//--------------------------------------------------------------------------------------------------
