//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use log::{error, info};

use dagnet::rng::Rng;
use dagnet::{ErrPack, Feed, Graph, GraphError, NodeIndex, Session, Shape, Tensor};

const STEPS: usize = 20;
const LEARNING_RATE: f32 = 0.5;

/// Plain gradient descent on every trainable variable.
fn update(graph: &mut Graph, rate: f32) -> Result<(), ErrPack<GraphError>> {
	let trainable: Vec<NodeIndex> =
		graph.variables().filter(|(_, v)| v.trainable()).map(|(i, _)| i).collect();
	for index in trainable {
		let var = graph.variable_mut(index)?;
		let step = (var.grad() * rate)?;
		let value = (var.value() - &step)?;
		var.set_value(value)?;
	}
	graph.zero_grads();
	Ok(())
}

fn main() -> Result<(), ErrPack<GraphError>> {
	let verbosity: usize =
		std::env::args().skip(1).filter(|a| a.starts_with("-v")).map(|a| a.len() - 1).sum();
	if let Err(e) = stderrlog::new().module(module_path!()).verbosity(2 + verbosity).init() {
		eprintln!("failed to initialize logging: {e}");
	}

	let mut rng = Rng::seed_from_u64(7);
	let mut graph = Graph::with_rng(Rng::seed_from_u64(8));

	let x = graph.new_placeholder("x", Shape::new([4, 1, 6, 6, 1])?);
	let y = graph.new_placeholder("y", Shape::new([4, 1, 1, 1, 3])?);
	let c = graph.conv2d(x, 3, 1, 1, 2)?;
	let c = graph.relu(c)?;
	let p = graph.max_pooling(c, 2)?;
	let f = graph.flatten(p)?;
	let fc = graph.full_connected(f, 3)?;
	let pred = graph.sigmoid(fc)?;
	let loss = graph.mse(pred, y)?;

	let mut feed = Feed::new();
	feed.insert(x, Tensor::random(Shape::new([4, 1, 6, 6, 1])?, &mut rng)?);
	feed.insert(y, Tensor::random(Shape::new([4, 1, 1, 1, 3])?, &mut rng)?);

	for step in 0..STEPS {
		let value = {
			let mut session = Session::new(&mut graph, loss)?;
			let value = match session.run(&feed) {
				Ok(l) => l.sum_all(),
				Err(e) => {
					error!("step {step}: {e}");
					return Err(e);
				},
			};
			session.backward()?;
			value
		};
		info!("step {step}: loss = {value:.6}");
		update(&mut graph, LEARNING_RATE)?;
	}

	for (index, var) in graph.variables() {
		info!("{index} {} [{}]", var.name(), var.value().shape());
	}
	Ok(())
}
