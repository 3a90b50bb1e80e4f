mod execution;
mod value;

use crate::{GraphError, Op};
use ndarray::ArrayD;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

pub use value::{Binding, Constant, ConstantData, Node, ValueId};

/// Program builder. Values are numbered in the order they are created.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    next_id: u32,
    inputs: Vec<Binding>,
    outputs: Vec<Binding>,
    constants: BTreeMap<ValueId, Constant>,
    constant_ids: HashMap<String, ValueId>,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&mut self) -> ValueId {
        let id = ValueId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Declare a named graph input
    pub fn add_input(&mut self, name: impl Into<String>) -> ValueId {
        let id = self.fresh_id();
        self.inputs.push(Binding {
            name: name.into(),
            value: id,
        });
        id
    }

    /// Register a constant. Registering the same name twice returns the first value.
    pub fn add_constant(&mut self, name: &str, tensor: Arc<ArrayD<f32>>) -> ValueId {
        if let Some(&id) = self.constant_ids.get(name) {
            return id;
        }
        let id = self.fresh_id();
        self.constants.insert(
            id,
            Constant {
                name: name.to_string(),
                data: ConstantData::Float32(tensor),
            },
        );
        self.constant_ids.insert(name.to_string(), id);
        id
    }

    /// Add a node to the program
    pub fn add_node(&mut self, op: Op, inputs: Vec<ValueId>) -> ValueId {
        let output = self.fresh_id();
        trace!("{} = {}({:?})", output, op.name(), inputs);
        self.nodes.push(Node { op, inputs, output });
        output
    }

    pub fn mark_output(&mut self, name: impl Into<String>, value: ValueId) -> &mut Self {
        self.outputs.push(Binding {
            name: name.into(),
            value,
        });
        self
    }

    /// Build and validate the program
    pub fn build(self) -> Result<Program, GraphError> {
        Program::from_parts(self.inputs, self.outputs, self.constants, self.nodes)
    }
}

/// A validated tensor program ready for execution.
#[derive(Debug, Clone)]
pub struct Program {
    inputs: Vec<Binding>,
    outputs: Vec<Binding>,
    constants: BTreeMap<ValueId, Constant>,
    nodes: Vec<Node>,
    execution_order: Vec<usize>,
    last_use: HashMap<ValueId, usize>,
}

impl Program {
    /// Assemble a program from its parts, checking that every value is defined exactly once
    /// before use and that the node graph is acyclic.
    pub fn from_parts(
        inputs: Vec<Binding>,
        outputs: Vec<Binding>,
        constants: BTreeMap<ValueId, Constant>,
        nodes: Vec<Node>,
    ) -> Result<Self, GraphError> {
        if outputs.is_empty() {
            return Err(GraphError::NoOutputs);
        }

        let mut defined = HashSet::new();
        let definitions = inputs
            .iter()
            .map(|b| b.value)
            .chain(constants.keys().copied())
            .chain(nodes.iter().map(|n| n.output));
        for id in definitions {
            if !defined.insert(id) {
                return Err(GraphError::DuplicateValue(id));
            }
        }

        for node in &nodes {
            if node.inputs.len() != node.op.arity() {
                return Err(GraphError::Arity {
                    op: node.op.name(),
                    expected: node.op.arity(),
                    actual: node.inputs.len(),
                });
            }
            if let Some(missing) = node.inputs.iter().find(|id| !defined.contains(id)) {
                return Err(GraphError::UndefinedValue(*missing));
            }
        }
        if let Some(missing) = outputs.iter().find(|b| !defined.contains(&b.value)) {
            return Err(GraphError::UndefinedValue(missing.value));
        }

        let execution_order = execution::topological_sort(&nodes)?;
        let last_use = execution::last_uses(&nodes, &execution_order);

        debug!(
            "Program built: {} inputs, {} constants, {} nodes, {} outputs",
            inputs.len(),
            constants.len(),
            nodes.len(),
            outputs.len()
        );

        Ok(Self {
            inputs,
            outputs,
            constants,
            nodes,
            execution_order,
            last_use,
        })
    }

    pub fn inputs(&self) -> &[Binding] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Binding] {
        &self.outputs
    }

    pub fn constants(&self) -> &BTreeMap<ValueId, Constant> {
        &self.constants
    }

    pub(crate) fn constants_mut(&mut self) -> &mut BTreeMap<ValueId, Constant> {
        &mut self.constants
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Total number of scalar weights held as constants.
    pub fn parameter_count(&self) -> usize {
        self.constants.values().map(|c| c.data.element_count()).sum()
    }

    /// Serialized size of all constants in bytes.
    pub fn weight_bytes(&self) -> usize {
        self.constants.values().map(|c| c.data.byte_size()).sum()
    }

    /// Execute the program.
    ///
    /// Intermediate values are dropped after their last reader runs. The returned map is
    /// keyed by output name.
    pub fn run(
        &self,
        feeds: &HashMap<String, ArrayD<f32>>,
    ) -> Result<HashMap<String, ArrayD<f32>>, GraphError> {
        let mut values: HashMap<ValueId, Arc<ArrayD<f32>>> = HashMap::new();

        for binding in &self.inputs {
            let feed = feeds
                .get(&binding.name)
                .ok_or_else(|| GraphError::MissingInput(binding.name.clone()))?;
            values.insert(binding.value, Arc::new(feed.clone()));
        }
        for (id, constant) in &self.constants {
            let tensor = match &constant.data {
                ConstantData::Float32(t) => Arc::clone(t),
                ConstantData::Int8(q) => Arc::new(q.dequantize()),
            };
            values.insert(*id, tensor);
        }

        let retained: HashSet<ValueId> = self.outputs.iter().map(|b| b.value).collect();
        for (step, &idx) in self.execution_order.iter().enumerate() {
            let node = &self.nodes[idx];
            let args = node
                .inputs
                .iter()
                .map(|id| values.get(id).ok_or(GraphError::UndefinedValue(*id)))
                .collect::<Result<Vec<_>, _>>()?;
            let arg_refs: Vec<&ArrayD<f32>> = args.iter().map(|a| a.as_ref()).collect();
            let result = node.op.evaluate(&arg_refs)?;
            values.insert(node.output, Arc::new(result));

            for id in &node.inputs {
                if self.last_use.get(id) == Some(&step) && !retained.contains(id) {
                    values.remove(id);
                }
            }
        }

        let mut results = HashMap::with_capacity(self.outputs.len());
        for binding in &self.outputs {
            let value = values
                .get(&binding.value)
                .ok_or(GraphError::UndefinedValue(binding.value))?;
            results.insert(binding.name.clone(), value.as_ref().clone());
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn feeds(x: ArrayD<f32>) -> HashMap<String, ArrayD<f32>> {
        HashMap::from([("x".to_string(), x)])
    }

    #[test]
    fn test_build_and_run_linear_program() {
        let mut b = GraphBuilder::new();
        let x = b.add_input("x");
        let w = b.add_constant(
            "w",
            Arc::new(ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![2.0, -1.0]).unwrap()),
        );
        let bias = b.add_constant("b", Arc::new(ArrayD::from_elem(IxDyn(&[1]), 0.5)));
        let y = b.add_node(Op::Linear, vec![x, w, bias]);
        let r = b.add_node(Op::Relu, vec![y]);
        b.mark_output("y", y).mark_output("r", r);
        let program = b.build().unwrap();

        assert_eq!(program.parameter_count(), 3);
        assert_eq!(program.weight_bytes(), 12);

        let input = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, 4.0]).unwrap();
        let out = program.run(&feeds(input)).unwrap();
        assert_eq!(out["y"][[0, 0]], -1.5);
        assert_eq!(out["r"][[0, 0]], 0.0);
    }

    #[test]
    fn test_constants_are_deduplicated_by_name() {
        let mut b = GraphBuilder::new();
        let t = Arc::new(ArrayD::zeros(IxDyn(&[2])));
        let first = b.add_constant("w", Arc::clone(&t));
        let second = b.add_constant("w", t);
        assert_eq!(first, second);
    }

    #[test]
    fn test_undefined_value_is_rejected() {
        let nodes = vec![Node {
            op: Op::Relu,
            inputs: vec![ValueId(7)],
            output: ValueId(1),
        }];
        let outputs = vec![Binding {
            name: "y".into(),
            value: ValueId(1),
        }];
        let err = Program::from_parts(Vec::new(), outputs, BTreeMap::new(), nodes).unwrap_err();
        assert!(matches!(err, GraphError::UndefinedValue(ValueId(7))));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let inputs = vec![Binding {
            name: "x".into(),
            value: ValueId(0),
        }];
        let nodes = vec![
            Node {
                op: Op::Relu,
                inputs: vec![ValueId(2)],
                output: ValueId(1),
            },
            Node {
                op: Op::Relu,
                inputs: vec![ValueId(1)],
                output: ValueId(2),
            },
        ];
        let outputs = vec![Binding {
            name: "y".into(),
            value: ValueId(2),
        }];
        let err = Program::from_parts(inputs, outputs, BTreeMap::new(), nodes).unwrap_err();
        assert!(matches!(err, GraphError::CircularDependency));
    }

    #[test]
    fn test_missing_feed() {
        let mut b = GraphBuilder::new();
        let x = b.add_input("x");
        let y = b.add_node(Op::Relu, vec![x]);
        b.mark_output("y", y);
        let program = b.build().unwrap();
        assert!(matches!(
            program.run(&HashMap::new()),
            Err(GraphError::MissingInput(name)) if name == "x"
        ));
    }

    #[test]
    fn test_program_without_outputs_is_rejected() {
        let mut b = GraphBuilder::new();
        b.add_input("x");
        assert!(matches!(b.build(), Err(GraphError::NoOutputs)));
    }
}
