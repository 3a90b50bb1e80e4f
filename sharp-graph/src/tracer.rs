//! Execution context threaded through a module's forward pass.
//!
//! In eager mode ops simply run. In recording mode every op also lands in a
//! [`GraphBuilder`], so one forward pass over a concrete input yields a [`Program`] that
//! replays exactly those ops. The recorded program is specialized to the shapes seen
//! during that pass.

use crate::program::{GraphBuilder, Program, ValueId};
use crate::{GraphError, Op};
use ndarray::ArrayD;
use std::sync::Arc;

/// A tensor flowing through a [`Tracer`].
#[derive(Debug, Clone)]
pub struct Var {
    id: ValueId,
    value: Arc<ArrayD<f32>>,
}

impl Var {
    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Take the tensor out, copying only if other handles still share it.
    pub fn into_value(self) -> ArrayD<f32> {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

#[derive(Debug)]
pub struct Tracer {
    builder: Option<GraphBuilder>,
    next_eager_id: u32,
    ops_applied: usize,
}

impl Tracer {
    /// Run ops without recording them.
    pub fn eager() -> Self {
        Self {
            builder: None,
            next_eager_id: 0,
            ops_applied: 0,
        }
    }

    /// Run ops and record them into a program.
    pub fn recording() -> Self {
        Self {
            builder: Some(GraphBuilder::new()),
            next_eager_id: 0,
            ops_applied: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.builder.is_some()
    }

    /// Number of ops applied so far.
    pub fn ops_applied(&self) -> usize {
        self.ops_applied
    }

    fn eager_id(&mut self) -> ValueId {
        let id = ValueId(self.next_eager_id);
        self.next_eager_id += 1;
        id
    }

    /// Introduce a named graph input.
    pub fn input(&mut self, name: &str, value: ArrayD<f32>) -> Var {
        let id = match &mut self.builder {
            Some(builder) => builder.add_input(name),
            None => self.eager_id(),
        };
        Var {
            id,
            value: Arc::new(value),
        }
    }

    /// Introduce a named constant such as a layer weight.
    pub fn constant(&mut self, name: &str, value: &Arc<ArrayD<f32>>) -> Var {
        let id = match &mut self.builder {
            Some(builder) => builder.add_constant(name, Arc::clone(value)),
            None => self.eager_id(),
        };
        Var {
            id,
            value: Arc::clone(value),
        }
    }

    /// Evaluate `op` on `inputs`, recording it when tracing.
    pub fn apply(&mut self, op: Op, inputs: &[&Var]) -> Result<Var, GraphError> {
        let args: Vec<&ArrayD<f32>> = inputs.iter().map(|v| v.value.as_ref()).collect();
        let result = op.evaluate(&args)?;
        self.ops_applied += 1;

        let id = match &mut self.builder {
            Some(builder) => builder.add_node(op, inputs.iter().map(|v| v.id).collect()),
            None => self.eager_id(),
        };
        Ok(Var {
            id,
            value: Arc::new(result),
        })
    }

    /// Close the recording, naming the program outputs in order.
    pub fn finish(self, outputs: &[(&str, &Var)]) -> Result<Program, GraphError> {
        let mut builder = self.builder.ok_or(GraphError::NotRecording)?;
        for (name, var) in outputs {
            builder.mark_output(*name, var.id);
        }
        builder.build()
    }
}
