use crate::GraphError;
use crate::program::{Node, ValueId};
use std::collections::{HashMap, VecDeque};

/// Topological sort of nodes based on value dependencies.
///
/// Ties keep recording order, so a freshly traced program runs in the order it was traced.
pub fn topological_sort(nodes: &[Node]) -> Result<Vec<usize>, GraphError> {
    let n = nodes.len();
    let producers: HashMap<ValueId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.output, i))
        .collect();

    let mut in_degree = vec![0; n];
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (j, node) in nodes.iter().enumerate() {
        for input in &node.inputs {
            if let Some(&i) = producers.get(input) {
                graph[i].push(j);
                in_degree[j] += 1;
            }
        }
    }

    // Kahn's algorithm
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut result = Vec::with_capacity(n);
    while let Some(u) = queue.pop_front() {
        result.push(u);
        for &v in &graph[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    if result.len() != n {
        return Err(GraphError::CircularDependency);
    }
    Ok(result)
}

/// Position in `order` after which each value is no longer read.
pub fn last_uses(nodes: &[Node], order: &[usize]) -> HashMap<ValueId, usize> {
    let mut last = HashMap::new();
    for (step, &idx) in order.iter().enumerate() {
        for input in &nodes[idx].inputs {
            last.insert(*input, step);
        }
    }
    last
}
