//! Plan admission and dependency-graph checks.
//!
//! Plans arrive as named tasks whose `depends_on` lists reference sibling
//! task names. Admission rejects duplicate names, unknown names, and
//! directed cycles; the same DFS also guards the scheduler against cycles
//! introduced by manual edge insertion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::domain::errors::{CoreError, CoreResult};

/// A plan as submitted: an ordered list of named tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanInput {
    /// One-line plan summary
    #[serde(default)]
    pub summary: Option<String>,
    /// Tasks in execution-preference order; position becomes `sequence`
    #[serde(default)]
    pub tasks: Vec<PlanTaskInput>,
}

/// One task in a plan input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanTaskInput {
    /// Name, unique within the plan
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Names of sibling tasks this one depends on (`blocks` edges)
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parallel_group: Option<String>,
    /// Optional pre-written task-level plan
    #[serde(default)]
    pub plan: Option<Value>,
}

/// Validate a plan input: names unique and known, no self-dependencies, no
/// directed cycles. Returns the name → position index for resolution.
pub fn validate(plan: &PlanInput) -> CoreResult<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (i, task) in plan.tasks.iter().enumerate() {
        if task.name.trim().is_empty() {
            return Err(CoreError::InvalidPlan(format!(
                "task at position {} has an empty name",
                i + 1
            )));
        }
        if index.insert(task.name.clone(), i).is_some() {
            return Err(CoreError::InvalidPlan(format!(
                "duplicate task name: {}",
                task.name
            )));
        }
    }

    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, task) in plan.tasks.iter().enumerate() {
        for dep in &task.depends_on {
            let dep_index = *index.get(dep).ok_or_else(|| {
                CoreError::InvalidPlan(format!(
                    "task {} depends on unknown task: {dep}",
                    task.name
                ))
            })?;
            if dep_index == i {
                return Err(CoreError::InvalidPlan(format!(
                    "task {} depends on itself",
                    task.name
                )));
            }
            adjacency.entry(i).or_default().push(dep_index);
        }
    }

    if let Some(cycle) = find_cycle(plan.tasks.len(), &adjacency) {
        let names: Vec<&str> = cycle.iter().map(|&i| plan.tasks[i].name.as_str()).collect();
        return Err(CoreError::InvalidPlan(format!(
            "dependency cycle: {}",
            names.join(" -> ")
        )));
    }

    Ok(index)
}

/// DFS cycle detection over an adjacency map keyed by node index. Returns
/// the nodes on a cycle when one exists.
pub fn find_cycle(
    node_count: usize,
    adjacency: &HashMap<usize, Vec<usize>>,
) -> Option<Vec<usize>> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();

    for start in 0..node_count {
        if !visited.contains(&start)
            && dfs(start, adjacency, &mut visited, &mut on_stack, &mut path)
        {
            return Some(path);
        }
    }
    None
}

fn dfs(
    node: usize,
    adjacency: &HashMap<usize, Vec<usize>>,
    visited: &mut HashSet<usize>,
    on_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> bool {
    visited.insert(node);
    on_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = adjacency.get(&node) {
        for &next in neighbors {
            if !visited.contains(&next) {
                if dfs(next, adjacency, visited, on_stack, path) {
                    return true;
                }
            } else if on_stack.contains(&next) {
                if let Some(start) = path.iter().position(|&n| n == next) {
                    path.drain(0..start);
                }
                return true;
            }
        }
    }

    on_stack.remove(&node);
    path.pop();
    false
}

/// Node ids participating in any cycle of an id-keyed edge set. Used by the
/// scheduler to keep manually corrupted graphs from yielding unrunnable
/// work.
pub fn nodes_in_cycles<T: Clone + Eq + std::hash::Hash + Ord>(
    edges: &[(T, T)],
) -> HashSet<T> {
    let mut ids: Vec<T> = edges
        .iter()
        .flat_map(|(a, b)| [a.clone(), b.clone()])
        .collect();
    ids.sort();
    ids.dedup();
    let index: HashMap<&T, usize> = ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for (from, to) in edges {
        adjacency
            .entry(index[from])
            .or_default()
            .push(index[to]);
    }

    // Strip nodes with no outgoing or no incoming edges repeatedly; whatever
    // survives sits on a cycle.
    let mut in_degree = vec![0usize; ids.len()];
    let mut out_degree = vec![0usize; ids.len()];
    for (from, targets) in &adjacency {
        out_degree[*from] += targets.len();
        for t in targets {
            in_degree[*t] += 1;
        }
    }
    let mut removed = vec![false; ids.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for n in 0..ids.len() {
            if !removed[n] && (in_degree[n] == 0 || out_degree[n] == 0) {
                removed[n] = true;
                changed = true;
                if let Some(targets) = adjacency.get(&n) {
                    for &t in targets {
                        if !removed[t] {
                            in_degree[t] = in_degree[t].saturating_sub(1);
                        }
                    }
                }
                for (from, targets) in &adjacency {
                    if !removed[*from] && targets.contains(&n) {
                        out_degree[*from] = out_degree[*from].saturating_sub(1);
                    }
                }
            }
        }
    }

    ids.into_iter()
        .enumerate()
        .filter(|(i, _)| !removed[*i])
        .map(|(_, id)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(tasks: Vec<(&str, Vec<&str>)>) -> PlanInput {
        PlanInput {
            summary: None,
            tasks: tasks
                .into_iter()
                .map(|(name, deps)| PlanTaskInput {
                    name: name.to_string(),
                    depends_on: deps.into_iter().map(str::to_string).collect(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_linear_plan() {
        let input = plan(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);
        let index = validate(&input).unwrap();
        assert_eq!(index["a"], 0);
        assert_eq!(index["c"], 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let input = plan(vec![("a", vec![]), ("a", vec![])]);
        assert!(matches!(validate(&input), Err(CoreError::InvalidPlan(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let input = plan(vec![("a", vec!["ghost"])]);
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let input = plan(vec![("a", vec!["a"])]);
        assert!(matches!(validate(&input), Err(CoreError::InvalidPlan(_))));
    }

    #[test]
    fn test_cycle_rejected() {
        let input = plan(vec![("a", vec!["c"]), ("b", vec!["a"]), ("c", vec!["b"])]);
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let input = plan(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        assert!(validate(&input).is_ok());
    }

    #[test]
    fn test_nodes_in_cycles() {
        // a -> b -> c -> b, d -> a
        let edges = vec![
            ("a", "b"),
            ("b", "c"),
            ("c", "b"),
            ("d", "a"),
        ];
        let cyclic = nodes_in_cycles(&edges);
        assert!(cyclic.contains("b"));
        assert!(cyclic.contains("c"));
        assert!(!cyclic.contains("a"));
        assert!(!cyclic.contains("d"));
    }

    #[test]
    fn test_plan_input_deserializes_from_template_json() {
        let value = json!({
            "summary": "release",
            "tasks": [
                {"name": "tag"},
                {"name": "publish", "depends_on": ["tag"], "parallel_group": "g"}
            ]
        });
        let input: PlanInput = serde_json::from_value(value).unwrap();
        assert_eq!(input.tasks.len(), 2);
        assert_eq!(input.tasks[1].depends_on, vec!["tag"]);
    }
}
