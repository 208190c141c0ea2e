//! Job graph validation. Runs before any step is validated or executed.
//!
//! Rules enforced:
//! 1. Step IDs must be unique within the job.
//! 2. Every edge must reference existing steps (both `producer` and `consumer`).
//! 3. A consumer key has at most one producer.
//! 4. The directed graph must be acyclic (topological sort must succeed).
//!
//! Returns a topologically-sorted list of step IDs on success. Among steps
//! that are ready at the same time, the one declared first goes first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::{Job, JobError};

/// Validate the job's dependency graph and return steps in execution order.
///
/// # Errors
/// - [`JobError::DuplicateStep`] if two steps share an ID.
/// - [`JobError::UnknownStepReference`] if an edge references a missing step.
/// - [`JobError::ConflictingProducers`] if a consumer key is fed twice.
/// - [`JobError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(job: &Job) -> Result<Vec<String>, JobError> {
    let steps = job.steps();

    // -----------------------------------------------------------------------
    // 1. Ensure step IDs are unique
    // -----------------------------------------------------------------------
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.id.as_str(), i).is_some() {
            return Err(JobError::DuplicateStep(step.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints and 3. single producer per key
    // -----------------------------------------------------------------------
    let mut fed: HashSet<(&str, &str)> = HashSet::new();
    for edge in job.edges() {
        if !index.contains_key(edge.producer.as_str()) {
            return Err(JobError::UnknownStepReference {
                step: edge.producer.clone(),
                side: "producer",
            });
        }
        if !index.contains_key(edge.consumer.as_str()) {
            return Err(JobError::UnknownStepReference {
                step: edge.consumer.clone(),
                side: "consumer",
            });
        }
        if !fed.insert((edge.consumer.as_str(), edge.key.as_str())) {
            return Err(JobError::ConflictingProducers {
                consumer: edge.consumer.clone(),
                key: edge.key.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm, declaration order on ties)
    // -----------------------------------------------------------------------
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut in_degree: Vec<usize> = vec![0; steps.len()];

    let mut seen_pairs: HashSet<(usize, usize)> = HashSet::new();
    for edge in job.edges() {
        let from = index[edge.producer.as_str()];
        let to = index[edge.consumer.as_str()];
        // Several keys between the same two steps are one dependency.
        if seen_pairs.insert((from, to)) {
            adjacency[from].push(to);
            in_degree[to] += 1;
        }
    }

    // Seed the queue with steps that depend on nothing.
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(steps.len());

    while let Some(Reverse(i)) = ready.pop() {
        sorted.push(steps[i].id.clone());
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    // If we didn't visit every step the graph contains a cycle.
    if sorted.len() != steps.len() {
        let remaining: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] > 0).collect();
        let cycle = find_cycle(&adjacency, &remaining)
            .into_iter()
            .map(|i| steps[i].id.clone())
            .collect();
        return Err(JobError::CycleDetected { cycle });
    }

    Ok(sorted)
}

/// Walk the leftover graph until a step repeats. Every step left after
/// Kahn's algorithm has an unvisited predecessor, so following edges inside
/// the leftover set always closes a loop.
fn find_cycle(adjacency: &[Vec<usize>], remaining: &[usize]) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    // Predecessor walk: pick any leftover step that points at the current one.
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let Some(prev) = remaining
            .iter()
            .copied()
            .find(|&p| adjacency[p].contains(&current))
        else {
            return path;
        };
        if let Some(&at) = position.get(&prev) {
            // Found the loop; report it in edge direction, closed.
            let mut cycle: Vec<usize> = path[at..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return cycle;
        }
        position.insert(prev, path.len());
        path.push(prev);
        current = prev;
    }
}
