//! Step-graph validation, run when a workflow is activated.
//!
//! Rules enforced:
//! 1. Step IDs must be unique within the workflow.
//! 2. Every `next_steps` entry must name a step of the same workflow.
//! 3. The directed graph must be acyclic (topological sort must succeed).
//! 4. Every active step must be reachable from the entry step.
//!
//! Returns the step IDs in topological order on success.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{EngineError, models::Workflow};

/// Validate the workflow's step graph and return steps in topological order.
///
/// Ties in the order are broken by declaration order, so the result is
/// stable for a given definition.
///
/// # Errors
/// - [`EngineError::DuplicateStepId`] if two steps share an ID.
/// - [`EngineError::UnknownStepReference`] if `next_steps` names a missing step.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
/// - [`EngineError::UnreachableStep`] if an active step cannot be reached.
pub fn validate_graph(workflow: &Workflow) -> Result<Vec<Uuid>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Unique IDs
    // -----------------------------------------------------------------------
    let mut in_degree: IndexMap<Uuid, usize> = IndexMap::with_capacity(workflow.steps.len());
    for step in &workflow.steps {
        if in_degree.insert(step.id, 0).is_some() {
            return Err(EngineError::DuplicateStepId(step.id));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Successor references
    // -----------------------------------------------------------------------
    for step in &workflow.steps {
        for next in &step.next_steps {
            match in_degree.get_mut(next) {
                Some(degree) => *degree += 1,
                None => {
                    return Err(EngineError::UnknownStepReference { step_id: *next, from: step.id });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut queue: VecDeque<Uuid> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted = Vec::with_capacity(workflow.steps.len());
    while let Some(id) = queue.pop_front() {
        sorted.push(id);
        let Some(step) = workflow.step_by_id(id) else { continue };
        for next in &step.next_steps {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if sorted.len() != workflow.steps.len() {
        return Err(EngineError::CycleDetected);
    }

    // -----------------------------------------------------------------------
    // 4. Reachability from the entry step
    // -----------------------------------------------------------------------
    let Some(entry) = workflow.first_step() else {
        return Ok(sorted);
    };

    let mut reached: HashSet<Uuid> = HashSet::from([entry.id]);
    let mut pending = vec![entry.id];
    while let Some(id) = pending.pop() {
        if let Some(step) = workflow.step_by_id(id) {
            for next in &step.next_steps {
                if reached.insert(*next) {
                    pending.push(*next);
                }
            }
        }
    }

    if let Some(orphan) = workflow.steps.iter().find(|s| s.is_active && !reached.contains(&s.id)) {
        return Err(EngineError::UnreachableStep(orphan.id));
    }

    Ok(sorted)
}
