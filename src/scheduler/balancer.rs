//! Load-balancing policies for worker/task pairing.
//!
//! The balancer is a pure decision function: given the idle workers and the
//! priority-sorted pending tasks of one scheduler tick, it returns the
//! assignment pairs for that tick. It never mutates state, which keeps every
//! policy directly unit-testable.
//!
//! Guarantees, independent of policy:
//!
//! - no worker and no task appears in more than one pair
//! - tasks that no eligible worker can take stay queued (never dropped)
//! - among equally eligible workers the earliest-created wins, so the
//!   decision is deterministic for a given snapshot

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::task::Task;
use crate::workers::Worker;

/// Selectable pairing policy, in increasing order of sophistication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingStrategy {
    /// Pair the Nth idle worker with the Nth pending task, ignoring types.
    /// Baseline and fallback.
    RoundRobin,
    /// Favor workers with the fewest lifetime completions.
    LeastLoad,
    /// Only pair a task with a worker of the identical kind.
    ContentType,
    /// Type match plus a capability check: a worker only takes a task whose
    /// difficulty fits its current quality score.
    #[default]
    Intelligent,
}

impl std::fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BalancingStrategy::RoundRobin => "round-robin",
            BalancingStrategy::LeastLoad => "least-load",
            BalancingStrategy::ContentType => "content-type",
            BalancingStrategy::Intelligent => "intelligent",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for BalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(BalancingStrategy::RoundRobin),
            "least-load" => Ok(BalancingStrategy::LeastLoad),
            "content-type" | "strict-match" => Ok(BalancingStrategy::ContentType),
            "intelligent" => Ok(BalancingStrategy::Intelligent),
            other => Err(format!("unknown balancing strategy '{}'", other)),
        }
    }
}

/// One worker/task pairing produced by the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Worker selected for the task.
    pub worker_id: Uuid,
    /// Task to dispatch.
    pub task_id: Uuid,
}

/// Computes the assignment pairs for one tick.
///
/// `workers` must be the idle workers in pool iteration order (earliest
/// created first); `tasks` must already be sorted in dispatch order. Both
/// orderings carry the tie-break and FIFO guarantees, so callers must not
/// re-sort the inputs.
pub fn plan_assignments(
    strategy: BalancingStrategy,
    workers: &[Worker],
    tasks: &[Task],
) -> Vec<Assignment> {
    if workers.is_empty() || tasks.is_empty() {
        return Vec::new();
    }

    let assignments = match strategy {
        BalancingStrategy::RoundRobin => pair_in_order(workers, tasks),
        BalancingStrategy::LeastLoad => {
            // Stable sort: workers with equal completions keep creation order.
            let mut by_load: Vec<&Worker> = workers.iter().collect();
            by_load.sort_by_key(|w| w.metrics.tasks_completed);
            by_load
                .iter()
                .zip(tasks)
                .map(|(worker, task)| Assignment {
                    worker_id: worker.id,
                    task_id: task.id,
                })
                .collect()
        }
        BalancingStrategy::ContentType => pair_matching(workers, tasks, |worker, task| {
            worker.kind == task.kind
        }),
        BalancingStrategy::Intelligent => pair_matching(workers, tasks, |worker, task| {
            worker.kind == task.kind
                && f64::from(task.source.difficulty) <= worker.metrics.quality_score / 10.0
        }),
    };

    trace!(
        strategy = %strategy,
        workers = workers.len(),
        tasks = tasks.len(),
        paired = assignments.len(),
        "Planned assignments"
    );

    assignments
}

/// Nth worker takes the Nth task.
fn pair_in_order(workers: &[Worker], tasks: &[Task]) -> Vec<Assignment> {
    workers
        .iter()
        .zip(tasks)
        .map(|(worker, task)| Assignment {
            worker_id: worker.id,
            task_id: task.id,
        })
        .collect()
}

/// For each task in dispatch order, the first not-yet-used worker passing
/// `eligible` takes it. Tasks with no eligible worker are skipped and stay
/// queued for a future tick.
fn pair_matching<F>(workers: &[Worker], tasks: &[Task], eligible: F) -> Vec<Assignment>
where
    F: Fn(&Worker, &Task) -> bool,
{
    let mut used = vec![false; workers.len()];
    let mut assignments = Vec::new();

    for task in tasks {
        let slot = workers
            .iter()
            .enumerate()
            .find(|&(index, worker)| !used[index] && eligible(worker, task));

        if let Some((index, worker)) = slot {
            used[index] = true;
            assignments.push(Assignment {
                worker_id: worker.id,
                task_id: task.id,
            });
        }
    }

    assignments
}
