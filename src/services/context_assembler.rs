//! Context assembler: packages workflow and task history into a
//! bounded-token payload for one agent invocation.
//!
//! Token estimation is the chars/4 heuristic; budgets are fixed fractions
//! of the caller's token budget. Overruns are corrected by a single
//! rebalancing pass that compresses the largest section.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    SqliteCheckpointRepository, SqliteTaskRepository, SqliteWorkflowRepository,
};
use crate::domain::errors::CoreResult;
use crate::domain::ids::{TaskId, WorkflowId};
use crate::domain::models::{Task, TaskStatus};

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Default token budget for one payload.
const DEFAULT_MAX_TOKENS: usize = 8_000;

/// Budget shares per section.
const WORKFLOW_SHARE: f64 = 0.15;
const CURRENT_TASK_SHARE: f64 = 0.55;
const PRIOR_TASKS_SHARE: f64 = 0.20;
const SIBLINGS_SHARE: f64 = 0.10;

/// Checkpoints kept for the current task unless all are requested.
const RECENT_CHECKPOINTS: u32 = 5;

/// File-list entries kept per checkpoint before the summary tail.
const MAX_FILES_LISTED: usize = 10;

/// Estimate tokens for a string with the chars/4 rule.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Options for assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInclude {
    /// Keep the full checkpoint history instead of the recent window
    pub all_checkpoints: bool,
}

/// Workflow framing for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    pub id: WorkflowId,
    pub name: String,
    pub status: String,
    pub plan_summary: Option<String>,
    /// Source content, truncated to the section budget
    pub source_summary: Option<String>,
}

/// Compressed checkpoint for the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub sequence: u32,
    pub checkpoint_type: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub files_changed: Vec<String>,
}

/// The task being executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTaskSection {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub plan: Option<Value>,
    pub context: Option<Value>,
    pub checkpoints: Vec<CheckpointSummary>,
}

/// A neighboring task, compressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub status: String,
    pub outcome: Option<String>,
}

/// A blocking dependency's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyOutcome {
    pub name: String,
    pub outcome: Option<String>,
}

/// The assembled payload handed to the spawner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledContext {
    pub workflow: Option<WorkflowSection>,
    pub current_task: Option<CurrentTaskSection>,
    pub prior_tasks: Vec<TaskSummary>,
    pub sibling_tasks: Vec<TaskSummary>,
    pub dependency_outcomes: Vec<DependencyOutcome>,
    /// Final chars/4 estimate of the payload
    pub token_estimate: usize,
}

#[derive(Clone)]
pub struct ContextAssembler {
    tasks: SqliteTaskRepository,
    workflows: SqliteWorkflowRepository,
    checkpoints: SqliteCheckpointRepository,
}

impl ContextAssembler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            tasks: SqliteTaskRepository::new(pool.clone()),
            workflows: SqliteWorkflowRepository::new(pool.clone()),
            checkpoints: SqliteCheckpointRepository::new(pool),
        }
    }

    /// Assemble the payload for one task within `max_tokens` (default
    /// 8000).
    pub async fn load_task_context(
        &self,
        task_id: &TaskId,
        include: ContextInclude,
        max_tokens: Option<usize>,
    ) -> CoreResult<AssembledContext> {
        let max_tokens = max_tokens.unwrap_or(DEFAULT_MAX_TOKENS).max(1);
        let task = self.tasks.require(task_id).await?;
        let workflow = self.workflows.require(&task.workflow_id).await?;
        let all_tasks = self.tasks.list_by_workflow(&task.workflow_id).await?;

        let workflow_budget = share(max_tokens, WORKFLOW_SHARE);
        let current_budget = share(max_tokens, CURRENT_TASK_SHARE);
        let prior_budget = share(max_tokens, PRIOR_TASKS_SHARE);
        let sibling_budget = share(max_tokens, SIBLINGS_SHARE);

        let workflow_section = WorkflowSection {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            status: workflow.status.as_str().to_string(),
            plan_summary: workflow.plan_summary.clone(),
            source_summary: workflow
                .source_content
                .as_deref()
                .map(|s| truncate_to_tokens(s, workflow_budget)),
        };

        let checkpoints = if include.all_checkpoints {
            self.checkpoints.list_for_task(task_id).await?
        } else {
            self.checkpoints.list_recent(task_id, RECENT_CHECKPOINTS).await?
        };
        let checkpoint_summaries: Vec<CheckpointSummary> = checkpoints
            .into_iter()
            .map(|cp| CheckpointSummary {
                sequence: cp.sequence,
                checkpoint_type: cp.checkpoint_type.as_str().to_string(),
                summary: cp.summary,
                files_changed: cap_file_list(cp.files_changed.unwrap_or_default()),
            })
            .collect();

        let current_section = CurrentTaskSection {
            id: task.id.clone(),
            name: task.name.clone(),
            description: task
                .description
                .as_deref()
                .map(|d| truncate_to_tokens(d, current_budget)),
            plan: task.plan.clone(),
            context: task.context.clone(),
            checkpoints: checkpoint_summaries,
        };

        // Prior tasks chronologically; an explicit context_from list
        // restricts and orders the selection.
        let prior_tasks: Vec<TaskSummary> = match &task.context_from {
            Some(explicit) => explicit
                .iter()
                .filter_map(|id| all_tasks.iter().find(|t| &t.id == id))
                .map(summarize)
                .collect(),
            None => all_tasks
                .iter()
                .filter(|t| t.sequence < task.sequence && t.id != task.id)
                .map(summarize)
                .collect(),
        };

        let sibling_tasks: Vec<TaskSummary> = match &task.parallel_group {
            Some(group) => all_tasks
                .iter()
                .filter(|t| t.id != task.id && t.parallel_group.as_deref() == Some(group))
                .map(summarize)
                .collect(),
            None => Vec::new(),
        };

        let dependency_outcomes: Vec<DependencyOutcome> = self
            .tasks
            .satisfied_blockers(task_id)
            .await?
            .into_iter()
            .map(|b| {
                let outcome = all_tasks
                    .iter()
                    .find(|t| t.id == b.id)
                    .and_then(|t| t.outcome.clone());
                DependencyOutcome {
                    name: b.name,
                    outcome,
                }
            })
            .collect();

        let mut assembled = AssembledContext {
            workflow: Some(workflow_section),
            current_task: Some(current_section),
            prior_tasks,
            sibling_tasks,
            dependency_outcomes,
            token_estimate: 0,
        };

        // Trim the array sections to their own budgets from the tail.
        trim_summaries(&mut assembled.prior_tasks, prior_budget);
        trim_summaries(&mut assembled.sibling_tasks, sibling_budget);

        assembled.token_estimate = estimate(&assembled);
        if assembled.token_estimate > max_tokens {
            rebalance(&mut assembled);
            assembled.token_estimate = estimate(&assembled);
        }
        Ok(assembled)
    }
}

fn share(max_tokens: usize, fraction: f64) -> usize {
    ((max_tokens as f64) * fraction).floor() as usize
}

fn summarize(task: &Task) -> TaskSummary {
    TaskSummary {
        id: task.id.clone(),
        name: task.name.clone(),
        status: task.status.as_str().to_string(),
        outcome: if task.status == TaskStatus::Completed {
            task.outcome.clone()
        } else {
            task.outcome_detail.clone()
        },
    }
}

/// Cap a file list at `MAX_FILES_LISTED`, replacing the overflow with a
/// summary tail.
fn cap_file_list(mut files: Vec<String>) -> Vec<String> {
    if files.len() > MAX_FILES_LISTED {
        let dropped = files.len() - MAX_FILES_LISTED;
        files.truncate(MAX_FILES_LISTED);
        files.push(format!("... and {dropped} more"));
    }
    files
}

/// Truncate text to a token budget, preferring a newline boundary.
fn truncate_to_tokens(text: &str, token_budget: usize) -> String {
    let max_chars = token_budget * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = text
        .char_indices()
        .take_while(|(i, _)| *i <= max_chars)
        .last()
        .map_or(0, |(i, _)| i);
    let cut = text[..boundary].rfind('\n').unwrap_or(boundary);
    format!("{}\n[truncated]", &text[..cut])
}

/// Drop array entries from the tail until the section fits its budget.
fn trim_summaries(summaries: &mut Vec<TaskSummary>, token_budget: usize) {
    while summaries.len() > 1 {
        let size = serde_json::to_string(&summaries)
            .map(|s| estimate_tokens(&s))
            .unwrap_or(0);
        if size <= token_budget {
            break;
        }
        summaries.pop();
    }
}

fn section_estimate<T: Serialize>(section: &T) -> usize {
    serde_json::to_string(section)
        .map(|s| estimate_tokens(&s))
        .unwrap_or(0)
}

fn estimate(assembled: &AssembledContext) -> usize {
    section_estimate(&assembled.workflow)
        + section_estimate(&assembled.current_task)
        + section_estimate(&assembled.prior_tasks)
        + section_estimate(&assembled.sibling_tasks)
        + section_estimate(&assembled.dependency_outcomes)
}

/// One rebalancing pass: compress the largest section. The workflow section
/// shrinks its source summary, the current-task section drops older
/// checkpoints, array sections drop from the tail.
fn rebalance(assembled: &mut AssembledContext) {
    let sizes = [
        section_estimate(&assembled.workflow),
        section_estimate(&assembled.current_task),
        section_estimate(&assembled.prior_tasks),
        section_estimate(&assembled.sibling_tasks),
        section_estimate(&assembled.dependency_outcomes),
    ];
    let largest = sizes
        .iter()
        .enumerate()
        .max_by_key(|(_, size)| **size)
        .map_or(0, |(i, _)| i);

    match largest {
        0 => {
            if let Some(workflow) = &mut assembled.workflow {
                if let Some(summary) = &mut workflow.source_summary {
                    let keep = summary.len() / 2;
                    let boundary = summary
                        .char_indices()
                        .take_while(|(i, _)| *i <= keep)
                        .last()
                        .map_or(0, |(i, _)| i);
                    summary.truncate(boundary);
                    summary.push_str("\n[truncated]");
                }
            }
        }
        1 => {
            if let Some(current) = &mut assembled.current_task {
                let len = current.checkpoints.len();
                if len > 2 {
                    current.checkpoints.drain(0..len - 2);
                }
            }
        }
        2 => drop_tail_half(&mut assembled.prior_tasks),
        3 => drop_tail_half(&mut assembled.sibling_tasks),
        _ => {
            let len = assembled.dependency_outcomes.len();
            assembled.dependency_outcomes.truncate(len.div_ceil(2));
        }
    }
}

fn drop_tail_half(summaries: &mut Vec<TaskSummary>) {
    let len = summaries.len();
    summaries.truncate(len.div_ceil(2));
}
