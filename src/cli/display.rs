//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use console::style;

use crate::domain::models::{Session, Task, TaskStatus, Workflow, WorkflowStatus};

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h)).collect::<Vec<_>>());
    table
}

fn workflow_status_cell(status: WorkflowStatus) -> String {
    let text = status.as_str();
    match status {
        WorkflowStatus::Completed => style(text).green().to_string(),
        WorkflowStatus::Failed | WorkflowStatus::Abandoned => style(text).red().to_string(),
        WorkflowStatus::InProgress | WorkflowStatus::AwaitingMerge => {
            style(text).yellow().to_string()
        }
        _ => text.to_string(),
    }
}

fn task_status_cell(status: TaskStatus) -> String {
    let text = status.as_str();
    match status {
        TaskStatus::Completed => style(text).green().to_string(),
        TaskStatus::Failed => style(text).red().to_string(),
        TaskStatus::InProgress | TaskStatus::Planning => style(text).yellow().to_string(),
        TaskStatus::Skipped => style(text).dim().to_string(),
        _ => text.to_string(),
    }
}

pub fn workflows_table(workflows: &[Workflow]) -> Table {
    let mut table = base_table(&["ID", "NAME", "STATUS", "PARALLEL", "UPDATED"]);
    for wf in workflows {
        table.add_row(vec![
            wf.id.as_str().to_string(),
            wf.name.clone(),
            workflow_status_cell(wf.status),
            wf.max_parallel_tasks.to_string(),
            wf.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table
}

pub fn tasks_table(tasks: &[Task]) -> Table {
    let mut table = base_table(&["SEQ", "ID", "NAME", "STATUS", "GROUP", "AGENT"]);
    for task in tasks {
        table.add_row(vec![
            task.sequence.to_string(),
            task.id.as_str().to_string(),
            task.name.clone(),
            task_status_cell(task.status),
            task.parallel_group.clone().unwrap_or_default(),
            task.assigned_agent_id
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default(),
        ]);
    }
    table
}

pub fn sessions_table(sessions: &[Session]) -> Table {
    let mut table = base_table(&["ID", "PID", "DAEMON", "LAST HEARTBEAT"]);
    for session in sessions {
        table.add_row(vec![
            session.id.as_str().to_string(),
            session.pid.to_string(),
            if session.is_daemon { "yes" } else { "" }.to_string(),
            session.last_heartbeat.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table
}
