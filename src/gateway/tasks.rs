//! Task extraction (spec §4.G): pulls simple numbered task lines out of a
//! cached screen capture for the web client's task panel. Core-internal;
//! the extracted list is never persisted.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    InProgress,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: u32,
    pub text: String,
    pub state: TaskState,
    pub priority: TaskPriority,
}

fn bracket_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.\s*\[([^\]]+)\]\s*(.+)$").unwrap())
}

fn colon_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+)\.\s*(TODO|DONE|IN[\s_-]?PROGRESS|CANCELLED|CANCELED)\s*:\s*(.+)$")
            .unwrap()
    })
}

fn parse_state(raw: &str) -> Option<TaskState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "todo" | "pending" | "open" | "not started" => Some(TaskState::Pending),
        "done" | "complete" | "completed" | "finished" => Some(TaskState::Completed),
        "in progress" | "in_progress" | "in-progress" | "doing" | "working" => {
            Some(TaskState::InProgress)
        }
        "cancelled" | "canceled" | "skipped" | "dropped" => Some(TaskState::Cancelled),
        _ => None,
    }
}

fn priority_for_position(position: usize) -> TaskPriority {
    match position {
        0..=2 => TaskPriority::High,
        3..=9 => TaskPriority::Medium,
        _ => TaskPriority::Low,
    }
}

/// Scan `content` line by line for the two numbered-task line shapes the
/// spec describes, drop duplicate IDs in favor of the earliest match, and
/// assign positional priority over the surviving order.
pub fn extract_tasks(content: &str) -> Vec<Task> {
    let mut seen_ids = std::collections::HashSet::new();
    let mut tasks = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (id_str, state_raw, text) = if let Some(caps) = bracket_pattern().captures(line) {
            (
                caps[1].to_string(),
                caps[2].to_string(),
                caps[3].to_string(),
            )
        } else if let Some(caps) = colon_pattern().captures(line) {
            (
                caps[1].to_string(),
                caps[2].to_string(),
                caps[3].to_string(),
            )
        } else {
            continue;
        };

        let Ok(id) = id_str.parse::<u32>() else {
            continue;
        };
        if !seen_ids.insert(id) {
            continue;
        }
        let Some(state) = parse_state(&state_raw) else {
            continue;
        };

        tasks.push(Task {
            id,
            text: text.trim().to_string(),
            state,
            priority: TaskPriority::Low,
        });
    }

    for (position, task) in tasks.iter_mut().enumerate() {
        task.priority = priority_for_position(position);
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracket_form() {
        let content = "1. [DONE] wire up the gateway\n2. [TODO] add tests";
        let tasks = extract_tasks(content);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].state, TaskState::Completed);
        assert_eq!(tasks[1].state, TaskState::Pending);
    }

    #[test]
    fn extracts_colon_form_with_synonyms() {
        let content = "1. IN PROGRESS:refactor the monitor\n2. CANCELLED:drop dead code";
        let tasks = extract_tasks(content);
        assert_eq!(tasks[0].state, TaskState::InProgress);
        assert_eq!(tasks[1].state, TaskState::Cancelled);
    }

    #[test]
    fn duplicate_ids_keep_the_earlier_match() {
        let content = "1. [TODO] first\n1. [DONE] second";
        let tasks = extract_tasks(content);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "first");
    }

    #[test]
    fn priority_is_positional() {
        let content: String = (1..=12)
            .map(|n| format!("{n}. [TODO] item {n}\n"))
            .collect();
        let tasks = extract_tasks(&content);
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[2].priority, TaskPriority::High);
        assert_eq!(tasks[3].priority, TaskPriority::Medium);
        assert_eq!(tasks[9].priority, TaskPriority::Medium);
        assert_eq!(tasks[10].priority, TaskPriority::Low);
    }
}
