//! Per-task progress and the combined view emitted to the caller.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::provider::ProviderId;

/// Last progress report of one running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub name: String,
    pub message: String,
    pub position: u32,
    pub max: u32,
}

impl TaskProgress {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: "searching".to_string(),
            position: 0,
            max: 0,
        }
    }
}

/// Progress across every task of a session: one line per running task,
/// positions and maxima summed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchProgress {
    pub message: String,
    pub position: u64,
    pub max: u64,
}

pub fn combine(tasks: &BTreeMap<ProviderId, TaskProgress>) -> SearchProgress {
    let mut lines = Vec::with_capacity(tasks.len());
    let mut position = 0u64;
    let mut max = 0u64;
    for p in tasks.values() {
        lines.push(format!("{}: {}", p.name, p.message));
        position += u64::from(p.position);
        max += u64::from(p.max);
    }
    SearchProgress {
        message: lines.join("\n"),
        position,
        max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line_per_task() {
        let mut tasks = BTreeMap::new();
        tasks.insert(ProviderId(2), TaskProgress::started("Amazon"));
        tasks.insert(
            ProviderId(1),
            TaskProgress {
                name: "Google Books".into(),
                message: "page 1".into(),
                position: 1,
                max: 3,
            },
        );
        let p = combine(&tasks);
        assert_eq!(p.message, "Google Books: page 1\nAmazon: searching");
        assert_eq!((p.position, p.max), (1, 3));
    }

    #[test]
    fn nothing_running() {
        assert_eq!(combine(&BTreeMap::new()), SearchProgress::default());
    }
}
