//! Core models for the mindflow library
//!
//! This module contains the data types shared by the dialogue engine, the task
//! store and the presentation layers, plus the canned content of the scripted flow.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Context label attached to tasks created by the dialogue's terminal action
pub const DISCOVERY_CONTEXT: &str = "探索对话";

/// Context label attached to tasks created through quick-add
pub const QUICK_ADD_CONTEXT: &str = "快速添加";

/// Context label attached to tasks created from a catalog case
pub const CATALOG_CONTEXT: &str = "灵感广场";

/// Id of the task seeded into an empty store
pub const SEED_TASK_ID: &str = "init-1";

lazy_static! {
    static ref CANNED_BREAKDOWN: Vec<String> = vec![
        "调研竞品现有的解决方案".to_string(),
        "列出核心功能点 (MVP)".to_string(),
        "绘制草图或线框图".to_string(),
    ];
    static ref CATALOG: Vec<CatalogCase> = vec![
        CatalogCase {
            id: 1,
            title: "高效早晨流程".to_string(),
            tags: vec!["生活".to_string(), "习惯".to_string()],
            description: "冥想 10 分钟 -> 深度阅读 30 分钟 -> 制定今日计划".to_string(),
        },
        CatalogCase {
            id: 2,
            title: "深度工作冲刺".to_string(),
            tags: vec!["工作".to_string(), "效率".to_string()],
            description: "关闭通知 -> 设置 90 分钟番茄钟 -> 专注核心难点".to_string(),
        },
        CatalogCase {
            id: 3,
            title: "周五复盘模板".to_string(),
            tags: vec!["反思".to_string(), "成长".to_string()],
            description: "回顾本周成就 -> 分析未完成原因 -> 规划下周重点".to_string(),
        },
    ];
}

/// The fixed subtask list produced by the built-in breakdown
pub fn canned_breakdown() -> Vec<String> {
    CANNED_BREAKDOWN.clone()
}

/// The static catalog of example cases offered during discovery
pub fn catalog() -> &'static [CatalogCase] {
    &CATALOG
}

/// Looks up a catalog case by its id
pub fn catalog_case(id: u32) -> Option<&'static CatalogCase> {
    CATALOG.iter().find(|case| case.id == id)
}

/// Unique identifier of a task.
///
/// Serialized as a plain string. Numeric ids written by older versions of the
/// slot are accepted and converted on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, if it is a generated (all-digit) one
    pub fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTaskId {
    Text(String),
    Number(u64),
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawTaskId::deserialize(deserializer)? {
            RawTaskId::Text(s) => TaskId(s),
            RawTaskId::Number(n) => TaskId(n.to_string()),
        })
    }
}

/// A single task on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    title: String,
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtasks: Option<Vec<String>>,
}

impl Task {
    /// Creates a new, not yet completed task without subtasks
    pub fn new(id: TaskId, title: String, context: Option<String>) -> Self {
        Self {
            id,
            title,
            completed: false,
            context,
            subtasks: None,
        }
    }

    /// The task every empty store starts with
    pub fn seed() -> Self {
        Self::new(
            TaskId::new(SEED_TASK_ID),
            "阅读 30 分钟".to_string(),
            Some("晨间习惯".to_string()),
        )
    }

    pub(crate) fn toggle(&mut self) {
        self.completed = !self.completed;
    }

    pub(crate) fn set_subtasks(&mut self, subtasks: Vec<String>) {
        self.subtasks = Some(subtasks);
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The origin label of the task, if any
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn subtasks(&self) -> Option<&[String]> {
        self.subtasks.as_deref()
    }

    /// Whether a breakdown should be offered for this task
    pub fn can_breakdown(&self) -> bool {
        !self.completed && self.subtasks.is_none()
    }
}

/// Who authored a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Ai,
    User,
}

/// One line of the discovery transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub origin: Origin,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl DialogueMessage {
    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Ai,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::User,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// The terminal option of a dialogue: accepting it creates a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOption {
    pub display_text: String,
    pub task_title: String,
    pub context: String,
}

/// A choice offered to the user during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DialogueOption {
    Prompt { text: String },
    Action(ActionOption),
}

impl DialogueOption {
    pub fn prompt(text: impl Into<String>) -> Self {
        DialogueOption::Prompt { text: text.into() }
    }

    /// Text shown on the option's button
    pub fn label(&self) -> &str {
        match self {
            DialogueOption::Prompt { text } => text,
            DialogueOption::Action(action) => &action.display_text,
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self, DialogueOption::Action(_))
    }
}

/// A static example template usable as a shortcut terminal action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCase {
    pub id: u32,
    pub title: String,
    pub tags: Vec<String>,
    pub description: String,
}

/// The top-level screen currently shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Entry,
    Discovery,
    Dashboard,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            View::Entry => "entry",
            View::Discovery => "discovery",
            View::Dashboard => "dashboard",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_accessors() {
        let task = Task::new(TaskId::new("42"), "Write report".to_string(), None);

        assert_eq!(task.id().as_str(), "42");
        assert_eq!(task.title(), "Write report");
        assert!(!task.is_completed());
        assert_eq!(task.context(), None);
        assert_eq!(task.subtasks(), None);
        assert!(task.can_breakdown());
    }

    #[test]
    fn test_can_breakdown_rules() {
        let mut task = Task::seed();
        task.toggle();
        assert!(!task.can_breakdown(), "completed tasks are not broken down");

        task.toggle();
        task.set_subtasks(canned_breakdown());
        assert!(!task.can_breakdown(), "tasks with subtasks are not broken down");
    }

    #[test]
    fn test_task_json_shape_omits_absent_fields() {
        let task = Task::new(TaskId::new("7"), "Plan".to_string(), None);
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "id": "7", "title": "Plan", "completed": false })
        );
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let raw = r#"[{"id": 1700000000000, "title": "Old", "completed": true}]"#;
        let tasks: Vec<Task> = serde_json::from_str(raw).unwrap();

        assert_eq!(tasks[0].id().as_str(), "1700000000000");
        assert_eq!(tasks[0].id().numeric(), Some(1_700_000_000_000));
        assert!(tasks[0].is_completed());
    }

    #[test]
    fn test_option_serialization() {
        let action = DialogueOption::Action(ActionOption {
            display_text: "生成今日任务卡片".to_string(),
            task_title: "梳理项目启动清单".to_string(),
            context: DISCOVERY_CONTEXT.to_string(),
        });
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["kind"], "action");
        assert_eq!(json["taskTitle"], "梳理项目启动清单");
        assert_eq!(action.label(), "生成今日任务卡片");
        assert!(action.is_action());
        assert!(!DialogueOption::prompt("工作项目").is_action());
    }

    #[test]
    fn test_catalog_lookup() {
        assert_eq!(catalog().len(), 3);
        assert_eq!(catalog_case(2).map(|c| c.title.as_str()), Some("深度工作冲刺"));
        assert!(catalog_case(9).is_none());
    }
}
