//! Dialogue and breakdown strategies
//!
//! The discovery flow and the task breakdown are lookup tables today. Both sit
//! behind a trait so an inference backend can replace them without touching the
//! session state machine or the store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{self, ActionOption, DialogueOption, Task, DISCOVERY_CONTEXT};

/// The last step of the discovery flow, at which the terminal action is offered
pub const FINAL_STEP: usize = 2;

/// One AI turn: the message to show and the options offered after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub message: String,
    pub options: Vec<DialogueOption>,
}

impl Turn {
    pub fn new(message: impl Into<String>, options: Vec<DialogueOption>) -> Self {
        Self {
            message: message.into(),
            options,
        }
    }

    fn prompts(message: &str, options: &[&str]) -> Self {
        Self::new(
            message,
            options.iter().map(|o| DialogueOption::prompt(*o)).collect(),
        )
    }
}

/// Produces the AI side of a discovery session
#[async_trait]
pub trait DialogueScript: Send + Sync {
    /// The turn that opens every session
    fn opening(&self) -> Turn;

    /// The reply to `input`, given the step the session is currently at
    async fn next_turn(&self, step: usize, input: &str) -> Turn;
}

/// Splits a task into subtasks
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, task: &Task) -> Vec<String>;
}

/// The built-in three step script.
///
/// Routing depends only on `step`; the chosen text is recorded in the
/// transcript but never changes the reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedDialogue;

impl ScriptedDialogue {
    /// The pure transition table behind [`DialogueScript::next_turn`]
    pub fn turn_for(step: usize) -> Turn {
        match step {
            0 => Turn::prompts(
                "听起来你需要一些梳理。这件事是关于工作项目，还是个人成长方面的？",
                &["工作项目", "个人成长", "两者都有关联"],
            ),
            1 => Turn::prompts(
                "明白了。如果用一句话描述完成后的理想状态，你会怎么说？",
                &["毫无压力，按部就班", "充满成就感，搞定难题", "理清思绪，知道下一步"],
            ),
            _ => Turn::new(
                "我感觉已经很清晰了。这件事的核心在于“开始第一步”。我为你整理了一个行动卡片，要放入今日计划吗？",
                vec![DialogueOption::Action(ActionOption {
                    display_text: "生成今日任务卡片".to_string(),
                    task_title: "梳理项目启动清单".to_string(),
                    context: DISCOVERY_CONTEXT.to_string(),
                })],
            ),
        }
    }
}

#[async_trait]
impl DialogueScript for ScriptedDialogue {
    fn opening(&self) -> Turn {
        Turn::prompts(
            "Hi，今天感觉如何？有些什么想法想聊聊吗？",
            &[
                "感觉有些焦虑，事情太多",
                "有一个模糊的目标，不知从何下手",
                "只是想找点灵感",
            ],
        )
    }

    async fn next_turn(&self, step: usize, _input: &str) -> Turn {
        Self::turn_for(step)
    }
}

/// Breakdown that always yields the same three subtasks
#[derive(Debug, Clone, Copy, Default)]
pub struct CannedBreakdown;

#[async_trait]
impl Decomposer for CannedBreakdown {
    async fn decompose(&self, _task: &Task) -> Vec<String> {
        models::canned_breakdown()
    }
}
