//! Discovery session state machine
//!
//! A session walks through the fixed steps of the discovery script. Each user
//! answer puts the session into a thinking state; the reply computed for it is
//! applied later, and only if it still belongs to the same session.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{self, ActionOption, CatalogCase, DialogueMessage, DialogueOption};
use crate::script::{Turn, FINAL_STEP};

/// Identity of one discovery session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("No discovery session is active")]
    NoSession,
    #[error("Still thinking about the previous answer")]
    Busy,
    #[error("'{0}' is not one of the offered options")]
    UnknownOption(String),
    #[error("No action is on offer yet")]
    NoAction,
    #[error("Catalog cases are only available before the final step")]
    CatalogUnavailable,
    #[error("Catalog case {0} does not exist")]
    UnknownCase(u32),
}

/// What the script needs to compute the reply to an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub token: SessionToken,
    pub step: usize,
    pub input: String,
}

/// One run of the scripted dialogue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueSession {
    token: SessionToken,
    messages: Vec<DialogueMessage>,
    current_options: Vec<DialogueOption>,
    step: usize,
    is_thinking: bool,
}

impl DialogueSession {
    /// Opens a session at step 0 with the script's opening turn
    pub fn start(token: SessionToken, opening: Turn) -> Self {
        debug!(token = token.value(), "discovery session started");
        Self {
            token,
            messages: vec![DialogueMessage::ai(opening.message)],
            current_options: opening.options,
            step: 0,
            is_thinking: false,
        }
    }

    /// Records the user's answer and enters the thinking state.
    ///
    /// Options are cleared until the reply arrives, so a second answer cannot
    /// overlap the first one.
    pub fn begin_reply(&mut self, option_text: &str) -> Result<ReplyRequest, DialogueError> {
        if self.is_thinking {
            return Err(DialogueError::Busy);
        }

        let offered = self.current_options.iter().any(|o| match o {
            DialogueOption::Prompt { text } => text == option_text,
            DialogueOption::Action(_) => false,
        });
        if !offered {
            return Err(DialogueError::UnknownOption(option_text.to_string()));
        }

        self.messages.push(DialogueMessage::user(option_text));
        self.current_options.clear();
        self.is_thinking = true;

        debug!(token = self.token.value(), step = self.step, "awaiting reply");

        Ok(ReplyRequest {
            token: self.token,
            step: self.step,
            input: option_text.to_string(),
        })
    }

    /// Applies a reply computed for `token`.
    ///
    /// Returns false and leaves the session untouched when the reply is stale:
    /// it was computed for another session, or nothing is pending.
    pub fn apply_reply(&mut self, token: SessionToken, turn: Turn) -> bool {
        if token != self.token || !self.is_thinking {
            debug!(
                token = token.value(),
                live = self.token.value(),
                "dropping stale reply"
            );
            return false;
        }

        self.messages.push(DialogueMessage::ai(turn.message));
        self.current_options = turn.options;
        self.is_thinking = false;
        if self.step < FINAL_STEP {
            self.step += 1;
        }

        debug!(token = self.token.value(), step = self.step, "reply applied");
        true
    }

    /// The terminal action, if the session currently offers one
    pub fn terminal_action(&self) -> Option<&ActionOption> {
        self.current_options.iter().find_map(|o| match o {
            DialogueOption::Action(action) => Some(action),
            DialogueOption::Prompt { .. } => None,
        })
    }

    /// Like [`terminal_action`](Self::terminal_action), as an error when absent
    pub fn require_action(&self) -> Result<ActionOption, DialogueError> {
        self.terminal_action().cloned().ok_or(DialogueError::NoAction)
    }

    /// Whether catalog cases may be picked as a shortcut right now
    pub fn catalog_available(&self) -> bool {
        self.step < FINAL_STEP && !self.is_thinking && !self.current_options.is_empty()
    }

    /// Resolves a catalog pick, checking that the shortcut is on offer
    pub fn pick_catalog(&self, case_id: u32) -> Result<&'static CatalogCase, DialogueError> {
        if !self.catalog_available() {
            return Err(DialogueError::CatalogUnavailable);
        }
        models::catalog_case(case_id).ok_or(DialogueError::UnknownCase(case_id))
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn messages(&self) -> &[DialogueMessage] {
        &self.messages
    }

    pub fn options(&self) -> &[DialogueOption] {
        &self.current_options
    }

    pub fn is_thinking(&self) -> bool {
        self.is_thinking
    }
}
