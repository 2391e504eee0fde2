//! Confirmation decisions
//!
//! The engine asks a [`DecisionProvider`] before continuing past a QA finding,
//! before applying an update or insert, and before committing. The default
//! provider never asks and always continues.

use crate::database::QueryResult;
use crate::qa::CheckKind;

/// Answer to a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead
    Continue,
    /// Leave this table alone and move on
    Skip,
    /// Abort the run and roll back
    Cancel,
}

impl Decision {
    /// Map a chosen button index to a decision
    ///
    /// Index 0 always continues. With two choices any other index cancels;
    /// with three choices index 1 skips and anything else cancels.
    pub fn from_choice(index: usize, choices: &[&str]) -> Self {
        match (index, choices.len()) {
            (0, _) => Decision::Continue,
            (1, 3) => Decision::Skip,
            _ => Decision::Cancel,
        }
    }
}

/// What a confirmation request is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    /// The table list of a run
    Tables,
    /// A failing QA check
    Qa(CheckKind),
    /// The QA summary of failing tables
    QaSummary,
    /// Rows about to be updated
    Update,
    /// Rows about to be inserted
    Insert,
    /// The final commit
    Commit,
    /// Control table contents, shown for information
    Control,
}

/// Two-choice buttons
pub const CONTINUE_CANCEL: &[&str] = &["Continue", "Cancel"];

/// Three-choice buttons
pub const CONTINUE_SKIP_CANCEL: &[&str] = &["Continue", "Skip", "Cancel"];

/// Everything a provider needs to show the operator
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub kind: ConfirmKind,
    pub title: String,
    pub message: String,
    /// Rows the request is about
    pub result: QueryResult,
    /// Rows to show alongside `result`, e.g. the current base rows of an update
    pub compare: Option<QueryResult>,
    pub choices: &'static [&'static str],
}

impl ConfirmRequest {
    pub fn new(
        kind: ConfirmKind,
        title: impl Into<String>,
        message: impl Into<String>,
        result: QueryResult,
        choices: &'static [&'static str],
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            result,
            compare: None,
            choices,
        }
    }

    pub fn with_compare(mut self, compare: QueryResult) -> Self {
        self.compare = Some(compare);
        self
    }
}

/// Source of confirmation decisions
pub trait DecisionProvider {
    fn confirm(&self, request: &ConfirmRequest) -> Decision;
}

/// Non-interactive provider that always continues
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContinue;

impl DecisionProvider for AutoContinue {
    fn confirm(&self, _request: &ConfirmRequest) -> Decision {
        Decision::Continue
    }
}
