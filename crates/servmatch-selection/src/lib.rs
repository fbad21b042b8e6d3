//! Operator selection of workers for scheduled requests.
//!
//! The scheduled protocol hands a ranked candidate list to a
//! [`SelectionProvider`] and blocks until it answers. Providers here cover an
//! interactive console, canned answers for tests, and a JSON script for
//! unattended batch runs.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use servmatch_core::Gender;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "servmatch-selection";

/// Operator answer meaning none of the candidates is suitable.
pub const NOT_AVAILABLE: &str = "not available";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub worker_id: String,
    pub gender: Gender,
    pub capable_works: Vec<String>,
    pub matching_count: usize,
}

/// What the operator is choosing workers for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionContext {
    pub request_id: u32,
    pub customer_id: String,
    pub requested_works: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Worker ids as typed, in order. Not yet checked against the candidates.
    Workers(Vec<String>),
    Unavailable,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("reading operator input: {0}")]
    Io(#[from] std::io::Error),
}

pub trait SelectionProvider {
    fn prompt(
        &mut self,
        context: &SelectionContext,
        candidates: &[Candidate],
    ) -> Result<Selection, SelectionError>;
}

/// Parses one line of operator input.
pub fn parse_operator_input(input: &str) -> Selection {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(NOT_AVAILABLE) {
        return Selection::Unavailable;
    }
    Selection::Workers(
        trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Renders the candidate table shown to the operator.
pub fn render_candidates(context: &SelectionContext, candidates: &[Candidate]) -> String {
    let mut out = format!(
        "Processing scheduled request {} for customer {} ({})\n\nEligible workers:\n",
        context.request_id,
        context.customer_id,
        context.requested_works.join(", ")
    );
    for candidate in candidates {
        out.push_str(&format!(
            "  {} [{}] capable of [{}], matching works: {}\n",
            candidate.worker_id,
            candidate.gender,
            candidate.capable_works.join(", "),
            candidate.matching_count
        ));
    }
    out
}

/// Prompts on a writer and reads one line from a reader.
pub struct ConsoleSelectionProvider<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleSelectionProvider<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl<R: BufRead, W: Write> SelectionProvider for ConsoleSelectionProvider<R, W> {
    fn prompt(
        &mut self,
        context: &SelectionContext,
        candidates: &[Candidate],
    ) -> Result<Selection, SelectionError> {
        write!(self.output, "{}", render_candidates(context, candidates))?;
        writeln!(
            self.output,
            "\nEnter the IDs of workers to assign (separated by space), or type '{NOT_AVAILABLE}' if no workers are suitable:"
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            warn!(request_id = context.request_id, "operator input closed; treating as not available");
            return Ok(Selection::Unavailable);
        }
        Ok(parse_operator_input(&line))
    }
}

/// Replays canned answers in order; once exhausted every prompt is declined.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSelectionProvider {
    answers: VecDeque<String>,
    seen: Vec<SelectionContext>,
}

impl ScriptedSelectionProvider {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            seen: Vec::new(),
        }
    }

    /// Contexts of every prompt answered so far.
    pub fn prompts(&self) -> &[SelectionContext] {
        &self.seen
    }
}

impl SelectionProvider for ScriptedSelectionProvider {
    fn prompt(
        &mut self,
        context: &SelectionContext,
        _candidates: &[Candidate],
    ) -> Result<Selection, SelectionError> {
        self.seen.push(context.clone());
        Ok(self
            .answers
            .pop_front()
            .map(|answer| parse_operator_input(&answer))
            .unwrap_or(Selection::Unavailable))
    }
}

/// Answers keyed by request id, loaded from a JSON object such as
/// `{"12": "W1 W4", "13": "not available"}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SelectionScript {
    answers: BTreeMap<u32, String>,
}

impl SelectionScript {
    pub fn from_answers(answers: impl IntoIterator<Item = (u32, String)>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

pub fn load_selection_script(path: impl AsRef<Path>) -> Result<SelectionScript> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

impl SelectionProvider for SelectionScript {
    fn prompt(
        &mut self,
        context: &SelectionContext,
        _candidates: &[Candidate],
    ) -> Result<Selection, SelectionError> {
        match self.answers.get(&context.request_id) {
            Some(answer) => Ok(parse_operator_input(answer)),
            None => {
                warn!(request_id = context.request_id, "no scripted selection; treating as not available");
                Ok(Selection::Unavailable)
            }
        }
    }
}
