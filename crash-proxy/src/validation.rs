//! Per-route validation of crash reports.
//!
//! # Route policies
//!
//! Each ingestion path has a [`RoutePolicy`] in [`ROUTE_POLICIES`]. The two
//! policies only differ in how they treat `date`:
//!
//! ```text
//! /krakencrashreporter/krakencrashes  (new)     date required, strictly formatted
//! /k2crashreporter/k2crashes          (legacy)  date must be empty
//! ```
//!
//! Retiring the legacy index means deleting its entry from the table.
//!
//! # Check order
//!
//! Checks short-circuit in a fixed order, which decides the message a client
//! sees when several rules are broken: route, date presence, date format,
//! task size, task pattern, log size, log content.

use crate::config::Limits;
use crate::message::CrashReportMessage;
use thiserror::Error;

/// How a route treats the `date` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateRule {
    /// Non-empty and matching [`is_valid_timestamp`]
    Required,
    /// Absent or empty
    Empty,
}

impl DateRule {
    fn violation_message(&self) -> &'static str {
        match self {
            DateRule::Required => "Expected date",
            DateRule::Empty => "Unexpected date",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Short name, used as rate limit key and metric tag
    pub name: &'static str,
    pub path: &'static str,
    pub date: DateRule,
}

pub const NEW_INDEX: RoutePolicy = RoutePolicy {
    name: "new",
    path: "/krakencrashreporter/krakencrashes",
    date: DateRule::Required,
};

pub const LEGACY_INDEX: RoutePolicy = RoutePolicy {
    name: "legacy",
    path: "/k2crashreporter/k2crashes",
    date: DateRule::Empty,
};

pub const ROUTE_POLICIES: &[RoutePolicy] = &[NEW_INDEX, LEGACY_INDEX];

impl RoutePolicy {
    pub fn for_path(path: &str) -> Option<&'static RoutePolicy> {
        ROUTE_POLICIES.iter().find(|policy| policy.path == path)
    }
}

/// Why a crash report was refused. The display text is returned to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Invalid CrashApp data found, Invalid elasticsearch index")]
    InvalidRoute,

    #[error("Invalid CrashApp data found, {}", .expected.violation_message())]
    DateRequirementViolation { expected: DateRule },

    #[error("Invalid CrashApp data found, Invalid date format")]
    InvalidDateFormat,

    #[error("Invalid CrashApp data found, FailedTask is too large {len} > max {max}")]
    FailedTaskTooLarge { len: usize, max: usize },

    #[error("Invalid CrashApp data found, Task not found in KrakenLog")]
    TaskPatternMissing,

    #[error("Invalid CrashApp data found, KrakenLog is too large {len} > max {max}")]
    LogTooLarge { len: usize, max: usize },

    #[error("Invalid CrashApp data found, Invalid KrakenLog")]
    InvalidLogContent,
}

impl Rejection {
    /// Stable identifier for logs and metric tags.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InvalidRoute => "invalid_route",
            Rejection::DateRequirementViolation { .. } => "date_requirement",
            Rejection::InvalidDateFormat => "invalid_date_format",
            Rejection::FailedTaskTooLarge { .. } => "failed_task_too_large",
            Rejection::TaskPatternMissing => "task_pattern_missing",
            Rejection::LogTooLarge { .. } => "log_too_large",
            Rejection::InvalidLogContent => "invalid_log_content",
        }
    }
}

/// Validates decoded crash reports against the route policies and size ceilings.
#[derive(Clone, Debug)]
pub struct Validator {
    max_log_chars: usize,
    max_failed_task_chars: usize,
}

impl Validator {
    pub fn new(limits: &Limits) -> Self {
        Self {
            max_log_chars: limits.max_log_chars,
            max_failed_task_chars: limits.max_failed_task_chars,
        }
    }

    /// Validates `message` as submitted to `path`.
    pub fn validate(&self, path: &str, message: &CrashReportMessage) -> Result<(), Rejection> {
        self.validate_for(RoutePolicy::for_path(path), message)
    }

    /// Validates `message` under `policy`; `None` stands for an unknown route.
    pub fn validate_for(
        &self,
        policy: Option<&RoutePolicy>,
        message: &CrashReportMessage,
    ) -> Result<(), Rejection> {
        let policy = policy.ok_or(Rejection::InvalidRoute)?;

        match policy.date {
            DateRule::Required => {
                if !message.has_date() {
                    return Err(Rejection::DateRequirementViolation {
                        expected: DateRule::Required,
                    });
                }
                if !is_valid_timestamp(&message.date) {
                    return Err(Rejection::InvalidDateFormat);
                }
            }
            DateRule::Empty => {
                if message.has_date() {
                    return Err(Rejection::DateRequirementViolation {
                        expected: DateRule::Empty,
                    });
                }
            }
        }

        if let Some(len) = exceeding_len(&message.failed_task, self.max_failed_task_chars) {
            return Err(Rejection::FailedTaskTooLarge {
                len,
                max: self.max_failed_task_chars,
            });
        }
        if !has_task_separator(&message.failed_task) {
            return Err(Rejection::TaskPatternMissing);
        }

        if let Some(len) = exceeding_len(&message.log, self.max_log_chars) {
            return Err(Rejection::LogTooLarge {
                len,
                max: self.max_log_chars,
            });
        }
        if !has_play_marker(&message.log) || !has_task_marker(&message.log) {
            return Err(Rejection::InvalidLogContent);
        }

        Ok(())
    }
}

// Character count of `value` when it is above `max`.
fn exceeding_len(value: &str, max: usize) -> Option<usize> {
    // A string never has more characters than bytes
    if value.len() <= max {
        return None;
    }
    let len = value.chars().count();
    (len > max).then_some(len)
}

const TIMESTAMP_TEMPLATE: &[u8; 24] = b"2###-##-##T##:##:##.###Z";
const TASK_SEPARATOR: &[u8; 3] = b" : ";
const PLAY_MARKER: &str = "PLAY";
const TASK_MARKER: &str = "TASK [";

/// Starts with `YYYY-MM-DDTHH:MM:SS.mmmZ` and a year beginning with `2`, e.g.
/// `2017-09-26T15:56:49.012Z`. Anything after the `Z` is accepted. Only the
/// shape is checked, not the calendar.
pub fn is_valid_timestamp(date: &str) -> bool {
    let bytes = date.as_bytes();
    bytes.len() >= TIMESTAMP_TEMPLATE.len()
        && bytes
            .iter()
            .zip(TIMESTAMP_TEMPLATE)
            .all(|(&b, &t)| match t {
                b'#' => b.is_ascii_digit(),
                _ => b == t,
            })
}

/// `component : action`: a `" : "` with at least one character other than a
/// newline directly on each side.
pub fn has_task_separator(task: &str) -> bool {
    task.as_bytes()
        .windows(TASK_SEPARATOR.len())
        .enumerate()
        .filter(|(_, window)| *window == TASK_SEPARATOR)
        .any(|(i, _)| {
            let before = task[..i].chars().next_back();
            let after = task[i + TASK_SEPARATOR.len()..].chars().next();
            is_line_char(before) && is_line_char(after)
        })
}

/// The log mentions a play.
pub fn has_play_marker(log: &str) -> bool {
    log.contains(PLAY_MARKER)
}

/// `TASK [name]` with a non-empty name on a single line. The name may itself
/// contain `]`.
pub fn has_task_marker(log: &str) -> bool {
    log.match_indices(TASK_MARKER).any(|(i, _)| {
        let rest = &log[i + TASK_MARKER.len()..];
        let line = rest.split('\n').next().unwrap_or_default();
        let mut chars = line.chars();
        chars.next().is_some() && chars.as_str().contains(']')
    })
}

fn is_line_char(c: Option<char>) -> bool {
    matches!(c, Some(c) if c != '\n')
}
