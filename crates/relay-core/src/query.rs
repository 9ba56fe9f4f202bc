//! Gerrit search query construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};

/// A Gerrit age operand such as `90m`, `1d` or `2w`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxAge {
    text: String,
    seconds: u64,
}

impl MaxAge {
    /// Parse `<number><unit>` with units `s`, `m`/`min`, `h`, `d`, `w`
    /// (long forms such as `hours` or `days` are accepted too).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (amount, unit) = text.split_at(split);

        let amount: u64 = amount
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid max age {text:?}")))?;
        let unit_seconds = match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            "w" | "week" | "weeks" => 604_800,
            _ => {
                return Err(RelayError::Config(format!(
                    "invalid max age unit in {text:?}"
                )))
            }
        };
        if amount == 0 {
            return Err(RelayError::Config("max age must be positive".to_string()));
        }

        let seconds = amount
            .checked_mul(unit_seconds)
            .filter(|s| i64::try_from(*s).is_ok())
            .ok_or_else(|| RelayError::Config(format!("max age {text:?} is too large")))?;

        Ok(Self {
            text: text.to_string(),
            seconds,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

impl std::fmt::Display for MaxAge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Filters for the open-change search.
///
/// Renders to Gerrit query syntax. A `raw` query replaces every builder
/// filter except the age cutoff, which is always appended when given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeQuery {
    pub project: Option<String>,
    pub branch: Option<String>,
    /// Labels whose presence excludes a change (e.g. the CI vote label).
    pub exclude_labels: Vec<String>,
    /// Subject/message substrings that exclude a change.
    pub exclude_subjects: Vec<String>,
    pub raw: Option<String>,
}

impl ChangeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    pub fn branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_string());
        self
    }

    pub fn exclude_label(mut self, label: &str) -> Self {
        self.exclude_labels.push(label.to_string());
        self
    }

    pub fn exclude_subject(mut self, text: &str) -> Self {
        self.exclude_subjects.push(text.to_string());
        self
    }

    pub fn raw(mut self, query: &str) -> Self {
        self.raw = Some(query.to_string());
        self
    }

    /// Render the `q=` parameter.
    pub fn render(&self, max_age: Option<&MaxAge>) -> String {
        let mut terms: Vec<String> = Vec::new();

        match &self.raw {
            Some(raw) => terms.push(raw.trim().to_string()),
            None => {
                terms.push("status:open".to_string());
                if let Some(project) = &self.project {
                    terms.push(format!("project:{}", quote_operand(project)));
                }
                if let Some(branch) = &self.branch {
                    terms.push(format!("branch:{}", quote_operand(branch)));
                }
                for label in &self.exclude_labels {
                    terms.push(format!("-label:{}", quote_operand(label)));
                }
                for text in &self.exclude_subjects {
                    terms.push(format!("-message:{}", quote_always(text)));
                }
            }
        }

        // `-age:X` selects changes updated within the last X.
        if let Some(age) = max_age {
            terms.push(format!("-age:{age}"));
        }

        terms.join(" ")
    }
}

fn quote_operand(value: &str) -> String {
    if value.contains(|c: char| c.is_whitespace() || c == '"') {
        quote_always(value)
    } else {
        value.to_string()
    }
}

fn quote_always(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}
