// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Log Forwarding Rules
//!
//! A rules file is a JSON array:
//!
//! ```json
//! [
//!   { "regexp": ["joined the game$", "left the game$"],
//!     "webhook": [{ "content": "$0" }] }
//! ]
//! ```
//!
//! For each log line, every rule is tried. Within a rule the first matching
//! expression wins and each webhook payload is posted once with `$0`, `$1`, ...
//! replaced by the capture groups of that match.

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogRulesError {
    #[error("Malformed rules file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid expression '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    regexp: Vec<String>,
    #[serde(default)]
    webhook: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct LogRule {
    expressions: Vec<Regex>,
    payloads: Vec<Value>,
}

/// Compiled rules of one rules file
#[derive(Debug, Clone, Default)]
pub struct LogRules {
    rules: Vec<LogRule>,
}

impl LogRules {
    /// Parse and compile a rules document. One bad expression rejects the file.
    pub fn parse(json: &str) -> Result<Self, LogRulesError> {
        let raw: Vec<RawRule> = serde_json::from_str(json)?;
        let rules = raw
            .into_iter()
            .map(|rule| {
                let expressions = rule
                    .regexp
                    .iter()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|source| LogRulesError::Regex {
                            pattern: pattern.clone(),
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(LogRule {
                    expressions,
                    payloads: rule.webhook,
                })
            })
            .collect::<Result<Vec<_>, LogRulesError>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Payloads to post for one log line, in rule order
    pub fn render(&self, line: &str) -> Vec<Value> {
        let mut payloads = Vec::new();
        for rule in &self.rules {
            let Some(captures) = rule.expressions.iter().find_map(|re| re.captures(line)) else {
                continue;
            };
            payloads.extend(rule.payloads.iter().map(|p| substitute(p, &captures)));
        }
        payloads
    }
}

/// Replace `$N` placeholders in every string of a JSON value.
///
/// Higher indices are replaced first so `$10` is not consumed by `$1`.
pub fn substitute(value: &Value, captures: &Captures<'_>) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for index in (0..captures.len()).rev() {
                let text = captures.get(index).map_or("", |m| m.as_str());
                out = out.replace(&format!("${}", index), text);
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, captures)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, captures)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Debug, Error)]
#[error("Webhook delivery failed: {0}")]
pub struct WebhookError(pub String);

/// Outbound webhook port
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &Value) -> Result<(), WebhookError>;
}
