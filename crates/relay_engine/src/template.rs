//! Command templates with named placeholders.
//!
//! A template is a plain string containing `{name}` placeholders. It is
//! parsed and validated once at startup and never mutated; rendering is
//! pure and executes nothing.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ConfigError, TemplateError};

/// Placeholder names owned by the engine. Configuration parameters may
/// not redefine them.
pub const RESERVED: &[&str] = &["batch", "command", "dest", "file"];

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    text: String,
    placeholders: BTreeSet<String>,
}

impl CommandTemplate {
    pub fn parse(text: &str) -> Self {
        let re = Regex::new(r"\{(\w+)\}").expect("placeholder regex is valid");
        let placeholders = re
            .captures_iter(text)
            .map(|cap| cap[1].to_string())
            .collect();
        Self {
            text: text.to_string(),
            placeholders,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.placeholders.contains(name)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// Substitute every placeholder from `params`. Fails if any
    /// placeholder has no value.
    pub fn render(&self, params: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        let mut out = self.text.clone();
        for name in &self.placeholders {
            let value = params
                .get(name)
                .ok_or_else(|| TemplateError(name.clone()))?;
            out = out.replace(&format!("{{{name}}}"), value);
        }
        Ok(out)
    }
}

/// Validate the transfer template's role: a destination plus exactly
/// one source form, `{file}` (per-file invocations) or `{batch}`
/// (grouped invocations). Returns whether batch mode is in effect.
pub fn validate_transfer(template: &CommandTemplate) -> Result<bool, ConfigError> {
    if !template.contains("dest") {
        return Err(ConfigError::MissingPlaceholder {
            role: "transfer",
            placeholder: "dest",
        });
    }
    match (template.contains("file"), template.contains("batch")) {
        (true, false) => Ok(false),
        (false, true) => Ok(true),
        (true, true) => Err(ConfigError::AmbiguousSource),
        (false, false) => Err(ConfigError::MissingPlaceholder {
            role: "transfer",
            placeholder: "file",
        }),
    }
}

/// Validate the remote-execution template's role.
pub fn validate_remote(template: &CommandTemplate) -> Result<(), ConfigError> {
    if !template.contains("command") {
        return Err(ConfigError::MissingPlaceholder {
            role: "remote",
            placeholder: "command",
        });
    }
    Ok(())
}
