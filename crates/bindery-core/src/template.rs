//! `{placeholder}` path templates: validation, resolution, and preview.
//!
//! # Design
//! - Resolution is a single left-to-right pass. Substituted values are never
//!   scanned again, so a title containing `{author}` stays literal.
//! - Unknown or malformed placeholders survive resolution verbatim; catching
//!   them is the job of [`validate_template`], which callers run when a
//!   template is stored or previewed.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::sanitize::sanitize;

/// Placeholder names a stored template may reference.
pub const ALLOWED_PLACEHOLDERS: [&str; 4] = ["author", "series", "series_number", "title"];

/// Errors raised while validating a template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The template is empty or whitespace.
    #[error("template is empty")]
    Empty,
    /// A `{` was never closed or a `}` was never opened.
    #[error("unbalanced brace at byte {position}")]
    Unbalanced {
        /// Byte offset of the offending brace.
        position: usize,
    },
    /// A `{` appeared inside another placeholder.
    #[error("nested placeholder at byte {position}")]
    Nested {
        /// Byte offset of the nested brace.
        position: usize,
    },
    /// `{}` with no name.
    #[error("empty placeholder at byte {position}")]
    EmptyPlaceholder {
        /// Byte offset of the opening brace.
        position: usize,
    },
    /// A placeholder outside [`ALLOWED_PLACEHOLDERS`].
    #[error("unknown placeholder '{{{name}}}'")]
    UnknownPlaceholder {
        /// Placeholder name as written.
        name: String,
    },
}

/// Convenience alias for template results.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Values substituted into a template, keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    /// Empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables for a book; absent series fields resolve to empty strings.
    #[must_use]
    pub fn book(
        author: &str,
        title: &str,
        series: Option<&str>,
        series_number: Option<&str>,
    ) -> Self {
        let mut vars = Self::new();
        vars.insert("author", author);
        vars.insert("title", title);
        vars.insert("series", series.unwrap_or_default());
        vars.insert("series_number", series_number.unwrap_or_default());
        vars
    }

    /// Set a variable, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Copy with every value passed through [`sanitize`].
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            values: self
                .values
                .iter()
                .map(|(name, value)| (name.clone(), sanitize(value)))
                .collect(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for TemplateVars
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Substitute known `{name}` placeholders in a single pass.
#[must_use]
pub fn resolve(template: &str, vars: &TemplateVars) -> String {
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        resolved.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substitution = after
            .find('}')
            .and_then(|close| vars.get(&after[..close]).map(|value| (value, close)));
        if let Some((value, close)) = substitution {
            resolved.push_str(value);
            rest = &after[close + 1..];
        } else {
            resolved.push('{');
            rest = after;
        }
    }
    resolved.push_str(rest);
    resolved
}

/// Reject templates a user should not be allowed to store.
///
/// # Errors
///
/// Returns the first structural problem found scanning left to right.
pub fn validate_template(template: &str) -> TemplateResult<()> {
    if template.trim().is_empty() {
        return Err(TemplateError::Empty);
    }

    let mut open: Option<usize> = None;
    for (position, ch) in template.char_indices() {
        match (ch, open) {
            ('{', Some(_)) => return Err(TemplateError::Nested { position }),
            ('{', None) => open = Some(position),
            ('}', None) => return Err(TemplateError::Unbalanced { position }),
            ('}', Some(start)) => {
                let name = &template[start + 1..position];
                if name.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder { position: start });
                }
                if !ALLOWED_PLACEHOLDERS.contains(&name) {
                    return Err(TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                    });
                }
                open = None;
            }
            _ => {}
        }
    }

    match open {
        Some(position) => Err(TemplateError::Unbalanced { position }),
        None => Ok(()),
    }
}

/// Validate, sanitize the values, and resolve: what a path would look like.
///
/// # Errors
///
/// Returns [`TemplateError`] when the template fails validation.
pub fn preview(template: &str, vars: &TemplateVars) -> TemplateResult<String> {
    validate_template(template)?;
    Ok(resolve(template, &vars.sanitized()))
}
