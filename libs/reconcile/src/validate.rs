//! Structural validation of parent specs.

use std::fmt;

use thiserror::Error;

use crate::types::ParentSpec;
use crate::RANDOM_PLACEHOLDER;

const RULES_PATH: &str = "spec.template.spec.rules";

/// A single problem found in a parent spec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    /// A templated field does not contain the random placeholder.
    #[error("{path}: Invalid value: {value:?}: missing {placeholder} placeholder", placeholder = RANDOM_PLACEHOLDER)]
    MissingPlaceholder { path: FieldPath, value: String },
}

impl FieldError {
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::MissingPlaceholder { path, .. } => path,
        }
    }
}

/// Structural path to a field, e.g. `spec.template.spec.rules[1].host`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    fn rule_host(index: usize) -> Self {
        Self(format!("{RULES_PATH}[{index}].host"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a parent spec.
///
/// Returns one error per offending rule, ordered by rule index. An empty
/// vector means the spec is valid.
pub fn validate_spec(spec: &ParentSpec) -> Vec<FieldError> {
    spec.template
        .spec
        .rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| !rule.host.contains(RANDOM_PLACEHOLDER))
        .map(|(i, rule)| FieldError::MissingPlaceholder {
            path: FieldPath::rule_host(i),
            value: rule.host.clone(),
        })
        .collect()
}

/// Render validation errors as a single status message.
///
/// A lone error is rendered as-is; several are joined with `, ` and wrapped
/// in brackets.
pub fn aggregate_message(errors: &[FieldError]) -> String {
    match errors {
        [] => String::new(),
        [only] => only.to_string(),
        many => {
            let joined: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("[{}]", joined.join(", "))
        }
    }
}
