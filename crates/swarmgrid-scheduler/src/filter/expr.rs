//! `key==value` / `key!=value` placement expressions.
//!
//! Values are matched case-insensitively and may contain `*` wildcards.
//! A value wrapped in slashes (`/^db-[0-9]+$/`) is a regular expression.

use regex::Regex;

use crate::error::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
}

/// A parsed placement expression.
#[derive(Debug, Clone)]
pub struct Expr {
    pub key: String,
    pub operator: Operator,
    pub value: String,
    pattern: Regex,
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let invalid = |reason: &str| FilterError::InvalidExpression {
            expr: input.to_string(),
            reason: reason.to_string(),
        };

        let (key, operator, value) = if let Some((k, v)) = input.split_once("!=") {
            (k, Operator::NotEq, v)
        } else if let Some((k, v)) = input.split_once("==") {
            (k, Operator::Eq, v)
        } else {
            return Err(invalid("expected key==value or key!=value"));
        };

        let key = key.trim();
        let value = value.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
        {
            return Err(invalid("invalid key"));
        }
        if value.is_empty() {
            return Err(invalid("missing value"));
        }

        let source = match value.strip_prefix('/').and_then(|v| v.strip_suffix('/')) {
            Some(re) if !re.is_empty() => re.to_string(),
            _ => glob_to_regex(value),
        };
        let pattern = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            key: key.to_string(),
            operator,
            value: value.to_string(),
            pattern,
        })
    }

    /// Whether the value pattern matches `candidate`.
    pub fn is_match(&self, candidate: &str) -> bool {
        self.pattern.is_match(candidate)
    }

    /// Apply the operator over a node's candidate values: `==` needs at
    /// least one match, `!=` needs none.
    pub fn accepts<'a, I>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let matched = candidates.into_iter().any(|c| self.is_match(c));
        match self.operator {
            Operator::Eq => matched,
            Operator::NotEq => !matched,
        }
    }
}

/// Anchored, case-insensitive regex for a glob with `*` wildcards.
fn glob_to_regex(glob: &str) -> String {
    let parts: Vec<String> = glob.split('*').map(regex::escape).collect();
    format!("(?i)^{}$", parts.join(".*"))
}
