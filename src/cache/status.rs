//! Cacheable status-code patterns.
//!
//! Patterns are written as exact codes (`"200"`) or class wildcards (`"2XX"`).
//! Wildcards are reduced to their leading digit when parsed.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPattern {
    Exact(u16),
    Class(u8),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid status pattern `{0}`: expected a code like `200` or a class like `2XX`")]
pub struct StatusPatternError(String);

impl StatusPattern {
    pub fn matches(self, status: u16) -> bool {
        match self {
            Self::Exact(code) => code == status,
            Self::Class(digit) => status / 100 == u16::from(digit),
        }
    }
}

impl FromStr for StatusPattern {
    type Err = StatusPatternError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        let invalid = || StatusPatternError(raw.to_string());

        let mut chars = value.chars();
        let leading = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .filter(|digit| (1..=5).contains(digit))
            .ok_or_else(invalid)?;

        if value.len() == 1 {
            return Ok(Self::Class(leading as u8));
        }

        if value.contains(['X', 'x']) {
            return if value.len() == 3 && chars.all(|c| c == 'X' || c == 'x') {
                Ok(Self::Class(leading as u8))
            } else {
                Err(invalid())
            };
        }

        if value.len() == 3 && value.chars().all(|c| c.is_ascii_digit()) {
            return value.parse().map(Self::Exact).map_err(|_| invalid());
        }

        Err(invalid())
    }
}

impl fmt::Display for StatusPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(code) => write!(f, "{code}"),
            Self::Class(digit) => write!(f, "{digit}"),
        }
    }
}

/// The configured set of cacheable statuses. Empty means nothing is cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatterns(Vec<StatusPattern>);

impl StatusPatterns {
    pub fn new(patterns: Vec<StatusPattern>) -> Self {
        Self(patterns)
    }

    /// Parse a list of raw pattern strings, skipping blank entries.
    pub fn parse<I, S>(raw: I) -> Result<Self, StatusPatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter(|value| !value.as_ref().trim().is_empty())
            .map(|value| value.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_cacheable(&self, status: u16) -> bool {
        self.0.iter().any(|pattern| pattern.matches(status))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[StatusPattern] {
        &self.0
    }
}
