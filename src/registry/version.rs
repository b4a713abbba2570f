//! Dogu versions and dependency version constraints
//!
//! A dogu version has the form `major.minor.patch[.nano][-extra]`, for
//! example `2.4.48-4`. Missing components count as zero.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid dogu version {0:?}")]
pub struct VersionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DoguVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub nano: u64,
    pub extra: u64,
    raw: String,
}

impl DoguVersion {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError(raw.to_string());
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid());
        }

        let (core, extra) = match raw.split_once('-') {
            Some((core, extra)) => (core, extra.parse::<u64>().map_err(|_| invalid())?),
            None => (raw, 0),
        };

        let parts = core
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() || parts.len() > 4 {
            return Err(invalid());
        }
        let part = |i: usize| parts.get(i).copied().unwrap_or(0);

        Ok(Self {
            major: part(0),
            minor: part(1),
            patch: part(2),
            nano: part(3),
            extra,
            raw: raw.to_string(),
        })
    }

    fn key(&self) -> (u64, u64, u64, u64, u64) {
        (self.major, self.minor, self.patch, self.nano, self.extra)
    }

    pub fn is_newer_than(&self, other: &DoguVersion) -> bool {
        self > other
    }
}

impl Ord for DoguVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for DoguVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for DoguVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DoguVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Comparison operator of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A single constraint like `>=2.4.48-3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    op: Operator,
    version: DoguVersion,
}

impl VersionConstraint {
    /// Parse a constraint. An empty string means "any version" and yields `None`.
    pub fn parse(raw: &str) -> Result<Option<Self>, VersionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let (op, rest) = [
            (">=", Operator::Ge),
            ("<=", Operator::Le),
            ("!=", Operator::NotEq),
            ("==", Operator::Eq),
            (">", Operator::Gt),
            ("<", Operator::Lt),
            ("=", Operator::Eq),
        ]
        .iter()
        .find_map(|(prefix, op)| raw.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Operator::Eq, raw));

        Ok(Some(Self {
            op,
            version: DoguVersion::parse(rest)?,
        }))
    }

    pub fn matches(&self, version: &DoguVersion) -> bool {
        let ord = version.cmp(&self.version);
        match self.op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::NotEq => ord != Ordering::Equal,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Ge => ord != Ordering::Less,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
        }
    }
}

/// Check a version against a comma-separated list of constraints
pub fn satisfies(constraints: &str, version: &DoguVersion) -> Result<bool, VersionError> {
    for raw in constraints.split(',') {
        if let Some(constraint) = VersionConstraint::parse(raw)?
            && !constraint.matches(version)
        {
            return Ok(false);
        }
    }
    Ok(true)
}
