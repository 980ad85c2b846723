// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured task failures, shared by the parser and the negotiator.
//
// Exactly one failure is ever produced per parse or negotiation run: the
// first error latches and aborts the walk, so a reply never carries an
// ambiguous mixture of causes.

/// Which family a task failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorCode {
    /// The document is not well-formed; `offset` points near the problem.
    Syntax,
    /// A key appeared at a level where the hierarchy forbids it.
    Topology,
    /// A requested setting exists but the device cannot satisfy it.
    Unsupported,
    /// A node carried a value of the wrong shape or type.
    BadValue,
    /// Every candidate stream was exhausted without a viable configuration.
    NoViableStream,
    /// A vendor-defined exception policy fired; passed through uninterpreted.
    VendorPolicy,
}

impl TaskErrorCode {
    /// Wire status keyword for this failure family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "invalidJson",
            Self::Topology | Self::BadValue => "invalidTask",
            Self::Unsupported | Self::NoViableStream | Self::VendorPolicy => {
                "invalidCapturingOptions"
            }
        }
    }
}

/// A single structured task failure.
///
/// `key` is the dotted path of the offending node (`actions[0].streams[1]`),
/// `value` the literal involved if any, and `offset` the approximate byte
/// offset into the original document for syntax failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub code: TaskErrorCode,
    pub key: Option<String>,
    pub value: Option<String>,
    pub offset: Option<usize>,
}

impl TaskError {
    pub fn syntax(offset: usize, detail: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::Syntax,
            key: None,
            value: Some(detail.into()),
            offset: Some(offset),
        }
    }

    pub fn topology(key: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::Topology,
            key: Some(key.into()),
            value: None,
            offset: None,
        }
    }

    pub fn bad_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::BadValue,
            key: Some(key.into()),
            value: Some(value.into()),
            offset: None,
        }
    }

    pub fn unsupported(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::Unsupported,
            key: Some(key.into()),
            value: Some(value.into()),
            offset: None,
        }
    }

    pub fn no_viable_stream(key: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::NoViableStream,
            key: Some(key.into()),
            value: None,
            offset: None,
        }
    }

    pub fn vendor_policy(key: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            code: TaskErrorCode::VendorPolicy,
            key: Some(key.into()),
            value: Some(policy.into()),
            offset: None,
        }
    }
}

impl std::error::Error for TaskError {}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(key) = &self.key {
            write!(f, " at {key}")?;
        }
        if let Some(value) = &self.value {
            write!(f, " ({value})")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " near byte {offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_key_and_offset() {
        let err = TaskError::topology("actions[0].source");
        assert_eq!(err.to_string(), "invalidTask at actions[0].source");

        let err = TaskError::syntax(42, "expected value");
        assert!(err.to_string().contains("near byte 42"));
    }

    #[test]
    fn wire_codes_group_families() {
        assert_eq!(TaskErrorCode::Topology.as_str(), "invalidTask");
        assert_eq!(TaskErrorCode::BadValue.as_str(), "invalidTask");
        assert_eq!(
            TaskErrorCode::NoViableStream.as_str(),
            "invalidCapturingOptions"
        );
    }
}
