// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Task document errors --
    #[error("task document syntax error near byte {offset}: {detail}")]
    TaskSyntax { offset: usize, detail: String },

    #[error("invalid task: illegal key at {key}")]
    InvalidTask { key: String },

    #[error("bad value at {key}: {value}")]
    BadValue { key: String, value: String },

    // -- Negotiation errors --
    #[error("device does not support {key} = {value}")]
    Unsupported { key: String, value: String },

    #[error("no stream in the task could be negotiated")]
    NoViableStream,

    #[error("vendor-defined exception '{policy}' at {key}")]
    VendorException { key: String, policy: String },

    // -- Session command errors --
    #[error("no session is open")]
    InvalidSessionId,

    #[error("command {command} not valid in state {state}")]
    InvalidState { command: String, state: String },

    #[error("image block {number} does not exist")]
    InvalidImageBlockNumber { number: u32 },

    // -- Capture / encoding --
    #[error("capture collaborator failed: {0}")]
    Capture(String),

    #[error("raster encoding failed: {0}")]
    Encode(String),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
