// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-task — Capture-task handling for the Scanwerk engine.
//
// Provides the typed task model (Action → Stream → Source → PixelFormat →
// Attribute → Value), the strict hierarchical parser/validator, and the
// capability negotiator that reconciles a task against a real device.

pub mod capabilities;
pub mod error;
pub mod model;
pub mod negotiate;
pub mod parser;

pub use capabilities::{CapabilityProbe, DeviceCapabilities};
pub use error::{TaskError, TaskErrorCode};
pub use model::Task;
pub use negotiate::{NegotiateError, NegotiationOutcome, negotiate, negotiate_with_capabilities};
pub use parser::TaskParser;
