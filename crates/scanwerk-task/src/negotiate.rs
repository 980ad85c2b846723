// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability negotiator — picks one executable capture configuration from a
// validated task by nested ordered search, first success wins.
//
// Search order is strictly document order at every level. Attribute
// application within a pixel format follows the fixed capability order
// (pixel type, resolution, compression, transfer count) because real devices
// constrain later settings by earlier ones. A failure anywhere is folded
// into the failing node's resolved exception policy rather than always
// aborting.

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::{
    CaptureParams, Compression, ExceptionPolicy, NegotiationStatus, PixelFormat, SourceKind,
};

use crate::capabilities::{CapabilityProbe, DeviceCapabilities};
use crate::error::TaskError;
use crate::model::{Attribute, PixelFormatNode, Stream, Task};

/// Attribute names the negotiator understands, in application order. The
/// pixel type itself is applied first, before any of these.
const ATTRIBUTE_ORDER: [&str; 3] = ["resolution", "compression", "numberOfSheets"];

/// Result of a successful negotiation run.
#[derive(Debug, Clone)]
pub struct NegotiationOutcome {
    /// The device-accepted configuration to hand to the capture collaborator.
    pub params: CaptureParams,
    /// Reply document mirroring only what was actually accepted.
    pub reply: Value,
    /// `Success`, or `SuccessIgnore` when an `ignore` policy absorbed a
    /// failure and the device defaults were kept.
    pub status: NegotiationStatus,
}

/// Failure surfaced by the probing wrapper.
#[derive(Debug, Error)]
pub enum NegotiateError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Engine(#[from] ScanwerkError),
}

/// A rejected node, carried upward until an exception policy interprets it.
struct Rejection {
    key: String,
    value: Option<String>,
    policy: ExceptionPolicy,
}

/// What one stream search accepted.
struct Accepted {
    params: CaptureParams,
    /// Pixel format actually selected, absent for bare source selection.
    pixel_format: Option<PixelFormat>,
    /// Attribute/value pairs the device accepted, in application order.
    attributes: Vec<(String, Value)>,
}

/// Probe the device, then negotiate against its capabilities.
pub fn negotiate(
    task: &mut Task,
    probe: &dyn CapabilityProbe,
) -> Result<NegotiationOutcome, NegotiateError> {
    let caps = probe.probe()?;
    Ok(negotiate_with_capabilities(task, &caps)?)
}

/// Negotiate a parsed task against a capability snapshot.
#[instrument(skip_all)]
pub fn negotiate_with_capabilities(
    task: &mut Task,
    caps: &DeviceCapabilities,
) -> Result<NegotiationOutcome, TaskError> {
    for action in &mut task.actions {
        if !action.header.scope.is_known() {
            // Foreign-vendor actions are opaque; step over them.
            continue;
        }
        if action.verb != "configure" {
            if action.header.exception == ExceptionPolicy::Fail {
                action.header.status = NegotiationStatus::Fail;
                return Err(TaskError::unsupported(
                    format!("{}.action", action.header.path),
                    action.verb.clone(),
                ));
            }
            action.header.status = NegotiationStatus::SuccessIgnore;
            continue;
        }

        if action.streams.is_empty() {
            action.header.status = NegotiationStatus::Success;
            debug!("configure action with no streams, using device defaults");
            return Ok(trivial_outcome(caps, NegotiationStatus::Success));
        }

        for stream in &mut action.streams {
            match try_stream(stream, caps) {
                Ok(accepted) => {
                    stream.header.status = NegotiationStatus::Success;
                    action.header.status = NegotiationStatus::Success;
                    info!(
                        source = %accepted.params.source,
                        pixel_format = %accepted.params.pixel_format,
                        resolution = accepted.params.resolution,
                        "stream negotiated"
                    );
                    return Ok(accepted_outcome(&accepted));
                }
                Err(rejection) => match rejection.policy {
                    ExceptionPolicy::Ignore => {
                        stream.header.status = NegotiationStatus::SuccessIgnore;
                        action.header.status = NegotiationStatus::SuccessIgnore;
                        debug!(key = %rejection.key, "rejection absorbed by ignore policy");
                        return Ok(trivial_outcome(caps, NegotiationStatus::SuccessIgnore));
                    }
                    ExceptionPolicy::NextStream => {
                        stream.header.status = NegotiationStatus::Next;
                        debug!(key = %rejection.key, "stream abandoned, trying next");
                        continue;
                    }
                    ExceptionPolicy::Fail => {
                        stream.header.status = NegotiationStatus::Fail;
                        action.header.status = NegotiationStatus::Fail;
                        return Err(TaskError::unsupported(
                            rejection.key,
                            rejection.value.unwrap_or_default(),
                        ));
                    }
                    ExceptionPolicy::Vendor(policy) => {
                        // Vendor-defined behaviour is not ours to invent.
                        return Err(TaskError::vendor_policy(rejection.key, policy));
                    }
                    ExceptionPolicy::Unresolved => {
                        // The parser resolves every placeholder; a leak here
                        // is a logic bug, not a task error.
                        warn!(key = %rejection.key, "unresolved placeholder reached negotiation");
                        stream.header.status = NegotiationStatus::Next;
                        continue;
                    }
                },
            }
        }

        action.header.status = NegotiationStatus::Fail;
        return Err(TaskError::no_viable_stream(action.header.path.clone()));
    }

    // No configure action at all: trivially succeed with device defaults.
    Ok(NegotiationOutcome {
        params: caps.defaults.clone(),
        reply: json!({ "actions": [] }),
        status: NegotiationStatus::Success,
    })
}

/// Search one stream: sources in order, then pixel formats in order.
fn try_stream(stream: &mut Stream, caps: &DeviceCapabilities) -> Result<Accepted, Rejection> {
    for source in &mut stream.sources {
        if !source.header.scope.is_known() {
            // Foreign source: skipped without consuming a search slot.
            continue;
        }

        let requested = SourceKind::parse(&source.name).ok_or_else(|| {
            source.header.status = NegotiationStatus::Unsupported;
            Rejection {
                key: source.header.path.clone(),
                value: Some(source.name.clone()),
                policy: source.header.exception.clone(),
            }
        })?;
        let resolved = caps.resolve_source(requested).ok_or_else(|| {
            source.header.status = NegotiationStatus::Unsupported;
            Rejection {
                key: source.header.path.clone(),
                value: Some(source.name.clone()),
                policy: source.header.exception.clone(),
            }
        })?;

        let mut standard_formats = source
            .pixel_formats
            .iter_mut()
            .filter(|pf| pf.header.scope.is_known())
            .peekable();

        if standard_formats.peek().is_none() {
            // Bare source selection.
            source.header.status = NegotiationStatus::Success;
            let params = CaptureParams {
                source: resolved,
                ..caps.defaults.clone()
            };
            return Ok(Accepted {
                params,
                pixel_format: None,
                attributes: Vec::new(),
            });
        }

        // Pixel formats are candidates tried in order; a failing one is
        // abandoned in favour of the next, and only the last failure is
        // interpreted through its exception policy.
        let mut last_rejection = None;
        for pf in standard_formats {
            match try_pixel_format(pf, resolved, caps) {
                Ok(accepted) => {
                    pf.header.status = NegotiationStatus::Success;
                    source.header.status = NegotiationStatus::Success;
                    return Ok(accepted);
                }
                Err(rejection) => {
                    pf.header.status = NegotiationStatus::Unsupported;
                    last_rejection = Some(rejection);
                }
            }
        }
        if let Some(rejection) = last_rejection {
            return Err(rejection);
        }
    }

    // Nothing standard to try in this stream: accept the device defaults.
    Ok(Accepted {
        params: caps.defaults.clone(),
        pixel_format: None,
        attributes: Vec::new(),
    })
}

/// Apply one pixel format and its attributes in the fixed capability order.
fn try_pixel_format(
    pf: &mut PixelFormatNode,
    source: SourceKind,
    caps: &DeviceCapabilities,
) -> Result<Accepted, Rejection> {
    let format = PixelFormat::parse(&pf.name).ok_or_else(|| Rejection {
        key: pf.header.path.clone(),
        value: Some(pf.name.clone()),
        policy: pf.header.exception.clone(),
    })?;
    if !caps.supports_pixel_format(format) {
        return Err(Rejection {
            key: pf.header.path.clone(),
            value: Some(pf.name.clone()),
            policy: pf.header.exception.clone(),
        });
    }

    // Reject attributes the standard does not define before applying any.
    for attr in &pf.attributes {
        if attr.header.scope.is_known() && !ATTRIBUTE_ORDER.contains(&attr.name.as_str()) {
            return Err(Rejection {
                key: attr.header.path.clone(),
                value: Some(attr.name.clone()),
                policy: attr.header.exception.clone(),
            });
        }
    }

    let mut params = CaptureParams {
        source,
        pixel_format: format,
        ..caps.defaults.clone()
    };
    let mut accepted_attrs = Vec::new();

    for name in ATTRIBUTE_ORDER {
        let Some(attr) = pf
            .attributes
            .iter_mut()
            .find(|a| a.header.scope.is_known() && a.name == name)
        else {
            continue;
        };
        let value = apply_attribute(attr, &mut params, caps)?;
        attr.header.status = NegotiationStatus::Success;
        accepted_attrs.push((name.to_owned(), value));
    }

    Ok(Accepted {
        params,
        pixel_format: Some(format),
        attributes: accepted_attrs,
    })
}

/// Try an attribute's candidate values in order; the first one the device
/// accepts is kept.
fn apply_attribute(
    attr: &mut Attribute,
    params: &mut CaptureParams,
    caps: &DeviceCapabilities,
) -> Result<Value, Rejection> {
    let mut last_value = None;
    for node in &mut attr.values {
        let ok = match attr.name.as_str() {
            "resolution" => match node.value.as_u64() {
                Some(dpi) if caps.supports_resolution(dpi as u32) => {
                    params.resolution = dpi as u32;
                    true
                }
                Some(_) => {
                    node.header.status = NegotiationStatus::Unsupported;
                    false
                }
                None => {
                    node.header.status = NegotiationStatus::BadValue;
                    false
                }
            },
            "compression" => match node.value.as_str().and_then(Compression::parse) {
                Some(c) if caps.supports_compression(c) => {
                    params.compression = c;
                    true
                }
                Some(_) => {
                    node.header.status = NegotiationStatus::Unsupported;
                    false
                }
                None => {
                    node.header.status = NegotiationStatus::BadValue;
                    false
                }
            },
            "numberOfSheets" => match node.value.as_u64() {
                Some(n) => {
                    params.sheet_count = n as u32;
                    true
                }
                None => {
                    node.header.status = NegotiationStatus::BadValue;
                    false
                }
            },
            // try_pixel_format filtered the names already.
            _ => false,
        };

        if ok {
            node.header.status = NegotiationStatus::Success;
            return Ok(node.value.clone());
        }
        last_value = Some(node.value.to_string());
    }

    attr.header.status = NegotiationStatus::Unsupported;
    Err(Rejection {
        key: attr.header.path.clone(),
        value: last_value.or_else(|| Some(attr.name.clone())),
        policy: attr.header.exception.clone(),
    })
}

/// Reply for a negotiated stream, echoing only what was accepted.
fn accepted_outcome(accepted: &Accepted) -> NegotiationOutcome {
    let mut source = json!({ "source": accepted.params.source.as_str() });
    if let Some(format) = accepted.pixel_format {
        let mut pf = json!({ "pixelFormat": format.as_str() });
        if !accepted.attributes.is_empty() {
            let attrs: Vec<Value> = accepted
                .attributes
                .iter()
                .map(|(name, value)| {
                    json!({ "attribute": name, "values": [ { "value": value } ] })
                })
                .collect();
            pf["attributes"] = Value::Array(attrs);
        }
        source["pixelFormats"] = json!([pf]);
    }

    NegotiationOutcome {
        params: accepted.params.clone(),
        reply: json!({
            "actions": [ {
                "action": "configure",
                "streams": [ { "sources": [ source ] } ],
            } ],
        }),
        status: NegotiationStatus::Success,
    }
}

/// Reply for trivial success: the action was accepted but no stream branch
/// was, so the device defaults apply and no stream is echoed.
fn trivial_outcome(caps: &DeviceCapabilities, status: NegotiationStatus) -> NegotiationOutcome {
    NegotiationOutcome {
        params: caps.defaults.clone(),
        reply: json!({ "actions": [ { "action": "configure" } ] }),
        status,
    }
}
