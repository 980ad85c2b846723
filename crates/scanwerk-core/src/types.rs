// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scan-session engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical capture element on the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// Let the device pick whatever it has (feeder preferred when loaded).
    Any,
    Flatbed,
    FeederFront,
    FeederRear,
    /// Both sides of each sheet in one pass.
    FeederDuplex,
}

impl SourceKind {
    /// Wire keyword for this source.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Flatbed => "flatbed",
            Self::FeederFront => "feederFront",
            Self::FeederRear => "feederRear",
            Self::FeederDuplex => "feederDuplex",
        }
    }

    /// Parse a wire keyword. Returns `None` for vendor-specific sources.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "any" => Some(Self::Any),
            "flatbed" => Some(Self::Flatbed),
            "feederFront" => Some(Self::FeederFront),
            "feederRear" => Some(Self::FeederRear),
            "feederDuplex" => Some(Self::FeederDuplex),
            _ => None,
        }
    }

    /// Whether this source captures both sheet sides.
    pub fn is_duplex(&self) -> bool {
        matches!(self, Self::FeederDuplex)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colour mode of a captured page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    /// 1-bit bitonal, packed 8 pixels per byte.
    Bw1,
    /// 8-bit grayscale.
    Gray8,
    /// 24-bit RGB, 3 bytes per pixel.
    Rgb24,
}

impl PixelFormat {
    /// Wire keyword for this pixel format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bw1 => "bw1",
            Self::Gray8 => "gray8",
            Self::Rgb24 => "rgb24",
        }
    }

    /// Parse a wire keyword. Returns `None` for vendor-specific formats.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bw1" => Some(Self::Bw1),
            "gray8" => Some(Self::Gray8),
            "rgb24" => Some(Self::Rgb24),
            _ => None,
        }
    }

    /// Bits used to store a single pixel.
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Bw1 => 1,
            Self::Gray8 => 8,
            Self::Rgb24 => 24,
        }
    }

    /// Bytes per row of `width` pixels, rows padded to whole bytes.
    pub fn bytes_per_row(&self, width: u32) -> u32 {
        (width * self.bits_per_pixel()).div_ceil(8)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression applied to the raster payload.
///
/// The engine only ever *emits* uncompressed blocks; `Jpeg` exists so that
/// device capability sets can advertise it and negotiation can reject a task
/// demanding it from a device that lacks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Compression {
    None,
    Jpeg,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node fallback instruction for when a setting cannot be satisfied.
///
/// `Unresolved` is the parse-time placeholder: a node that omitted its
/// exception (and whose parent did too) holds `Unresolved` until the
/// post-parse sweep fixes it to `NextStream` or `Ignore` by array position.
/// Negotiation must never see an `Unresolved` policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Treat the failure as a trivial success and stop searching.
    Ignore,
    /// Abandon the current stream and try the next one.
    NextStream,
    /// Abort the whole task.
    Fail,
    /// Vendor-defined behaviour; passed through without interpretation.
    Vendor(String),
    /// Placeholder awaiting sibling-position resolution.
    Unresolved,
}

/// Wire spelling of the unresolved placeholder, accepted on input.
pub const EXCEPTION_PLACEHOLDER: &str = "@nextStreamOrIgnore";

impl ExceptionPolicy {
    /// Parse a wire exception string. Unknown strings become `Vendor`.
    pub fn parse(s: &str) -> Self {
        match s {
            "ignore" => Self::Ignore,
            "nextStream" => Self::NextStream,
            "fail" => Self::Fail,
            EXCEPTION_PLACEHOLDER => Self::Unresolved,
            other => Self::Vendor(other.to_owned()),
        }
    }

    /// Wire spelling of this policy.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ignore => "ignore",
            Self::NextStream => "nextStream",
            Self::Fail => "fail",
            Self::Vendor(s) => s,
            Self::Unresolved => EXCEPTION_PLACEHOLDER,
        }
    }
}

impl std::fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns a task node, decided once per node from its `vendor` tag.
///
/// Unknown-vendor nodes are opaque extensions: topology validation skips
/// them and negotiation steps over them without consuming a search slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorScope {
    /// No vendor tag, or the tag names the standard authority.
    Standard,
    /// The tag names the device we are negotiating against.
    DeviceOwned,
    /// Anything else.
    UnknownVendor,
}

impl VendorScope {
    /// Classify a vendor tag against the two known identifiers.
    pub fn classify(tag: Option<&str>, authority_id: &str, device_id: &str) -> Self {
        match tag {
            None => Self::Standard,
            Some(t) if t.is_empty() || t.eq_ignore_ascii_case(authority_id) => Self::Standard,
            Some(t) if t.eq_ignore_ascii_case(device_id) => Self::DeviceOwned,
            Some(_) => Self::UnknownVendor,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::UnknownVendor)
    }
}

/// Per-node negotiation progress.
///
/// `Ready` is the state immediately after parse, before negotiation has
/// touched the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NegotiationStatus {
    Undefined,
    Success,
    /// The node failed but its `ignore` policy turned that into success.
    SuccessIgnore,
    Fail,
    BadValue,
    /// The node's stream was abandoned in favour of a later sibling.
    Next,
    Ready,
    Unsupported,
}

/// Lifecycle states of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No session is open on this device.
    NoSession,
    /// Session created; no task accepted yet, or all blocks drained.
    Ready,
    /// A task has been negotiated and capture parameters are stored.
    Configured,
    /// The capture collaborator is producing pages.
    Capturing,
    /// Capture finished but unreleased image blocks remain.
    Draining,
    /// Session torn down. Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "noSession",
            Self::Ready => "ready",
            Self::Configured => "configured",
            Self::Capturing => "capturing",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status written to the end-of-job sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalStatus {
    /// All pending pages were captured and encoded.
    Success,
    /// The client stopped the capture before the job finished.
    Canceled,
    /// A page could not be encoded; the job ended early.
    ImageError,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Canceled => "canceled",
            Self::ImageError => "imageError",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "canceled" => Some(Self::Canceled),
            "imageError" => Some(Self::ImageError),
            _ => None,
        }
    }
}

/// One concrete, device-accepted capture configuration.
///
/// Produced by negotiation, consumed by the capture collaborator. In the
/// reference deployment the collaborator is a command-line capture tool, so
/// the parameter set renders to an argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureParams {
    pub source: SourceKind,
    pub pixel_format: PixelFormat,
    /// Dots per inch, both axes.
    pub resolution: u32,
    pub compression: Compression,
    /// Sheets to pull from the feeder; 0 means "until empty".
    pub sheet_count: u32,
}

impl CaptureParams {
    /// Render as arguments for the command-line capture collaborator.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--source={}", self.source),
            format!("--mode={}", self.pixel_format),
            format!("--resolution={}", self.resolution),
        ];
        if self.sheet_count > 0 {
            args.push(format!("--sheets={}", self.sheet_count));
        }
        args
    }
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            source: SourceKind::Any,
            pixel_format: PixelFormat::Rgb24,
            resolution: 200,
            compression: Compression::None,
            sheet_count: 0,
        }
    }
}

/// Client-visible snapshot of the open session.
///
/// `image_blocks` is `Some` while capture is active or blocks remain so the
/// client can tell "still capturing, nothing yet" (`Some([])`) apart from
/// "job over, nothing left" (`None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    /// Bumped on every observable mutation of the session.
    pub revision: u64,
    pub end_of_job: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_blocks: Option<Vec<u32>>,
    pub created_at: DateTime<Utc>,
}
