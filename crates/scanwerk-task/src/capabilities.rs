// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device capability description and the probe trait the negotiator consumes.
//
// The negotiator never talks to hardware: it sees only this snapshot of what
// a device can do. The concrete probe (a command-line capture tool in the
// reference deployment) lives behind the `CapabilityProbe` trait.

use serde::{Deserialize, Serialize};

use scanwerk_core::error::Result;
use scanwerk_core::types::{CaptureParams, Compression, PixelFormat, SourceKind};

/// Concrete capabilities of one physical scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Vendor identifier of the device itself; task nodes tagged with this
    /// id are device-owned rather than standard.
    pub device_id: String,
    /// Physical capture elements present on the device.
    pub sources: Vec<SourceKind>,
    /// Colour modes the device can produce.
    pub pixel_formats: Vec<PixelFormat>,
    /// Discrete optical resolutions, in dpi.
    pub resolutions: Vec<u32>,
    /// Payload compressions the device can emit.
    pub compressions: Vec<Compression>,
    /// Geometry limits of the capture area, in pixels at maximum resolution.
    pub max_width: u32,
    pub max_height: u32,
    /// Configuration used when a task does not constrain a setting.
    pub defaults: CaptureParams,
}

impl DeviceCapabilities {
    /// Whether the device has the given capture element. `Any` is satisfied
    /// by every device that has at least one source.
    pub fn supports_source(&self, source: SourceKind) -> bool {
        match source {
            SourceKind::Any => !self.sources.is_empty(),
            s => self.sources.contains(&s),
        }
    }

    /// Resolve `any` to a concrete element: the device default if present,
    /// otherwise the first advertised source.
    pub fn resolve_source(&self, source: SourceKind) -> Option<SourceKind> {
        match source {
            SourceKind::Any => {
                if self.sources.contains(&self.defaults.source) {
                    Some(self.defaults.source)
                } else {
                    self.sources.first().copied()
                }
            }
            s if self.sources.contains(&s) => Some(s),
            _ => None,
        }
    }

    pub fn supports_pixel_format(&self, format: PixelFormat) -> bool {
        self.pixel_formats.contains(&format)
    }

    pub fn supports_resolution(&self, dpi: u32) -> bool {
        self.resolutions.contains(&dpi)
    }

    pub fn supports_compression(&self, compression: Compression) -> bool {
        self.compressions.contains(&compression)
    }
}

/// Supplies the capabilities of the device a session is bound to.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> Result<DeviceCapabilities>;
}
