// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier of the standard task authority. Vendor tags equal to this (or
/// absent) mark a node as standard; tags equal to the device's own id mark
/// it device-owned; anything else is an opaque vendor extension.
pub const STANDARD_AUTHORITY_ID: &str = "211a1e90-11e1-11e5-9493-1697f925ec7b";

/// Persistent engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory that holds per-session image-block artifacts.
    pub images_dir: PathBuf,
    /// Identifier of the standard task authority used to classify vendor tags.
    pub authority_id: String,
    /// Resolution (dpi) used when a task does not constrain it.
    pub default_resolution: u32,
    /// Keep the raw capture file next to the encoded raster, for debugging.
    pub keep_raw_files: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
            authority_id: STANDARD_AUTHORITY_ID.to_owned(),
            default_resolution: 200,
            keep_raw_files: false,
        }
    }
}
