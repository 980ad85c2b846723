// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-image-block metadata document.

use serde::{Deserialize, Serialize};

use scanwerk_core::types::{CaptureParams, Compression, PixelFormat, SourceKind};

/// Metadata document stored alongside each raster file.
///
/// Image blocks are whole pages, so `part_number` is always 1 and
/// `more_parts` false; the fields exist because the wire format allows
/// blocks to be split and clients check them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    /// 1-based running number of this block within the job.
    pub image_number: u32,
    /// Physical sheet the page came from; under duplex two consecutive
    /// blocks share a sheet.
    pub sheet_number: u32,
    pub source: SourceKind,
    pub pixel_format: PixelFormat,
    pub compression: Compression,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    /// Dots per inch, both axes.
    pub resolution: u32,
    /// Size of the raster container file in bytes.
    pub size_in_bytes: u64,
    pub part_number: u32,
    pub more_parts: bool,
    pub success: bool,
}

impl BlockMetadata {
    /// Build the metadata for one encoded page.
    ///
    /// Under duplex the reporting source alternates by block parity: odd
    /// numbers are the front of the sheet, even numbers the rear.
    pub fn for_page(
        params: &CaptureParams,
        width: u32,
        height: u32,
        image_number: u32,
        size_in_bytes: u64,
    ) -> Self {
        let (source, sheet_number) = if params.source.is_duplex() {
            let side = if image_number % 2 == 1 {
                SourceKind::FeederFront
            } else {
                SourceKind::FeederRear
            };
            (side, image_number.div_ceil(2))
        } else {
            (params.source, image_number)
        };

        Self {
            image_number,
            sheet_number,
            source,
            pixel_format: params.pixel_format,
            compression: params.compression,
            pixel_width: width,
            pixel_height: height,
            x_offset: 0,
            y_offset: 0,
            resolution: params.resolution,
            size_in_bytes,
            part_number: 1,
            more_parts: false,
            success: true,
        }
    }
}
