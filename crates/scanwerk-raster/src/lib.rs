// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-raster — Raster encoding for the Scanwerk engine.
//
// Wraps one raw captured page into a self-contained single-page raster
// container plus a metadata document, the pair that together form one
// image block.

pub mod container;
pub mod encoder;
pub mod metadata;

pub use container::{RasterHeader, encode_container, parse_container};
pub use encoder::{EncodedBlock, RasterEncoder, RawPage};
pub use metadata::BlockMetadata;
