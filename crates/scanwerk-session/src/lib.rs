// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-session — Session lifecycle for the Scanwerk engine.
//
// Owns the single-slot session resource, the filesystem-shaped image-block
// store, the asynchronous page pump that feeds captured pages through the
// raster encoder, and the JSON command surface clients talk to.

pub mod api;
pub mod device;
pub mod session;
pub mod store;

pub use api::dispatch;
pub use device::{CaptureDevice, CaptureEvent, MockScanner};
pub use session::SessionManager;
pub use store::ImageBlockStore;
