// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capture collaborator abstraction.
//
// The engine never drives hardware directly: it hands the negotiated
// parameters to a `CaptureDevice` and consumes page events from a channel.
// In the reference deployment the implementation wraps a command-line
// capture tool; for tests the deterministic `MockScanner` stands in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};

use scanwerk_core::error::Result;
use scanwerk_core::types::{CaptureParams, Compression, PixelFormat, SourceKind, TerminalStatus};
use scanwerk_raster::RawPage;
use scanwerk_task::{CapabilityProbe, DeviceCapabilities};

/// One event from the capture collaborator.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A finished page, ready to be encoded into an image block.
    PageReady(RawPage),
    /// No more pages will follow.
    Finished(TerminalStatus),
}

/// A device that can both report its capabilities and perform captures.
pub trait CaptureDevice: CapabilityProbe {
    /// Begin capturing with the given parameters.
    ///
    /// Pages arrive asynchronously on the returned channel, terminated by a
    /// single `Finished` event. Stopping is cooperative: signalling `stop`
    /// asks the device to wind down, but a page already in flight may still
    /// be delivered afterwards.
    fn start_capture(
        &self,
        params: CaptureParams,
        stop: Arc<Notify>,
    ) -> Result<mpsc::Receiver<CaptureEvent>>;
}

// ---------------------------------------------------------------------------
// Mock scanner
// ---------------------------------------------------------------------------

/// Synthetic page geometry emitted by the mock scanner.
const MOCK_PAGE_WIDTH: u32 = 64;
const MOCK_PAGE_HEIGHT: u32 = 32;

/// Deterministic in-process scanner used by tests and demos.
#[derive(Debug, Clone)]
pub struct MockScanner {
    capabilities: DeviceCapabilities,
    /// Sheets in the virtual feeder.
    sheets: u32,
    /// Simulated per-page capture time.
    page_delay: Duration,
    /// Emit pages whose row data contradicts their geometry, to exercise
    /// the encoder failure path.
    bad_geometry: bool,
}

impl MockScanner {
    pub fn new(sheets: u32) -> Self {
        Self {
            capabilities: Self::default_capabilities(),
            sheets,
            page_delay: Duration::from_millis(5),
            bad_geometry: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_bad_geometry(mut self) -> Self {
        self.bad_geometry = true;
        self
    }

    /// Capabilities of the virtual device: duplex feeder plus flatbed, the
    /// three standard colour modes, and a handful of discrete resolutions.
    pub fn default_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            device_id: "f5b4e1a2-8a77-4d52-9c1e-0d2f3a4b5c6d".into(),
            sources: vec![
                SourceKind::Flatbed,
                SourceKind::FeederFront,
                SourceKind::FeederRear,
                SourceKind::FeederDuplex,
            ],
            pixel_formats: vec![PixelFormat::Bw1, PixelFormat::Gray8, PixelFormat::Rgb24],
            resolutions: vec![100, 200, 300, 600],
            compressions: vec![Compression::None],
            max_width: 2550,
            max_height: 4200,
            defaults: CaptureParams {
                source: SourceKind::Flatbed,
                pixel_format: PixelFormat::Rgb24,
                resolution: 200,
                compression: Compression::None,
                sheet_count: 0,
            },
        }
    }

    fn synthetic_page(&self, params: &CaptureParams, index: u32) -> RawPage {
        let format = params.pixel_format;
        let stride = format.bytes_per_row(MOCK_PAGE_WIDTH) as usize;
        let mut rows = vec![0u8; stride * MOCK_PAGE_HEIGHT as usize];
        for (i, byte) in rows.iter_mut().enumerate() {
            *byte = (i as u32).wrapping_add(index) as u8;
        }
        if self.bad_geometry {
            rows.truncate(rows.len() / 2);
        }
        RawPage {
            pixel_format: format,
            width: MOCK_PAGE_WIDTH,
            height: MOCK_PAGE_HEIGHT,
            resolution: params.resolution,
            rows,
        }
    }
}

impl CapabilityProbe for MockScanner {
    fn probe(&self) -> Result<DeviceCapabilities> {
        Ok(self.capabilities.clone())
    }
}

impl CaptureDevice for MockScanner {
    fn start_capture(
        &self,
        params: CaptureParams,
        stop: Arc<Notify>,
    ) -> Result<mpsc::Receiver<CaptureEvent>> {
        let sheets = if params.sheet_count > 0 {
            params.sheet_count.min(self.sheets)
        } else {
            self.sheets
        };
        let images_per_sheet = if params.source.is_duplex() { 2 } else { 1 };
        let total = sheets * images_per_sheet;

        let scanner = self.clone();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            info!(total, source = %params.source, "mock capture started");
            for index in 1..=total {
                tokio::select! {
                    _ = stop.notified() => {
                        debug!(index, "mock capture stopped cooperatively");
                        let _ = tx.send(CaptureEvent::Finished(TerminalStatus::Canceled)).await;
                        return;
                    }
                    _ = tokio::time::sleep(scanner.page_delay) => {}
                }
                let page = scanner.synthetic_page(&params, index);
                if tx.send(CaptureEvent::PageReady(page)).await.is_err() {
                    // Consumer went away; nothing left to report to.
                    return;
                }
            }
            let _ = tx.send(CaptureEvent::Finished(TerminalStatus::Success)).await;
            info!(total, "mock capture finished");
        });
        Ok(rx)
    }
}
