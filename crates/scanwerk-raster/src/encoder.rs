// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page encoder -- turns one raw captured page into the file pair that makes
// up an image block.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use scanwerk_core::error::Result;
use scanwerk_core::types::{CaptureParams, PixelFormat};

use crate::container::encode_container;
use crate::metadata::BlockMetadata;

/// One raw page as delivered by the capture collaborator: uncompressed pixel
/// rows, top to bottom, rows padded to whole bytes.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Dots per inch, both axes.
    pub resolution: u32,
    pub rows: Vec<u8>,
}

/// Artifacts produced for one image block.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub number: u32,
    pub raster_path: PathBuf,
    pub meta_path: PathBuf,
    /// Present only when the encoder was asked to keep raw captures.
    pub raw_path: Option<PathBuf>,
    pub metadata: BlockMetadata,
}

/// Encodes raw pages into image-block files inside one images directory.
///
/// Block numbers are assigned by the caller; the encoder itself is
/// stateless so the session's page pump can own the running counter.
pub struct RasterEncoder {
    dir: PathBuf,
    keep_raw: bool,
}

impl RasterEncoder {
    pub fn new(dir: impl Into<PathBuf>, keep_raw: bool) -> Self {
        Self {
            dir: dir.into(),
            keep_raw,
        }
    }

    /// File stem for block `number`, zero-padded the way the store sorts.
    fn stem(number: u32) -> String {
        format!("img{number:06}")
    }

    pub fn raster_path(&self, number: u32) -> PathBuf {
        self.dir.join(format!("{}.swrf", Self::stem(number)))
    }

    pub fn meta_path(&self, number: u32) -> PathBuf {
        self.dir.join(format!("{}.meta.json", Self::stem(number)))
    }

    pub fn raw_path(&self, number: u32) -> PathBuf {
        self.dir.join(format!("{}.raw", Self::stem(number)))
    }

    /// Encode one page as image block `number` and write its artifacts.
    ///
    /// Bitonal pages arrive bit-inverted relative to the container's
    /// polarity and are inverted here before encoding.
    #[instrument(skip(self, page), fields(width = page.width, height = page.height))]
    pub fn encode_block(
        &self,
        params: &CaptureParams,
        page: &RawPage,
        number: u32,
    ) -> Result<EncodedBlock> {
        fs::create_dir_all(&self.dir)?;

        let raw_path = if self.keep_raw {
            let path = self.raw_path(number);
            fs::write(&path, &page.rows)?;
            Some(path)
        } else {
            None
        };

        let rows = match page.pixel_format {
            PixelFormat::Bw1 => invert_bits(&page.rows),
            _ => page.rows.clone(),
        };
        let container = encode_container(
            page.pixel_format,
            page.width,
            page.height,
            page.resolution,
            &rows,
        )?;

        let metadata = BlockMetadata::for_page(
            params,
            page.width,
            page.height,
            number,
            container.len() as u64,
        );

        let raster_path = self.raster_path(number);
        let meta_path = self.meta_path(number);
        fs::write(&raster_path, &container)?;
        fs::write(&meta_path, serde_json::to_vec_pretty(&metadata)?)?;

        info!(
            number,
            bytes = container.len(),
            path = %raster_path.display(),
            "image block encoded"
        );
        Ok(EncodedBlock {
            number,
            raster_path,
            meta_path,
            raw_path,
            metadata,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn invert_bits(rows: &[u8]) -> Vec<u8> {
    debug!(bytes = rows.len(), "inverting bitonal polarity");
    rows.iter().map(|b| !b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::parse_container;
    use scanwerk_core::types::{Compression, SourceKind};

    fn params() -> CaptureParams {
        CaptureParams {
            source: SourceKind::FeederFront,
            pixel_format: PixelFormat::Gray8,
            resolution: 200,
            compression: Compression::None,
            sheet_count: 0,
        }
    }

    fn gray_page() -> RawPage {
        RawPage {
            pixel_format: PixelFormat::Gray8,
            width: 8,
            height: 4,
            resolution: 200,
            rows: (0..32u8).collect(),
        }
    }

    #[test]
    fn writes_raster_and_metadata_pair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let encoder = RasterEncoder::new(dir.path(), false);

        let block = encoder
            .encode_block(&params(), &gray_page(), 1)
            .expect("encode");

        assert!(block.raster_path.exists());
        assert!(block.meta_path.exists());
        assert!(block.raw_path.is_none());
        assert_eq!(block.raster_path.file_name().unwrap(), "img000001.swrf");

        let meta: BlockMetadata =
            serde_json::from_slice(&fs::read(&block.meta_path).expect("read meta"))
                .expect("parse meta");
        assert_eq!(meta, block.metadata);
        assert_eq!(meta.image_number, 1);
        assert_eq!(meta.pixel_width, 8);
        assert_eq!(
            meta.size_in_bytes,
            fs::metadata(&block.raster_path).expect("stat").len()
        );
    }

    #[test]
    fn bitonal_pages_are_inverted_before_encoding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let encoder = RasterEncoder::new(dir.path(), false);

        let page = RawPage {
            pixel_format: PixelFormat::Bw1,
            width: 16,
            height: 2,
            resolution: 200,
            rows: vec![0x00, 0xFF, 0xF0, 0x0F],
        };
        let block = encoder.encode_block(&params(), &page, 1).expect("encode");

        let data = fs::read(&block.raster_path).expect("read");
        let (_, payload) = parse_container(&data).expect("parse");
        assert_eq!(payload, &[0xFF, 0x00, 0x0F, 0xF0]);
    }

    #[test]
    fn gray_pages_are_not_inverted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let encoder = RasterEncoder::new(dir.path(), false);

        let block = encoder
            .encode_block(&params(), &gray_page(), 2)
            .expect("encode");
        let data = fs::read(&block.raster_path).expect("read");
        let (_, payload) = parse_container(&data).expect("parse");
        assert_eq!(payload, gray_page().rows.as_slice());
    }

    #[test]
    fn keep_raw_writes_the_raw_capture_too() {
        let dir = tempfile::tempdir().expect("tempdir");
        let encoder = RasterEncoder::new(dir.path(), true);

        let block = encoder
            .encode_block(&params(), &gray_page(), 1)
            .expect("encode");
        let raw_path = block.raw_path.expect("raw path");
        assert_eq!(fs::read(&raw_path).expect("read raw"), gray_page().rows);
    }

    #[test]
    fn geometry_mismatch_surfaces_as_encode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let encoder = RasterEncoder::new(dir.path(), false);

        let page = RawPage {
            pixel_format: PixelFormat::Gray8,
            width: 100,
            height: 100,
            resolution: 200,
            rows: vec![0u8; 3],
        };
        assert!(encoder.encode_block(&params(), &page, 1).is_err());
    }
}
