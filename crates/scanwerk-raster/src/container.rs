// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-page raster container -- a fixed binary header followed by raw
// pixel rows, so every image block is self-describing without consulting
// its metadata document.
//
// # Layout (all multi-byte fields big-endian)
//
// ```text
// magic:          4 bytes  "SWRF"
// version:        2 bytes  (currently 1)
// pixel-format:   1 byte   (bits per pixel: 0x01 bw1, 0x08 gray8, 0x18 rgb24)
// compression:    1 byte   (0x00 none)
// width:          4 bytes  pixels
// height:         4 bytes  pixels
// x-resolution:   4 bytes  dpi
// y-resolution:   4 bytes  dpi
// bytes-per-row:  4 bytes  (rows padded to whole bytes)
// payload-length: 8 bytes
// payload:        payload-length bytes of row data, top to bottom
// ```

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Compression, PixelFormat};

/// Container magic, first four bytes of every raster file.
const MAGIC: [u8; 4] = *b"SWRF";

/// Current container version.
const VERSION: u16 = 1;

/// Total header size in bytes.
const HEADER_LEN: usize = 36;

/// Pixel-format byte: bw1, packed 8 pixels per byte.
const FORMAT_BW1: u8 = 0x01;

/// Pixel-format byte: 8-bit grayscale.
const FORMAT_GRAY8: u8 = 0x08;

/// Pixel-format byte: 24-bit RGB.
const FORMAT_RGB24: u8 = 0x18;

/// Compression byte: no compression.
const COMPRESSION_NONE: u8 = 0x00;

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterHeader {
    pub version: u16,
    pub pixel_format: PixelFormat,
    pub compression: Compression,
    pub width: u32,
    pub height: u32,
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub bytes_per_row: u32,
    pub payload_len: u64,
}

fn format_byte(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Bw1 => FORMAT_BW1,
        PixelFormat::Gray8 => FORMAT_GRAY8,
        PixelFormat::Rgb24 => FORMAT_RGB24,
    }
}

fn format_from_byte(byte: u8) -> Option<PixelFormat> {
    match byte {
        FORMAT_BW1 => Some(PixelFormat::Bw1),
        FORMAT_GRAY8 => Some(PixelFormat::Gray8),
        FORMAT_RGB24 => Some(PixelFormat::Rgb24),
        _ => None,
    }
}

/// Encode one page of row data into a complete container.
///
/// `rows` must be exactly `bytes_per_row(width) * height` bytes; anything
/// else means the caller mis-declared the geometry and the page is rejected
/// rather than silently truncated.
pub fn encode_container(
    format: PixelFormat,
    width: u32,
    height: u32,
    resolution: u32,
    rows: &[u8],
) -> Result<Vec<u8>> {
    let bytes_per_row = format.bytes_per_row(width);
    let expected = bytes_per_row as usize * height as usize;
    if rows.len() != expected {
        return Err(ScanwerkError::Encode(format!(
            "row data is {} bytes, geometry {}x{} at {} needs {}",
            rows.len(),
            width,
            height,
            format,
            expected
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + rows.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_be_bytes());
    buf.push(format_byte(format));
    buf.push(COMPRESSION_NONE);
    buf.extend_from_slice(&width.to_be_bytes());
    buf.extend_from_slice(&height.to_be_bytes());
    buf.extend_from_slice(&resolution.to_be_bytes());
    buf.extend_from_slice(&resolution.to_be_bytes());
    buf.extend_from_slice(&bytes_per_row.to_be_bytes());
    buf.extend_from_slice(&(rows.len() as u64).to_be_bytes());
    buf.extend_from_slice(rows);
    Ok(buf)
}

/// Parse a container, returning its header and a view of the payload.
pub fn parse_container(data: &[u8]) -> Result<(RasterHeader, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(ScanwerkError::Encode(format!(
            "container too short: {} bytes (header is {HEADER_LEN})",
            data.len()
        )));
    }
    if data[0..4] != MAGIC {
        return Err(ScanwerkError::Encode("bad container magic".into()));
    }

    let version = u16::from_be_bytes([data[4], data[5]]);
    let pixel_format = format_from_byte(data[6])
        .ok_or_else(|| ScanwerkError::Encode(format!("unknown pixel-format byte {:#04x}", data[6])))?;
    if data[7] != COMPRESSION_NONE {
        return Err(ScanwerkError::Encode(format!(
            "unknown compression byte {:#04x}",
            data[7]
        )));
    }

    let word = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    let header = RasterHeader {
        version,
        pixel_format,
        compression: Compression::None,
        width: word(8),
        height: word(12),
        x_resolution: word(16),
        y_resolution: word(20),
        bytes_per_row: word(24),
        payload_len: u64::from_be_bytes([
            data[28], data[29], data[30], data[31], data[32], data[33], data[34], data[35],
        ]),
    };

    let payload = &data[HEADER_LEN..];
    if payload.len() as u64 != header.payload_len {
        return Err(ScanwerkError::Encode(format!(
            "payload is {} bytes, header declares {}",
            payload.len(),
            header.payload_len
        )));
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_gray8() {
        let rows: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        let data = encode_container(PixelFormat::Gray8, 20, 10, 300, &rows).expect("encode");

        let (header, payload) = parse_container(&data).expect("parse");
        assert_eq!(header.version, 1);
        assert_eq!(header.pixel_format, PixelFormat::Gray8);
        assert_eq!(header.compression, Compression::None);
        assert_eq!(header.width, 20);
        assert_eq!(header.height, 10);
        assert_eq!(header.x_resolution, 300);
        assert_eq!(header.y_resolution, 300);
        assert_eq!(header.bytes_per_row, 20);
        assert_eq!(payload, rows.as_slice());
    }

    #[test]
    fn bw1_rows_pad_to_whole_bytes() {
        // 10 pixels per row -> 2 bytes per row.
        let rows = vec![0xAAu8; 2 * 4];
        let data = encode_container(PixelFormat::Bw1, 10, 4, 200, &rows).expect("encode");
        let (header, _) = parse_container(&data).expect("parse");
        assert_eq!(header.bytes_per_row, 2);
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let rows = vec![0u8; 9];
        let err = encode_container(PixelFormat::Gray8, 10, 1, 200, &rows).unwrap_err();
        assert!(matches!(err, ScanwerkError::Encode(_)));
    }

    #[test]
    fn truncated_container_is_rejected() {
        let rows = vec![0u8; 10];
        let mut data = encode_container(PixelFormat::Gray8, 10, 1, 200, &rows).expect("encode");
        data.truncate(data.len() - 1);
        assert!(parse_container(&data).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let rows = vec![0u8; 10];
        let mut data = encode_container(PixelFormat::Gray8, 10, 1, 200, &rows).expect("encode");
        data[0] = b'X';
        assert!(parse_container(&data).is_err());
    }
}
