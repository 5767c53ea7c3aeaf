//! Polymorphic image encoders: `rgb_raw` and `rgb_zip`.

use bytes::{BufMut, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use crate::error::{Result, RivError};
use crate::provider::{SUBTYPE_RGB_RAW, SUBTYPE_RGB_ZIP};

/// Transforms a raw top-down RGB snapshot into an encoded
/// `(metadata, payload)` pair ready to go on the wire.
pub trait Encoder: Send + Sync {
    fn subtype(&self) -> u16;
    fn encode(&self, raw: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>)>;
}

/// Passes the snapshot through unchanged; metadata carries the
/// dimensions so a client can reconstruct scanlines without a separate
/// handshake round trip.
pub struct RgbRawEncoder;

impl Encoder for RgbRawEncoder {
    fn subtype(&self) -> u16 {
        SUBTYPE_RGB_RAW
    }

    fn encode(&self, raw: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((dimensions_metadata(width, height), raw.to_vec()))
    }
}

/// zlib-deflates the snapshot. Metadata carries the *uncompressed*
/// dimensions, since the payload's own length no longer implies them.
pub struct RgbZipEncoder;

impl Encoder for RgbZipEncoder {
    fn subtype(&self) -> u16 {
        SUBTYPE_RGB_ZIP
    }

    fn encode(&self, raw: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(raw)
            .map_err(|e| RivError::InternalError(format!("zlib write failed: {e}")))?;
        let payload = enc
            .finish()
            .map_err(|e| RivError::InternalError(format!("zlib finish failed: {e}")))?;
        Ok((dimensions_metadata(width, height), payload))
    }
}

fn dimensions_metadata(width: u32, height: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(width);
    buf.put_u32_le(height);
    buf.to_vec()
}

/// Builds the encoder for a requested subtype, or `UnsupportedMedia` if
/// this build does not implement it.
pub fn for_subtype(subtype: u16) -> Result<Box<dyn Encoder>> {
    match subtype {
        SUBTYPE_RGB_RAW => Ok(Box::new(RgbRawEncoder)),
        SUBTYPE_RGB_ZIP => Ok(Box::new(RgbZipEncoder)),
        other => Err(RivError::UnsupportedMedia(format!(
            "unsupported channel subtype {other}"
        ))),
    }
}
