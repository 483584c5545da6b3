use std::io::Read;

use crate::CryptoError;

/// Inflate `data`, accepting gzip, zlib or raw deflate streams.
///
/// Push frames are nominally gzip-wrapped, but the server has been observed
/// sending bare zlib, so each format is tried in turn.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    if flate2::read::GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    if flate2::read::ZlibDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|_| CryptoError::Inflate)?;
    Ok(out)
}
