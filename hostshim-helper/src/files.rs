use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hostshim_shared::errors::{ShimError, ShimResult};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Attach the path to an io error, keeping its kind.
pub(crate) fn path_error(path: &Path, err: io::Error) -> ShimError {
    ShimError::Io(io::Error::new(
        err.kind(),
        format!("{}: {err}", path.display()),
    ))
}

/// Copy the file at `path` to `out` byte for byte.
pub fn read_to(path: &Path, out: &mut impl Write) -> ShimResult<()> {
    let mut file = File::open(path).map_err(|e| path_error(path, e))?;
    io::copy(&mut file, out).map_err(|e| path_error(path, e))?;
    out.flush()?;
    tracing::debug!(path = %path.display(), "read");
    Ok(())
}

pub fn decode_content(content: &str, base64: bool) -> ShimResult<Vec<u8>> {
    if !base64 {
        return Ok(content.as_bytes().to_vec());
    }
    BASE64
        .decode(content.trim())
        .map_err(|e| ShimError::InvalidArgument(format!("content is not valid base64: {e}")))
}

/// Replace the contents of `path`, creating the file if needed.
pub fn write_file(path: &Path, bytes: &[u8]) -> ShimResult<()> {
    std::fs::write(path, bytes).map_err(|e| path_error(path, e))?;
    tracing::debug!(path = %path.display(), len = bytes.len(), "wrote");
    Ok(())
}
