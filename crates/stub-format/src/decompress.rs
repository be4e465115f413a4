//! Decompressor adapter.
//!
//! One backend is compiled in per platform: LZFSE on Linux/macOS, the
//! Windows Compression API (LZMS) on Windows. No streaming — the stub
//! exec's away right after, so buffering the whole payload trades RAM for
//! a much simpler state machine (see spec §4.4).

use crate::error::{Error, Result};

/// Decompress `input` into `output`. `output.len()` is the exact expected
/// uncompressed size; a backend that decodes a different length fails.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<()> {
    backend::decompress(input, output)
}

#[cfg(all(unix, feature = "lzfse-backend"))]
mod backend {
    use super::*;

    pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<()> {
        let decoded_len = lzfse::decode_buffer(input, output).map_err(|e| Error::DecompressFailed {
            backend: "lzfse",
            detail: format!("{e:?}"),
        })?;
        if decoded_len != output.len() {
            return Err(Error::DecompressFailed {
                backend: "lzfse",
                detail: format!(
                    "decoded {decoded_len} bytes, expected exactly {}",
                    output.len()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(all(unix, not(feature = "lzfse-backend")))]
mod backend {
    use super::*;

    pub fn decompress(_input: &[u8], _output: &mut [u8]) -> Result<()> {
        Err(Error::DecompressFailed {
            backend: "lzfse",
            detail: "lzfse-backend feature disabled".into(),
        })
    }
}

#[cfg(windows)]
mod backend {
    use super::*;
    use windows_sys::Win32::System::Compression::{
        CloseDecompressor, CreateDecompressor, Decompress, COMPRESS_ALGORITHM_LZMS,
    };

    pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<()> {
        unsafe {
            let mut handle = std::ptr::null_mut();
            let rc = CreateDecompressor(COMPRESS_ALGORITHM_LZMS, std::ptr::null(), &mut handle);
            if rc == 0 {
                return Err(Error::DecompressFailed {
                    backend: "lzms",
                    detail: format!("CreateDecompressor failed: {:#x}", windows_last_error()),
                });
            }

            let mut decoded_len: usize = 0;
            let ok = Decompress(
                handle,
                input.as_ptr() as *const _,
                input.len(),
                output.as_mut_ptr() as *mut _,
                output.len(),
                &mut decoded_len,
            );
            CloseDecompressor(handle);

            if ok == 0 {
                return Err(Error::DecompressFailed {
                    backend: "lzms",
                    detail: format!("Decompress failed: {:#x}", windows_last_error()),
                });
            }
            if decoded_len != output.len() {
                return Err(Error::DecompressFailed {
                    backend: "lzms",
                    detail: format!(
                        "decoded {decoded_len} bytes, expected exactly {}",
                        output.len()
                    ),
                });
            }
            Ok(())
        }
    }

    fn windows_last_error() -> u32 {
        unsafe { windows_sys::Win32::Foundation::GetLastError() }
    }
}

#[cfg(all(test, unix, feature = "lzfse-backend"))]
mod tests {
    use super::*;

    #[test]
    fn rejects_size_mismatch() {
        // Garbage input: lzfse will either error or decode a length that
        // doesn't match the (too-small) output buffer. Either way this
        // must not silently succeed.
        let input = vec![0u8; 16];
        let mut output = vec![0u8; 4096];
        assert!(decompress(&input, &mut output).is_err());
    }
}
