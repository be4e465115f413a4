//! Binary layout of a packed stub image: the magic marker, the fixed
//! metadata header that follows it, and the optional update-config block.
//!
//! Mirrors the read/validate split the teacher uses for `PackFooter` and
//! `PackManifest` (`packer.rs`): small fixed-size structs with explicit
//! `to_bytes`/`from_bytes` pairs instead of `bincode`, so the exact
//! on-disk layout is legible at the call site.

use crate::error::{Error, Result};

/// 32-byte magic marker separating launcher code from the embedded
/// metadata/payload. Appears exactly once per valid stub image (twice
/// only in the ELF `PT_NOTE` case, where the scan is already confined to
/// note segments).
pub const MARKER: &[u8; 32] = b"__SMOL_PRESSED_DATA_MAGIC_MARKER";

/// Size of the fixed metadata header that follows the marker:
/// `compressed_size(8) + uncompressed_size(8) + cache_key(16) +
/// platform(3) + has_update_config(1)`.
///
/// An older 35-byte layout is documented in spec Open Questions as still
/// shipping in the wild; this reader only accepts the current 36-byte
/// layout and fails closed on anything else (see DESIGN.md).
pub const HEADER_SIZE: usize = 8 + 8 + 16 + 3 + 1;

/// Size of the optional update-config block, present iff `has_update_config`.
pub const UPDATE_CONFIG_SIZE: usize = 1112;

/// Magic for the update-config block ("UPDF" read as a little-endian u32).
pub const UPDATE_CONFIG_MAGIC: u32 = 0x4644_5055;

/// Supported update-config format version.
pub const UPDATE_CONFIG_VERSION: u32 = 1;

/// Compile-time ceiling on both compressed and uncompressed sizes for the
/// LZFSE (Linux/macOS) backends.
pub const DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Compile-time ceiling for the Windows LZMS backend.
pub const WINDOWS_MAX_UNCOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Platform byte values from the 3-byte platform tuple.
pub mod platform_byte {
    /// Linux.
    pub const LINUX: u8 = 0;
    /// macOS.
    pub const DARWIN: u8 = 1;
    /// Windows.
    pub const WIN32: u8 = 2;
}

/// Arch byte values from the 3-byte platform tuple.
pub mod arch_byte {
    /// x86_64.
    pub const X64: u8 = 0;
    /// aarch64.
    pub const ARM64: u8 = 1;
    /// x86 (32-bit).
    pub const IA32: u8 = 2;
    /// 32-bit ARM.
    pub const ARM: u8 = 3;
}

/// Libc byte values from the 3-byte platform tuple.
pub mod libc_byte {
    /// glibc.
    pub const GLIBC: u8 = 0;
    /// musl.
    pub const MUSL: u8 = 1;
    /// Not applicable (non-Linux platforms).
    pub const NA: u8 = 255;
}

/// Parsed update-config block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Whether the update check is enabled at all.
    pub enabled: bool,
    /// Whether to prompt interactively before applying an update.
    pub prompt: bool,
    /// Default answer when the prompt can't be shown interactively.
    pub prompt_default_yes: bool,
    /// Releases-index URL to query.
    pub url: String,
    /// Anchored glob pattern used to select a release tag.
    pub tag_pattern: String,
    /// Shell-free command template to run on acceptance.
    pub command: String,
    /// Display name for the binary, used in the notifier's "Run:" line.
    pub binname: String,
}

const URL_FIELD_SIZE: usize = 512;
const TAG_PATTERN_FIELD_SIZE: usize = 128;
const COMMAND_FIELD_SIZE: usize = 320;
const BINNAME_FIELD_SIZE: usize = 64;
const RESERVED_SIZE: usize = UPDATE_CONFIG_SIZE
    - 4 // magic
    - 4 // version
    - 1 // enabled
    - 1 // prompt
    - 1 // prompt_default
    - URL_FIELD_SIZE
    - TAG_PATTERN_FIELD_SIZE
    - COMMAND_FIELD_SIZE
    - BINNAME_FIELD_SIZE;

fn read_nul_terminated(buf: &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MetadataInvalid("string field not null-terminated".into()))?;
    std::str::from_utf8(&buf[..end])
        .map(str::to_string)
        .map_err(|e| Error::MetadataInvalid(format!("string field not valid utf-8: {e}")))
}

fn write_nul_terminated(field: &mut [u8], value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= field.len() {
        return Err(Error::MetadataInvalid(format!(
            "field value too long: {} bytes, max {}",
            bytes.len(),
            field.len() - 1
        )));
    }
    field[..bytes.len()].copy_from_slice(bytes);
    field[bytes.len()..].fill(0);
    Ok(())
}

impl UpdateConfig {
    /// Parse a fixed `UPDATE_CONFIG_SIZE`-byte block, validating magic and
    /// version and rejecting any string field that isn't null-terminated
    /// within its buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != UPDATE_CONFIG_SIZE {
            return Err(Error::MetadataInvalid(format!(
                "update-config block must be exactly {UPDATE_CONFIG_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let mut cursor = 0usize;
        let magic = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        if magic != UPDATE_CONFIG_MAGIC {
            return Err(Error::MetadataInvalid(format!(
                "bad update-config magic: {magic:#010x}"
            )));
        }

        let version = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        if version != UPDATE_CONFIG_VERSION {
            return Err(Error::MetadataInvalid(format!(
                "unsupported update-config version: {version} (only {UPDATE_CONFIG_VERSION} is supported)"
            )));
        }

        let enabled = buf[cursor] != 0;
        cursor += 1;
        let prompt = buf[cursor] != 0;
        cursor += 1;
        let prompt_default_yes = match buf[cursor] {
            b'y' | b'Y' => true,
            b'n' | b'N' => false,
            other => {
                return Err(Error::MetadataInvalid(format!(
                    "prompt_default must be 'y' or 'n', got {other:#04x}"
                )))
            }
        };
        cursor += 1;

        let url = read_nul_terminated(&buf[cursor..cursor + URL_FIELD_SIZE])?;
        cursor += URL_FIELD_SIZE;
        let tag_pattern = read_nul_terminated(&buf[cursor..cursor + TAG_PATTERN_FIELD_SIZE])?;
        cursor += TAG_PATTERN_FIELD_SIZE;
        let command = read_nul_terminated(&buf[cursor..cursor + COMMAND_FIELD_SIZE])?;
        cursor += COMMAND_FIELD_SIZE;
        let binname = read_nul_terminated(&buf[cursor..cursor + BINNAME_FIELD_SIZE])?;

        Ok(UpdateConfig {
            enabled,
            prompt,
            prompt_default_yes,
            url,
            tag_pattern,
            command,
            binname,
        })
    }

    /// Serialize back to the fixed `UPDATE_CONFIG_SIZE`-byte on-disk form.
    /// Used by tests to build synthetic stub images.
    pub fn to_bytes(&self) -> Result<[u8; UPDATE_CONFIG_SIZE]> {
        let mut buf = [0u8; UPDATE_CONFIG_SIZE];
        let mut cursor = 0usize;
        buf[cursor..cursor + 4].copy_from_slice(&UPDATE_CONFIG_MAGIC.to_le_bytes());
        cursor += 4;
        buf[cursor..cursor + 4].copy_from_slice(&UPDATE_CONFIG_VERSION.to_le_bytes());
        cursor += 4;
        buf[cursor] = self.enabled as u8;
        cursor += 1;
        buf[cursor] = self.prompt as u8;
        cursor += 1;
        buf[cursor] = if self.prompt_default_yes { b'y' } else { b'n' };
        cursor += 1;

        write_nul_terminated(&mut buf[cursor..cursor + URL_FIELD_SIZE], &self.url)?;
        cursor += URL_FIELD_SIZE;
        write_nul_terminated(
            &mut buf[cursor..cursor + TAG_PATTERN_FIELD_SIZE],
            &self.tag_pattern,
        )?;
        cursor += TAG_PATTERN_FIELD_SIZE;
        write_nul_terminated(&mut buf[cursor..cursor + COMMAND_FIELD_SIZE], &self.command)?;
        cursor += COMMAND_FIELD_SIZE;
        write_nul_terminated(&mut buf[cursor..cursor + BINNAME_FIELD_SIZE], &self.binname)?;
        // Remaining RESERVED_SIZE bytes stay zero-filled.
        let _ = RESERVED_SIZE;

        Ok(buf)
    }
}

/// Platform/arch/libc triple carried in the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformTuple {
    /// See [`platform_byte`].
    pub platform: u8,
    /// See [`arch_byte`].
    pub arch: u8,
    /// See [`libc_byte`].
    pub libc: u8,
}

impl PlatformTuple {
    /// The cached binary's file name for this platform: `node.exe` on
    /// Windows, `node` everywhere else.
    pub fn binary_name(&self) -> &'static str {
        if self.platform == platform_byte::WIN32 {
            "node.exe"
        } else {
            "node"
        }
    }
}

/// In-memory metadata read from a stub image.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Size of the compressed payload in bytes.
    pub compressed_size: u64,
    /// Size of the decompressed payload in bytes.
    pub uncompressed_size: u64,
    /// 16 lowercase hex characters naming the cache subdirectory.
    pub cache_key: String,
    /// Target platform/arch/libc for the payload.
    pub platform: PlatformTuple,
    /// Parsed update-config block, if present.
    pub update_config: Option<UpdateConfig>,
    /// Absolute byte offset in the image where the compressed payload begins.
    pub data_offset: u64,
}

fn validate_cache_key(key: &str) -> Result<()> {
    if key.len() == 16 && key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(Error::MetadataInvalid(format!(
            "cache key must be exactly 16 lowercase hex characters, got {key:?}"
        )))
    }
}

/// Read and validate a [`Metadata`] record starting at `header_offset`
/// (the byte immediately after the marker) out of an in-memory buffer
/// that already contains at least the header and, if present, the
/// update-config block. `max_uncompressed_size` is the platform-specific
/// ceiling from [`DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE`] or
/// [`WINDOWS_MAX_UNCOMPRESSED_SIZE`].
///
/// `image_size` bounds `data_offset + compressed_size`, enforcing the
/// invariant from spec §3.
pub fn read_metadata(
    buf: &[u8],
    header_offset: u64,
    max_uncompressed_size: u64,
    image_size: u64,
) -> Result<Metadata> {
    let start = header_offset as usize;
    if buf.len() < start + HEADER_SIZE {
        return Err(Error::ReadShort {
            expected: start + HEADER_SIZE,
            actual: buf.len(),
        });
    }

    let mut cursor = start;
    let compressed_size = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;
    let uncompressed_size = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;
    let cache_key_bytes = &buf[cursor..cursor + 16];
    cursor += 16;
    let platform = PlatformTuple {
        platform: buf[cursor],
        arch: buf[cursor + 1],
        libc: buf[cursor + 2],
    };
    cursor += 3;
    let has_update_config = buf[cursor];
    cursor += 1;

    if compressed_size == 0 || uncompressed_size == 0 {
        return Err(Error::MetadataInvalid(
            "compressed_size and uncompressed_size must both be non-zero".into(),
        ));
    }
    if compressed_size > max_uncompressed_size || uncompressed_size > max_uncompressed_size {
        return Err(Error::MetadataInvalid(format!(
            "size exceeds ceiling of {max_uncompressed_size} bytes"
        )));
    }

    let cache_key = std::str::from_utf8(cache_key_bytes)
        .map(str::to_string)
        .map_err(|_| Error::MetadataInvalid("cache key is not valid utf-8".into()))?;
    validate_cache_key(&cache_key)?;

    let update_config = match has_update_config {
        0 => None,
        1 => {
            if buf.len() < cursor + UPDATE_CONFIG_SIZE {
                return Err(Error::ReadShort {
                    expected: cursor + UPDATE_CONFIG_SIZE,
                    actual: buf.len(),
                });
            }
            let cfg = UpdateConfig::from_bytes(&buf[cursor..cursor + UPDATE_CONFIG_SIZE])?;
            cursor += UPDATE_CONFIG_SIZE;
            Some(cfg)
        }
        other => {
            return Err(Error::MetadataInvalid(format!(
                "has_update_config must be 0 or 1, got {other}"
            )))
        }
    };

    let data_offset = cursor as u64;
    let end = data_offset
        .checked_add(compressed_size)
        .ok_or(Error::OffsetOverflow)?;
    if end > image_size {
        return Err(Error::MetadataInvalid(format!(
            "payload extends past end of image: data_offset={data_offset} compressed_size={compressed_size} image_size={image_size}"
        )));
    }

    Ok(Metadata {
        compressed_size,
        uncompressed_size,
        cache_key,
        platform,
        update_config,
        data_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(cache_key: &str, has_cfg: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1024u64.to_le_bytes());
        buf.extend_from_slice(&4096u64.to_le_bytes());
        buf.extend_from_slice(cache_key.as_bytes());
        buf.push(platform_byte::LINUX);
        buf.push(arch_byte::X64);
        buf.push(libc_byte::GLIBC);
        buf.push(has_cfg as u8);
        buf
    }

    #[test]
    fn reads_header_without_update_config() {
        let mut buf = sample_header("deadbeefcafef00d", false);
        buf.extend_from_slice(&[0u8; 1024]); // payload placeholder
        let meta = read_metadata(&buf, 0, DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE, buf.len() as u64)
            .unwrap();
        assert_eq!(meta.cache_key, "deadbeefcafef00d");
        assert_eq!(meta.compressed_size, 1024);
        assert_eq!(meta.uncompressed_size, 4096);
        assert!(meta.update_config.is_none());
        assert_eq!(meta.data_offset, HEADER_SIZE as u64);
    }

    #[test]
    fn round_trips_update_config() {
        let cfg = UpdateConfig {
            enabled: true,
            prompt: true,
            prompt_default_yes: true,
            url: "https://api.github.com/repos/acme/node-smol/releases".into(),
            tag_pattern: "node-smol-v*".into(),
            command: "--update-config apply".into(),
            binname: "node".into(),
        };
        let bytes = cfg.to_bytes().unwrap();
        let parsed = UpdateConfig::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; UPDATE_CONFIG_SIZE];
        assert!(UpdateConfig::from_bytes(&buf).is_err());
    }

    #[test]
    fn rejects_invalid_cache_key() {
        let mut buf = sample_header("deadbeef/../../", false);
        buf.extend_from_slice(&[0u8; 1024]);
        let err = read_metadata(&buf, 0, DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE, buf.len() as u64)
            .unwrap_err();
        assert!(matches!(err, Error::MetadataInvalid(_)));
    }

    #[test]
    fn rejects_payload_past_end_of_image() {
        let buf = sample_header("deadbeefcafef00d", false);
        // No payload bytes appended: image_size == header size only.
        let err = read_metadata(&buf, 0, DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE, buf.len() as u64)
            .unwrap_err();
        assert!(matches!(err, Error::MetadataInvalid(_)));
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&4096u64.to_le_bytes());
        buf.extend_from_slice(b"deadbeefcafef00d");
        buf.push(platform_byte::LINUX);
        buf.push(arch_byte::X64);
        buf.push(libc_byte::GLIBC);
        buf.push(0);
        let err = read_metadata(&buf, 0, DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE, buf.len() as u64)
            .unwrap_err();
        assert!(matches!(err, Error::MetadataInvalid(_)));
    }
}
