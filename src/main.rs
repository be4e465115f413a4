//! Self-extracting stub entry point: locate the embedded payload inside
//! this executable's own image, materialize it into the content-addressed
//! cache if needed, and hand off to it (spec §4.9).

mod debug;
mod elf;
mod error;
mod handoff;
mod marker;
mod selfopen;
mod update;

use error::Error;
use std::io::{Read, Seek, SeekFrom};
use stub_format::format::{self, Metadata};

#[cfg(target_os = "windows")]
const MAX_UNCOMPRESSED_SIZE: u64 = format::WINDOWS_MAX_UNCOMPRESSED_SIZE;
#[cfg(not(target_os = "windows"))]
const MAX_UNCOMPRESSED_SIZE: u64 = format::DECOMPRESSOR_MAX_UNCOMPRESSED_SIZE;

fn main() {
    debug::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> error::Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    crate::trace!("opening own executable image");
    let mut image = selfopen::open_self()?;

    crate::trace!("scanning for payload marker");
    let header_offset = marker::find_marker(&mut image.file)?;

    let image_size = image
        .file
        .seek(SeekFrom::End(0))
        .map_err(|_| Error::ReadShort)?;

    crate::trace!("reading metadata at offset {header_offset}");
    let header_region = read_header_region(&mut image.file, header_offset, image_size)?;
    // `header_region.buf` starts exactly at `header_offset` in the image,
    // so every offset `read_metadata` computes (including `data_offset`)
    // is relative to that same point; bound it against the image size
    // measured from there too.
    let metadata: Metadata = format::read_metadata(
        &header_region.buf,
        0,
        MAX_UNCOMPRESSED_SIZE,
        image_size - header_offset,
    )?;

    let absolute_data_offset = header_offset + metadata.data_offset;

    if argv.iter().any(|a| a == "--stub-version") {
        println!(env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if argv.iter().any(|a| a == "--stub-info") {
        print_stub_info(&metadata);
        return Ok(());
    }
    let force_reextract = argv.iter().any(|a| a == "--stub-reextract");

    let cache_root = stub_format::cache::resolve_cache_root()?;

    let cached_path = if force_reextract {
        crate::trace!("--stub-reextract given, skipping cache lookup");
        None
    } else {
        stub_format::cache::get_cached_binary_path(
            &cache_root,
            &metadata.cache_key,
            &metadata.platform,
            metadata.uncompressed_size,
        )
    };

    let binary_path = match cached_path {
        Some(path) => {
            crate::trace!("cache hit: {}", path.display());
            path
        }
        None => {
            crate::trace!("cache miss: decompressing payload");
            materialize_to_cache(
                &mut image.file,
                absolute_data_offset,
                &metadata,
                &cache_root,
                &image.path,
            )?
        }
    };

    if let Some(config) = &metadata.update_config {
        let current_version = stub_format::cache::read_sidecar(&cache_root, &metadata.cache_key)
            .map(|s| s.update_check.latest_known)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0.0.0".to_string());
        update::maybe_check_updates(config, &current_version, &cache_root, &metadata.cache_key);
    }

    let filtered_args = handoff::filter_stub_args(&argv);

    drop(image.file);

    crate::trace!("handing off to {}", binary_path.display());
    match handoff::exec_or_spawn(&binary_path, &filtered_args) {
        Ok(never) => match never {},
        Err(e) => Err(e),
    }
}

fn print_stub_info(metadata: &Metadata) {
    println!("Cache key: {}", metadata.cache_key);
    println!(
        "Platform: platform={} arch={} libc={}",
        metadata.platform.platform, metadata.platform.arch, metadata.platform.libc
    );
    println!("Compressed size: {} bytes", metadata.compressed_size);
    println!("Uncompressed size: {} bytes", metadata.uncompressed_size);
    match &metadata.update_config {
        Some(cfg) => {
            println!("Update config: enabled={} url={}", cfg.enabled, cfg.url);
        }
        None => println!("Update config: none"),
    }
}

struct HeaderRegion {
    buf: Vec<u8>,
}

/// Read enough of the image, starting at `header_offset`, to cover the
/// fixed header and (if present) the update-config block. We don't know
/// `has_update_config` until we've read the first `HEADER_SIZE` bytes, so
/// this does a short probe read first.
fn read_header_region(
    file: &mut std::fs::File,
    header_offset: u64,
    image_size: u64,
) -> error::Result<HeaderRegion> {
    file.seek(SeekFrom::Start(header_offset))
        .map_err(|_| Error::ReadShort)?;

    let mut probe = vec![0u8; format::HEADER_SIZE];
    file.read_exact(&mut probe).map_err(|_| Error::ReadShort)?;

    let has_update_config = probe[format::HEADER_SIZE - 1];
    let total_len = if has_update_config == 1 {
        format::HEADER_SIZE + format::UPDATE_CONFIG_SIZE
    } else {
        format::HEADER_SIZE
    };

    let mut buf = probe;
    if total_len > buf.len() {
        let remaining = total_len - buf.len();
        if header_offset + total_len as u64 > image_size {
            return Err(Error::ReadShort);
        }
        let mut rest = vec![0u8; remaining];
        file.read_exact(&mut rest).map_err(|_| Error::ReadShort)?;
        buf.extend_from_slice(&rest);
    }

    Ok(HeaderRegion { buf })
}

fn materialize_to_cache(
    file: &mut std::fs::File,
    absolute_data_offset: u64,
    metadata: &Metadata,
    cache_root: &std::path::Path,
    original_exe: &std::path::Path,
) -> error::Result<std::path::PathBuf> {
    file.seek(SeekFrom::Start(absolute_data_offset))
        .map_err(|_| Error::ReadShort)?;
    let mut compressed = vec![0u8; metadata.compressed_size as usize];
    file.read_exact(&mut compressed).map_err(|_| Error::ReadShort)?;

    let mut decompressed = vec![0u8; metadata.uncompressed_size as usize];
    stub_format::decompress::decompress(&compressed, &mut decompressed)?;
    drop(compressed);

    let path = stub_format::cache::write_to_cache(
        cache_root,
        &metadata.cache_key,
        &metadata.platform,
        &decompressed,
        original_exe,
    )?;
    drop(decompressed);

    Ok(path)
}
