//! Marker finder: locate the 32-byte magic marker inside the running
//! executable's own image (spec §4.2).
//!
//! Two algorithms:
//! - generic chunked linear scan, used on non-ELF images (macOS, Windows)
//! - ELF `PT_NOTE` walk, used when the image is ELF (Linux), because the
//!   payload is embedded inside a note segment to survive repacking by
//!   binary-rewriting tools.

use crate::elf;
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

use stub_format::format::MARKER;

const CHUNK_SIZE: usize = 4096;
const MARKER_LEN: u64 = MARKER.len() as u64;

/// Search `reader` for [`MARKER`] over byte range `[range_start, range_end)`
/// using 4 KiB chunks, rewinding by `len(marker) - 1` bytes after each
/// chunk so matches spanning a chunk boundary are caught. Returns the
/// absolute offset immediately following the marker.
fn scan_range<R: Read + Seek>(reader: &mut R, range_start: u64, range_end: u64) -> Result<u64> {
    if range_end < range_start {
        return Err(Error::MarkerNotFound);
    }

    reader
        .seek(SeekFrom::Start(range_start))
        .map_err(|_| Error::MarkerNotFound)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut chunk_base = range_start;

    while chunk_base < range_end {
        let want = std::cmp::min(CHUNK_SIZE as u64, range_end - chunk_base) as usize;
        let read = read_up_to(reader, &mut buf[..want])?;
        if read == 0 {
            break;
        }

        if let Some(in_chunk_offset) = find_subslice(&buf[..read], MARKER.as_slice()) {
            let marker_start = chunk_base
                .checked_add(in_chunk_offset as u64)
                .ok_or(Error::MetadataInvalid("offset overflow".into()))?;
            let end = marker_start
                .checked_add(MARKER_LEN)
                .ok_or(Error::MetadataInvalid("offset overflow".into()))?;
            // The signed-offset range of a 64-bit seek primitive is
            // i64::MAX; anything beyond that can't be represented.
            if end > i64::MAX as u64 {
                return Err(Error::MetadataInvalid(
                    "marker offset exceeds signed seek range".into(),
                ));
            }
            return Ok(end);
        }

        // Rewind by len(marker) - 1 so a match spanning the boundary
        // between this chunk and the next is still caught.
        let overlap = (MARKER_LEN - 1).min(read as u64);
        chunk_base += read as u64 - overlap;
        reader
            .seek(SeekFrom::Start(chunk_base))
            .map_err(|_| Error::MarkerNotFound)?;
    }

    Err(Error::MarkerNotFound)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    Ok(total)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Find the marker in a non-ELF image (generic linear scan over the
/// whole file).
pub fn find_marker_linear<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    let len = reader
        .seek(SeekFrom::End(0))
        .map_err(|_| Error::MarkerNotFound)?;
    scan_range(reader, 0, len)
}

/// Find the marker inside an ELF image's `PT_NOTE` segments. Does **not**
/// fall back to a linear scan if no `PT_NOTE` segment contains the
/// marker — that path was intentionally removed to keep behavior
/// predictable (spec §4.2). Ties (multiple matching segments) resolve to
/// the first hit in program-header order.
pub fn find_marker_in_ptnote<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|_| Error::MarkerNotFound)?;
    let mut header_buf = vec![0u8; 64];
    let read = read_up_to(reader, &mut header_buf)?;
    header_buf.truncate(read);

    // Program headers can live past the first 64 bytes we just read; grab
    // enough of the file to parse the header + program-header table.
    let file_len = reader
        .seek(SeekFrom::End(0))
        .map_err(|_| Error::MarkerNotFound)?;
    let probe_len = file_len.min(64 * 1024);
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|_| Error::MarkerNotFound)?;
    let mut probe_buf = vec![0u8; probe_len as usize];
    let probe_read = read_up_to(reader, &mut probe_buf)?;
    probe_buf.truncate(probe_read);

    let headers = elf::program_headers(&probe_buf).ok_or(Error::MarkerNotFound)?;

    for ph in headers.into_iter().filter(|ph| ph.p_type == elf::PT_NOTE) {
        let seg_start = ph.p_offset;
        let seg_end = ph
            .p_offset
            .checked_add(ph.p_filesz)
            .ok_or(Error::MetadataInvalid("offset overflow".into()))?;
        if let Ok(offset) = scan_range(reader, seg_start, seg_end) {
            return Ok(offset);
        }
    }

    Err(Error::MarkerNotFound)
}

/// Top-level entry point: dispatches to the ELF `PT_NOTE` walk or the
/// generic linear scan depending on whether the image looks like ELF.
pub fn find_marker<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|_| Error::MarkerNotFound)?;
    let mut head = [0u8; 4];
    let read = read_up_to(reader, &mut head)?;

    if read == 4 && elf::is_elf(&head) {
        find_marker_in_ptnote(reader)
    } else {
        find_marker_linear(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image_with_marker_at(offset: usize) -> Vec<u8> {
        let mut buf = vec![0xAB; offset];
        buf.extend_from_slice(MARKER.as_slice());
        buf.extend_from_slice(&[0u8; 512]);
        buf
    }

    #[test]
    fn finds_marker_within_single_chunk() {
        let buf = image_with_marker_at(100);
        let mut cursor = Cursor::new(buf);
        let offset = find_marker_linear(&mut cursor).unwrap();
        assert_eq!(offset, 100 + MARKER_LEN);
    }

    #[test]
    fn finds_marker_spanning_chunk_boundary() {
        // Place the marker so it straddles the 4096-byte chunk edge.
        let offset = CHUNK_SIZE - 10;
        let buf = image_with_marker_at(offset);
        let mut cursor = Cursor::new(buf);
        let found = find_marker_linear(&mut cursor).unwrap();
        assert_eq!(found, offset as u64 + MARKER_LEN);
    }

    #[test]
    fn missing_marker_is_not_found() {
        let buf = vec![0u8; 10_000];
        let mut cursor = Cursor::new(buf);
        assert!(find_marker_linear(&mut cursor).is_err());
    }

    #[test]
    fn elf_pt_note_scan_finds_marker_in_segment() {
        // Build a synthetic ELF with a PT_NOTE segment containing the
        // marker at a known in-segment offset.
        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2; // ELFCLASS64
        buf[5] = 1; // ELFDATA2LSB
        buf[6] = 1;
        let phoff: u64 = 64;
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        let phentsize: u16 = 56;
        buf[54..56].copy_from_slice(&phentsize.to_le_bytes());
        let phnum: u16 = 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());

        let note_offset: u64 = 0x12000;
        let note_filesz: u64 = 0x8000;
        let mut phdr = vec![0u8; 56];
        phdr[0..4].copy_from_slice(&elf::PT_NOTE.to_le_bytes());
        phdr[8..16].copy_from_slice(&note_offset.to_le_bytes());
        phdr[32..40].copy_from_slice(&note_filesz.to_le_bytes());
        buf.extend_from_slice(&phdr);

        buf.resize(note_offset as usize + 0x200, 0u8);
        buf.extend_from_slice(MARKER.as_slice());
        buf.resize(note_offset as usize + note_filesz as usize, 0u8);

        let mut cursor = Cursor::new(buf);
        let offset = find_marker_in_ptnote(&mut cursor).unwrap();
        assert_eq!(offset, note_offset + 0x200 + MARKER_LEN);
    }

    #[test]
    fn elf_without_matching_pt_note_does_not_fall_back_to_linear_scan() {
        // Marker exists in the file but outside any PT_NOTE segment.
        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2;
        buf[5] = 1;
        buf[6] = 1;
        let phoff: u64 = 64;
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        let phentsize: u16 = 56;
        buf[54..56].copy_from_slice(&phentsize.to_le_bytes());
        let phnum: u16 = 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());

        let note_offset: u64 = 0x1000;
        let note_filesz: u64 = 0x100;
        let mut phdr = vec![0u8; 56];
        phdr[0..4].copy_from_slice(&elf::PT_NOTE.to_le_bytes());
        phdr[8..16].copy_from_slice(&note_offset.to_le_bytes());
        phdr[32..40].copy_from_slice(&note_filesz.to_le_bytes());
        buf.extend_from_slice(&phdr);

        // Marker lives after the PT_NOTE segment, not inside it.
        buf.resize(note_offset as usize + note_filesz as usize, 0u8);
        buf.extend_from_slice(MARKER.as_slice());

        let mut cursor = Cursor::new(buf);
        assert!(find_marker_in_ptnote(&mut cursor).is_err());
    }
}
