//! Minimal ELF header / program header parsing, used only to find
//! `PT_NOTE` segments for the marker finder (spec §4.2).
//!
//! This is deliberately not a general-purpose ELF reader: it parses just
//! enough of the header and program-header table to walk segments by
//! type, the way the teacher's binary-format structs (`PackFooter`,
//! `SectionHeader` in `crates/smolvm-pack`) parse just the fields they
//! need with explicit byte offsets rather than pulling in a full ELF
//! crate.

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

/// ELF program-header segment type for notes.
pub const PT_NOTE: u32 = 4;

/// A single program-header entry, normalized to 64-bit fields regardless
/// of whether the source image is 32- or 64-bit ELF.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type (e.g. [`PT_NOTE`]).
    pub p_type: u32,
    /// Offset of the segment within the file.
    pub p_offset: u64,
    /// Size of the segment within the file.
    pub p_filesz: u64,
}

/// Is `buf` the start of an ELF image?
pub fn is_elf(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0..4] == ELF_MAGIC
}

/// Parse the ELF header and program-header table, returning every
/// program header in file order. Returns `None` if `buf` isn't a
/// well-formed ELF header (wrong magic, unsupported class/endianness, or
/// a program-header table that runs past the end of `buf`).
pub fn program_headers(buf: &[u8]) -> Option<Vec<ProgramHeader>> {
    if !is_elf(buf) || buf.len() < 20 {
        return None;
    }

    let ei_class = buf[4];
    let ei_data = buf[5];
    let is_64 = match ei_class {
        ELFCLASS32 => false,
        ELFCLASS64 => true,
        _ => return None,
    };
    let little_endian = match ei_data {
        ELFDATA2LSB => true,
        ELFDATA2MSB => false,
        _ => return None,
    };

    let read_u16 = |b: &[u8]| -> u16 {
        let arr: [u8; 2] = b.try_into().unwrap();
        if little_endian {
            u16::from_le_bytes(arr)
        } else {
            u16::from_be_bytes(arr)
        }
    };
    let read_u32 = |b: &[u8]| -> u32 {
        let arr: [u8; 4] = b.try_into().unwrap();
        if little_endian {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        }
    };
    let read_u64 = |b: &[u8]| -> u64 {
        let arr: [u8; 8] = b.try_into().unwrap();
        if little_endian {
            u64::from_le_bytes(arr)
        } else {
            u64::from_be_bytes(arr)
        }
    };

    // e_phoff, e_phentsize, e_phnum live at different offsets for 32 vs 64 bit.
    let (phoff, phentsize, phnum) = if is_64 {
        if buf.len() < 64 {
            return None;
        }
        let phoff = read_u64(&buf[32..40]);
        let phentsize = read_u16(&buf[54..56]);
        let phnum = read_u16(&buf[56..58]);
        (phoff, phentsize, phnum)
    } else {
        if buf.len() < 52 {
            return None;
        }
        let phoff = read_u32(&buf[28..32]) as u64;
        let phentsize = read_u16(&buf[42..44]);
        let phnum = read_u16(&buf[44..46]);
        (phoff, phentsize, phnum)
    };

    let mut headers = Vec::with_capacity(phnum as usize);
    for i in 0..phnum as u64 {
        let entry_off = phoff.checked_add(i * phentsize as u64)?;
        let entry_off = usize::try_from(entry_off).ok()?;

        if is_64 {
            if buf.len() < entry_off + 56 {
                return None;
            }
            let p_type = read_u32(&buf[entry_off..entry_off + 4]);
            let p_offset = read_u64(&buf[entry_off + 8..entry_off + 16]);
            let p_filesz = read_u64(&buf[entry_off + 32..entry_off + 40]);
            headers.push(ProgramHeader {
                p_type,
                p_offset,
                p_filesz,
            });
        } else {
            if buf.len() < entry_off + 32 {
                return None;
            }
            let p_type = read_u32(&buf[entry_off..entry_off + 4]);
            let p_offset = read_u32(&buf[entry_off + 4..entry_off + 8]) as u64;
            let p_filesz = read_u32(&buf[entry_off + 16..entry_off + 20]) as u64;
            headers.push(ProgramHeader {
                p_type,
                p_offset,
                p_filesz,
            });
        }
    }

    Some(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal well-formed 64-bit LE ELF header + one PT_NOTE
    /// program header pointing at a given offset/size.
    fn synthetic_elf64(note_offset: u64, note_filesz: u64) -> Vec<u8> {
        let mut buf = vec![0u8; 64];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[6] = 1; // EI_VERSION

        let phoff: u64 = 64;
        buf[32..40].copy_from_slice(&phoff.to_le_bytes());
        let phentsize: u16 = 56;
        buf[54..56].copy_from_slice(&phentsize.to_le_bytes());
        let phnum: u16 = 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());

        let mut phdr = vec![0u8; 56];
        phdr[0..4].copy_from_slice(&PT_NOTE.to_le_bytes());
        phdr[8..16].copy_from_slice(&note_offset.to_le_bytes());
        phdr[32..40].copy_from_slice(&note_filesz.to_le_bytes());
        buf.extend_from_slice(&phdr);
        buf
    }

    #[test]
    fn finds_pt_note_segment() {
        let buf = synthetic_elf64(0x12000, 0x8000);
        let headers = program_headers(&buf).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].p_type, PT_NOTE);
        assert_eq!(headers[0].p_offset, 0x12000);
        assert_eq!(headers[0].p_filesz, 0x8000);
    }

    #[test]
    fn rejects_non_elf() {
        assert!(program_headers(b"not an elf file at all").is_none());
    }
}
