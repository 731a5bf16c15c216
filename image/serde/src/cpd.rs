/*++

Licensed under the Apache-2.0 license.

File Name:

   cpd.rs

Abstract:

    Code Partition Directory builder and parser.

--*/

use crc::{Crc, CRC_32_ISO_HDLC};
use siip_error::{SiipError, SiipResult};
use siip_image_types::*;
use zerocopy::{FromZeros, IntoBytes};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Byte offset of `crc32` within [`CpdHeader`]
const CRC32_OFFSET: usize = CpdHeader::SIZE - 4;

/// One named part delimited by a directory
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CpdPart {
    pub name: String,

    /// Offset from the start of the directory
    pub offset: u32,

    pub length: u32,
}

impl CpdPart {
    pub fn start(&self) -> usize {
        self.offset as usize
    }

    pub fn end(&self) -> usize {
        self.offset as usize + self.length as usize
    }
}

/// Parsed directory
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CpdDirectory {
    pub header: CpdHeader,

    pub parts: Vec<CpdPart>,
}

impl CpdDirectory {
    /// Size of the header plus the entry table
    pub fn table_len(&self) -> usize {
        table_len(self.parts.len())
    }

    /// Offset just past the last byte referenced by any entry
    pub fn end(&self) -> usize {
        self.parts
            .iter()
            .map(CpdPart::end)
            .max()
            .unwrap_or(0)
            .max(self.table_len())
    }

    /// Look up an entry by name
    pub fn find(&self, name: &'static str) -> SiipResult<&CpdPart> {
        self.parts
            .iter()
            .find(|part| part.name == name)
            .ok_or(SiipError::MissingEntry(name))
    }

    /// Bytes of entry `name` within `container`, the buffer the directory
    /// was parsed from
    pub fn part<'a>(&self, container: &'a [u8], name: &'static str) -> SiipResult<&'a [u8]> {
        let part = self.find(name)?;
        container
            .get(part.start()..part.end())
            .ok_or_else(|| SiipError::EntryOutOfBounds {
                name: part.name.clone(),
                offset: part.offset,
                length: part.length,
            })
    }

    /// Bytes of entry `name`, which must be exactly `size` bytes long
    pub fn sized_part<'a>(
        &self,
        container: &'a [u8],
        name: &'static str,
        size: usize,
    ) -> SiipResult<&'a [u8]> {
        let bytes = self.part(container, name)?;
        if bytes.len() != size {
            return Err(SiipError::EntrySizeMismatch {
                name,
                expected: size,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Check that entry names are unique, that every entry lies after the
    /// table and within `container_len` bytes, and that no two entries
    /// overlap
    pub fn validate_layout(&self, container_len: usize) -> SiipResult<()> {
        for (idx, part) in self.parts.iter().enumerate() {
            if self.parts[..idx].iter().any(|prev| prev.name == part.name) {
                return Err(SiipError::DuplicateEntry(part.name.clone()));
            }
        }

        let table_len = self.table_len();
        for part in &self.parts {
            if part.start() < table_len || part.end() > container_len {
                return Err(SiipError::EntryOutOfBounds {
                    name: part.name.clone(),
                    offset: part.offset,
                    length: part.length,
                });
            }
        }

        let mut sorted: Vec<&CpdPart> = self.parts.iter().collect();
        sorted.sort_by_key(|part| (part.offset, part.length));
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].start() {
                return Err(SiipError::EntriesOverlap {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Log the entry layout, offsets made absolute with `base`
    pub fn log_layout(&self, base: usize) {
        tracing::info!(
            "CPD @ 0x{base:x}: {} entries, subpart {}",
            self.parts.len(),
            String::from_utf8_lossy(&self.header.subpart_name)
        );
        for (idx, part) in self.parts.iter().enumerate() {
            tracing::info!(
                "[{idx}] {:<8} @ [0x{:08x}-0x{:08x}] 0x{:x}",
                part.name,
                base + part.start(),
                base + part.end(),
                part.length
            );
        }
    }
}

fn table_len(num_of_entries: usize) -> usize {
    CpdHeader::SIZE + num_of_entries * CpdEntry::SIZE
}

fn checksum(table: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&table[..CRC32_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&table[CpdHeader::SIZE..]);
    digest.finalize()
}

fn entry_name(name: &str) -> SiipResult<[u8; CPD_ENTRY_NAME_BYTE_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.len() > CPD_ENTRY_NAME_BYTE_SIZE {
        return Err(SiipError::EntryNameTooLong(name.to_string()));
    }
    let mut result = [0u8; CPD_ENTRY_NAME_BYTE_SIZE];
    result[..bytes.len()].copy_from_slice(bytes);
    Ok(result)
}

/// Build a directory for `entries` given as `(name, length)` pairs.
///
/// Offsets are assigned sequentially starting right after the entry table,
/// in input order. The returned bytes hold only the header and entry table;
/// the caller appends the parts in the same order.
pub fn build(entries: &[(&str, usize)], subpart_name: [u8; 4]) -> SiipResult<Vec<u8>> {
    let mut header = CpdHeader::new_zeroed();
    header.marker = CPD_MAGIC;
    header.num_of_entries = entries.len() as u32;
    header.header_version = CPD_HEADER_VERSION;
    header.entry_version = CPD_ENTRY_VERSION;
    header.header_length = CpdHeader::SIZE as u8;
    header.subpart_name = subpart_name;

    let mut table = Vec::with_capacity(table_len(entries.len()));
    table.extend_from_slice(header.as_bytes());

    let mut offset = table_len(entries.len());
    for (name, length) in entries {
        let mut entry = CpdEntry::new_zeroed();
        entry.name = entry_name(name)?;
        let out_of_bounds = || SiipError::EntryOutOfBounds {
            name: name.to_string(),
            offset: offset as u32,
            length: *length as u32,
        };
        entry.offset = u32::try_from(offset).map_err(|_| out_of_bounds())?;
        entry.length = u32::try_from(*length).map_err(|_| out_of_bounds())?;
        table.extend_from_slice(entry.as_bytes());
        offset += length;
    }

    let crc = checksum(&table);
    table[CRC32_OFFSET..CpdHeader::SIZE].copy_from_slice(&crc.to_le_bytes());
    Ok(table)
}

/// Parse the directory at the start of `bytes`.
///
/// Checks the marker and the CRC32. Entry placement is checked separately
/// by [`CpdDirectory::validate_layout`].
pub fn parse(bytes: &[u8]) -> SiipResult<CpdDirectory> {
    let header = CpdHeader::decode(bytes)?;
    if header.marker != CPD_MAGIC {
        return Err(SiipError::BadCpdMagic {
            found: header.marker,
        });
    }

    let needed = (header.num_of_entries as usize)
        .checked_mul(CpdEntry::SIZE)
        .and_then(|len| len.checked_add(CpdHeader::SIZE))
        .unwrap_or(usize::MAX);
    let table = bytes.get(..needed).ok_or(SiipError::Truncated {
        what: "CPD entry table",
        needed,
        available: bytes.len(),
    })?;

    let actual = checksum(table);
    if actual != header.crc32 {
        return Err(SiipError::CpdChecksumMismatch {
            expected: header.crc32,
            actual,
        });
    }

    let parts = table[CpdHeader::SIZE..]
        .chunks_exact(CpdEntry::SIZE)
        .map(|chunk| -> SiipResult<CpdPart> {
            let entry = CpdEntry::decode(chunk)?;
            Ok(CpdPart {
                name: entry.name(),
                offset: entry.offset,
                length: entry.length,
            })
        })
        .collect::<SiipResult<Vec<_>>>()?;

    Ok(CpdDirectory { header, parts })
}
