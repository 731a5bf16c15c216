/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    SIIP signed image serialization & deserialization routines.

--*/

pub mod cpd;

pub use cpd::{CpdDirectory, CpdPart};

use siip_error::{SiipError, SiipResult};
use siip_image_types::*;
use std::io::Write;
use zerocopy::IntoBytes;

/// Signed image: the FKM partition followed by the blob partition
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SignedImage {
    /// `CPD{FKM} | FKM`
    pub fkm_partition: Vec<u8>,

    /// `CPD{FBM, METADATA, PAYLOAD} | FBM | METADATA | PAYLOAD`
    pub blob_partition: Vec<u8>,
}

impl SignedImage {
    pub fn len(&self) -> usize {
        self.fkm_partition.len() + self.blob_partition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.fkm_partition);
        bytes.extend_from_slice(&self.blob_partition);
        bytes
    }
}

/// Build the FKM partition
pub fn fkm_partition(fkm: &FirmwareKeyManifest, subpart_name: [u8; 4]) -> SiipResult<Vec<u8>> {
    let fkm = fkm.as_bytes();
    let mut partition = cpd::build(&[(CPD_ENTRY_FKM, fkm.len())], subpart_name)?;
    partition.extend_from_slice(fkm);
    Ok(partition)
}

/// Build the blob partition
pub fn blob_partition(
    fbm: &FirmwareBlobManifest,
    metadata: &Metadata,
    payload: &[u8],
    subpart_name: [u8; 4],
) -> SiipResult<Vec<u8>> {
    let fbm = fbm.as_bytes();
    let metadata = metadata.as_bytes();
    let mut partition = cpd::build(
        &[
            (CPD_ENTRY_FBM, fbm.len()),
            (CPD_ENTRY_METADATA, metadata.len()),
            (CPD_ENTRY_PAYLOAD, payload.len()),
        ],
        subpart_name,
    )?;
    partition.reserve(fbm.len() + metadata.len() + payload.len());
    partition.extend_from_slice(fbm);
    partition.extend_from_slice(metadata);
    partition.extend_from_slice(payload);
    Ok(partition)
}

/// Signed Image Writer
pub struct ImageBundleWriter<W: Write> {
    writer: W,
}

impl<W: Write> ImageBundleWriter<W> {
    /// Create an instance of `ImageBundleWriter`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write Signed Image
    pub fn write(&mut self, image: &SignedImage) -> std::io::Result<()> {
        self.writer.write_all(&image.fkm_partition)?;
        self.writer.write_all(&image.blob_partition)?;
        self.writer.flush()
    }
}

/// Blob partition parts located within a signed image
#[derive(Debug)]
pub struct BlobPartitionRef<'a> {
    pub fbm: &'a [u8],

    pub metadata: &'a [u8],

    pub payload: &'a [u8],
}

/// Named part of a signed image
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImagePart<'a> {
    pub name: String,

    pub bytes: &'a [u8],
}

/// Signed Image Reader
pub struct ImageBundleReader<'a> {
    image: &'a [u8],
}

impl<'a> ImageBundleReader<'a> {
    /// Number of partitions in a signed image
    const PARTITION_COUNT: usize = 2;

    pub fn new(image: &'a [u8]) -> Self {
        Self { image }
    }

    /// Parse the first directory and locate the FKM
    pub fn fkm(&self) -> SiipResult<&'a [u8]> {
        let directory = cpd::parse(self.image)?;
        directory.validate_layout(self.image.len())?;
        directory.sized_part(self.image, CPD_ENTRY_FKM, FirmwareKeyManifest::SIZE)
    }

    /// Parse the directory following the FKM partition and locate the FBM,
    /// metadata and payload
    pub fn blob_partition(&self) -> SiipResult<BlobPartitionRef<'a>> {
        let base = cpd::parse(self.image)?.end();
        let container = self.image.get(base..).unwrap_or_default();
        let directory = cpd::parse(container)?;
        directory.validate_layout(container.len())?;
        Ok(BlobPartitionRef {
            fbm: directory.sized_part(container, CPD_ENTRY_FBM, FirmwareBlobManifest::SIZE)?,
            metadata: directory.sized_part(container, CPD_ENTRY_METADATA, Metadata::SIZE)?,
            payload: directory.part(container, CPD_ENTRY_PAYLOAD)?,
        })
    }

    /// Split the image into its named parts without any trust check.
    ///
    /// Accepts a full signed image or the FKM partition alone. Bytes past
    /// the blob partition are ignored, as they are by verification.
    pub fn parts(&self) -> SiipResult<Vec<ImagePart<'a>>> {
        let mut parts: Vec<ImagePart<'a>> = Vec::new();
        let mut base = 0;
        for partition in 0..Self::PARTITION_COUNT {
            if partition > 0 && base == self.image.len() {
                break;
            }
            let container = &self.image[base..];
            let directory = cpd::parse(container)?;
            directory.validate_layout(container.len())?;
            directory.log_layout(base);
            for part in &directory.parts {
                if parts.iter().any(|prev| prev.name == part.name) {
                    return Err(SiipError::DuplicateEntry(part.name.clone()));
                }
                parts.push(ImagePart {
                    name: part.name.clone(),
                    bytes: &container[part.start()..part.end()],
                });
            }
            base += directory.end();
        }

        if base < self.image.len() {
            tracing::warn!(
                "Ignoring 0x{:x} bytes after the last partition",
                self.image.len() - base
            );
        }
        Ok(parts)
    }
}
