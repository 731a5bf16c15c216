/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the SIIP signed firmware image.

    All structures are little-endian, packed without padding and laid out
    exactly as they appear on the wire.

--*/

use core::fmt;
use core::ops::Range;
use core::str::FromStr;

use memoffset::span_of;
use siip_error::{Artifact, SiipError, SiipResult};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// '$MN2'
pub const MANIFEST_MAGIC: u32 = 0x324E_4D24;
/// '$CPD'
pub const CPD_MAGIC: u32 = 0x4450_4324;
/// '$OSE'
pub const PACKAGE_NAME_OSE: u32 = 0x4553_4F24;

pub const MANIFEST_TYPE: u32 = 0x4;
pub const MANIFEST_VERSION: u32 = 0x10000;
pub const MANIFEST_STRUCTURE_VERSION: u32 = 0x1000;
pub const MANIFEST_VENDOR_INTEL: u32 = 0x8086;

pub const RSA_KEY_BITS: u32 = 2048;
pub const RSA_MODULUS_BYTE_SIZE: usize = 256;
pub const RSA_EXPONENT_BYTE_SIZE: usize = 4;
pub const RSA_SIGNATURE_BYTE_SIZE: usize = 256;

pub const MAX_HASH_BYTE_SIZE: usize = 64;
pub const KEY_USAGE_BYTE_SIZE: usize = 16;

/// Usage bit 59: OSE firmware
pub const KEY_USAGE_OSE_FIRMWARE: u32 = 59;
/// Key may only be signed by Intel
pub const KEY_POLICY_INTEL_ONLY: u8 = 1;

pub const FKM_EXTENSION_TYPE: u32 = 14;
pub const FKM_KEY_MANIFEST_TYPE: u32 = 4;
pub const FKM_KEY_COUNT: usize = 1;

pub const FBM_EXTENSION_TYPE: u32 = 15;
pub const FBM_METADATA_COUNT: usize = 1;
pub const FBM_DEVICE_COUNT: usize = 4;

/// Metadata entry type: 0 process, 1 shared library, 2 data
pub const METADATA_ENTRY_TYPE_DATA: u8 = 2;
pub const METADATA_ID_DEFAULT: u32 = 0xDEAD_BEEF;
pub const METADATA_MODULE_ID_DEFAULT: u32 = 0xFF;

pub const CPD_HEADER_VERSION: u8 = 2;
pub const CPD_ENTRY_VERSION: u8 = 1;
pub const CPD_ENTRY_NAME_BYTE_SIZE: usize = 12;
pub const CPD_SUBPART_NAME: [u8; 4] = *b"SIIP";

pub const CPD_ENTRY_FKM: &str = "FKM";
pub const CPD_ENTRY_FBM: &str = "FBM";
pub const CPD_ENTRY_METADATA: &str = "METADATA";
pub const CPD_ENTRY_PAYLOAD: &str = "PAYLOAD";

pub type ImageRsaSignature = [u8; RSA_SIGNATURE_BYTE_SIZE];

/// Hash algorithm identifiers as stored in key usage and metadata entries
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HashAlgorithm {
    Sha256 = 2,
    Sha384 = 3,
    Sha512 = 4,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Digest size in bytes
    pub fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Wire identifier
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(HashAlgorithm::Sha256),
            3 => Some(HashAlgorithm::Sha384),
            4 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SiipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SiipError::UnknownHashAlgorithm(s.to_string()))
    }
}

/// Hash selection threaded through every digest, sign and verify call of
/// one top-level operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HashContext {
    pub algorithm: HashAlgorithm,
    pub digest_size: usize,
}

impl HashContext {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            digest_size: algorithm.digest_size(),
        }
    }
}

/// Digest of up to 64 bytes
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ImageDigest {
    value: [u8; MAX_HASH_BYTE_SIZE],
    size: usize,
}

impl ImageDigest {
    /// Create a digest from raw hash output. Output longer than 64 bytes is
    /// truncated.
    pub fn from_slice(data: &[u8]) -> Self {
        let size = data.len().min(MAX_HASH_BYTE_SIZE);
        let mut value = [0u8; MAX_HASH_BYTE_SIZE];
        value[..size].copy_from_slice(&data[..size]);
        Self { value, size }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value[..self.size]
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Digest zero-padded to the width of a manifest hash field
    pub fn to_padded(&self) -> [u8; MAX_HASH_BYTE_SIZE] {
        self.value
    }

    /// Compare against a stored hash field; only the first `len()` bytes of
    /// the field are significant.
    pub fn matches(&self, field: &[u8]) -> bool {
        field.get(..self.size) == Some(self.as_bytes())
    }
}

impl fmt::Debug for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageDigest(")?;
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// RSA public key packed the way it is stored in a manifest header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageRsaPubKey {
    /// Modulus, little-endian, zero padded
    pub modulus: [u8; RSA_MODULUS_BYTE_SIZE],

    /// Public exponent, little-endian, zero padded
    pub exponent: [u8; RSA_EXPONENT_BYTE_SIZE],
}

/// Pack a big-endian unsigned integer into a little-endian field of `N`
/// bytes. Returns `None` when the value does not fit.
pub fn pack_num<const N: usize>(big_endian: &[u8]) -> Option<[u8; N]> {
    let significant = match big_endian.iter().position(|b| *b != 0) {
        Some(first) => &big_endian[first..],
        None => &[],
    };
    if significant.len() > N {
        return None;
    }
    let mut result = [0u8; N];
    for (dst, src) in result.iter_mut().zip(significant.iter().rev()) {
        *dst = *src;
    }
    Some(result)
}

/// Inverse of [`pack_num`]: big-endian bytes without leading zeroes
pub fn unpack_num(little_endian: &[u8]) -> Vec<u8> {
    let mut result: Vec<u8> = little_endian.iter().rev().copied().collect();
    let first = result.iter().position(|b| *b != 0).unwrap_or(result.len());
    result.drain(..first);
    result
}

/// Key usage bitmap with a single role bit set
pub fn usage_bitmap(bit: u32) -> [u8; KEY_USAGE_BYTE_SIZE] {
    let mut bitmap = [0u8; KEY_USAGE_BYTE_SIZE];
    let byte = (bit / 8) as usize;
    if byte < KEY_USAGE_BYTE_SIZE {
        bitmap[byte] = 1 << (bit % 8);
    }
    bitmap
}

fn read_prefix<T: FromBytes>(bytes: &[u8], what: &'static str) -> SiipResult<T> {
    T::read_from_prefix(bytes)
        .map(|(value, _)| value)
        .map_err(|_| SiipError::Truncated {
            what,
            needed: core::mem::size_of::<T>(),
            available: bytes.len(),
        })
}

/// Common manifest header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct ManifestHeader {
    pub r#type: u32,

    /// Header length in dwords
    pub length: u32,

    pub version: u32,

    pub flags: u32,

    pub vendor: u32,

    /// BCD date 0xYYYYMMDD
    pub date: u32,

    /// Manifest size in dwords
    pub size: u32,

    /// Must be [`MANIFEST_MAGIC`]
    pub id: u32,

    pub num_of_metadata: u32,

    pub structure_version: u32,

    pub reserved: [u8; 80],

    /// Modulus size in dwords
    pub modulus_size: u32,

    /// Exponent size in dwords
    pub exponent_size: u32,

    pub public_key: [u8; RSA_MODULUS_BYTE_SIZE],

    pub exponent: [u8; RSA_EXPONENT_BYTE_SIZE],

    pub signature: ImageRsaSignature,
}

impl ManifestHeader {
    pub const SIZE: usize = core::mem::size_of::<ManifestHeader>();

    /// Create a header with every fixed field filled in and the key and
    /// signature fields zeroed.
    pub fn new(manifest_size: usize, num_of_metadata: u32, vendor: u32, date: u32) -> Self {
        let mut header = Self::new_zeroed();
        header.r#type = MANIFEST_TYPE;
        header.length = (Self::SIZE / 4) as u32;
        header.version = MANIFEST_VERSION;
        header.vendor = vendor;
        header.date = date;
        header.size = (manifest_size / 4) as u32;
        header.id = MANIFEST_MAGIC;
        header.num_of_metadata = num_of_metadata;
        header.structure_version = MANIFEST_STRUCTURE_VERSION;
        header.modulus_size = (RSA_MODULUS_BYTE_SIZE / 4) as u32;
        header.exponent_size = (RSA_EXPONENT_BYTE_SIZE / 4) as u32;
        header
    }

    /// Byte range covering `public_key`, `exponent` and `signature`. These
    /// bytes are zero while the signature over the manifest is computed.
    pub fn signature_fields_range() -> Range<usize> {
        span_of!(ManifestHeader, public_key..=signature)
    }

    pub fn clear_signature(&mut self) {
        self.as_mut_bytes()[Self::signature_fields_range()].fill(0);
    }

    pub fn set_signature(&mut self, pub_key: &ImageRsaPubKey, signature: &ImageRsaSignature) {
        self.public_key = pub_key.modulus;
        self.exponent = pub_key.exponent;
        self.signature = *signature;
    }

    pub fn pub_key(&self) -> ImageRsaPubKey {
        ImageRsaPubKey {
            modulus: self.public_key,
            exponent: self.exponent,
        }
    }
}

/// Firmware Key Manifest key usage entry
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct KeyUsageEntry {
    /// Bitmap of roles the authorized key may sign
    pub key_usage: [u8; KEY_USAGE_BYTE_SIZE],

    pub reserved: [u8; 16],

    pub key_policy: u8,

    /// [`HashAlgorithm`] identifier
    pub key_hash_algorithm: u8,

    pub key_hash_size: u16,

    /// Hash of the authorized (subject) public key
    pub key_hash: [u8; MAX_HASH_BYTE_SIZE],
}

/// Firmware Key Manifest
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct FirmwareKeyManifest {
    pub header: ManifestHeader,

    pub extension_type: u32,

    pub extension_length: u32,

    pub key_manifest_type: u32,

    pub key_manifest_svn: u32,

    pub oem_id: u16,

    pub key_manifest_id: u8,

    pub reserved: u8,

    pub reserved2: [u8; 12],

    pub num_of_keys: u32,

    pub key_usage_array: [KeyUsageEntry; FKM_KEY_COUNT],
}

impl FirmwareKeyManifest {
    pub const SIZE: usize = core::mem::size_of::<FirmwareKeyManifest>();

    /// Extension length as defined by the key manifest extension
    pub const EXTENSION_LENGTH: u32 = 36 + 68 * FKM_KEY_COUNT as u32;

    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> SiipResult<Self> {
        let fkm: Self = read_prefix(bytes, "FKM")?;
        if fkm.header.id != MANIFEST_MAGIC {
            return Err(SiipError::BadManifestMagic(Artifact::Fkm));
        }
        Ok(fkm)
    }
}

/// Firmware Blob Manifest metadata entry
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct MetadataEntry {
    /// Correlates with [`Metadata::id`]
    pub id: u32,

    pub r#type: u8,

    pub hash_algorithm: u8,

    pub hash_size: u16,

    /// Size of the metadata record
    pub size: u32,

    /// Hash of the metadata record
    pub hash: [u8; MAX_HASH_BYTE_SIZE],
}

/// Firmware Blob Manifest
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct FirmwareBlobManifest {
    pub header: ManifestHeader,

    pub extension_type: u32,

    pub extension_length: u32,

    pub package_name: u32,

    pub version_control_num: u64,

    pub usage_bitmap: [u8; KEY_USAGE_BYTE_SIZE],

    pub svn: u32,

    pub fw_type: u8,

    pub fw_subtype: u8,

    pub reserved: u16,

    pub num_of_devices: u32,

    pub device_list: [u32; FBM_DEVICE_COUNT],

    pub metadata_entries: [MetadataEntry; FBM_METADATA_COUNT],
}

impl FirmwareBlobManifest {
    pub const SIZE: usize = core::mem::size_of::<FirmwareBlobManifest>();

    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> SiipResult<Self> {
        let fbm: Self = read_prefix(bytes, "FBM")?;
        if fbm.header.id != MANIFEST_MAGIC {
            return Err(SiipError::BadManifestMagic(Artifact::Fbm));
        }
        Ok(fbm)
    }
}

/// Metadata record describing the payload
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct Metadata {
    pub size: u32,

    /// Correlates with [`MetadataEntry::id`]
    pub id: u32,

    pub version: u32,

    pub num_of_modules: u32,

    pub module_id: u32,

    /// Payload size in bytes
    pub module_size: u32,

    pub module_version: u32,

    pub module_hash_size: u32,

    pub module_entry_point: u32,

    pub module_hash_algorithm: u32,

    /// Payload hash
    pub module_hash_value: [u8; MAX_HASH_BYTE_SIZE],

    pub num_of_keys: u32,

    pub key_usage_id: [u8; KEY_USAGE_BYTE_SIZE],

    /// Size of the non-standard section that follows (always empty)
    pub non_std_section_size: u32,
}

impl Metadata {
    pub const SIZE: usize = core::mem::size_of::<Metadata>();

    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> SiipResult<Self> {
        read_prefix(bytes, "METADATA")
    }
}

/// Code Partition Directory header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct CpdHeader {
    /// Must be [`CPD_MAGIC`]
    pub marker: u32,

    pub num_of_entries: u32,

    pub header_version: u8,

    pub entry_version: u8,

    /// Header size in bytes
    pub header_length: u8,

    pub reserved: u8,

    pub subpart_name: [u8; 4],

    /// CRC32 over header and entries with this field zeroed
    pub crc32: u32,
}

impl CpdHeader {
    pub const SIZE: usize = core::mem::size_of::<CpdHeader>();

    pub fn decode(bytes: &[u8]) -> SiipResult<Self> {
        read_prefix(bytes, "CPD header")
    }
}

/// Code Partition Directory entry
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Copy, Clone, Eq, PartialEq)]
pub struct CpdEntry {
    /// NUL padded ASCII name
    pub name: [u8; CPD_ENTRY_NAME_BYTE_SIZE],

    /// Offset from the start of the directory
    pub offset: u32,

    pub length: u32,

    pub module_type: u32,
}

impl CpdEntry {
    pub const SIZE: usize = core::mem::size_of::<CpdEntry>();

    pub fn decode(bytes: &[u8]) -> SiipResult<Self> {
        read_prefix(bytes, "CPD entry")
    }

    /// Entry name up to the first NUL
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

const _: () = assert!(ManifestHeader::SIZE == 644);
const _: () = assert!(core::mem::size_of::<KeyUsageEntry>() == 100);
const _: () = assert!(FirmwareKeyManifest::SIZE == 780);
const _: () = assert!(core::mem::size_of::<MetadataEntry>() == 76);
const _: () = assert!(FirmwareBlobManifest::SIZE == 784);
const _: () = assert!(Metadata::SIZE == 128);
const _: () = assert!(CpdHeader::SIZE == 20);
const _: () = assert!(CpdEntry::SIZE == 24);
