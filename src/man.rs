//! ME partition manifest header (`$MN2`)
//!
//! Every code partition of ME generation 2 and later starts with a signed
//! manifest. Only the header is decoded here, which is enough to identify
//! a standalone manifest and its firmware version.

use core::fmt::{self, Display};
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::ver::Version;

const VENDOR_INTEL: u32 = 0x8086;
pub const MANIFEST2_MAGIC_BYTES: &[u8] = b"$MN2";

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct Date {
    day: u8,
    month: u8,
    year: u16,
}

impl Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Date { year, month, day } = self;
        // BCD encoded
        write!(f, "{year:04x}-{month:02x}-{day:02x}")
    }
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct Vendor(u32);

impl Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0;
        let v = match id {
            VENDOR_INTEL => "Intel",
            _ => "unknown",
        };
        write!(f, "{v} ({id:04x})")
    }
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct HeaderVersion {
    minor: u16,
    major: u16,
}

impl Display for HeaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let HeaderVersion { major, minor } = self;
        write!(f, "{major}.{minor}")
    }
}

// https://github.com/skochinsky/me-tools me_unpack.py MeManifestHeader
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct ManifestHeader {
    pub mod_type: u16,
    pub mod_subtype: u16,
    pub header_len: u32, // in dwords, usually 0xa1, i.e., 0x284 bytes
    pub header_ver: HeaderVersion,
    pub flags: u32,
    pub vendor: Vendor,
    pub date: Date,
    pub manifest_len: u32, // in dwords
    pub magic: [u8; 4],
    // NOTE: only for Gen 2 ME firmware
    pub entries: u32,
    pub version: Version,
    _2c: u32,
    _30: u32,
    _34: u32,
    #[serde(with = "serde_bytes")]
    _38: [u8; 0x40],
    pub key_size: u32, // in dwords
    pub scratch_size: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestError(pub String);

impl ManifestHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ManifestError> {
        let (header, _) = Self::read_from_prefix(data)
            .map_err(|e| ManifestError(format!("Manifest cannot be parsed: {e:?}")))?;
        if header.magic != MANIFEST2_MAGIC_BYTES {
            return Err(ManifestError(format!(
                "Manifest magic not found: wanted {MANIFEST2_MAGIC_BYTES:02x?}, got {:02x?}",
                header.magic
            )));
        }
        Ok(header)
    }

    /// Get the header length including signature
    pub fn header_len(&self) -> usize {
        self.header_len as usize * 4
    }

    /// Get the length of the manifest including its data
    pub fn manifest_len(&self) -> usize {
        self.manifest_len as usize * 4
    }
}

impl Display for ManifestHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hver = self.header_ver;
        let hlen = self.header_len();
        let mlen = self.manifest_len();
        let ver = self.version;
        let date = self.date;
        let ven = self.vendor;
        write!(
            f,
            "ME Manifest v{hver}, header 0x{hlen:x}, size 0x{mlen:x}, vendor {ven}, version {ver} {date}"
        )
    }
}
