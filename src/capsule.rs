//! UEFI capsules (`EFI_CAPSULE_HEADER`)
//!
//! See the UEFI specification, "Capsule Services". The header is followed by
//! the capsule body up to `image_size`.

use core::fmt::{self, Display};
use core::mem::size_of;

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::guid::Guid;

/// EFI_CAPSULE_GUID, as used by EFI 1.x era (Tiano) capsules
pub const EFI_CAPSULE_GUID: Guid = Guid::from_bytes([
    0xbd, 0x86, 0x66, 0x3b, 0x76, 0x0d, 0x30, 0x40, 0xb7, 0x0e, 0xb5, 0x51, 0x9e, 0x2f, 0xc5, 0xa0,
]);
/// EFI_FIRMWARE_MANAGEMENT_CAPSULE_ID_GUID, as used by UEFI 2.x capsules
pub const UEFI_CAPSULE_GUID: Guid = Guid::from_bytes([
    0xb9, 0x82, 0x91, 0x53, 0xb5, 0xab, 0x91, 0x43, 0xb6, 0x9a, 0xe3, 0xa9, 0x43, 0xf7, 0x2f, 0xcc,
]);

#[bitfield(u32)]
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize)]
pub struct CapsuleFlags {
    /// Defined by the capsule's GUID owner
    pub oem: u16,
    pub persist_across_reset: bool,
    pub populate_system_table: bool,
    pub initiate_reset: bool,
    #[bits(13)]
    _r: u16,
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct CapsuleHeader {
    pub guid: Guid,
    pub header_size: u32,
    pub flags: CapsuleFlags,
    pub image_size: u32,
}

pub const HEADER_SIZE: usize = size_of::<CapsuleHeader>();

#[derive(Serialize, Clone, Debug)]
pub struct Capsule<'a> {
    #[serde(skip)]
    pub data: &'a [u8],
    pub valid_header: bool,
    pub header: Option<CapsuleHeader>,
}

impl<'a> Capsule<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let header = match CapsuleHeader::read_from_prefix(data) {
            Ok((h, _)) if h.header_size as usize >= HEADER_SIZE && h.header_size <= h.image_size => {
                Some(h)
            }
            _ => None,
        };
        Self {
            data,
            valid_header: header.is_some(),
            header,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.header.map(|h| h.guid) {
            Some(g) if g == EFI_CAPSULE_GUID => "EFI capsule",
            Some(g) if g == UEFI_CAPSULE_GUID => "UEFI capsule",
            Some(_) => "vendor capsule",
            None => "invalid",
        }
    }

    /// The capsule body, clamped to the data given
    pub fn body(&self) -> &'a [u8] {
        let Some(h) = self.header else {
            return &[];
        };
        let d = self.data;
        let end = (h.image_size as usize).min(d.len());
        let start = (h.header_size as usize).min(end);
        &d[start..end]
    }
}

impl Display for Capsule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(h) = self.header else {
            return write!(f, "Capsule (invalid header)");
        };
        let k = self.kind();
        let g = h.guid;
        let hs = h.header_size;
        let is = h.image_size;
        let fl = h.flags.into_bits();
        write!(
            f,
            "{k} {g}, header 0x{hs:x}, image 0x{is:x}, flags {fl:08x}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::capsule;

    #[test]
    fn uefi_capsule() {
        let data = capsule(UEFI_CAPSULE_GUID, 0x0005_0000);
        let c = Capsule::new(&data);
        assert!(c.valid_header);
        assert_eq!(c.kind(), "UEFI capsule");
        let h = c.header.unwrap();
        assert!(h.flags.persist_across_reset());
        assert!(h.flags.initiate_reset());
        assert!(!h.flags.populate_system_table());
        assert_eq!(c.body().len(), data.len() - 0x20);
    }

    #[test]
    fn header_larger_than_image() {
        let mut data = capsule(EFI_CAPSULE_GUID, 0);
        // image size 0x10
        data[24..28].copy_from_slice(&0x10u32.to_le_bytes());
        let c = Capsule::new(&data);
        assert!(!c.valid_header);
        assert!(c.body().is_empty());
        assert!(!Capsule::new(&data[..HEADER_SIZE - 1]).valid_header);
    }
}
