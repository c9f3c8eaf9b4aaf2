//! UEFI Firmware Volumes (FV) and the files within
//!
//! For reference, see the UEFI Platform Initialization (PI) specification,
//! volume 3, "Firmware Storage Code Definitions",
//! and EDK2 `MdePkg/Include/Pi/PiFirmwareVolume.h` and `PiFirmwareFile.h`.
//!
//! A volume is recognized by its `_FVH` signature, which sits 40 bytes into
//! the header, after the zero vector, the file system GUID and the length.

use core::fmt::{self, Display};
use core::mem::size_of;
use core::num::Wrapping;

use log::debug;
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{EMPTY, Error, FirmwareObject, Node, guid::Guid};

pub const FV_SIGNATURE: &[u8; 4] = b"_FVH";
/// Offset of the signature within the volume header
pub const SIGNATURE_OFFSET: usize = 40;

pub const FFS2_GUID: Guid = Guid::from_bytes([
    0x78, 0xe5, 0x8c, 0x8c, 0x3d, 0x8a, 0x1c, 0x4f, 0x99, 0x35, 0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3,
]);
pub const FFS3_GUID: Guid = Guid::from_bytes([
    0x7a, 0xc0, 0x73, 0x54, 0xcb, 0x3d, 0xca, 0x4d, 0xbd, 0x6f, 0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a,
]);

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct Header {
    pub zero_vector: [u8; 16],
    pub fs_guid: Guid,
    pub length: u64,
    pub signature: [u8; 4],
    pub attributes: u32,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
}

pub const HEADER_SIZE: usize = size_of::<Header>();

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct ExtHeader {
    pub fv_name: Guid,
    pub ext_header_size: u32,
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct FfsHeader {
    pub name: Guid,
    pub integrity_check: u16,
    pub file_type: u8,
    pub attributes: u8,
    pub size: [u8; 3],
    pub state: u8,
}

pub const FFS_HEADER_SIZE: usize = size_of::<FfsHeader>();
// FFS_ATTRIB_LARGE_FILE: a 32-bit size follows the header.
const FFS_ATTRIB_LARGE_FILE: u8 = 0x01;

impl FfsHeader {
    fn size(&self) -> usize {
        let [a, b, c] = self.size;
        u32::from_le_bytes([a, b, c, 0]) as usize
    }
}

/// Search for the next volume signature, where a header could start at or
/// after `from`. The result is the position of the signature itself.
pub fn search_firmware_volume(data: &[u8], from: usize) -> Option<usize> {
    let start = from.checked_add(SIGNATURE_OFFSET)?;
    data.get(start..)?
        .windows(FV_SIGNATURE.len())
        .position(|w| w == FV_SIGNATURE)
        .map(|p| start + p)
}

fn align8(o: usize) -> usize {
    (o + 7) & !7
}

pub fn file_type_name(t: u8) -> &'static str {
    match t {
        0x01 => "raw",
        0x02 => "freeform",
        0x03 => "security core",
        0x04 => "PEI core",
        0x05 => "DXE core",
        0x06 => "PEI module",
        0x07 => "driver",
        0x08 => "combined PEI module/driver",
        0x09 => "application",
        0x0a => "SMM module",
        0x0b => "firmware volume image",
        0x0c => "combined SMM/DXE",
        0x0d => "SMM core",
        0x0e => "SMM standalone",
        0x0f => "SMM standalone core",
        0xf0 => "padding",
        _ => "unknown",
    }
}

/// A file inside a volume; its content is not parsed any further.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FfsFile {
    pub guid: Guid,
    pub file_type: u8,
    pub attributes: u8,
    pub state: u8,
    pub size: usize,
    pub base: usize,
}

impl Display for FfsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.guid;
        let t = file_type_name(self.file_type);
        let s = self.size;
        let b = self.base;
        write!(f, "File {g} type= {t}, size= 0x{s:x} @ {b:08x}")
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct FirmwareVolume<'a> {
    /// Clamped to the volume's size if the header is valid
    #[serde(skip)]
    pub data: &'a [u8],
    pub base: usize,
    pub valid_header: bool,
    pub size: usize,
    pub header: Option<Header>,
    pub files: Vec<FfsFile>,
}

impl<'a> FirmwareVolume<'a> {
    pub fn new(data: &'a [u8], base: usize) -> Self {
        let mut fv = Self {
            data,
            base,
            valid_header: false,
            size: 0,
            header: None,
            files: vec![],
        };
        let Ok((header, _)) = Header::read_from_prefix(data) else {
            return fv;
        };
        if &header.signature != FV_SIGNATURE {
            return fv;
        }
        let hl = header.header_length as usize;
        // A length that does not fit a usize cannot fit the data either.
        let size = usize::try_from(header.length).unwrap_or(usize::MAX);
        if hl < HEADER_SIZE || size < hl || size > data.len() {
            return fv;
        }
        fv.valid_header = true;
        fv.size = size;
        fv.data = &data[..size];
        fv.header = Some(header);
        fv
    }

    pub fn fs_name(&self) -> &'static str {
        match self.header.map(|h| h.fs_guid) {
            Some(g) if g == FFS2_GUID => "FFSv2",
            Some(g) if g == FFS3_GUID => "FFSv3",
            _ => "unknown",
        }
    }

    /// The 16-bit sum over the whole header, including the block map, is 0.
    pub fn checksum_valid(&self) -> bool {
        let Some(h) = self.header else {
            return false;
        };
        let hl = (h.header_length as usize).min(self.data.len());
        let sum = self.data[..hl]
            .chunks_exact(2)
            .map(|w| Wrapping(u16::from_le_bytes([w[0], w[1]])))
            .sum::<Wrapping<u16>>();
        sum.0 == 0
    }

    /// Files start after the header, or after the extended header if any.
    fn files_offset(&self, h: &Header) -> usize {
        let hl = h.header_length as usize;
        let eo = h.ext_header_offset as usize;
        if eo == 0 {
            return align8(hl);
        }
        match self
            .data
            .get(eo..)
            .and_then(|d| ExtHeader::read_from_prefix(d).ok())
        {
            Some((e, _)) => align8(eo + e.ext_header_size as usize),
            None => align8(hl),
        }
    }
}

impl<'a> FirmwareObject<'a> for FirmwareVolume<'a> {
    fn process(&mut self) -> Result<(), Error> {
        self.files.clear();
        let Some(h) = self.header else {
            return Err(Error::InvalidHeader(format!(
                "no firmware volume @ {:08x}",
                self.base
            )));
        };
        let data = self.data;
        let mut o = self.files_offset(&h);
        while let Some(d) = data.get(o..o + FFS_HEADER_SIZE) {
            if d.iter().all(|b| *b == EMPTY) {
                break;
            }
            let Ok(fh) = FfsHeader::read_from_bytes(d) else {
                break;
            };
            let mut size = fh.size();
            if fh.attributes & FFS_ATTRIB_LARGE_FILE != 0 {
                match data.get(o + FFS_HEADER_SIZE..o + FFS_HEADER_SIZE + 4) {
                    Some(x) => size = u32::from_le_bytes([x[0], x[1], x[2], x[3]]) as usize,
                    None => break,
                }
            }
            if size < FFS_HEADER_SIZE || o + size > data.len() {
                debug!("Bad FFS file size {size:x} @ {:08x}", self.base + o);
                break;
            }
            self.files.push(FfsFile {
                guid: fh.name,
                file_type: fh.file_type,
                attributes: fh.attributes,
                state: fh.state,
                size,
                base: self.base + o,
            });
            o = align8(o + size);
        }
        Ok(())
    }

    fn objects(&self) -> Vec<Node<'_, 'a>> {
        self.files.iter().map(Node::File).collect()
    }
}

impl Display for FirmwareVolume<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = match self.header {
            Some(h) => h.fs_guid.to_string(),
            None => "-".to_string(),
        };
        let n = self.fs_name();
        let s = self.size;
        let b = self.base;
        let c = if self.checksum_valid() { "ok" } else { "bad" };
        write!(
            f,
            "Firmware Volume {g} ({n}) size= 0x{s:x} ({s} bytes) @ {b:08x}, checksum {c}"
        )
    }
}
