//! Flash Partition Table (FPT)
//!
//! Knowledge herein is solely based on independent analysis efforts.
//! The expansion of the acronym FPT is confirmed by Intel in the appendix
//! on ME Firmware Status Registers in
//! <https://www.intel.com/content/dam/www/public/us/en/documents/technical-specifications/intel-power-node-manager-v3-spec.pdf>.
//! For references regarding data structures and logic,
//! see <https://github.com/linuxboot/fiano/blob/main/pkg/intel/me/structures.go>
//! and <https://github.com/platomav/MEAnalyzer>
//! and <https://github.com/corna/me_cleaner>.

use core::{
    fmt::{self, Display},
    mem::size_of,
    num::Wrapping,
};

use phf::phf_map;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::ver::Version;

pub const FPT_MAGIC_BYTES: &[u8] = b"$FPT";

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct FPTHeader {
    pub signature: [u8; 4],
    pub entries: u32,
    pub header_ver: u8,
    pub entry_ver: u8,
    pub header_len: u8,
    pub checksum: u8,
    pub ticks_to_add: u16,
    pub tokens_to_add: u16,
    pub uma_size_or_reserved: u32,
    pub flash_layout_or_flags: u32,
    // Not Present in ME version 7
    /// Version of Flash Image Tool used to create the image
    pub fitc_ver: Version,
}

pub const FPT_HEADER_SIZE: usize = size_of::<FPTHeader>();

impl Display for FPTHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hv = self.header_ver;
        let ev = self.entry_ver;
        let en = self.entries;
        let cs = self.checksum;
        let fv = if self.fitc_ver.is_unset() {
            "n/a".to_string()
        } else {
            self.fitc_ver.to_string()
        };
        write!(
            f,
            "header v{hv}, entry v{ev}, {en} entries, checksum {cs:02x}, FITC {fv}"
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum FptError {
    NoFpt,
    HeaderParseError(String),
    EntryParseError(String),
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct FPTEntry {
    pub name: [u8; 4],
    pub owner: [u8; 4],
    pub offset: u32,
    pub size: u32,
    pub start_tokens: u32,
    pub max_tokens: u32,
    pub scratch_sectors: u32,
    pub flags: u32,
}

pub const FPT_ENTRY_SIZE: usize = size_of::<FPTEntry>();

impl FPTEntry {
    pub fn name(&self) -> String {
        match std::str::from_utf8(&self.name) {
            // some names are shorter than 4 bytes and padded with 0x0
            Ok(n) => n.trim_end_matches('\0').to_string(),
            Err(_) => format!("{:02x?}", &self.name),
        }
    }

    /// The upper bits are flags on some generations.
    pub fn offset(&self) -> usize {
        (self.offset & 0x003f_ffff) as usize
    }

    /// Entries for partitions that are not present carry all-1's or 0.
    pub fn is_present(&self) -> bool {
        self.offset != 0 && self.offset != u32::MAX && self.size != 0 && self.size != u32::MAX
    }
}

impl Display for FPTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.offset();
        let s = self.size as usize;
        let end = o + s;
        let name = self.name();
        let (part_type, full_name) = get_part_info(&name);
        write!(
            f,
            "{name:>4} @ 0x{o:08x}:0x{end:08x} (0x{s:08x})  {part_type:?}: {full_name}"
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FPT {
    /// Offset of the `$FPT` signature, 0 or 16
    pub offset: usize,
    pub pre_header: Vec<u8>,
    pub header: FPTHeader,
    pub entries: Vec<FPTEntry>,
}

const POSSIBLE_OFFSET: usize = 16;

// The FPT magic is either at the start or at a 16 bytes offset.
fn determine_offset(data: &[u8]) -> Option<usize> {
    let l = FPT_MAGIC_BYTES.len();
    [0, POSSIBLE_OFFSET]
        .into_iter()
        .find(|o| data.get(*o..*o + l) == Some(FPT_MAGIC_BYTES))
}

impl FPT {
    /// None if there is no `$FPT` signature at all.
    pub fn parse(data: &[u8]) -> Option<Result<Self, FptError>> {
        let offset = determine_offset(data)?;
        // Save for checksum recalculation
        let pre_header = &data[..offset];
        let d = &data[offset..];
        let header = match FPTHeader::read_from_prefix(d) {
            Ok((h, _)) => h,
            Err(e) => return Some(Err(FptError::HeaderParseError(format!("{e:?}")))),
        };
        // NOTE: Skip $FPT (header) itself
        let slice = &d[FPT_HEADER_SIZE..];
        let count = header.entries as usize;
        // Entries are copied out one by one, so the image needs no alignment.
        let mut entries = Vec::new();
        let mut rest = slice;
        for i in 0..count {
            match FPTEntry::read_from_prefix(rest) {
                Ok((e, r)) => {
                    entries.push(e);
                    rest = r;
                }
                Err(_) => {
                    let l = slice.len();
                    return Some(Err(FptError::EntryParseError(format!(
                        "entry {i} of {count} does not fit {l} bytes"
                    ))));
                }
            }
        }

        Some(Ok(Self {
            offset,
            pre_header: pre_header.to_vec(),
            header,
            entries,
        }))
    }

    /// Two's complement of the sum of the bytes
    pub fn header_checksum(&self) -> u8 {
        let mut c = self.header;
        // Initial checksum field itself must be 0.
        c.checksum = 0;
        let d = [self.pre_header.as_bytes(), c.as_bytes()].concat();
        let sum = d.iter().map(|e| Wrapping(*e as i8)).sum::<Wrapping<i8>>();
        sum.0.wrapping_neg() as u8
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionType {
    Code,
    Data,
    None,
}

// see https://troopers.de/downloads/troopers17/TR17_ME11_Static.pdf
static PART_INFO: phf::Map<&'static str, (PartitionType, &'static str)> = phf_map! {
    "FTPR" => (PartitionType::Code, "Main code partition"),
    "FTUP" => (PartitionType::Code, "[NFTP]+[WCOD]+[LOCL]"),
    "DLMP" => (PartitionType::Code, "IDLM partition"),
    "MDMV" => (PartitionType::Code, "Media protection (PAVP, JOM)"),
    "PSVN" => (PartitionType::Data, "Secure Version Number"),
    "IVBP" => (PartitionType::Data, "IV + Bring Up cache"),
    "MFS" => (PartitionType::Data, "ME Flash File System"),
    "NFTP" => (PartitionType::Code, "Additional code"),
    "ROMB" => (PartitionType::Code, "ROM Bypass"),
    "WCOD" => (PartitionType::Code, "WLAN uCode"),
    "LOCL" => (PartitionType::Code, "AMT Localization"),
    "FLOG" => (PartitionType::Data, "Flash Log"),
    "UTOK" => (PartitionType::Data, "Debug Unlock Token"),
    "ISHC" => (PartitionType::Code, "Integrated Sensors Hub"),
    "AFSP" => (PartitionType::None, "8778 55aa signature like MFS"),
    "FTPM" => (PartitionType::Code, "Firmware TPM (unconfirmed)"),
    "GLUT" => (PartitionType::Data, "Huffman Look-Up Table"),
    "EFFS" => (PartitionType::Data, "EFFS File System"),
    "FOVD" => (PartitionType::Data, "FOVD..."),
};

pub fn get_part_info(n: &str) -> (PartitionType, &'static str) {
    match PART_INFO.get(n) {
        Some(i) => *i,
        None => (PartitionType::None, "[> UNKNOWN <]"),
    }
}
