//! (CS)ME container
//!
//! The ME region starts with a flash partition table (FPT), optionally
//! preceded by 16 bytes (ROM bypass vector on older generations).
//! Partition offsets are relative to the start of the region.

use core::fmt::{self, Display};

use log::{debug, warn};
use serde::Serialize;

use crate::{
    Error, FirmwareObject, Node,
    fpt::{FPT, FPTEntry, FptError, PartitionType, get_part_info},
};

pub const CPD_MAGIC_BYTES: &[u8] = b"$CPD";

#[derive(Serialize, Clone, Debug)]
pub struct MePartition<'a> {
    pub entry: FPTEntry,
    pub name: String,
    pub part_type: PartitionType,
    pub description: &'static str,
    #[serde(skip)]
    pub data: &'a [u8],
    pub base: usize,
    /// The partition holds a code partition directory (ME Gen 3).
    pub has_cpd: bool,
}

impl Display for MePartition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = self.entry;
        let b = self.base;
        let c = if self.has_cpd { ", $CPD" } else { "" };
        write!(f, "Partition {e} @ {b:08x}{c}")
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct MeContainer<'a> {
    #[serde(skip)]
    pub data: &'a [u8],
    pub base: usize,
    pub valid_header: bool,
    pub size: usize,
    pub fpt: Option<FPT>,
    /// Sorted by offset
    pub partitions: Vec<MePartition<'a>>,
}

impl<'a> MeContainer<'a> {
    pub fn new(data: &'a [u8], base: usize) -> Self {
        let fpt = match FPT::parse(data) {
            Some(Ok(fpt)) => Some(fpt),
            Some(Err(e)) => {
                warn!("Cannot parse ME FPT @ {base:08x}: {e:?}");
                None
            }
            None => None,
        };
        Self {
            data,
            base,
            valid_header: fpt.is_some(),
            size: data.len(),
            fpt,
            partitions: vec![],
        }
    }

    pub fn checksum_valid(&self) -> bool {
        match &self.fpt {
            Some(fpt) => fpt.header_checksum() == fpt.header.checksum,
            None => false,
        }
    }

    fn partition(&self, entry: FPTEntry) -> MePartition<'a> {
        let name = entry.name();
        let (part_type, description) = get_part_info(&name);
        let d = self.data;
        let data: &'a [u8] = if entry.is_present() {
            let l = d.len();
            let o = entry.offset().min(l);
            let e = o.saturating_add(entry.size as usize).min(l);
            if e - o < entry.size as usize {
                debug!("ME partition {name} exceeds the container, clamped");
            }
            &d[o..e]
        } else {
            &[]
        };
        MePartition {
            entry,
            name,
            part_type,
            description,
            data,
            base: self.base + entry.offset(),
            has_cpd: data.starts_with(CPD_MAGIC_BYTES),
        }
    }
}

impl<'a> FirmwareObject<'a> for MeContainer<'a> {
    fn process(&mut self) -> Result<(), Error> {
        self.partitions.clear();
        let Some(fpt) = &self.fpt else {
            return Err(FptError::NoFpt.into());
        };
        let mut entries = fpt.entries.clone();
        entries.sort_by_key(|e| e.offset());
        let partitions = entries.into_iter().map(|e| self.partition(e)).collect();
        self.partitions = partitions;
        Ok(())
    }

    fn objects(&self) -> Vec<Node<'_, 'a>> {
        self.partitions.iter().map(Node::Partition).collect()
    }
}

impl Display for MeContainer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.base;
        let s = self.size;
        match &self.fpt {
            Some(fpt) => {
                let o = b + fpt.offset;
                let h = fpt.header;
                let c = if self.checksum_valid() { "ok" } else { "bad" };
                write!(
                    f,
                    "ME Container size= 0x{s:x} @ {b:08x}, FPT @ {o:08x}: {h}, checksum {c}"
                )
            }
            None => write!(f, "ME Container size= 0x{s:x} @ {b:08x}, no FPT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::fpt_image;

    #[test]
    fn partitions_sorted_by_offset() {
        let mut data = fpt_image(
            &[
                (*b"MFS\0", 0x800, 0x400),
                (*b"FTPR", 0x400, 0x200),
                (*b"FLOG", 0, 0),
            ],
            0x1000,
        );
        data[0x400..0x404].copy_from_slice(CPD_MAGIC_BYTES);
        let mut me = MeContainer::new(&data, 0x2000);
        assert!(me.valid_header);
        assert!(me.checksum_valid());
        me.process().unwrap();

        let names: Vec<_> = me.partitions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["FLOG", "FTPR", "MFS"]);
        // not present
        assert!(me.partitions[0].data.is_empty());

        let ftpr = &me.partitions[1];
        assert_eq!(ftpr.base, 0x2400);
        assert_eq!(ftpr.data.len(), 0x200);
        assert_eq!(ftpr.part_type, PartitionType::Code);
        assert!(ftpr.has_cpd);
        assert!(!me.partitions[2].has_cpd);
    }

    #[test]
    fn partition_clamped() {
        let data = fpt_image(&[(*b"FTPR", 0x400, 0x2000)], 0x1000);
        let mut me = MeContainer::new(&data, 0);
        me.process().unwrap();
        assert_eq!(me.partitions[0].data.len(), 0xc00);
    }

    #[test]
    fn not_an_me() {
        let data = vec![0u8; 0x100];
        let mut me = MeContainer::new(&data, 0);
        assert!(!me.valid_header);
        assert!(matches!(me.process(), Err(Error::Fpt(FptError::NoFpt))));
        // The signature alone is not enough.
        let me = MeContainer::new(b"$FPT", 0);
        assert!(!me.valid_header);
    }

    #[test]
    fn bad_checksum() {
        let mut data = fpt_image(&[(*b"FTPR", 0x400, 0x200)], 0x1000);
        data[16 + 11] ^= 0xff;
        let me = MeContainer::new(&data, 0);
        assert!(me.valid_header);
        assert!(!me.checksum_valid());
    }
}
