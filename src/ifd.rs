//! Intel Flash Descriptor (IFD)
//!
//! For reference,
//! see <https://www.intel.com/content/dam/www/public/us/en/documents/datasheets/io-controller-hub-8-datasheet.pdf>
//! and <https://opensecuritytraining.info/IntroBIOS_files/Day2_02_Advanced%20x86%20-%20BIOS%20and%20SMM%20Internals%20-%20Flash%20Descriptor.pdf>
//! and coreboot `util/ifdtool/`.
//!
//! The descriptor starts with 16 bytes of padding, followed by the signature
//! and the Descriptor Map. The map points to the other sections via compact
//! base addresses (xxBA), which are in units of 16 bytes. Region base and
//! limit values are in units of 4K blocks.
//!
//! | Offset      | Section        | Size |
//! | ----------- | -------------- | ---- |
//! | 0x00        | Padding        | 16   |
//! | 0x10        | Signature      | 4    |
//! | 0x14        | Descriptor Map | 16   |
//! | FRBA << 4   | Regions        | 20   |
//! | FMBA << 4   | Masters        | 12   |
//!
//! Only the first four regions (BIOS, ME, GbE, platform data) and the first
//! three masters (BIOS, ME, GbE) are decoded here, which is what all PCH
//! generations have in common.

// We retain the all-uppercase acronyms in the struct definitions.
// Lowercase helpers are provided through implementations.
#![allow(non_snake_case)]

use core::fmt::{self, Display};
use core::mem::size_of;

use bitfield_struct::bitfield;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{
    Error, FirmwareObject, Node,
    region::{FlashRegion, MasterAccess, RegionAttributes, RegionKind},
};

// NOTE: This is the LE representation of 0x0ff0_a55a.
pub const MAGIC: [u8; 4] = [0x5a, 0xa5, 0xf0, 0x0f];
const MAGIC_OFFSET: usize = 16;
/// Padding plus signature; anything shorter cannot be a descriptor.
pub const HEADER_SIZE: usize = MAGIC_OFFSET + MAGIC.len();
const MAP_OFFSET: usize = HEADER_SIZE;

/// Region base and limit granularity
pub const BLOCK_SIZE: usize = 0x1000;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum IfdError {
    NoIfd(String),
    Truncated(String),
}

/// Read a fixed-size structure from the start of a slice.
/// Too short a slice is reported, never silently cut off.
fn read_struct<T: FromBytes>(data: &[u8], what: &str) -> Result<T, IfdError> {
    let size = size_of::<T>();
    let Some(slice) = data.get(..size) else {
        let l = data.len();
        return Err(IfdError::Truncated(format!(
            "{what}: need {size} bytes, only got {l}"
        )));
    };
    T::read_from_bytes(slice).map_err(|_| IfdError::Truncated(format!("{what}: cannot decode")))
}

/// Descriptor Map
///
/// Every field is a full byte here. The counts are reported as stored, the
/// bases are expanded by the helpers below.
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct DescriptorMap {
    /// Flash Component Base Address
    pub FCBA: u8,
    /// Number of flash chips (components)
    pub NC: u8,
    /// Flash Region Base Address
    pub FRBA: u8,
    /// Number of regions
    pub NR: u8,
    /// Flash Master Base Address
    pub FMBA: u8,
    /// Number of masters
    pub NM: u8,
    /// PCH Strap Base Address
    pub FPSBA: u8,
    /// PCH strap length
    pub PSL: u8,
    /// Processor Strap Base Address
    pub FCPUSBA: u8,
    /// Processor strap length
    pub CPUSL: u8,
    /// ICC table base
    pub ICCTBA: u8,
    /// Number of ICC table entries
    pub NICC: u8,
    /// DMI table base
    pub DMITBA: u8,
    /// Number of DMI table entries
    pub NDMI: u8,
    pub _reserved: u16,
}

impl DescriptorMap {
    pub const SIZE: usize = size_of::<Self>();

    pub fn read(data: &[u8]) -> Result<Self, IfdError> {
        read_struct(data, "descriptor map")
    }

    pub fn frba(&self) -> usize {
        (self.FRBA as usize) << 4
    }

    pub fn fmba(&self) -> usize {
        (self.FMBA as usize) << 4
    }
}

impl Display for DescriptorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.NC;
        let r = self.NR;
        let m = self.NM;
        let ps = self.PSL;
        let cs = self.CPUSL;
        let icc = self.NICC;
        write!(
            f,
            "chips 0x{c:02x}, regions 0x{r:02x}, masters 0x{m:02x}, PCH straps 0x{ps:02x}, \
             PROC straps 0x{cs:02x}, ICC entries 0x{icc:02x}"
        )
    }
}

/// Base and limit of one region, in 4K blocks.
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RegionLimits {
    pub base: u16,
    pub limit: u16,
}

impl RegionLimits {
    pub fn offset(self) -> usize {
        self.base as usize * BLOCK_SIZE
    }

    /// Exclusive end address. A limit of 0 means the region is absent.
    // offset + (limit + 1 - base) * 4K, which simplifies to this.
    pub fn end(self) -> usize {
        if self.limit == 0 {
            self.offset()
        } else {
            (self.limit as usize + 1) * BLOCK_SIZE
        }
    }

    /// 0 for absent regions and for limits below the base
    pub fn size(self) -> usize {
        self.end().saturating_sub(self.offset())
    }
}

impl Display for RegionLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.offset();
        let e = self.end();
        let u = if b >= e { " (unused)" } else { "" };
        write!(f, "{b:08x} - {e:08x}{u}")
    }
}

/// Flash Region section
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RegionSection {
    /// The descriptor region itself; not decomposed
    pub flreg0: RegionLimits,
    pub bios: RegionLimits,
    pub me: RegionLimits,
    pub gbe: RegionLimits,
    pub pdr: RegionLimits,
}

impl RegionSection {
    pub const SIZE: usize = size_of::<Self>();

    pub fn read(data: &[u8]) -> Result<Self, IfdError> {
        read_struct(data, "region section")
    }

    pub fn get(&self, kind: RegionKind) -> RegionLimits {
        match kind {
            RegionKind::Bios => self.bios,
            RegionKind::Me => self.me,
            RegionKind::Gbe => self.gbe,
            RegionKind::Pdr => self.pdr,
        }
    }
}

/// Access permissions of one master, one bit per region
#[bitfield(u8)]
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, PartialEq, Eq)]
pub struct Access {
    pub fd: bool,
    pub bios: bool,
    pub me: bool,
    pub gbe: bool,
    pub pd: bool,
    #[bits(3)]
    _r: u8,
}

impl Access {
    pub fn allows(self, kind: RegionKind) -> bool {
        match kind {
            RegionKind::Bios => self.bios(),
            RegionKind::Me => self.me(),
            RegionKind::Gbe => self.gbe(),
            RegionKind::Pdr => self.pd(),
        }
    }
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Master {
    pub id: u16,
    pub read: Access,
    pub write: Access,
}

impl From<Master> for MasterAccess {
    fn from(m: Master) -> Self {
        MasterAccess {
            id: m.id,
            read: m.read.into_bits(),
            write: m.write.into_bits(),
        }
    }
}

/// Flash Master section
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MasterSection {
    pub bios: Master,
    pub me: Master,
    pub gbe: Master,
}

impl MasterSection {
    pub const SIZE: usize = size_of::<Self>();

    pub fn read(data: &[u8]) -> Result<Self, IfdError> {
        read_struct(data, "master section")
    }

    /// There is no master for platform data.
    pub fn get(&self, kind: RegionKind) -> Option<Master> {
        match kind {
            RegionKind::Bios => Some(self.bios),
            RegionKind::Me => Some(self.me),
            RegionKind::Gbe => Some(self.gbe),
            RegionKind::Pdr => None,
        }
    }
}

/// The root of a full flash image.
#[derive(Serialize, Clone, Debug)]
pub struct FlashDescriptor<'a> {
    #[serde(skip)]
    pub data: &'a [u8],
    pub base: usize,
    pub size: usize,
    pub valid_header: bool,
    pub map: Option<DescriptorMap>,
    pub region: Option<RegionSection>,
    pub master: Option<MasterSection>,
    /// Always bios, me, gbe, pdr in that order once processed
    pub regions: Vec<FlashRegion<'a>>,
}

impl<'a> FlashDescriptor<'a> {
    /// Check the signature only. Nothing beyond the header is read.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        let valid_header = data.len() >= HEADER_SIZE && data[MAGIC_OFFSET..HEADER_SIZE] == MAGIC;
        Self {
            data,
            base,
            size: data.len(),
            valid_header,
            map: None,
            region: None,
            master: None,
            regions: vec![],
        }
    }

    /// Check the signature and decompose the whole image.
    pub fn parse(data: &'a [u8], base: usize) -> Result<Self, Error> {
        let mut ifd = Self::new(data, base);
        ifd.process()?;
        Ok(ifd)
    }

    pub fn region(&self, kind: RegionKind) -> Option<&FlashRegion<'a>> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// The GbE region is sliced from the start of the image up to its end,
    /// not from its own base. Other tools and existing dumps depend on this,
    /// so it stays.
    fn region_data(&self, kind: RegionKind, limits: RegionLimits) -> &'a [u8] {
        let data = self.data;
        let l = data.len();
        let e = limits.end();
        if e > l && limits.size() > 0 {
            warn!("{kind} region ends @ {e:08x}, beyond image size {l:08x}");
        }
        let end = e.min(l);
        let start = match kind {
            RegionKind::Gbe => 0,
            _ => limits.offset().min(end),
        };
        &data[start..end]
    }
}

impl<'a> FirmwareObject<'a> for FlashDescriptor<'a> {
    fn process(&mut self) -> Result<(), Error> {
        if !self.valid_header {
            let got = self.data.get(MAGIC_OFFSET..HEADER_SIZE);
            return Err(IfdError::NoIfd(format!(
                "IFD magic not as expected, got: {got:02x?}, wanted: {MAGIC:02x?}"
            ))
            .into());
        }
        self.regions.clear();

        let data = self.data;
        let map = DescriptorMap::read(&data[MAP_OFFSET..])?;
        let region_offset = map.frba();
        let region = RegionSection::read(data.get(region_offset..).unwrap_or_default())?;
        let master_offset = map.fmba();
        let master = MasterSection::read(data.get(master_offset..).unwrap_or_default())?;
        debug!("IFD regions @ {region_offset:08x}, masters @ {master_offset:08x}");

        self.map = Some(map);
        self.region = Some(region);
        self.master = Some(master);

        for kind in RegionKind::ALL {
            let limits = region.get(kind);
            let attrs = RegionAttributes {
                base: limits.base,
                limit: limits.limit,
                access: master.get(kind).map(MasterAccess::from),
            };
            let offset = limits.offset();
            let r_data = self.region_data(kind, limits);
            let mut r = FlashRegion::new(kind, r_data, offset, self.base, attrs);
            r.process()?;
            info!("{kind} region @ {offset:08x}, {} bytes", r.data.len());
            self.regions.push(r);
        }
        Ok(())
    }

    fn objects(&self) -> Vec<Node<'_, 'a>> {
        self.regions.iter().map(Node::Region).collect()
    }
}

impl Display for FlashDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.map {
            Some(m) => write!(f, "Flash Descriptor (Intel PCH) {m}"),
            None => write!(f, "Flash Descriptor (Intel PCH), not processed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, ifd_image};

    #[test]
    fn fixed_sizes() {
        assert_eq!(DescriptorMap::SIZE, 16);
        assert_eq!(RegionSection::SIZE, 20);
        assert_eq!(MasterSection::SIZE, 12);
    }

    #[test]
    fn too_short() {
        for l in 0..HEADER_SIZE {
            let data = vec![0u8; l];
            let ifd = FlashDescriptor::new(&data, 0);
            assert!(!ifd.valid_header);
        }
        // Exactly the magic, but one byte short.
        let mut data = vec![0xffu8; 19];
        data[16..19].copy_from_slice(&MAGIC[..3]);
        assert!(!FlashDescriptor::new(&data, 0).valid_header);
    }

    #[test]
    fn header_only() {
        let mut data = vec![0xffu8; HEADER_SIZE];
        data[16..20].copy_from_slice(&MAGIC);
        let mut ifd = FlashDescriptor::new(&data, 0);
        assert!(ifd.valid_header);
        // The map itself is missing.
        assert!(matches!(
            ifd.process(),
            Err(Error::Ifd(IfdError::Truncated(_)))
        ));
    }

    #[test]
    fn wrong_magic() {
        let mut data = ifd_image(0x4000, [(0, 0); 4]);
        data[16] = 0x5b;
        let mut ifd = FlashDescriptor::new(&data, 0);
        assert!(!ifd.valid_header);
        assert!(ifd.map.is_none());
        assert!(matches!(ifd.process(), Err(Error::Ifd(IfdError::NoIfd(_)))));
        assert!(ifd.regions.is_empty());
        assert!(ifd.region.is_none());
    }

    #[test]
    fn fixed_region_order() {
        // bios 3..3, me 1..2, gbe absent, pdr absent
        let data = ifd_image(0x4000, [(3, 3), (1, 2), (0, 0), (0, 0)]);
        let ifd = FlashDescriptor::parse(&data, 0).unwrap();
        let kinds: Vec<_> = ifd.regions.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [RegionKind::Bios, RegionKind::Me, RegionKind::Gbe, RegionKind::Pdr]
        );
        assert_eq!(ifd.regions[0].data.len(), 0x1000);
        assert_eq!(ifd.regions[1].data.len(), 0x2000);
        assert_eq!(ifd.regions[3].data.len(), 0);
    }

    #[test]
    fn region_sizes() {
        let l = |base, limit| RegionLimits { base, limit };
        // single block
        assert_eq!(l(5, 5).size(), 0x1000);
        assert_eq!(l(5, 5).offset(), 0x5000);
        // absent
        assert_eq!(l(0, 0).size(), 0);
        assert_eq!(l(7, 0).size(), 0);
        assert_eq!(l(7, 0).end(), 0x7000);
        assert_eq!(l(1, 0x7ff).size(), 0x7ff000);
        // limit below base
        assert_eq!(l(5, 2).size(), 0);
    }

    #[test]
    fn gbe_starts_at_image_start() {
        // gbe 2..2, pdr 3..3
        let data = ifd_image(0x4000, [(0, 0), (0, 0), (2, 2), (3, 3)]);
        let ifd = FlashDescriptor::parse(&data, 0).unwrap();

        let gbe = ifd.region(RegionKind::Gbe).unwrap();
        assert_eq!(gbe.offset, 0x2000);
        assert_eq!(gbe.data.len(), 0x3000);
        assert_eq!(gbe.data.as_ptr(), data.as_ptr());

        let pdr = ifd.region(RegionKind::Pdr).unwrap();
        assert_eq!(pdr.data.len(), 0x1000);
        assert_eq!(pdr.data.as_ptr(), data[0x3000..].as_ptr());
        assert!(pdr.attrs.access.is_none());
    }

    #[test]
    fn regions_clamped_to_image() {
        // bios claims 2..7 in a 4 block image
        let data = ifd_image(0x4000, [(2, 7), (0, 0), (0, 0), (0, 0)]);
        let ifd = FlashDescriptor::parse(&data, 0).unwrap();
        let bios = ifd.region(RegionKind::Bios).unwrap();
        assert_eq!(bios.data.len(), 0x2000);
        // starts past the end
        let data = ifd_image(0x2000, [(4, 5), (0, 0), (0, 0), (0, 0)]);
        let ifd = FlashDescriptor::parse(&data, 0).unwrap();
        assert!(ifd.regions[0].data.is_empty());
    }

    #[test]
    fn master_attributes() {
        let data = ifd_image(0x2000, [(1, 1), (0, 0), (0, 0), (0, 0)]);
        let ifd = FlashDescriptor::parse(&data, 0x100_0000).unwrap();
        let bios = ifd.region(RegionKind::Bios).unwrap();
        let a = bios.attrs.access.unwrap();
        assert_eq!(a.id, fixtures::BIOS_MASTER.id);
        assert_eq!(a.read, 0x0b);
        assert_eq!(a.write, 0x0a);
        let m = ifd.master.unwrap();
        assert!(m.bios.read.allows(RegionKind::Bios));
        assert!(!m.bios.write.allows(RegionKind::Me));
        // back-reference to the descriptor base
        assert_eq!(bios.base(), 0x100_1000);
    }

    #[test]
    fn pointer_out_of_bounds() {
        let mut data = ifd_image(0x1000, [(0, 0); 4]);
        // FRBA far beyond the image
        data[0x16] = 0xff;
        let short = &data[..0x800];
        let mut ifd = FlashDescriptor::new(short, 0);
        assert!(ifd.valid_header);
        assert!(matches!(
            ifd.process(),
            Err(Error::Ifd(IfdError::Truncated(_)))
        ));
    }

    #[test]
    fn process_twice() {
        let data = ifd_image(0x4000, [(3, 3), (1, 2), (0, 0), (0, 0)]);
        let mut ifd = FlashDescriptor::parse(&data, 0).unwrap();
        let first = format!("{:?}", ifd.regions);
        ifd.process().unwrap();
        assert_eq!(ifd.regions.len(), 4);
        assert_eq!(format!("{:?}", ifd.regions), first);
    }
}
