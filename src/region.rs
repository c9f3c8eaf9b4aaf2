//! Flash regions and their decomposition
//!
//! Which content a region holds is decided by its name alone: the BIOS region
//! is scanned for firmware volumes, the ME region holds one ME container. GbE
//! and platform data are left as they are.

use core::fmt::{self, Display};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;

use crate::{
    Error, FirmwareObject, Node,
    fv::{FirmwareVolume, SIGNATURE_OFFSET, search_firmware_volume},
    me::MeContainer,
};

/// Skip distance after a signature hit that turned out not to be a volume
const SPURIOUS_SKIP: usize = 8;

#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum RegionKind {
    Bios,
    Me,
    Gbe,
    Pdr,
}

impl RegionKind {
    /// The order in which regions are derived from the descriptor
    pub const ALL: [RegionKind; 4] = [Self::Bios, Self::Me, Self::Gbe, Self::Pdr];
}

/// Master access for a region, as raw values from the master section
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterAccess {
    pub id: u16,
    pub read: u8,
    pub write: u8,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionAttributes {
    pub base: u16,
    pub limit: u16,
    /// None for platform data, which has no master
    pub access: Option<MasterAccess>,
}

impl RegionAttributes {
    /// Attributes as name/value pairs, in a stable order
    pub fn pairs(&self) -> Vec<(&'static str, u32)> {
        let mut p = vec![("base", self.base as u32), ("limit", self.limit as u32)];
        if let Some(a) = self.access {
            p.push(("id", a.id as u32));
            p.push(("read", a.read as u32));
            p.push(("write", a.write as u32));
        }
        p
    }
}

impl Display for RegionAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self
            .pairs()
            .iter()
            .map(|(k, v)| format!("{k}: 0x{v:02x}"))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{p}")
    }
}

/// Content found inside a region
#[derive(Serialize, Clone, Debug)]
pub enum Section<'a> {
    Volume(FirmwareVolume<'a>),
    Me(MeContainer<'a>),
}

impl<'a> Section<'a> {
    fn node(&self) -> Node<'_, 'a> {
        match self {
            Section::Volume(v) => Node::Volume(v),
            Section::Me(m) => Node::Me(m),
        }
    }

    fn process(&mut self) -> Result<(), Error> {
        match self {
            Section::Volume(v) => v.process(),
            Section::Me(m) => m.process(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct FlashRegion<'a> {
    pub kind: RegionKind,
    #[serde(skip)]
    pub data: &'a [u8],
    /// Offset of the region within the descriptor's image
    pub offset: usize,
    /// Base of the descriptor this region was derived from
    pub parent_base: usize,
    pub attrs: RegionAttributes,
    pub sections: Vec<Section<'a>>,
}

impl<'a> FlashRegion<'a> {
    pub fn new(
        kind: RegionKind,
        data: &'a [u8],
        offset: usize,
        parent_base: usize,
        attrs: RegionAttributes,
    ) -> Self {
        Self {
            kind,
            data,
            offset,
            parent_base,
            attrs,
            sections: vec![],
        }
    }

    /// Absolute address of the region
    pub fn base(&self) -> usize {
        self.parent_base + self.offset
    }

    pub fn volumes(&self) -> impl Iterator<Item = &FirmwareVolume<'a>> {
        self.sections.iter().filter_map(|s| match s {
            Section::Volume(v) => Some(v),
            _ => None,
        })
    }

    pub fn me(&self) -> Option<&MeContainer<'a>> {
        self.sections.iter().find_map(|s| match s {
            Section::Me(m) => Some(m),
            _ => None,
        })
    }

    /// Find all volumes, skipping over signatures that do not belong to a
    /// valid header. The cursor only ever moves forward.
    fn scan_volumes(&mut self) {
        let data = self.data;
        let base = self.base();
        let mut cursor = 0;
        while let Some(m) = search_firmware_volume(data, cursor) {
            let start = m - SIGNATURE_OFFSET;
            let fv = FirmwareVolume::new(&data[start..], base + start);
            if fv.valid_header {
                let s = fv.size;
                debug!("FV @ {:08x}, {s:08x} bytes", base + start);
                cursor = start + s;
                self.sections.push(Section::Volume(fv));
            } else {
                debug!("Spurious FV signature @ {:08x}, skipping", base + m);
                cursor = m + SPURIOUS_SKIP;
            }
        }
    }
}

impl<'a> FirmwareObject<'a> for FlashRegion<'a> {
    fn process(&mut self) -> Result<(), Error> {
        self.sections.clear();
        match self.kind {
            RegionKind::Bios => self.scan_volumes(),
            RegionKind::Me => {
                let me = MeContainer::new(self.data, self.base());
                if me.valid_header {
                    info!("ME container @ {:08x}", self.base());
                    self.sections.push(Section::Me(me));
                }
            }
            RegionKind::Gbe | RegionKind::Pdr => {}
        }
        for s in &mut self.sections {
            s.process()?;
        }
        Ok(())
    }

    fn objects(&self) -> Vec<Node<'_, 'a>> {
        self.sections.iter().map(Section::node).collect()
    }
}

impl Display for FlashRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.kind;
        let l = self.data.len();
        let a = self.attrs;
        write!(
            f,
            "Flash Region type= {n}, size= 0x{l:x} ({l} bytes) details[ {a} ]"
        )
    }
}
