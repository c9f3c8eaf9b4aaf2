//! Classification of arbitrary buffers
//!
//! A [`Registry`] is an ordered list of testers. Each tester pairs a matching
//! strategy with the format it identifies. The first tester that matches
//! wins, so more specific testers have to come before more general ones.
//!
//! This is useful when going through many firmware related files of unknown
//! origin, e.g. vendor update packages or pieces extracted from images.

use core::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;

use crate::{
    Error, FirmwareObject, Node,
    capsule::Capsule,
    fv::FirmwareVolume,
    ifd::FlashDescriptor,
    man::ManifestHeader,
    me::MeContainer,
};

/// Dell PFS update container
pub const DELL_PFS_MAGIC: &[u8] = b"PFS.HDR";

/// Dell update executables carry a zlib stream after this marker. The bytes
/// before the marker and one byte inside it vary.
pub const DELL_UPDATE_PATTERN: &[Option<u8>] = &[
    None,
    None,
    None,
    None,
    Some(0xaa),
    Some(0xee),
    Some(0xaa),
    Some(0x76),
    Some(0x1b),
    Some(0xec),
    Some(0xbb),
    Some(0x20),
    Some(0xf1),
    Some(0xe6),
    Some(0x51),
    None,
    Some(0x78),
    Some(0x9c),
];

/// A way of telling whether a buffer is of some format
pub trait Match: Send + Sync {
    fn matches(&self, data: &[u8]) -> bool;
}

/// Fixed bytes at the start of the buffer
pub struct StaticPrefix(pub &'static [u8]);

impl Match for StaticPrefix {
    fn matches(&self, data: &[u8]) -> bool {
        data.starts_with(self.0)
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if !digits.len().is_multiple_of(2) {
        return None;
    }
    digits
        .chunks(2)
        .map(|p| {
            let s = core::str::from_utf8(p).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Fixed bytes at the start of the buffer, written as hex pairs, e.g.
/// `"04 00 00 00 A1 00"`
pub struct HexSignature {
    bytes: Option<Vec<u8>>,
}

impl HexSignature {
    pub fn new(hex: &'static str) -> Self {
        let bytes = decode_hex(hex);
        if bytes.is_none() {
            warn!("Malformed hex signature {hex:?}, it will never match");
        }
        Self { bytes }
    }
}

impl Match for HexSignature {
    fn matches(&self, data: &[u8]) -> bool {
        self.bytes.as_ref().is_some_and(|b| data.starts_with(b))
    }
}

/// A pattern anywhere in the buffer; `None` matches any single byte except
/// a line feed.
pub struct PatternSearch(pub &'static [Option<u8>]);

impl Match for PatternSearch {
    fn matches(&self, data: &[u8]) -> bool {
        let p = self.0;
        if p.is_empty() {
            return true;
        }
        data.windows(p.len()).any(|w| {
            w.iter()
                .zip(p)
                .all(|(b, m)| m.map_or(*b != b'\n', |m| m == *b))
        })
    }
}

/// Full header validation by the format's own parser
pub struct Structural(pub Format);

impl Match for Structural {
    fn matches(&self, data: &[u8]) -> bool {
        self.0.validate(data)
    }
}

/// Formats known to the registry
#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    FlashDescriptor,
    FirmwareCapsule,
    MeManifest,
    MeContainer,
    DellPfs,
    DellUpdate,
    FirmwareVolume,
}

/// A buffer opened as one of the formats this crate parses
#[derive(Serialize, Clone, Debug)]
pub enum Image<'a> {
    Descriptor(FlashDescriptor<'a>),
    Volume(FirmwareVolume<'a>),
    Me(MeContainer<'a>),
    Capsule(Capsule<'a>),
    Manifest(ManifestHeader),
}

impl<'a> Image<'a> {
    /// The root of the object tree, for formats that have one
    pub fn node(&self) -> Option<Node<'_, 'a>> {
        match self {
            Image::Descriptor(d) => Some(Node::Descriptor(d)),
            Image::Volume(v) => Some(Node::Volume(v)),
            Image::Me(m) => Some(Node::Me(m)),
            Image::Capsule(_) | Image::Manifest(_) => None,
        }
    }
}

impl Format {
    /// Header validation only; nothing is decomposed.
    pub fn validate(self, data: &[u8]) -> bool {
        match self {
            Format::FlashDescriptor => FlashDescriptor::new(data, 0).valid_header,
            Format::FirmwareCapsule => Capsule::new(data).valid_header,
            Format::MeManifest => ManifestHeader::parse(data).is_ok(),
            Format::MeContainer => MeContainer::new(data, 0).valid_header,
            Format::DellPfs => data.starts_with(DELL_PFS_MAGIC),
            Format::DellUpdate => PatternSearch(DELL_UPDATE_PATTERN).matches(data),
            Format::FirmwareVolume => FirmwareVolume::new(data, 0).valid_header,
        }
    }

    /// Parse and fully decompose a buffer as this format.
    pub fn parse(self, data: &[u8]) -> Result<Image<'_>, Error> {
        match self {
            Format::FlashDescriptor => Ok(Image::Descriptor(FlashDescriptor::parse(data, 0)?)),
            Format::FirmwareVolume => {
                let mut fv = FirmwareVolume::new(data, 0);
                fv.process()?;
                Ok(Image::Volume(fv))
            }
            Format::MeContainer => {
                let mut me = MeContainer::new(data, 0);
                me.process()?;
                Ok(Image::Me(me))
            }
            Format::FirmwareCapsule => {
                let c = Capsule::new(data);
                if !c.valid_header {
                    return Err(Error::InvalidHeader("not a capsule".into()));
                }
                Ok(Image::Capsule(c))
            }
            Format::MeManifest => ManifestHeader::parse(data)
                .map(Image::Manifest)
                .map_err(|e| Error::InvalidHeader(e.0)),
            Format::DellPfs | Format::DellUpdate => {
                Err(Error::Unsupported(format!("{self} is recognized, but not parsed")))
            }
        }
    }
}

pub struct Tester {
    pub name: &'static str,
    pub matcher: Box<dyn Match>,
    pub format: Format,
}

impl Tester {
    pub fn new(name: &'static str, matcher: impl Match + 'static, format: Format) -> Self {
        Self {
            name,
            matcher: Box::new(matcher),
            format,
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        self.matcher.matches(data)
    }
}

impl fmt::Debug for Tester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tester")
            .field("name", &self.name)
            .field("format", &self.format)
            .finish()
    }
}

#[derive(Debug)]
pub struct Registry {
    testers: Vec<Tester>,
}

impl Registry {
    pub fn new(testers: Vec<Tester>) -> Self {
        Self { testers }
    }

    /// All known testers, most specific first
    pub fn builtin() -> Self {
        Self::new(vec![
            Tester::new(
                "FlashDescriptor",
                Structural(Format::FlashDescriptor),
                Format::FlashDescriptor,
            ),
            Tester::new(
                "UEFICapsule",
                HexSignature::new("B9 82 91 53 B5 AB 91 43 B6 9A E3 A9 43 F7 2F CC"),
                Format::FirmwareCapsule,
            ),
            Tester::new(
                "EFICapsule",
                HexSignature::new("BD 86 66 3B 76 0D 30 40 B7 0E B5 51 9E 2F C5 A0"),
                Format::FirmwareCapsule,
            ),
            Tester::new(
                "IntelMEPartitionManifest",
                HexSignature::new("04 00 00 00 A1 00 00 00"),
                Format::MeManifest,
            ),
            Tester::new(
                "IntelME",
                Structural(Format::MeContainer),
                Format::MeContainer,
            ),
            Tester::new("DellPFS", StaticPrefix(DELL_PFS_MAGIC), Format::DellPfs),
            Tester::new(
                "DellUpdateBinary",
                PatternSearch(DELL_UPDATE_PATTERN),
                Format::DellUpdate,
            ),
            // PFHeader would go here, it is not supported.
            Tester::new(
                "UEFIFirmwareVolume",
                Structural(Format::FirmwareVolume),
                Format::FirmwareVolume,
            ),
        ])
    }

    pub fn testers(&self) -> &[Tester] {
        &self.testers
    }

    /// The first tester that matches, in declaration order. None if the
    /// format is unknown.
    pub fn classify(&self, data: &[u8]) -> Option<&Tester> {
        let t = self.testers.iter().find(|t| t.matches(data));
        match t {
            Some(t) => debug!("Classified as {}", t.name),
            None => debug!("Unknown format"),
        }
        t
    }

    /// Classify and parse in one go.
    pub fn open<'a>(&self, data: &'a [u8]) -> Option<(&Tester, Result<Image<'a>, Error>)> {
        let t = self.classify(data)?;
        Some((t, t.format.parse(data)))
    }
}
