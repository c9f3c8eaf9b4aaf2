//! Builders for small synthetic images used throughout the tests

use zerocopy::IntoBytes;

use crate::{
    EMPTY,
    fv::FFS2_GUID,
    guid::Guid,
    ifd::{Access, MAGIC, Master, MasterSection, RegionLimits, RegionSection},
};

const FRBA: u8 = 0x04;
const FMBA: u8 = 0x06;

pub const BIOS_MASTER: Master = Master {
    id: 0x0000,
    read: Access::from_bits(0x0b),
    write: Access::from_bits(0x0a),
};
const ME_MASTER: Master = Master {
    id: 0x0000,
    read: Access::from_bits(0x0d),
    write: Access::from_bits(0x0c),
};
const GBE_MASTER: Master = Master {
    id: 0x0118,
    read: Access::from_bits(0x09),
    write: Access::from_bits(0x08),
};

/// A descriptor with (base, limit) for bios, me, gbe and pdr, in that
/// order. Regions are left erased.
pub fn ifd_image(len: usize, regions: [(u16, u16); 4]) -> Vec<u8> {
    let mut data = vec![EMPTY; len];
    data[16..20].copy_from_slice(&MAGIC);
    // FCBA, NC, FRBA, NR, FMBA, NM, FPSBA, PSL, FCPUSBA, CPUSL, ICC, DMI
    let map = [
        0x03, 0x00, FRBA, 0x04, FMBA, 0x02, 0x10, 0x12, 0x20, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ];
    data[20..36].copy_from_slice(&map);

    let l = |(base, limit): (u16, u16)| RegionLimits { base, limit };
    let [bios, me, gbe, pdr] = regions;
    let r = RegionSection {
        flreg0: l((0, 0)),
        bios: l(bios),
        me: l(me),
        gbe: l(gbe),
        pdr: l(pdr),
    };
    let o = (FRBA as usize) << 4;
    data[o..o + RegionSection::SIZE].copy_from_slice(r.as_bytes());

    let m = MasterSection {
        bios: BIOS_MASTER,
        me: ME_MASTER,
        gbe: GBE_MASTER,
    };
    let o = (FMBA as usize) << 4;
    data[o..o + MasterSection::SIZE].copy_from_slice(m.as_bytes());
    data
}

fn align8(o: usize) -> usize {
    (o + 7) & !7
}

/// An FFSv2 volume with a correct header checksum, holding freeform files
/// of the given sizes. The rest is free space.
pub fn volume(size: usize, files: &[usize]) -> Vec<u8> {
    const HL: usize = 0x48;
    let mut data = vec![EMPTY; size];
    data[..16].fill(0);
    data[16..32].copy_from_slice(&FFS2_GUID.0);
    data[32..40].copy_from_slice(&(size as u64).to_le_bytes());
    data[40..44].copy_from_slice(b"_FVH");
    data[44..48].copy_from_slice(&0x0004_feffu32.to_le_bytes());
    data[48..50].copy_from_slice(&(HL as u16).to_le_bytes());
    data[50..52].fill(0);
    // no extended header, reserved, revision 2
    data[52..56].copy_from_slice(&[0, 0, 0, 2]);
    let blocks = size.div_ceil(0x1000) as u32;
    data[56..60].copy_from_slice(&blocks.to_le_bytes());
    data[60..64].copy_from_slice(&0x1000u32.to_le_bytes());
    data[64..72].fill(0);

    let sum = data[..HL]
        .chunks_exact(2)
        .fold(0u16, |s, w| s.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    data[50..52].copy_from_slice(&sum.wrapping_neg().to_le_bytes());

    let mut o = HL;
    for (i, s) in files.iter().enumerate() {
        data[o..o + 16].copy_from_slice(&[0x10 + i as u8; 16]);
        // integrity check, freeform, no attributes
        data[o + 16..o + 20].copy_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        data[o + 20..o + 23].copy_from_slice(&(*s as u32).to_le_bytes()[..3]);
        data[o + 23] = 0xf8;
        o = align8(o + s);
    }
    data
}

/// An ME region: 16 bytes of pre-header, then the FPT with a correct
/// checksum and the given (name, offset, size) entries.
pub fn fpt_image(entries: &[([u8; 4], u32, u32)], len: usize) -> Vec<u8> {
    let mut data = vec![EMPTY; len];
    data[..16].fill(0);
    let mut h = Vec::new();
    h.extend_from_slice(b"$FPT");
    h.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    // header version, entry version, header length, checksum
    h.extend_from_slice(&[0x20, 0x10, 0x20, 0x00]);
    // ticks, tokens, UMA size, flash layout
    h.extend_from_slice(&[0; 12]);
    // FITC version 11.0.0.1205
    for v in [11u16, 0, 0, 1205] {
        h.extend_from_slice(&v.to_le_bytes());
    }
    let sum = data[..16]
        .iter()
        .chain(h.iter())
        .fold(0u8, |s, b| s.wrapping_add(*b));
    h[11] = sum.wrapping_neg();
    data[16..48].copy_from_slice(&h);

    for (i, (name, offset, size)) in entries.iter().enumerate() {
        let o = 48 + i * 32;
        let e = &mut data[o..o + 32];
        e[..4].copy_from_slice(name);
        e[4..8].fill(EMPTY);
        e[8..12].copy_from_slice(&offset.to_le_bytes());
        e[12..16].copy_from_slice(&size.to_le_bytes());
        e[16..32].fill(0);
    }
    data
}

/// A `$MN2` manifest header as found at the start of an FTPR partition
pub fn manifest() -> Vec<u8> {
    let mut data = vec![0u8; 0x284];
    // module type 4, subtype 0, header length 0xa1 dwords
    data[..8].copy_from_slice(&[0x04, 0x00, 0x00, 0x00, 0xa1, 0x00, 0x00, 0x00]);
    // header version 1.0
    data[8..12].copy_from_slice(&[0x00, 0x00, 0x01, 0x00]);
    data[16..20].copy_from_slice(&0x8086u32.to_le_bytes());
    // 2017-06-15, BCD
    data[20..24].copy_from_slice(&[0x15, 0x06, 0x17, 0x20]);
    data[24..28].copy_from_slice(&0x1000u32.to_le_bytes());
    data[0x1c..0x20].copy_from_slice(b"$MN2");
    data[0x20..0x24].copy_from_slice(&3u32.to_le_bytes());
    for (i, v) in [11u16, 0, 0, 1205].iter().enumerate() {
        let o = 0x24 + i * 2;
        data[o..o + 2].copy_from_slice(&v.to_le_bytes());
    }
    data[0x78..0x7c].copy_from_slice(&0x40u32.to_le_bytes());
    data
}

/// A capsule with a 0x20 byte header and a small body
pub fn capsule(guid: Guid, flags: u32) -> Vec<u8> {
    let mut data = vec![0x5a; 0x100];
    let l = data.len() as u32;
    data[..16].copy_from_slice(&guid.0);
    data[16..20].copy_from_slice(&0x20u32.to_le_bytes());
    data[20..24].copy_from_slice(&flags.to_le_bytes());
    data[24..28].copy_from_slice(&l.to_le_bytes());
    data[28..32].fill(0);
    data
}
