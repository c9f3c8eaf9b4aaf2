#![doc = include_str!("../README.md")]

use serde::{Deserialize, Serialize};

pub mod capsule;
pub mod check;
pub mod fpt;
pub mod fv;
pub mod guid;
pub mod ifd;
pub mod man;
pub mod me;
pub mod region;
pub mod ver;

#[cfg(test)]
pub(crate) mod fixtures;

use fpt::FptError;
use fv::{FfsFile, FirmwareVolume};
use ifd::{FlashDescriptor, IfdError};
use me::{MePartition, MeContainer};
use region::FlashRegion;

// An empty byte in a NOR flash is all-1's.
pub const EMPTY: u8 = 0xff;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Error {
    Ifd(IfdError),
    Fpt(FptError),
    InvalidHeader(String),
    Unsupported(String),
}

impl From<IfdError> for Error {
    fn from(e: IfdError) -> Self {
        Error::Ifd(e)
    }
}

impl From<FptError> for Error {
    fn from(e: FptError) -> Self {
        Error::Fpt(e)
    }
}

/// A borrowed view of any entity in a parsed image tree.
///
/// `'n` is the borrow of the tree itself, `'a` the lifetime of the image
/// bytes the tree was built over.
#[derive(Clone, Copy, Debug)]
pub enum Node<'n, 'a> {
    Descriptor(&'n FlashDescriptor<'a>),
    Region(&'n FlashRegion<'a>),
    Volume(&'n FirmwareVolume<'a>),
    File(&'n FfsFile),
    Me(&'n MeContainer<'a>),
    Partition(&'n MePartition<'a>),
}

impl<'n, 'a> Node<'n, 'a> {
    /// Children of this node, in byte order.
    pub fn objects(self) -> Vec<Node<'n, 'a>> {
        match self {
            Node::Descriptor(d) => d.objects(),
            Node::Region(r) => r.objects(),
            Node::Volume(v) => v.objects(),
            Node::Me(m) => m.objects(),
            Node::File(_) | Node::Partition(_) => vec![],
        }
    }
}

/// Common capabilities of everything that can be decomposed further.
pub trait FirmwareObject<'a> {
    /// Discover and parse nested content. Calling this again rebuilds the
    /// same children.
    fn process(&mut self) -> Result<(), Error>;

    /// Nested content discovered by [`FirmwareObject::process`].
    fn objects(&self) -> Vec<Node<'_, 'a>>;
}

/// Visit a tree depth-first, parents before children.
pub fn walk<'n, 'a, F>(node: Node<'n, 'a>, depth: usize, visit: &mut F)
where
    F: FnMut(usize, Node<'n, 'a>),
{
    visit(depth, node);
    for o in node.objects() {
        walk(o, depth + 1, visit);
    }
}
