//! Four-part version numbers as found in ME headers
//!
//! Both the FPT (FITC version) and the `$MN2` manifest carry one.

use core::fmt::{self, Display};
use serde::{Deserialize, Serialize};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

impl Version {
    /// ME version 7 images leave the FITC version out, so it reads as zeros.
    pub fn is_unset(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0 && self.build == 0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Version {
            major,
            minor,
            patch,
            build,
        } = self;
        write!(f, "{major}.{minor}.{patch}.{build}")
    }
}
