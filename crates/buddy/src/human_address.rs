//! Hex formatting for physical and virtual addresses in log messages.

use core::fmt;

/// Formats an address as uppercase hex, with a `_` between every group of four digits.
///
/// ```
/// use buddy::HumanAddress;
///
/// assert_eq!(format!("{}", HumanAddress(0x1000)), "0x1000");
/// assert_eq!(format!("{}", HumanAddress(0x2_0000_0000)), "0x2_0000_0000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanAddress(pub usize);

impl From<usize> for HumanAddress {
    #[inline]
    fn from(address: usize) -> Self {
        Self(address)
    }
}

impl fmt::Display for HumanAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GROUPS: usize = (usize::BITS / 16) as usize;

        let mut groups = [0u16; GROUPS];
        let mut used = 0;
        let mut rest = self.0;
        loop {
            groups[used] = (rest & 0xFFFF) as u16;
            used += 1;
            rest >>= 16;
            if rest == 0 {
                break;
            }
        }

        write!(f, "0x{:X}", groups[used - 1])?;
        for group in groups[..used - 1].iter().rev() {
            write!(f, "_{:04X}", group)?;
        }
        Ok(())
    }
}
