//! Human-readable byte counts for log messages and reports.

use core::fmt;

/// Formats a byte count with binary prefixes (KiB, MiB, ...).
///
/// The fractional part is truncated to at most two decimals and trailing zeros are dropped.
///
/// # Examples
///
/// ```
/// use buddy::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(1023)), "1023B");
/// assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
/// assert_eq!(format!("{}", HumanSize(2 << 20)), "2MiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl From<usize> for HumanSize {
    #[inline]
    fn from(bytes: usize) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

        let bytes = self.0 as u128;
        let mut unit = 0;
        let mut scale: u128 = 1;
        while unit + 1 < UNITS.len() && bytes / scale >= 1024 {
            scale <<= 10;
            unit += 1;
        }

        let whole = bytes / scale;
        let hundredths = (bytes % scale) * 100 / scale;
        match hundredths {
            0 => write!(f, "{}{}", whole, UNITS[unit]),
            h if h % 10 == 0 => write!(f, "{}.{}{}", whole, h / 10, UNITS[unit]),
            h => write!(f, "{}.{:02}{}", whole, h, UNITS[unit]),
        }
    }
}
