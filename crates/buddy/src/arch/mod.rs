//! Architecture-specific constants for the page allocator.
//!
//! This module conditionally imports either the hardware constants or the software
//! emulation based on the target architecture and features.

// Hardware constants on x86_64, unless testing or emulating. The module is still compiled
// under test so it keeps type-checking.
#[cfg(target_arch = "x86_64")]
#[cfg_attr(any(test, feature = "software-emulation"), allow(dead_code))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use x86_64::*;

#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;
