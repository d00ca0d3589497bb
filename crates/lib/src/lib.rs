//! # Boot configuration synthesis engine
//!
//! Given a detected storage topology and a target hardware architecture,
//! this crate selects the device(s) eligible to hold a boot loader,
//! validates that selection against architecture-specific constraints,
//! computes the final kernel command line from multiple independent
//! contributors, and synthesizes the persisted boot-loader configuration
//! document.  On firmware-boot systems it also manages native firmware
//! boot-entry state.

mod error;
pub use error::Error;

pub mod efi;
pub mod images;
pub mod kargs;
pub mod kernel_cmdline;
pub mod parsers;
pub mod platform;
pub mod storage;
pub mod synthesize;

// Re-export blockdev crate for internal use
pub(crate) use bootsynth_blockdev as blockdev;
