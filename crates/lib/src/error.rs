//! The typed error taxonomy of the engine.
//!
//! Validation problems are deliberately *not* errors: they are returned as
//! plain lists of user-facing strings from
//! [`crate::platform::Platform::check_boot_request`] so the caller can
//! surface them and re-prompt.

/// Fatal engine errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No kernel image was produced; a boot loader configuration cannot
    /// be written without at least one.
    #[error("no bootable kernel image was provided")]
    NoBootableKernel,
    /// The system architecture could not be mapped to a supported
    /// platform variant.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}
