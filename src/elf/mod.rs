//! The ELF side of things: decoding the header and program header table of a 32-bit or 64-bit,
//! little or big endian image, finding its TLS segment, and patching it.
//!
//! ```rust
//! use tlsfix::elf::{BinaryImage, fixup};
//!
//! fn align_tls(bytes: Vec<u8>) -> tlsfix::error::Result<Vec<u8>> {
//!     let mut image = BinaryImage::new(bytes)?;
//!     let tls = image.tls()?;
//!     fixup::normalize_alignment(&mut image, &tls, 64)?;
//!     // the alignment may have changed; look again before fixing skew
//!     let tls = image.tls()?;
//!     fixup::normalize_skew(&mut image, &tls)?;
//!     Ok(image.into_bytes())
//! }
//! ```

pub mod fixup;
pub mod header;
pub mod image;
pub mod program_header;
pub mod tls;

#[cfg(test)]
pub(crate) mod synth;

pub use self::fixup::{AlignmentFix, SkewFix};
pub use self::header::Identity;
pub use self::image::BinaryImage;
pub use self::program_header::ProgramHeader;
pub use self::tls::TlsSegment;
