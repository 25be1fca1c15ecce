//! # tlsfix
//!
//! Inspect and repair the thread-local storage (`PT_TLS`) segment of ELF binaries.
//!
//! Some loaders (Android's bionic being the usual suspect) refuse binaries whose TLS segment is
//! under-aligned, or whose file offset and virtual address disagree modulo the alignment. This
//! crate decodes the ELF header and program header table of any 32- or 64-bit, little- or
//! big-endian image, locates the TLS segment, and applies two independent repairs:
//!
//! * raising `p_align` to a required minimum, and
//! * removing offset skew by inserting zero padding in front of the segment and re-basing the file
//!   offsets of every segment that lives after it.
//!
//! # Example
//!
//! ```rust,no_run
//! use tlsfix::{options::FixOptions, session::Session};
//!
//! fn run() -> tlsfix::error::Result<()> {
//!     let mut session = Session::open("libfoo.so")?;
//!     let report = session.apply(&FixOptions::default())?;
//!     println!("{}", report);
//!     session.commit()?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Usage
//!
//! The decoder and both normalizers only need `alloc`; the file session needs `std`.
//!
//! * `std` (default) - file loading and rewriting, `std::error::Error` impls
//! * `alloc` - the in-memory image, the normalizers and `log` output

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod error;

#[cfg(feature = "alloc")]
pub mod elf;

#[cfg(feature = "alloc")]
pub mod options;

#[cfg(feature = "std")]
pub mod session;

/// Binary container size information and byte-order context
pub mod container {
    pub use scroll::Endian;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    /// The size of a binary container
    pub enum Container {
        /// 32-bit (`ELFCLASS32`)
        Little,
        /// 64-bit (`ELFCLASS64`)
        Big,
    }

    impl Container {
        /// Is this a 64-bit container or not?
        pub fn is_big(self) -> bool {
            self == Container::Big
        }

        /// Size in bytes of an address-sized field (`p_offset`, `p_align`, ...)
        pub fn word_size(self) -> usize {
            match self {
                Container::Little => 4,
                Container::Big => 8,
            }
        }

        /// Largest value an address-sized field can hold
        pub fn word_max(self) -> u64 {
            match self {
                Container::Little => u64::from(u32::MAX),
                Container::Big => u64::MAX,
            }
        }
    }

    impl Default for Container {
        #[inline]
        fn default() -> Self {
            Container::Big
        }
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    /// A binary parsing context, including the container size and underlying byte endianness
    pub struct Ctx {
        pub container: Container,
        pub le: Endian,
    }

    impl Ctx {
        /// Whether this binary container context is "big" or not
        pub fn is_big(self) -> bool {
            self.container.is_big()
        }
        /// Whether this binary container context is little endian or not
        pub fn is_little_endian(self) -> bool {
            self.le.is_little()
        }
        /// Create a new binary container context
        pub fn new(container: Container, le: Endian) -> Self {
            Ctx { container, le }
        }
        /// Return a dubious pointer/address byte size for the container
        pub fn size(self) -> usize {
            self.container.word_size()
        }
    }

    impl From<Container> for Ctx {
        fn from(container: Container) -> Self {
            Ctx {
                container,
                le: Endian::default(),
            }
        }
    }

    impl From<Endian> for Ctx {
        fn from(le: Endian) -> Self {
            Ctx {
                container: Container::default(),
                le,
            }
        }
    }

    impl Default for Ctx {
        #[inline]
        fn default() -> Self {
            Ctx {
                container: Container::default(),
                le: Endian::default(),
            }
        }
    }

}
