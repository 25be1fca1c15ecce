//! A custom tlsfix error
//!

use crate::elf::header::SELFMAG;
use alloc::string::String;
use core::fmt;
use core::result;
#[cfg(feature = "std")]
use std::{error, io};

#[non_exhaustive]
#[derive(Debug)]
/// A custom tlsfix error
pub enum Error {
    /// The first four bytes are not the ELF magic; carries whatever was found there
    NotElf([u8; SELFMAG]),
    /// `EI_CLASS` is neither `ELFCLASS32` nor `ELFCLASS64`
    UnsupportedClass(u8),
    /// `EI_DATA` is neither `ELFDATA2LSB` nor `ELFDATA2MSB`
    UnsupportedByteOrder(u8),
    /// A structure at `offset` of `size` bytes does not fit in an image of `len` bytes
    TruncatedFile { offset: u64, size: u64, len: usize },
    /// No program header has type `PT_TLS`
    TlsSegmentNotFound,
    /// A zero alignment, either required by the caller or declared by the TLS segment
    InvalidAlignment,
    /// File offset and virtual address disagree modulo the alignment, padding cannot help
    InconsistentSkew {
        file_skew: u64,
        vaddr_skew: u64,
        align: u64,
    },
    /// The binary cannot be repaired or encoded for some structural reason
    Malformed(String),
    /// An IO based error
    #[cfg(feature = "std")]
    IO(io::Error),
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IO(ref io) => Some(io),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            #[cfg(feature = "std")]
            Error::IO(ref err) => write!(fmt, "{}", err),
            Error::NotElf(ref magic) => write!(fmt, "Not an ELF file, bad magic: {:x?}", magic),
            Error::UnsupportedClass(class) => write!(fmt, "Unsupported ELF class: {}", class),
            Error::UnsupportedByteOrder(data) => {
                write!(fmt, "Unsupported ELF byte order: {}", data)
            }
            Error::TruncatedFile { offset, size, len } => write!(
                fmt,
                "Truncated file: {} bytes at offset {:#x} exceed the image length {:#x}",
                size, offset, len
            ),
            Error::TlsSegmentNotFound => write!(fmt, "No PT_TLS segment found"),
            Error::InvalidAlignment => write!(fmt, "Invalid alignment: 0"),
            Error::InconsistentSkew {
                file_skew,
                vaddr_skew,
                align,
            } => write!(
                fmt,
                "Inconsistent TLS skew: file offset skew {} != vaddr skew {} (align {:#x})",
                file_skew, vaddr_skew, align
            ),
            Error::Malformed(ref msg) => write!(fmt, "Malformed entity: {}", msg),
        }
    }
}

/// A tlsfix result
pub type Result<T> = result::Result<T, Error>;
