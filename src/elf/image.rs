//! An owned, mutable ELF image
//!
//! [`BinaryImage`] holds the complete file contents together with its decoded [`Identity`]. All
//! reads go through the identity's width and byte order, and so do the only two kinds of writes
//! the repairs perform: patching one address-sized program header field, and inserting padding.

use crate::container::Container;
use crate::elf::header::Identity;
use crate::elf::program_header::{self, Field, ProgramHeader, ProgramHeaders};
use crate::elf::tls::{self, TlsSegment};
use crate::error;
use alloc::vec::Vec;
use core::fmt;
use scroll::Pwrite;

/// The entire contents of an ELF file, plus the facts needed to patch its program headers
pub struct BinaryImage {
    bytes: Vec<u8>,
    identity: Identity,
}

impl BinaryImage {
    /// Take ownership of `bytes` and decode its identity
    pub fn new(bytes: Vec<u8>) -> error::Result<Self> {
        let identity = Identity::parse(&bytes)?;
        Ok(BinaryImage { bytes, identity })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Iterate the program header table
    pub fn program_headers(&self) -> ProgramHeaders<'_> {
        self.identity.program_headers(&self.bytes)
    }

    /// Decode program header `index`
    pub fn program_header(&self, index: usize) -> error::Result<ProgramHeader> {
        self.program_headers().get(index)
    }

    /// Locate the first `PT_TLS` segment
    pub fn tls(&self) -> error::Result<TlsSegment> {
        tls::find(&self.identity, &self.bytes)
    }

    /// File position of `field` in program header `index`, checked against the image length
    pub(crate) fn field_position(&self, index: usize, field: Field) -> error::Result<usize> {
        let range = program_header::entry_range(&self.identity, index, self.bytes.len())?;
        Ok(range.start + field.position(self.identity.container()))
    }

    /// Check that `value` can be stored in an address-sized field of this image
    pub(crate) fn check_word(&self, field: Field, value: u64) -> error::Result<()> {
        let container = self.identity.container();
        if value > container.word_max() {
            return Err(error::Error::Malformed(alloc::format!(
                "{:?} value 0x{:x} does not fit a {}-byte field",
                field,
                value,
                container.word_size()
            )));
        }
        Ok(())
    }

    /// Overwrite exactly the bytes of `field` in program header `index` with `value`.
    ///
    /// No other byte of the image changes.
    pub fn write_field(&mut self, index: usize, field: Field, value: u64) -> error::Result<()> {
        self.check_word(field, value)?;
        let at = self.field_position(index, field)?;
        let le = self.identity.endian();
        let container = self.identity.container();
        let len = self.bytes.len();
        let truncated = |_: scroll::Error| error::Error::TruncatedFile {
            offset: at as u64,
            size: container.word_size() as u64,
            len,
        };
        match container {
            Container::Little => self.bytes.pwrite_with(value as u32, at, le).map_err(truncated)?,
            Container::Big => self.bytes.pwrite_with(value, at, le).map_err(truncated)?,
        };
        log::debug!("phdr[{}].{:?} = 0x{:x} (at 0x{:x})", index, field, value, at);
        Ok(())
    }

    /// Insert `count` zero bytes before file offset `at`, growing the image.
    ///
    /// Nothing is re-based here; that is the caller's business.
    pub(crate) fn insert_zeros(&mut self, at: usize, count: usize) -> error::Result<()> {
        if at > self.bytes.len() {
            return Err(error::Error::TruncatedFile {
                offset: at as u64,
                size: 0,
                len: self.bytes.len(),
            });
        }
        self.bytes.splice(at..at, core::iter::repeat_n(0u8, count));
        Ok(())
    }
}

impl fmt::Debug for BinaryImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BinaryImage")
            .field("identity", &self.identity)
            .field("len", &self.bytes.len())
            .finish()
    }
}
