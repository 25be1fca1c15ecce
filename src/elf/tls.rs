//! Locating the thread-local storage segment.
//!
//! Only the *first* `PT_TLS` entry in table order is considered. A well formed binary has at
//! most one; should a second one exist it is reported through `log` and otherwise ignored, and
//! the repairs never touch it.

use crate::elf::header::Identity;
use crate::elf::program_header::ProgramHeader;
use crate::error;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The `PT_TLS` program header together with its index in the program header table
pub struct TlsSegment {
    /// Index of the entry in the program header table
    pub index: usize,
    /// The decoded entry
    pub header: ProgramHeader,
}

impl TlsSegment {
    /// `p_offset % p_align`, or `None` for a zero alignment
    pub fn file_skew(&self) -> Option<u64> {
        self.header.p_offset.checked_rem(self.header.p_align)
    }

    /// `p_vaddr % p_align`, or `None` for a zero alignment
    pub fn vaddr_skew(&self) -> Option<u64> {
        self.header.p_vaddr.checked_rem(self.header.p_align)
    }
}

impl fmt::Display for TlsSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TLS segment [{}]: offset=0x{:x}, vaddr=0x{:x}, align=0x{:x}",
            self.index, self.header.p_offset, self.header.p_vaddr, self.header.p_align
        )
    }
}

/// Find the first `PT_TLS` entry of the image in `bytes`.
///
/// Entries are decoded in index order and the scan stops at the first match, so a malformed entry
/// *after* the TLS segment is not an error here.
pub fn find(identity: &Identity, bytes: &[u8]) -> error::Result<TlsSegment> {
    let mut headers = identity.program_headers(bytes).enumerate();
    while let Some((index, header)) = headers.next() {
        let header = header?;
        if header.is_tls() {
            let tls = TlsSegment { index, header };
            log::debug!("found {}", tls);
            warn_on_duplicates(headers.map(|(index, header)| (index, header.ok())));
            return Ok(tls);
        }
    }
    Err(error::Error::TlsSegmentNotFound)
}

fn warn_on_duplicates<I: Iterator<Item = (usize, Option<ProgramHeader>)>>(rest: I) {
    for (index, header) in rest {
        if header.is_some_and(|header| header.is_tls()) {
            log::warn!(
                "ignoring additional PT_TLS program header at index {}, only the first one is repaired",
                index
            );
        }
    }
}
