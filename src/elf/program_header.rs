use crate::container::{Container, Ctx};
use crate::elf::header::Identity;
use crate::error;
use core::fmt;
use core::ops::Range;
use core::result;
use scroll::ctx;

/// Program header table entry unused
pub const PT_NULL: u32 = 0;
/// Loadable program segment
pub const PT_LOAD: u32 = 1;
/// Dynamic linking information
pub const PT_DYNAMIC: u32 = 2;
/// Program interpreter
pub const PT_INTERP: u32 = 3;
/// Auxiliary information
pub const PT_NOTE: u32 = 4;
/// Reserved
pub const PT_SHLIB: u32 = 5;
/// Entry for header table itself
pub const PT_PHDR: u32 = 6;
/// Thread-local storage segment
pub const PT_TLS: u32 = 7;
/// GCC .eh_frame_hdr segment
pub const PT_GNU_EH_FRAME: u32 = 0x6474e550;
/// Indicates stack executability
pub const PT_GNU_STACK: u32 = 0x6474e551;
/// Read-only after relocation
pub const PT_GNU_RELRO: u32 = 0x6474e552;
/// ARM unwind segment
pub const PT_ARM_EXIDX: u32 = 0x70000001;

/// Segment is executable
pub const PF_X: u32 = 1 << 0;
/// Segment is writable
pub const PF_W: u32 = 1 << 1;
/// Segment is readable
pub const PF_R: u32 = 1 << 2;

pub fn pt_to_str(pt: u32) -> &'static str {
    match pt {
        PT_NULL => "PT_NULL",
        PT_LOAD => "PT_LOAD",
        PT_DYNAMIC => "PT_DYNAMIC",
        PT_INTERP => "PT_INTERP",
        PT_NOTE => "PT_NOTE",
        PT_SHLIB => "PT_SHLIB",
        PT_PHDR => "PT_PHDR",
        PT_TLS => "PT_TLS",
        PT_GNU_EH_FRAME => "PT_GNU_EH_FRAME",
        PT_GNU_STACK => "PT_GNU_STACK",
        PT_GNU_RELRO => "PT_GNU_RELRO",
        PT_ARM_EXIDX => "PT_ARM_EXIDX",
        _ => "UNKNOWN_PT",
    }
}

/// The address-sized fields of a program header that the repairs rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Offset,
    Align,
}

impl Field {
    /// Byte position of this field inside one entry of the given class.
    ///
    /// The two layouts are not offset compatible: the 64-bit one moves `p_flags` up front so
    /// every following field sits at a different position.
    pub fn position(self, container: Container) -> usize {
        use core::mem::offset_of;
        match (container, self) {
            (Container::Little, Field::Offset) => {
                offset_of!(program_header32::ProgramHeader, p_offset)
            }
            (Container::Little, Field::Align) => {
                offset_of!(program_header32::ProgramHeader, p_align)
            }
            (Container::Big, Field::Offset) => {
                offset_of!(program_header64::ProgramHeader, p_offset)
            }
            (Container::Big, Field::Align) => offset_of!(program_header64::ProgramHeader, p_align),
        }
    }
}

#[derive(Default, PartialEq, Eq, Clone, Copy)]
/// A unified ProgramHeader - convertable to and from 32-bit and 64-bit variants
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment file offset
    pub p_offset: u64,
    /// Segment virtual address
    pub p_vaddr: u64,
    /// Segment physical address
    pub p_paddr: u64,
    /// Segment size in file
    pub p_filesz: u64,
    /// Segment size in memory
    pub p_memsz: u64,
    /// Segment alignment
    pub p_align: u64,
}

impl ProgramHeader {
    /// Return the size of the underlying program header, given a `Ctx`
    #[inline]
    pub fn size(ctx: Ctx) -> usize {
        use scroll::ctx::SizeWith;
        Self::size_with(&ctx)
    }

    /// Whether this is the thread-local storage segment
    #[inline]
    pub fn is_tls(&self) -> bool {
        self.p_type == PT_TLS
    }
}

impl fmt::Debug for ProgramHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProgramHeader")
            .field("p_type", &pt_to_str(self.p_type))
            .field("p_flags", &format_args!("0x{:x}", self.p_flags))
            .field("p_offset", &format_args!("0x{:x}", self.p_offset))
            .field("p_vaddr", &format_args!("0x{:x}", self.p_vaddr))
            .field("p_paddr", &format_args!("0x{:x}", self.p_paddr))
            .field("p_filesz", &format_args!("0x{:x}", self.p_filesz))
            .field("p_memsz", &format_args!("0x{:x}", self.p_memsz))
            .field("p_align", &self.p_align)
            .finish()
    }
}

impl ctx::SizeWith<Ctx> for ProgramHeader {
    fn size_with(ctx: &Ctx) -> usize {
        match ctx.container {
            Container::Little => program_header32::SIZEOF_PHDR,
            Container::Big => program_header64::SIZEOF_PHDR,
        }
    }
}

impl<'a> ctx::TryFromCtx<'a, Ctx> for ProgramHeader {
    type Error = scroll::Error;
    fn try_from_ctx(
        bytes: &'a [u8],
        Ctx { container, le }: Ctx,
    ) -> result::Result<(Self, usize), Self::Error> {
        use scroll::Pread;
        let res = match container {
            Container::Little => (
                bytes
                    .pread_with::<program_header32::ProgramHeader>(0, le)?
                    .into(),
                program_header32::SIZEOF_PHDR,
            ),
            Container::Big => (
                bytes
                    .pread_with::<program_header64::ProgramHeader>(0, le)?
                    .into(),
                program_header64::SIZEOF_PHDR,
            ),
        };
        Ok(res)
    }
}

impl ctx::TryIntoCtx<Ctx> for ProgramHeader {
    type Error = scroll::Error;
    fn try_into_ctx(
        self,
        bytes: &mut [u8],
        Ctx { container, le }: Ctx,
    ) -> result::Result<usize, Self::Error> {
        use scroll::Pwrite;
        match container {
            Container::Little => {
                let phdr: program_header32::ProgramHeader = self.into();
                Ok(bytes.pwrite_with(phdr, 0, le)?)
            }
            Container::Big => {
                let phdr: program_header64::ProgramHeader = self.into();
                Ok(bytes.pwrite_with(phdr, 0, le)?)
            }
        }
    }
}

/// A lazy, finite iterator over the program header table of an image.
///
/// Every entry is decoded on demand from its own `e_phentsize` sized slice; the iterator is
/// `Clone`, so it can be restarted by cloning it before use, or by asking the [`Identity`] for a
/// fresh one.
#[derive(Debug, Clone)]
pub struct ProgramHeaders<'a> {
    bytes: &'a [u8],
    identity: Identity,
    index: usize,
}

impl<'a> ProgramHeaders<'a> {
    pub fn new(bytes: &'a [u8], identity: Identity) -> Self {
        ProgramHeaders {
            bytes,
            identity,
            index: 0,
        }
    }

    /// Decode the entry at `index`, which need not be the next one
    pub fn get(&self, index: usize) -> error::Result<ProgramHeader> {
        parse_at(self.bytes, &self.identity, index)
    }
}

impl<'a> Iterator for ProgramHeaders<'a> {
    type Item = error::Result<ProgramHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= usize::from(self.identity.phnum) {
            return None;
        }
        let res = parse_at(self.bytes, &self.identity, self.index);
        self.index += 1;
        Some(res)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::from(self.identity.phnum).saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for ProgramHeaders<'a> {}

/// Byte range of entry `index` within an image of `len` bytes.
///
/// Checks the declared entry size against the class layout, and the range against `len`.
pub fn entry_range(identity: &Identity, index: usize, len: usize) -> error::Result<Range<usize>> {
    let entsize = usize::from(identity.phentsize);
    if entsize < identity.phdr_layout_size() {
        return Err(error::Error::Malformed(alloc::format!(
            "program header entry size {} is smaller than the {} byte {} layout",
            entsize,
            identity.phdr_layout_size(),
            if identity.is_64() { "ELF64" } else { "ELF32" }
        )));
    }
    let offset = (index as u64)
        .checked_mul(entsize as u64)
        .and_then(|rel| rel.checked_add(identity.phoff));
    let truncated = error::Error::TruncatedFile {
        offset: offset.unwrap_or(u64::MAX),
        size: entsize as u64,
        len,
    };
    let start = match offset.and_then(|offset| usize::try_from(offset).ok()) {
        Some(start) => start,
        None => return Err(truncated),
    };
    match start.checked_add(entsize) {
        Some(end) if end <= len => Ok(start..end),
        _ => Err(truncated),
    }
}

fn parse_at(bytes: &[u8], identity: &Identity, index: usize) -> error::Result<ProgramHeader> {
    use scroll::Pread;
    let range = entry_range(identity, index, bytes.len())?;
    let start = range.start;
    bytes[range]
        .pread_with::<ProgramHeader>(0, identity.ctx)
        .map_err(|_| error::Error::TruncatedFile {
            offset: start as u64,
            size: u64::from(identity.phentsize),
            len: bytes.len(),
        })
}

macro_rules! elf_program_header_std_impl {
    ($size:ty) => {

        impl From<ProgramHeader> for super::ProgramHeader {
            fn from(ph: ProgramHeader) -> Self {
                super::ProgramHeader {
                    p_type: ph.p_type,
                    p_flags: ph.p_flags,
                    p_offset: u64::from(ph.p_offset),
                    p_vaddr: u64::from(ph.p_vaddr),
                    p_paddr: u64::from(ph.p_paddr),
                    p_filesz: u64::from(ph.p_filesz),
                    p_memsz: u64::from(ph.p_memsz),
                    p_align: u64::from(ph.p_align),
                }
            }
        }

        impl From<super::ProgramHeader> for ProgramHeader {
            fn from(ph: super::ProgramHeader) -> Self {
                ProgramHeader {
                    p_type: ph.p_type,
                    p_flags: ph.p_flags,
                    p_offset: ph.p_offset as $size,
                    p_vaddr: ph.p_vaddr as $size,
                    p_paddr: ph.p_paddr as $size,
                    p_filesz: ph.p_filesz as $size,
                    p_memsz: ph.p_memsz as $size,
                    p_align: ph.p_align as $size,
                }
            }
        }
    };
}

/// The 32-bit on-disk program header
pub mod program_header32 {
    use scroll::{Pread, Pwrite, SizeWith};

    #[repr(C)]
    #[derive(Copy, Clone, PartialEq, Default, Debug, Pread, Pwrite, SizeWith)]
    pub struct ProgramHeader {
        /// Segment type
        pub p_type: u32,
        /// Segment file offset
        pub p_offset: u32,
        /// Segment virtual address
        pub p_vaddr: u32,
        /// Segment physical address
        pub p_paddr: u32,
        /// Segment size in file
        pub p_filesz: u32,
        /// Segment size in memory
        pub p_memsz: u32,
        /// Segment flags
        pub p_flags: u32,
        /// Segment alignment
        pub p_align: u32,
    }

    pub const SIZEOF_PHDR: usize = 32;

    elf_program_header_std_impl!(u32);
}

/// The 64-bit on-disk program header
pub mod program_header64 {
    use scroll::{Pread, Pwrite, SizeWith};

    #[repr(C)]
    #[derive(Copy, Clone, PartialEq, Default, Debug, Pread, Pwrite, SizeWith)]
    pub struct ProgramHeader {
        /// Segment type
        pub p_type: u32,
        /// Segment flags
        pub p_flags: u32,
        /// Segment file offset
        pub p_offset: u64,
        /// Segment virtual address
        pub p_vaddr: u64,
        /// Segment physical address
        pub p_paddr: u64,
        /// Segment size in file
        pub p_filesz: u64,
        /// Segment size in memory
        pub p_memsz: u64,
        /// Segment alignment
        pub p_align: u64,
    }

    pub const SIZEOF_PHDR: usize = 56;

    elf_program_header_std_impl!(u64);
}
