//! The ELF file header, and the handful of facts the TLS repairs need from it.

use crate::container::{Container, Ctx, Endian};
use crate::elf::program_header::{ProgramHeaders, program_header32, program_header64};
use crate::error;
use core::fmt;
use scroll::Pread;

/// The ELF magic number.
pub const ELFMAG: &[u8; 4] = b"\x7FELF";
/// Length of the ELF magic number.
pub const SELFMAG: usize = 4;

/// File class byte index.
pub const EI_CLASS: usize = 4;
/// Invalid class.
pub const ELFCLASSNONE: u8 = 0;
/// 32-bit objects.
pub const ELFCLASS32: u8 = 1;
/// 64-bit objects.
pub const ELFCLASS64: u8 = 2;

/// Data encoding byte index.
pub const EI_DATA: usize = 5;
/// Invalid data encoding.
pub const ELFDATANONE: u8 = 0;
/// 2's complement, little endian.
pub const ELFDATA2LSB: u8 = 1;
/// 2's complement, big endian.
pub const ELFDATA2MSB: u8 = 2;

/// Number of bytes in an identifier.
pub const SIZEOF_IDENT: usize = 16;

/// No file type.
pub const ET_NONE: u16 = 0;
/// Relocatable file.
pub const ET_REL: u16 = 1;
/// Executable file.
pub const ET_EXEC: u16 = 2;
/// Shared object file.
pub const ET_DYN: u16 = 3;
/// Core file.
pub const ET_CORE: u16 = 4;

/// Convert a ELF class byte to the associated string.
#[inline]
pub fn class_to_str(class: u8) -> &'static str {
    match class {
        ELFCLASSNONE => "NONE",
        ELFCLASS32 => "ELF32",
        ELFCLASS64 => "ELF64",
        _ => "UNKNOWN_CLASS",
    }
}

/// Convert an ET value to their associated string.
#[inline]
pub fn et_to_str(et: u16) -> &'static str {
    match et {
        ET_NONE => "NONE",
        ET_REL => "REL",
        ET_EXEC => "EXEC",
        ET_DYN => "DYN",
        ET_CORE => "CORE",
        _ => "UNKNOWN_ET",
    }
}

macro_rules! elf_header {
    ($size:ident) => {
        use scroll::{Pread, Pwrite, SizeWith};

        #[repr(C)]
        #[derive(Clone, Copy, Default, PartialEq, Debug, Pread, Pwrite, SizeWith)]
        pub struct Header {
            /// Magic number and other info
            pub e_ident: [u8; 16],
            /// Object file type
            pub e_type: u16,
            /// Architecture
            pub e_machine: u16,
            /// Object file version
            pub e_version: u32,
            /// Entry point virtual address
            pub e_entry: $size,
            /// Program header table file offset
            pub e_phoff: $size,
            /// Section header table file offset
            pub e_shoff: $size,
            /// Processor-specific flags
            pub e_flags: u32,
            /// ELF header size in bytes
            pub e_ehsize: u16,
            /// Program header table entry size
            pub e_phentsize: u16,
            /// Program header table entry count
            pub e_phnum: u16,
            /// Section header table entry size
            pub e_shentsize: u16,
            /// Section header table entry count
            pub e_shnum: u16,
            /// Section header string table index
            pub e_shstrndx: u16,
        }

        impl From<Header> for super::Header {
            fn from(header: Header) -> Self {
                super::Header {
                    e_ident: header.e_ident,
                    e_type: header.e_type,
                    e_machine: header.e_machine,
                    e_version: header.e_version,
                    e_entry: u64::from(header.e_entry),
                    e_phoff: u64::from(header.e_phoff),
                    e_shoff: u64::from(header.e_shoff),
                    e_flags: header.e_flags,
                    e_ehsize: header.e_ehsize,
                    e_phentsize: header.e_phentsize,
                    e_phnum: header.e_phnum,
                    e_shentsize: header.e_shentsize,
                    e_shnum: header.e_shnum,
                    e_shstrndx: header.e_shstrndx,
                }
            }
        }
    };
}

/// The 32-bit on-disk ELF header
pub mod header32 {
    elf_header!(u32);

    pub const SIZEOF_EHDR: usize = 52;
    pub const ELFCLASS: u8 = super::ELFCLASS32;
}

/// The 64-bit on-disk ELF header
pub mod header64 {
    elf_header!(u64);

    pub const SIZEOF_EHDR: usize = 64;
    pub const ELFCLASS: u8 = super::ELFCLASS64;
}

#[derive(Clone, Copy, Default, PartialEq)]
/// A width-independent ELF header; address-sized fields are widened to `u64`
pub struct Header {
    pub e_ident: [u8; SIZEOF_IDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Header")
            .field("e_ident", &format_args!("{:?}", self.e_ident))
            .field("e_type", &et_to_str(self.e_type))
            .field("e_machine", &format_args!("0x{:x}", self.e_machine))
            .field("e_entry", &format_args!("0x{:x}", self.e_entry))
            .field("e_phoff", &format_args!("0x{:x}", self.e_phoff))
            .field("e_shoff", &format_args!("0x{:x}", self.e_shoff))
            .field("e_phentsize", &self.e_phentsize)
            .field("e_phnum", &self.e_phnum)
            .finish()
    }
}

/// Size in bytes of the file header for `container`
pub fn size(container: Container) -> usize {
    match container {
        Container::Little => header32::SIZEOF_EHDR,
        Container::Big => header64::SIZEOF_EHDR,
    }
}

/// Check the magic, class and data bytes and return the parsing context they describe.
///
/// This looks at the first [`SIZEOF_IDENT`] bytes at most, which is enough for a driver to pick
/// a class-dependent default before running any repair.
pub fn peek(bytes: &[u8]) -> error::Result<Ctx> {
    if bytes.len() < SELFMAG || &bytes[..SELFMAG] != ELFMAG {
        let mut magic = [0u8; SELFMAG];
        let found = bytes.len().min(SELFMAG);
        magic[..found].copy_from_slice(&bytes[..found]);
        return Err(error::Error::NotElf(magic));
    }
    let class = *bytes.get(EI_CLASS).ok_or(error::Error::TruncatedFile {
        offset: EI_CLASS as u64,
        size: 1,
        len: bytes.len(),
    })?;
    let container = match class {
        ELFCLASS32 => Container::Little,
        ELFCLASS64 => Container::Big,
        class => return Err(error::Error::UnsupportedClass(class)),
    };
    let data = *bytes.get(EI_DATA).ok_or(error::Error::TruncatedFile {
        offset: EI_DATA as u64,
        size: 1,
        len: bytes.len(),
    })?;
    let le = match data {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        data => return Err(error::Error::UnsupportedByteOrder(data)),
    };
    Ok(Ctx::new(container, le))
}

impl Header {
    /// Decode the full file header, detecting class and byte order from `e_ident`
    pub fn parse(bytes: &[u8]) -> error::Result<(Header, Ctx)> {
        let ctx = peek(bytes)?;
        let truncated = |_: scroll::Error| error::Error::TruncatedFile {
            offset: 0,
            size: size(ctx.container) as u64,
            len: bytes.len(),
        };
        let header = match ctx.container {
            Container::Little => bytes
                .pread_with::<header32::Header>(0, ctx.le)
                .map_err(truncated)?
                .into(),
            Container::Big => bytes
                .pread_with::<header64::Header>(0, ctx.le)
                .map_err(truncated)?
                .into(),
        };
        Ok((header, ctx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The facts about an ELF image that locating and patching program headers depends on
pub struct Identity {
    /// Width and byte order
    pub ctx: Ctx,
    /// Program header table file offset
    pub phoff: u64,
    /// Declared size of one program header table entry
    pub phentsize: u16,
    /// Number of program header table entries
    pub phnum: u16,
}

impl Identity {
    /// Derive the identity of the image in `bytes`.
    ///
    /// Fails with `NotElf`, `UnsupportedClass`, `UnsupportedByteOrder`, or `TruncatedFile` when
    /// the image is too short to hold a file header of its class.
    pub fn parse(bytes: &[u8]) -> error::Result<Identity> {
        let (header, ctx) = Header::parse(bytes)?;
        let identity = Identity::from_header(&header, ctx);
        log::debug!("{:?} {}", header, identity);
        Ok(identity)
    }

    pub fn from_header(header: &Header, ctx: Ctx) -> Identity {
        Identity {
            ctx,
            phoff: header.e_phoff,
            phentsize: header.e_phentsize,
            phnum: header.e_phnum,
        }
    }

    #[inline]
    pub fn container(&self) -> Container {
        self.ctx.container
    }

    #[inline]
    pub fn endian(&self) -> Endian {
        self.ctx.le
    }

    /// Whether this is a 64-bit image
    #[inline]
    pub fn is_64(&self) -> bool {
        self.ctx.is_big()
    }

    /// The raw `EI_CLASS` byte this identity was derived from
    pub fn class(&self) -> u8 {
        match self.ctx.container {
            Container::Little => header32::ELFCLASS,
            Container::Big => header64::ELFCLASS,
        }
    }

    /// Size of the decoded program header layout for this class
    pub fn phdr_layout_size(&self) -> usize {
        match self.ctx.container {
            Container::Little => program_header32::SIZEOF_PHDR,
            Container::Big => program_header64::SIZEOF_PHDR,
        }
    }

    /// File range `(start, end)` occupied by the whole program header table
    pub fn table_range(&self) -> Option<(u64, u64)> {
        let len = u64::from(self.phentsize).checked_mul(u64::from(self.phnum))?;
        Some((self.phoff, self.phoff.checked_add(len)?))
    }

    /// A lazy, restartable iterator over the program headers in `bytes`
    pub fn program_headers<'a>(&self, bytes: &'a [u8]) -> ProgramHeaders<'a> {
        ProgramHeaders::new(bytes, *self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} phoff: 0x{:x} phentsize: {} phnum: {}",
            class_to_str(self.class()),
            if self.ctx.is_little_endian() { "LSB" } else { "MSB" },
            self.phoff,
            self.phentsize,
            self.phnum
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::synth;
    use scroll::Pwrite;

    #[test]
    fn peek_detects_class_and_order() {
        let mut ident = [0u8; SIZEOF_IDENT];
        ident[..SELFMAG].copy_from_slice(ELFMAG);
        ident[EI_CLASS] = ELFCLASS32;
        ident[EI_DATA] = ELFDATA2MSB;
        let ctx = peek(&ident).unwrap();
        assert_eq!(ctx.container, Container::Little);
        assert_eq!(ctx.le, Endian::Big);
    }

    #[test]
    fn bad_magic() {
        match Identity::parse(b"\x7fELG\x02\x01") {
            Err(error::Error::NotElf(magic)) => assert_eq!(&magic, b"\x7fELG"),
            other => panic!("expected NotElf, got {:?}", other),
        }
        assert!(matches!(Identity::parse(b"\x7f"), Err(error::Error::NotElf(_))));
        assert!(matches!(Identity::parse(&[]), Err(error::Error::NotElf(_))));
    }

    #[test]
    fn unsupported_class_and_order() {
        let mut bytes = synth::image(synth::ELF64_LE, &[], 0x100);
        bytes[EI_CLASS] = 3;
        assert!(matches!(
            Identity::parse(&bytes),
            Err(error::Error::UnsupportedClass(3))
        ));
        bytes[EI_CLASS] = ELFCLASS64;
        bytes[EI_DATA] = ELFDATANONE;
        assert!(matches!(
            Identity::parse(&bytes),
            Err(error::Error::UnsupportedByteOrder(0))
        ));
    }

    #[test]
    fn truncated_header() {
        let bytes = synth::image(synth::ELF64_LE, &[], 0x100);
        assert!(matches!(
            Identity::parse(&bytes[..40]),
            Err(error::Error::TruncatedFile { size: 64, len: 40, .. })
        ));
    }

    #[test]
    fn decodes_descriptor_fields_for_every_layout() {
        for ctx in synth::ALL {
            let phdrs = [synth::phdr(1, 0x1000, 0x1000, 0x1000), synth::tls(0x1000, 0x1000, 8)];
            let bytes = synth::image(ctx, &phdrs, 0x2000);
            let identity = Identity::parse(&bytes).unwrap();
            assert_eq!(identity.ctx, ctx);
            assert_eq!(identity.phoff, size(ctx.container) as u64);
            assert_eq!(usize::from(identity.phentsize), identity.phdr_layout_size());
            assert_eq!(identity.phnum, 2);
        }
    }

    #[test]
    fn header_fields_follow_byte_order() {
        let mut bytes = [0u8; header32::SIZEOF_EHDR];
        let header = header32::Header {
            e_ident: synth::ident(synth::ELF32_BE),
            e_phoff: 0x34,
            e_phentsize: 32,
            e_phnum: 0x0102,
            ..Default::default()
        };
        bytes.pwrite_with(header, 0, Endian::Big).unwrap();
        assert_eq!(&bytes[28..32], &[0, 0, 0, 0x34]);
        assert_eq!(&bytes[44..46], &[0x01, 0x02]);
        let identity = Identity::parse(&bytes).unwrap();
        assert_eq!(identity.phnum, 0x0102);
        assert_eq!(identity.phoff, 0x34);
    }
}
