//! Synthetic ELF images for unit tests

use crate::container::{Container, Ctx, Endian};
use crate::elf::header::{self, ELFMAG, EI_CLASS, EI_DATA, SIZEOF_IDENT, header32, header64};
use crate::elf::program_header::{PF_R, PT_TLS, ProgramHeader};
use alloc::vec::Vec;
use scroll::Pwrite;

pub const ELF32_LE: Ctx = Ctx {
    container: Container::Little,
    le: Endian::Little,
};
pub const ELF32_BE: Ctx = Ctx {
    container: Container::Little,
    le: Endian::Big,
};
pub const ELF64_LE: Ctx = Ctx {
    container: Container::Big,
    le: Endian::Little,
};
pub const ELF64_BE: Ctx = Ctx {
    container: Container::Big,
    le: Endian::Big,
};
pub const ALL: [Ctx; 4] = [ELF32_LE, ELF32_BE, ELF64_LE, ELF64_BE];

pub fn ident(ctx: Ctx) -> [u8; SIZEOF_IDENT] {
    let mut ident = [0u8; SIZEOF_IDENT];
    ident[..4].copy_from_slice(ELFMAG);
    ident[EI_CLASS] = match ctx.container {
        Container::Little => header::ELFCLASS32,
        Container::Big => header::ELFCLASS64,
    };
    ident[EI_DATA] = if ctx.is_little_endian() {
        header::ELFDATA2LSB
    } else {
        header::ELFDATA2MSB
    };
    ident[6] = 1;
    ident
}

pub fn phdr(p_type: u32, p_offset: u64, p_vaddr: u64, p_filesz: u64) -> ProgramHeader {
    ProgramHeader {
        p_type,
        p_flags: PF_R,
        p_offset,
        p_vaddr,
        p_paddr: p_vaddr,
        p_filesz,
        p_memsz: p_filesz,
        p_align: 0x1000,
    }
}

pub fn tls(p_offset: u64, p_vaddr: u64, p_align: u64) -> ProgramHeader {
    ProgramHeader {
        p_align,
        ..phdr(PT_TLS, p_offset, p_vaddr, 0x20)
    }
}

/// An image with the program header table right after the file header
pub fn image(ctx: Ctx, phdrs: &[ProgramHeader], len: usize) -> Vec<u8> {
    image_with_stride(ctx, phdrs, ProgramHeader::size(ctx), len)
}

/// Like [`image`], with an explicit `e_phentsize`
pub fn image_with_stride(ctx: Ctx, phdrs: &[ProgramHeader], stride: usize, len: usize) -> Vec<u8> {
    let phoff = header::size(ctx.container);
    let len = len.max(phoff + stride * phdrs.len());
    // a recognisable, non-zero pattern so shifted bytes are observable
    let mut bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8 | 1).collect();
    match ctx.container {
        Container::Little => {
            let header = header32::Header {
                e_ident: ident(ctx),
                e_type: header::ET_DYN,
                e_version: 1,
                e_phoff: phoff as u32,
                e_ehsize: header32::SIZEOF_EHDR as u16,
                e_phentsize: stride as u16,
                e_phnum: phdrs.len() as u16,
                ..Default::default()
            };
            bytes.pwrite_with(header, 0, ctx.le).unwrap();
        }
        Container::Big => {
            let header = header64::Header {
                e_ident: ident(ctx),
                e_type: header::ET_DYN,
                e_version: 1,
                e_phoff: phoff as u64,
                e_ehsize: header64::SIZEOF_EHDR as u16,
                e_phentsize: stride as u16,
                e_phnum: phdrs.len() as u16,
                ..Default::default()
            };
            bytes.pwrite_with(header, 0, ctx.le).unwrap();
        }
    }
    for (i, phdr) in phdrs.iter().enumerate() {
        bytes.pwrite_with(*phdr, phoff + i * stride, ctx).unwrap();
    }
    bytes
}
