//! The two TLS repairs.
//!
//! [`normalize_alignment`] raises `p_align` of the TLS segment to a required minimum.
//! [`normalize_skew`] makes `p_offset` a multiple of `p_align` by inserting zero padding before
//! the segment and re-basing the file offset of every segment that lives after it.
//!
//! The two are independent, but the skew computation depends on the alignment, so when both are
//! wanted run the alignment repair first and re-locate the TLS segment before the skew repair
//! (see [`crate::session::Session::apply`]).
//!
//! Both repairs compute and validate everything before the first byte changes: on error the image
//! is exactly as it was.

use crate::elf::image::BinaryImage;
use crate::elf::program_header::Field;
use crate::elf::tls::TlsSegment;
use crate::error;
use alloc::vec::Vec;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the alignment repair did
pub enum AlignmentFix {
    /// `p_align` was already at least the required minimum
    AlreadySufficient { align: u64 },
    /// `p_align` was raised
    Raised { from: u64, to: u64 },
}

impl AlignmentFix {
    /// Whether the image was modified
    pub fn is_change(&self) -> bool {
        matches!(self, AlignmentFix::Raised { .. })
    }
}

impl fmt::Display for AlignmentFix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AlignmentFix::AlreadySufficient { align } => {
                write!(f, "TLS alignment is already {}", align)
            }
            AlignmentFix::Raised { from, to } => write!(f, "TLS alignment {} -> {}", from, to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the skew repair did
pub enum SkewFix {
    /// `p_offset` and `p_vaddr` were already multiples of `p_align`
    AlreadyAligned,
    /// Padding was inserted before the segment
    Padded {
        /// Number of zero bytes inserted
        padding: u64,
        /// TLS `p_offset` before the repair
        old_offset: u64,
        /// TLS `p_offset` after the repair
        new_offset: u64,
        /// How many other program headers had their `p_offset` moved
        rebased: usize,
    },
}

impl SkewFix {
    /// Whether the image was modified
    pub fn is_change(&self) -> bool {
        matches!(self, SkewFix::Padded { .. })
    }
}

impl fmt::Display for SkewFix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SkewFix::AlreadyAligned => write!(f, "TLS segment is already properly aligned"),
            SkewFix::Padded {
                padding,
                old_offset,
                new_offset,
                rebased,
            } => write!(
                f,
                "inserted {} bytes of padding, TLS offset 0x{:x} -> 0x{:x}, {} other segments re-based",
                padding, old_offset, new_offset, rebased
            ),
        }
    }
}

/// Raise the alignment of `tls` to at least `required`.
///
/// Writes only the `p_align` bytes of entry `tls.index`. A `required` of zero is rejected with
/// [`error::Error::InvalidAlignment`].
pub fn normalize_alignment(
    image: &mut BinaryImage,
    tls: &TlsSegment,
    required: u64,
) -> error::Result<AlignmentFix> {
    if required == 0 {
        return Err(error::Error::InvalidAlignment);
    }
    let current = tls.header.p_align;
    if current >= required {
        log::debug!("TLS alignment {} already satisfies {}", current, required);
        return Ok(AlignmentFix::AlreadySufficient { align: current });
    }
    image.write_field(tls.index, Field::Align, required)?;
    log::debug!("raised TLS alignment {} -> {}", current, required);
    Ok(AlignmentFix::Raised {
        from: current,
        to: required,
    })
}

/// Make the file offset of `tls` congruent to zero modulo its alignment.
///
/// Fails with [`error::Error::InvalidAlignment`] for a zero `p_align`, and with
/// [`error::Error::InconsistentSkew`] when `p_offset` and `p_vaddr` leave different remainders,
/// since no amount of file padding can fix a disagreement with the memory layout.
///
/// Otherwise `(align - skew) % align` zero bytes are inserted at the old `p_offset`, the TLS
/// entry's offset is advanced by that much, and so is the offset of every *other* entry whose
/// offset is strictly greater than the old TLS offset. Virtual addresses never change.
///
/// Alignments need not be powers of two.
pub fn normalize_skew(image: &mut BinaryImage, tls: &TlsSegment) -> error::Result<SkewFix> {
    let align = tls.header.p_align;
    let (file_skew, vaddr_skew) = match (tls.file_skew(), tls.vaddr_skew()) {
        (Some(file_skew), Some(vaddr_skew)) => (file_skew, vaddr_skew),
        _ => return Err(error::Error::InvalidAlignment),
    };
    log::debug!(
        "{}: file offset skew {}, vaddr skew {}",
        tls,
        file_skew,
        vaddr_skew
    );
    if file_skew == 0 && vaddr_skew == 0 {
        return Ok(SkewFix::AlreadyAligned);
    }
    if file_skew != vaddr_skew {
        return Err(error::Error::InconsistentSkew {
            file_skew,
            vaddr_skew,
            align,
        });
    }
    let padding = (align - file_skew) % align;
    if padding == 0 {
        return Ok(SkewFix::AlreadyAligned);
    }

    let old_offset = tls.header.p_offset;
    let plan = plan_rebase(image, tls, padding)?;
    let (insert_at, count) = match (usize::try_from(old_offset), usize::try_from(padding)) {
        (Ok(at), Ok(count)) if at <= image.len() => (at, count),
        _ => {
            return Err(error::Error::TruncatedFile {
                offset: old_offset,
                size: padding,
                len: image.len(),
            });
        }
    };
    check_table_before(image, old_offset)?;

    // from here on nothing can fail: every position and value has been validated
    for &(index, offset) in &plan {
        image.write_field(index, Field::Offset, offset)?;
    }
    image.insert_zeros(insert_at, count)?;
    let new_offset = old_offset + padding;
    log::debug!(
        "inserted {} bytes at 0x{:x}, TLS offset now 0x{:x}",
        padding,
        old_offset,
        new_offset
    );
    Ok(SkewFix::Padded {
        padding,
        old_offset,
        new_offset,
        rebased: plan.len() - 1,
    })
}

/// Every `(index, new p_offset)` the skew repair writes, the TLS entry first.
fn plan_rebase(
    image: &BinaryImage,
    tls: &TlsSegment,
    padding: u64,
) -> error::Result<Vec<(usize, u64)>> {
    let old_offset = tls.header.p_offset;
    let shifted = |offset: u64| -> error::Result<u64> {
        let new = offset.checked_add(padding).ok_or_else(|| {
            error::Error::Malformed(alloc::format!(
                "offset 0x{:x} overflows when shifted by {}",
                offset, padding
            ))
        })?;
        image.check_word(Field::Offset, new)?;
        Ok(new)
    };

    let mut plan = Vec::with_capacity(usize::from(image.identity().phnum));
    image.field_position(tls.index, Field::Offset)?;
    plan.push((tls.index, shifted(old_offset)?));
    for (index, header) in image.program_headers().enumerate() {
        let header = header?;
        if index != tls.index && header.p_offset > old_offset {
            log::debug!("re-basing {:?} [{}]", header, index);
            plan.push((index, shifted(header.p_offset)?));
        }
    }
    Ok(plan)
}

/// The padding must not move the program header table itself, or `e_phoff` would go stale.
fn check_table_before(image: &BinaryImage, insert_at: u64) -> error::Result<()> {
    let identity = image.identity();
    match identity.table_range() {
        Some((_, end)) if identity.phnum == 0 || end <= insert_at => Ok(()),
        _ => Err(error::Error::Malformed(alloc::format!(
            "program header table at 0x{:x} extends past the TLS segment at 0x{:x}",
            identity.phoff,
            insert_at
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::program_header::{ProgramHeader, PT_DYNAMIC, PT_LOAD};
    use crate::elf::synth;

    fn image_of(ctx: crate::container::Ctx, phdrs: &[ProgramHeader], len: usize) -> BinaryImage {
        BinaryImage::new(synth::image(ctx, phdrs, len)).unwrap()
    }

    #[test]
    fn raises_alignment_in_every_layout() {
        for ctx in synth::ALL {
            let phdrs = [synth::phdr(PT_LOAD, 0, 0, 0x2000), synth::tls(0x1000, 0x1000, 8)];
            let original = synth::image(ctx, &phdrs, 0x2000);
            let mut image = BinaryImage::new(original.clone()).unwrap();
            let tls = image.tls().unwrap();
            let fix = normalize_alignment(&mut image, &tls, 64).unwrap();
            assert_eq!(fix, AlignmentFix::Raised { from: 8, to: 64 });
            assert!(fix.is_change());
            assert_eq!(image.tls().unwrap().header.p_align, 64);

            let at = image.field_position(tls.index, Field::Align).unwrap();
            let width = ctx.size();
            assert_eq!(image.len(), original.len());
            for (i, (a, b)) in original.iter().zip(image.as_bytes()).enumerate() {
                if i < at || i >= at + width {
                    assert_eq!(a, b, "byte {} changed for {:?}", i, ctx);
                }
            }
        }
    }

    #[test]
    fn alignment_is_idempotent() {
        for ctx in synth::ALL {
            let mut image = image_of(ctx, &[synth::tls(0x1000, 0x1000, 4)], 0x2000);
            let tls = image.tls().unwrap();
            normalize_alignment(&mut image, &tls, 32).unwrap();
            let once = image.as_bytes().to_vec();
            let tls = image.tls().unwrap();
            let fix = normalize_alignment(&mut image, &tls, 32).unwrap();
            assert_eq!(fix, AlignmentFix::AlreadySufficient { align: 32 });
            assert!(!fix.is_change());
            assert_eq!(image.as_bytes(), &once[..]);
        }
    }

    #[test]
    fn larger_alignment_is_kept() {
        let mut image = image_of(synth::ELF64_LE, &[synth::tls(0x1000, 0x1000, 128)], 0x2000);
        let before = image.as_bytes().to_vec();
        let tls = image.tls().unwrap();
        assert_eq!(
            normalize_alignment(&mut image, &tls, 64).unwrap(),
            AlignmentFix::AlreadySufficient { align: 128 }
        );
        assert_eq!(image.as_bytes(), &before[..]);
    }

    #[test]
    fn zero_required_alignment() {
        let mut image = image_of(synth::ELF32_LE, &[synth::tls(0x100, 0x100, 4)], 0x200);
        let tls = image.tls().unwrap();
        assert!(matches!(
            normalize_alignment(&mut image, &tls, 0),
            Err(error::Error::InvalidAlignment)
        ));
    }

    #[test]
    fn aligned_offset_after_alignment_bump_is_a_noop() {
        let mut image = image_of(
            synth::ELF64_LE,
            &[synth::phdr(PT_LOAD, 0, 0, 0x2000), synth::tls(0x1000, 0x1000, 8)],
            0x2000,
        );
        let tls = image.tls().unwrap();
        normalize_alignment(&mut image, &tls, 64).unwrap();
        let before = image.as_bytes().to_vec();
        let tls = image.tls().unwrap();
        assert_eq!(normalize_skew(&mut image, &tls).unwrap(), SkewFix::AlreadyAligned);
        assert_eq!(image.as_bytes(), &before[..]);
    }

    #[test]
    fn pads_and_rebases() {
        for ctx in synth::ALL {
            let phdrs = [
                synth::phdr(PT_LOAD, 0, 0, 0x1000),
                synth::phdr(PT_LOAD, 0x1000, 0x11000, 0x1000),
                synth::tls(0x1004, 0x11004, 64),
                synth::phdr(PT_DYNAMIC, 0x1800, 0x11800, 0x100),
                synth::phdr(PT_LOAD, 0x1004, 0x11004, 0x10),
            ];
            let original = synth::image(ctx, &phdrs, 0x2000);
            let mut image = BinaryImage::new(original.clone()).unwrap();
            let tls = image.tls().unwrap();
            let fix = normalize_skew(&mut image, &tls).unwrap();
            assert_eq!(
                fix,
                SkewFix::Padded {
                    padding: 60,
                    old_offset: 0x1004,
                    new_offset: 0x1040,
                    rebased: 1
                }
            );
            assert_eq!(image.len(), original.len() + 60);

            let after: Vec<_> = image.program_headers().map(|ph| ph.unwrap()).collect();
            assert_eq!(after[2].p_offset, 0x1040);
            assert_eq!(after[2].p_offset % after[2].p_align, 0);
            assert_eq!(after[3].p_offset, 0x1800 + 60);
            // at or before the insertion point: untouched
            assert_eq!(after[0].p_offset, 0);
            assert_eq!(after[1].p_offset, 0x1000);
            assert_eq!(after[4].p_offset, 0x1004);
            for (before, after) in phdrs.iter().zip(&after) {
                assert_eq!(before.p_vaddr, after.p_vaddr);
            }

            let bytes = image.as_bytes();
            assert!(bytes[0x1004..0x1040].iter().all(|b| *b == 0));
            assert_eq!(&bytes[0x1040..], &original[0x1004..]);
        }
    }

    #[test]
    fn later_tls_entry_is_rebased_too() {
        for ctx in synth::ALL {
            let phdrs = [
                synth::phdr(PT_LOAD, 0, 0, 0x1000),
                synth::tls(0x1004, 0x11004, 64),
                synth::tls(0x1800, 0x11800, 64),
            ];
            let mut image = image_of(ctx, &phdrs, 0x2000);
            let tls = image.tls().unwrap();
            assert_eq!(tls.index, 1);
            let fix = normalize_skew(&mut image, &tls).unwrap();
            assert!(matches!(fix, SkewFix::Padded { padding: 60, rebased: 1, .. }));
            let after: Vec<_> = image.program_headers().map(|ph| ph.unwrap()).collect();
            assert_eq!(after[1].p_offset, 0x1040);
            assert_eq!(after[2].p_offset, 0x1800 + 60);
            assert_eq!(after[2].p_vaddr, 0x11800);
        }
    }

    #[test]
    fn inconsistent_skew_leaves_image_alone() {
        for ctx in synth::ALL {
            let mut image = image_of(ctx, &[synth::tls(0x1004, 0x11008, 64)], 0x2000);
            let before = image.as_bytes().to_vec();
            let tls = image.tls().unwrap();
            assert!(matches!(
                normalize_skew(&mut image, &tls),
                Err(error::Error::InconsistentSkew {
                    file_skew: 4,
                    vaddr_skew: 8,
                    align: 64
                })
            ));
            assert_eq!(image.as_bytes(), &before[..]);
        }
    }

    #[test]
    fn zero_alignment_is_rejected() {
        let mut image = image_of(synth::ELF32_BE, &[synth::tls(0x1004, 0x1004, 0)], 0x2000);
        let tls = image.tls().unwrap();
        assert!(matches!(
            normalize_skew(&mut image, &tls),
            Err(error::Error::InvalidAlignment)
        ));
    }

    #[test]
    fn non_power_of_two_alignment() {
        let mut image = image_of(synth::ELF64_BE, &[synth::tls(0x1001, 0x2801, 24)], 0x2000);
        let tls = image.tls().unwrap();
        // 0x1001 = 170 * 24 + 17, 0x2801 = 426 * 24 + 17
        let fix = normalize_skew(&mut image, &tls).unwrap();
        assert!(matches!(fix, SkewFix::Padded { padding: 7, .. }));
        assert_eq!(image.tls().unwrap().header.p_offset % 24, 0);
    }

    #[test]
    fn offset_past_end_of_file() {
        let mut image = image_of(synth::ELF64_LE, &[synth::tls(0x3004, 0x3004, 64)], 0x2000);
        let before = image.as_bytes().to_vec();
        let tls = image.tls().unwrap();
        assert!(matches!(
            normalize_skew(&mut image, &tls),
            Err(error::Error::TruncatedFile { .. })
        ));
        assert_eq!(image.as_bytes(), &before[..]);
    }

    #[test]
    fn table_behind_the_segment() {
        // the TLS data claims to start inside the program header table
        let mut image = image_of(synth::ELF64_LE, &[synth::tls(0x44, 0x44, 64)], 0x2000);
        let before = image.as_bytes().to_vec();
        let tls = image.tls().unwrap();
        assert!(matches!(
            normalize_skew(&mut image, &tls),
            Err(error::Error::Malformed(_))
        ));
        assert_eq!(image.as_bytes(), &before[..]);
    }

    #[test]
    fn shifted_offset_must_fit_32_bits() {
        let phdrs = [
            synth::tls(0x1004, 0x1004, 64),
            synth::phdr(PT_LOAD, 0xffff_fff0, 0x2000, 0),
        ];
        let mut image = image_of(synth::ELF32_LE, &phdrs, 0x2000);
        let before = image.as_bytes().to_vec();
        let tls = image.tls().unwrap();
        assert!(matches!(
            normalize_skew(&mut image, &tls),
            Err(error::Error::Malformed(_))
        ));
        assert_eq!(image.as_bytes(), &before[..]);
    }
}
