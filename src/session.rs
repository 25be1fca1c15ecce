//! Loading a binary from disk, repairing it, and writing it back.
//!
//! A [`Session`] reads the whole file once, owns the resulting [`BinaryImage`] for its lifetime,
//! and writes it back at most once in [`Session::commit`]. Nothing touches the file before that,
//! so a failed repair leaves it exactly as it was.

use crate::elf::fixup::{self, AlignmentFix, SkewFix};
use crate::elf::image::BinaryImage;
use crate::elf::tls::TlsSegment;
use crate::error;
use crate::options::FixOptions;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Summary of what [`Session::apply`] found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// The TLS segment as it was before any repair
    pub tls: TlsSegment,
    /// The alignment enforced, if the alignment repair ran
    pub required_alignment: Option<u64>,
    pub alignment: Option<AlignmentFix>,
    pub skew: Option<SkewFix>,
}

impl Report {
    /// Whether any repair modified the image
    pub fn is_change(&self) -> bool {
        self.alignment.is_some_and(|fix| fix.is_change())
            || self.skew.is_some_and(|fix| fix.is_change())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tls)?;
        if let Some(fix) = self.alignment {
            write!(f, "\n{}", fix)?;
        }
        if let Some(fix) = self.skew {
            write!(f, "\n{}", fix)?;
        }
        Ok(())
    }
}

/// Outcome of [`Session::commit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Nothing changed, the file was not rewritten
    Unchanged,
    /// The image was written to this path
    Written(PathBuf),
}

/// One repair session over one file
#[derive(Debug)]
pub struct Session {
    path: PathBuf,
    output: Option<PathBuf>,
    image: BinaryImage,
    dirty: bool,
}

impl Session {
    /// Read `path` and decode its ELF identity
    pub fn open<P: AsRef<Path>>(path: P) -> error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        log::debug!("read {} bytes from {}", bytes.len(), path.display());
        let image = BinaryImage::new(bytes)?;
        Ok(Session {
            path,
            output: None,
            image,
            dirty: false,
        })
    }

    /// Write the result to `output` instead of back over the input file
    pub fn with_output<P: AsRef<Path>>(mut self, output: P) -> Self {
        self.output = Some(output.as_ref().to_path_buf());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &BinaryImage {
        &self.image
    }

    /// Whether a repair has modified the image since it was loaded
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Locate the TLS segment in the current image
    pub fn tls(&self) -> error::Result<TlsSegment> {
        self.image.tls()
    }

    /// Raise the TLS alignment to at least `required`
    pub fn fix_alignment(&mut self, required: u64) -> error::Result<AlignmentFix> {
        let tls = self.image.tls()?;
        let fix = fixup::normalize_alignment(&mut self.image, &tls, required)?;
        self.dirty |= fix.is_change();
        Ok(fix)
    }

    /// Remove the TLS offset skew, re-locating the segment first
    pub fn fix_skew(&mut self) -> error::Result<SkewFix> {
        let tls = self.image.tls()?;
        let fix = fixup::normalize_skew(&mut self.image, &tls)?;
        self.dirty |= fix.is_change();
        Ok(fix)
    }

    /// Run the repairs selected by `options`, alignment before skew.
    ///
    /// The repairs run against a scratch copy of the image, which replaces the session's image
    /// only when every selected repair succeeded. A failed `apply` leaves the session as it was.
    /// With `dry_run` the scratch copy is always discarded, so the report says what *would*
    /// change while the session itself stays clean.
    pub fn apply(&mut self, options: &FixOptions) -> error::Result<Report> {
        let mut scratch = BinaryImage::new(self.image.as_bytes().to_vec())?;
        let report = repair(&mut scratch, options)?;
        if report.is_change() && !options.dry_run {
            self.image = scratch;
            self.dirty = true;
        }
        Ok(report)
    }

    /// Persist the image if any repair changed it.
    ///
    /// The bytes go to a temporary sibling file first, which then replaces the destination, so a
    /// failed write never leaves a half-written binary behind. The original file's permissions
    /// are carried over. A symlinked destination is resolved first: the link stays and the file
    /// it points to is replaced.
    pub fn commit(self) -> error::Result<Commit> {
        let destination = self.output.unwrap_or(self.path.clone());
        if !self.dirty && destination == self.path {
            log::debug!("{} unchanged, not rewriting", self.path.display());
            return Ok(Commit::Unchanged);
        }
        let permissions = fs::metadata(&self.path)?.permissions();
        // write through symlinks so the file they point to is the one repaired
        let target = match fs::canonicalize(&destination) {
            Ok(target) => target,
            Err(err) if err.kind() == io::ErrorKind::NotFound => destination.clone(),
            Err(err) => return Err(err.into()),
        };
        let mut temp = target.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        if let Err(err) = fs::write(&temp, self.image.as_bytes())
            .and_then(|_| fs::set_permissions(&temp, permissions))
            .and_then(|_| fs::rename(&temp, &target))
        {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        log::debug!(
            "wrote {} bytes to {}",
            self.image.len(),
            target.display()
        );
        Ok(Commit::Written(destination))
    }
}

fn repair(image: &mut BinaryImage, options: &FixOptions) -> error::Result<Report> {
    let mut report = Report {
        tls: image.tls()?,
        required_alignment: None,
        alignment: None,
        skew: None,
    };
    if options.repairs.alignment() {
        let required = options.alignment_for(image.identity().container());
        report.required_alignment = Some(required);
        let tls = image.tls()?;
        report.alignment = Some(fixup::normalize_alignment(image, &tls, required)?);
    }
    if options.repairs.skew() {
        // the alignment repair may have changed the segment
        let tls = image.tls()?;
        report.skew = Some(fixup::normalize_skew(image, &tls)?);
    }
    Ok(report)
}
