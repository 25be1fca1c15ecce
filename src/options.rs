//! Options controlling which TLS repairs run, and with what alignment

use crate::container::Container;

/// Default minimum TLS alignment for 64-bit images (bionic on arm64)
pub const DEFAULT_ALIGNMENT_64: u64 = 64;
/// Default minimum TLS alignment for 32-bit images (bionic on arm)
pub const DEFAULT_ALIGNMENT_32: u64 = 32;

/// The minimum TLS alignment used when none is given explicitly
#[inline]
pub fn default_alignment(container: Container) -> u64 {
    match container {
        Container::Little => DEFAULT_ALIGNMENT_32,
        Container::Big => DEFAULT_ALIGNMENT_64,
    }
}

/// Which repairs to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repairs {
    /// Alignment first, then skew
    #[default]
    All,
    /// Only raise the alignment
    AlignmentOnly,
    /// Only remove the offset skew
    SkewOnly,
}

impl Repairs {
    pub fn alignment(self) -> bool {
        matches!(self, Repairs::All | Repairs::AlignmentOnly)
    }

    pub fn skew(self) -> bool {
        matches!(self, Repairs::All | Repairs::SkewOnly)
    }
}

/// Options for a repair session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixOptions {
    /// Required minimum TLS alignment; `None` picks [`default_alignment`] for the image's class
    pub alignment: Option<u64>,
    /// The repairs to run
    pub repairs: Repairs,
    /// Compute and report, but never write the file back
    pub dry_run: bool,
}

impl FixOptions {
    /// Create new FixOptions with default settings
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the required minimum alignment
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Set the repairs to run
    pub fn with_repairs(mut self, repairs: Repairs) -> Self {
        self.repairs = repairs;
        self
    }

    /// Enable or disable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The alignment to enforce for an image of the given class
    pub fn alignment_for(&self, container: Container) -> u64 {
        self.alignment
            .unwrap_or_else(|| default_alignment(container))
    }
}
