//! Layout management.
//!
//! This module defines the structures describing where each component of a boot
//! image ends up in the output file. Positions are kept in sector units, which is
//! what the bootloader reads from the offset table.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use crate::utils::SECTOR_SIZE;

/// The kind of component embedded in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Kernel,
    Ramdisk,
    Recovery,
}

impl SegmentKind {
    /// Key prefix used in the offset table, or `None` for segments the table
    /// does not record.
    ///
    /// The ramdisk is recorded as `boot` for compatibility with existing
    /// bootloaders.
    pub fn table_key(self) -> Option<&'static str> {
        match self {
            SegmentKind::Kernel => None,
            SegmentKind::Ramdisk => Some("boot"),
            SegmentKind::Recovery => Some("recovery"),
        }
    }

    /// Inverse of [`SegmentKind::table_key`].
    pub fn from_table_key(key: &str) -> Option<Self> {
        match key {
            "boot" => Some(SegmentKind::Ramdisk),
            "recovery" => Some(SegmentKind::Recovery),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentKind::Kernel => "kernel",
            SegmentKind::Ramdisk => "ramdisk",
            SegmentKind::Recovery => "recovery",
        })
    }
}

/// Where a segment was written, in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// First sector of the segment.
    pub start_sector: u64,
    /// Number of sectors the segment occupies, padding included.
    pub length_in_sectors: u64,
}

impl Placement {
    /// Byte offset of the segment's first byte, or `None` if it does not fit in a `u64`.
    pub fn byte_offset(&self) -> Option<u64> {
        self.start_sector.checked_mul(SECTOR_SIZE)
    }

    /// Byte length of the segment including its trailing padding.
    pub fn byte_len(&self) -> Option<u64> {
        self.length_in_sectors.checked_mul(SECTOR_SIZE)
    }

    /// Byte range covered by the segment. Placements parsed from an image
    /// can hold arbitrary values, so every step is checked.
    pub fn byte_range(&self) -> Option<Range<u64>> {
        let start = self.byte_offset()?;
        let end = start.checked_add(self.byte_len()?)?;
        Some(start..end)
    }
}

/// A component to embed in the output image.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Which component this is.
    pub kind: SegmentKind,
    /// File the bytes are read from.
    pub source: PathBuf,
    /// Filled in once the segment has been written.
    pub placement: Option<Placement>,
}

impl Segment {
    /// Creates a segment that has not been written yet.
    pub fn new(kind: SegmentKind, source: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: source.into(),
            placement: None,
        }
    }
}
