//! Boot image reader.
//!
//! Reads a packed image back: finds the offset table, and hands out the byte
//! ranges it records. Used to verify freshly written images.

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;

use crate::layout::{Placement, SegmentKind};
use crate::packager::PackReport;
use crate::table::{OffsetTable, TABLE_HEADER};
use crate::utils::SECTOR_SIZE;

/// A parsed view over the bytes of a packed image.
pub struct BootImage<'a> {
    data: &'a [u8],
    table_location: u64,
    table: OffsetTable,
    /// Byte ranges of the table entries, bounds-checked against `data`.
    ranges: Vec<(String, Range<usize>)>,
}

/// Maps an image file read-only.
pub fn map(path: &Path) -> Result<Mmap> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    // The image is not modified while mapped.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("failed to map {}", path.display()))?;
    Ok(mmap)
}

/// Converts a recorded placement into a slice range inside an image of `len` bytes.
fn checked_range(key: &str, p: Placement, len: usize) -> Result<Range<usize>> {
    let range = p
        .byte_range()
        .with_context(|| format!("{key} placement {p:?} overflows a byte offset"))?;
    let start = usize::try_from(range.start).with_context(|| format!("{key} offset overflows"))?;
    let end = usize::try_from(range.end).with_context(|| format!("{key} length overflows"))?;
    if end > len {
        bail!("{key} ends at byte {end}, past the end of the image ({len} bytes)");
    }
    Ok(start..end)
}

impl<'a> BootImage<'a> {
    /// Parses an image whose table sector is at a known byte offset.
    pub fn parse_at(data: &'a [u8], table_location: u64) -> Result<Self> {
        if table_location % SECTOR_SIZE != 0 {
            bail!("table location {table_location} is not sector aligned");
        }
        let table_block = Placement {
            start_sector: table_location / SECTOR_SIZE,
            length_in_sectors: 1,
        };
        let block = checked_range("offset table", table_block, data.len())?;
        let table = OffsetTable::parse(&data[block.clone()])
            .with_context(|| format!("bad offset table at byte {table_location}"))?;

        let mut ranges = Vec::with_capacity(table.entries().len());
        for (key, p) in table.entries() {
            ranges.push((key.clone(), checked_range(key, *p, data.len())?));
        }

        if let Some(key) = SegmentKind::Ramdisk.table_key() {
            if let Some((_, ramdisk)) = ranges.iter().find(|(k, _)| k == key) {
                if ramdisk.start != block.end {
                    bail!("ramdisk starts at byte {}, expected {}", ramdisk.start, block.end);
                }
            }
        }

        Ok(Self {
            data,
            table_location,
            table,
            ranges,
        })
    }

    /// Parses an image by scanning sector boundaries for the table header.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = TABLE_HEADER.as_bytes();
        let mut last_err = None;
        for offset in (0..data.len()).step_by(SECTOR_SIZE as usize) {
            if data[offset..].starts_with(header) {
                match Self::parse_at(data, offset as u64) {
                    Ok(image) => return Ok(image),
                    Err(err) => last_err = Some(err),
                }
            }
        }
        match last_err {
            Some(err) => Err(err.context("no usable BOOT_IMAGE_OFFSETS table found")),
            None => bail!("no BOOT_IMAGE_OFFSETS table found"),
        }
    }

    pub fn table(&self) -> &OffsetTable {
        &self.table
    }

    pub fn table_location(&self) -> u64 {
        self.table_location
    }

    /// Kernel bytes, including the zero padding up to the table sector.
    pub fn kernel(&self) -> &'a [u8] {
        // parse_at checked the table sector lies inside `data`.
        &self.data[..self.table_location as usize]
    }

    /// Bytes of a recorded segment, including its zero padding.
    pub fn segment(&self, kind: SegmentKind) -> Option<&'a [u8]> {
        let Some(key) = kind.table_key() else {
            return Some(self.kernel());
        };
        self.ranges
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, range)| &self.data[range.clone()])
    }
}

/// Checks that `stored` is `expected` followed by nothing but zeros.
fn matches_padded(stored: &[u8], expected: &[u8]) -> bool {
    stored.len() >= expected.len()
        && &stored[..expected.len()] == expected
        && stored[expected.len()..].iter().all(|&b| b == 0)
}

/// Re-reads a freshly written image and compares every segment with its source.
pub fn verify(report: &PackReport) -> Result<()> {
    let mmap = map(&report.output)?;
    let image = BootImage::parse_at(&mmap, report.table_location)?;

    if image.table() != &report.table {
        bail!("offset table on disk differs from the one written");
    }

    for segment in &report.segments {
        let expected = std::fs::read(&segment.source)
            .with_context(|| format!("failed to read {}", segment.source.display()))?;
        let stored = image
            .segment(segment.kind)
            .with_context(|| format!("{} is missing from the offset table", segment.kind))?;
        if !matches_padded(stored, &expected) {
            bail!("{} in {} does not match {}", segment.kind, report.output.display(), segment.source.display());
        }
        tracing::debug!(segment = %segment.kind, bytes = expected.len(), "verified");
    }
    Ok(())
}
