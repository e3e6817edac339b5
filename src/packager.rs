//! Core packaging logic.
//!
//! `Packager` drives one image build from start to finish:
//! 1. Open every input up front, so a missing file never leaves an output behind.
//! 2. Kernel: copied to offset 0.
//! 3. Reserve: one sector for the offset table.
//! 4. Ramdisk and optional recovery: appended on sector boundaries.
//! 5. Patch: the offset table is written into the reserved sector.
//! 6. Sync: the output is flushed and fsynced.
//!
//! Any failure after the output was created removes it again.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::layout::{Placement, Segment, SegmentKind};
use crate::table::OffsetTable;
use crate::utils::sectors_for;
use crate::writer::ImageWriter;

/// Everything a single packaging run needs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOptions {
    pub kernel: PathBuf,
    pub ramdisk: PathBuf,
    pub recovery: Option<PathBuf>,
    pub output: PathBuf,
    /// Kernel command line. Accepted but not embedded in the image.
    pub cmdline: Option<String>,
    /// Load base address. Accepted but not embedded in the image.
    pub base: Option<u64>,
    /// Target page size. Accepted but not embedded in the image.
    pub pagesize: Option<u32>,
}

impl PackOptions {
    pub fn new(kernel: impl Into<PathBuf>, ramdisk: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            kernel: kernel.into(),
            ramdisk: ramdisk.into(),
            recovery: None,
            output: output.into(),
            cmdline: None,
            base: None,
            pagesize: None,
        }
    }

    pub fn with_recovery(mut self, recovery: impl Into<PathBuf>) -> Self {
        self.recovery = Some(recovery.into());
        self
    }

    /// Segments in the order they are laid out in the image.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments = vec![
            Segment::new(SegmentKind::Kernel, &self.kernel),
            Segment::new(SegmentKind::Ramdisk, &self.ramdisk),
        ];
        if let Some(recovery) = &self.recovery {
            segments.push(Segment::new(SegmentKind::Recovery, recovery));
        }
        segments
    }
}

/// Progress of a packaging run, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    WritingKernel,
    ReservingTable,
    WritingRamdisk,
    WritingRecovery,
    PatchingTable,
    Syncing,
    Done,
    Failed,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PackReport {
    pub output: PathBuf,
    /// Byte offset of the sector holding the offset table.
    pub table_location: u64,
    /// Every segment, with its placement filled in. The kernel's placement
    /// covers everything before the table sector.
    pub segments: Vec<Segment>,
    pub table: OffsetTable,
}

pub struct Packager {
    options: PackOptions,
    state: State,
}

impl Packager {
    pub fn new(options: PackOptions) -> Self {
        Self {
            options,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn enter(&mut self, state: State) {
        tracing::debug!(from = ?self.state, to = ?state, "packager state");
        self.state = state;
    }

    /// Builds the image described by the options.
    pub fn run(&mut self) -> Result<PackReport> {
        tracing::debug!(
            cmdline = ?self.options.cmdline,
            base = ?self.options.base.map(|b| format!("{b:#x}")),
            pagesize = ?self.options.pagesize,
            "reserved options (not embedded)"
        );

        let mut segments = self.options.segments();
        let mut inputs = Vec::with_capacity(segments.len());
        for segment in &segments {
            let file = File::open(&segment.source).with_context(|| {
                format!("failed to open {} {}", segment.kind, segment.source.display())
            });
            match file {
                Ok(file) => inputs.push(file),
                Err(err) => {
                    self.enter(State::Failed);
                    return Err(err);
                }
            }
        }

        let output = self.options.output.clone();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&output)
            .with_context(|| format!("failed to create {}", output.display()));
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                self.enter(State::Failed);
                return Err(err);
            }
        };

        match self.write_image(file, &mut segments, &mut inputs) {
            Ok((table_location, table)) => {
                self.enter(State::Done);
                Ok(PackReport {
                    output,
                    table_location,
                    segments,
                    table,
                })
            }
            Err(err) => {
                self.enter(State::Failed);
                remove_partial(&output);
                Err(err)
            }
        }
    }

    fn write_image(
        &mut self,
        file: File,
        segments: &mut [Segment],
        inputs: &mut [File],
    ) -> Result<(u64, OffsetTable)> {
        let mut writer = ImageWriter::new(BufWriter::new(file));

        self.enter(State::WritingKernel);
        writer.write_kernel(&mut inputs[0])?;

        self.enter(State::ReservingTable);
        let reserved = writer.reserve_table()?;
        let table_location = reserved.offset();
        segments[0].placement = Some(Placement {
            start_sector: 0,
            length_in_sectors: sectors_for(table_location),
        });

        for (segment, input) in segments.iter_mut().zip(inputs.iter_mut()).skip(1) {
            self.enter(match segment.kind {
                SegmentKind::Recovery => State::WritingRecovery,
                _ => State::WritingRamdisk,
            });
            segment.placement = Some(writer.append_segment(segment.kind, input)?);
        }

        self.enter(State::PatchingTable);
        let (out, table) = writer.finish(reserved)?;

        self.enter(State::Syncing);
        let file = out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("failed to flush image")?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", self.options.output.display()))?;

        Ok((table_location, table))
    }
}

/// Convenience wrapper: run a packager over `options`.
pub fn pack(options: PackOptions) -> Result<PackReport> {
    Packager::new(options).run()
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::warn!("removed incomplete image {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("could not remove incomplete image {}: {err}", path.display()),
    }
}
