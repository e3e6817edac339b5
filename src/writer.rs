//! Boot image writer.
//!
//! This module handles the byte-level layout of the output image: copying
//! segments in sector-sized chunks, aligning between them, and reserving the
//! sector that later receives the offset table.

use anyhow::{bail, Context, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::layout::{Placement, SegmentKind};
use crate::table::OffsetTable;
use crate::utils::{align, SECTOR_SIZE};

const CHUNK_SIZE: usize = SECTOR_SIZE as usize;

/// A sector reserved for the offset table.
///
/// It can only be consumed once, by [`ImageWriter::finish`], which overwrites
/// it with the final table text.
#[derive(Debug)]
#[must_use = "a reserved block must be patched with ImageWriter::finish"]
pub struct ReservedBlock {
    offset: u64,
}

impl ReservedBlock {
    /// Byte offset of the reserved sector.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Writes a boot image into any seekable sink.
pub struct ImageWriter<W> {
    out: W,
    table: OffsetTable,
}

/// Copies `src` into `dst` in sector-sized chunks until `src` is exhausted.
/// Returns the number of bytes copied.
pub fn copy_data<R: Read + ?Sized, W: Write + ?Sized>(dst: &mut W, src: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

impl<W: Write + Seek> ImageWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            table: OffsetTable::new(),
        }
    }

    /// Moves the write position forward to the next sector boundary and
    /// returns it. Nothing is written; the gap reads back as zeros.
    pub fn align_offset(&mut self) -> Result<u64> {
        let offset = self.out.stream_position()?;
        let aligned = align(offset);
        if aligned != offset {
            self.out.seek(SeekFrom::Start(aligned))?;
        }
        Ok(aligned)
    }

    /// Copies the kernel to the very start of the image. Returns its length in bytes.
    pub fn write_kernel<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<u64> {
        let offset = self.out.stream_position()?;
        if offset != 0 {
            bail!("kernel must be written at offset 0, writer is at {offset}");
        }
        let len = copy_data(&mut self.out, src).context("failed to copy kernel")?;
        tracing::info!(segment = %SegmentKind::Kernel, bytes = len, "wrote segment");
        Ok(len)
    }

    /// Reserves one zero-filled sector at the next boundary for the offset table.
    pub fn reserve_table(&mut self) -> Result<ReservedBlock> {
        let offset = self.align_offset()?;
        self.out
            .write_all(&[0u8; CHUNK_SIZE])
            .context("failed to reserve offset table block")?;
        tracing::debug!(offset, "reserved offset table block");
        Ok(ReservedBlock { offset })
    }

    /// Appends a segment at the next sector boundary, pads its end to a
    /// boundary, and records it in the offset table.
    pub fn append_segment<R: Read + ?Sized>(&mut self, kind: SegmentKind, src: &mut R) -> Result<Placement> {
        let offset = self.align_offset()?;
        let bytes = copy_data(&mut self.out, src).with_context(|| format!("failed to copy {kind}"))?;
        let length = self.align_offset()? - offset;

        // A failure here is a bug in the alignment logic, never bad input.
        assert!(offset % SECTOR_SIZE == 0, "{kind} starts at unaligned offset {offset}");
        assert!(length % SECTOR_SIZE == 0, "{kind} has unaligned length {length}");

        let placement = Placement {
            start_sector: offset / SECTOR_SIZE,
            length_in_sectors: length / SECTOR_SIZE,
        };
        tracing::info!(
            segment = %kind,
            bytes,
            start_sector = placement.start_sector,
            sectors = placement.length_in_sectors,
            "wrote segment"
        );
        self.table.record(kind, placement);
        Ok(placement)
    }

    /// The table as recorded so far.
    pub fn table(&self) -> &OffsetTable {
        &self.table
    }

    /// Zero-fills the image up to the final sector boundary, writes the offset
    /// table into `reserved`, and flushes.
    ///
    /// Fails without touching the reserved block if the table does not fit in
    /// one sector.
    pub fn finish(mut self, reserved: ReservedBlock) -> Result<(W, OffsetTable)> {
        let text = self.table.render();
        if text.len() as u64 > SECTOR_SIZE {
            bail!(
                "offset table is {} bytes but the reserved block holds only {SECTOR_SIZE}",
                text.len()
            );
        }

        let end = self.out.seek(SeekFrom::End(0))?;
        let padded = align(end);
        if padded > end {
            self.out
                .write_all(&vec![0u8; (padded - end) as usize])
                .context("failed to pad image to sector boundary")?;
        }

        self.out.seek(SeekFrom::Start(reserved.offset))?;
        self.out
            .write_all(text.as_bytes())
            .context("failed to write offset table")?;
        self.out.flush().context("failed to flush image")?;
        tracing::debug!(offset = reserved.offset, bytes = text.len(), "patched offset table");

        Ok((self.out, self.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pack(kernel: &[u8], ramdisk: &[u8], recovery: Option<&[u8]>) -> (Vec<u8>, u64, OffsetTable) {
        let mut writer = ImageWriter::new(Cursor::new(Vec::new()));
        writer.write_kernel(&mut &kernel[..]).unwrap();
        let reserved = writer.reserve_table().unwrap();
        let table_location = reserved.offset();
        writer.append_segment(SegmentKind::Ramdisk, &mut &ramdisk[..]).unwrap();
        if let Some(recovery) = recovery {
            writer.append_segment(SegmentKind::Recovery, &mut &recovery[..]).unwrap();
        }
        let (out, table) = writer.finish(reserved).unwrap();
        (out.into_inner(), table_location, table)
    }

    #[test]
    fn kernel_1000_ramdisk_10() {
        let kernel = vec![0xAAu8; 1000];
        let ramdisk = vec![0x55u8; 10];
        let (image, table_location, table) = pack(&kernel, &ramdisk, None);

        assert_eq!(table_location, 1024);
        assert_eq!(&image[..1000], &kernel[..]);
        assert!(image[1000..1024].iter().all(|&b| b == 0));

        let text = b"\n\nBOOT_IMAGE_OFFSETS\nboot_offset=3;boot_len=1;\n\n";
        assert_eq!(&image[1024..1024 + text.len()], text);
        assert!(image[1024 + text.len()..1536].iter().all(|&b| b == 0));

        assert_eq!(&image[1536..1546], &ramdisk[..]);
        assert_eq!(image.len(), 2048);
        assert_eq!(
            table.placement(SegmentKind::Ramdisk),
            Some(Placement { start_sector: 3, length_in_sectors: 1 })
        );
    }

    #[test]
    fn ramdisk_starts_one_sector_after_table() {
        for kernel_len in [0usize, 1, 511, 512, 513, 4096] {
            let (_, table_location, table) = pack(&vec![1u8; kernel_len], b"rd", None);
            let ramdisk = table.placement(SegmentKind::Ramdisk).unwrap();
            assert_eq!(ramdisk.byte_offset(), Some(table_location + SECTOR_SIZE));
        }
    }

    #[test]
    fn sector_length_is_ceiling_of_content() {
        for len in [1usize, 511, 512, 513, 1024, 5000] {
            let (_, _, table) = pack(b"k", &vec![7u8; len], None);
            let p = table.placement(SegmentKind::Ramdisk).unwrap();
            assert_eq!(p.length_in_sectors, (len as u64 + 511) / 512, "len = {len}");
        }
    }

    #[test]
    fn empty_ramdisk_records_zero_length() {
        let (image, table_location, table) = pack(&[9; 700], &[], None);
        let p = table.placement(SegmentKind::Ramdisk).unwrap();
        assert_eq!(p.start_sector, 3);
        assert_eq!(p.length_in_sectors, 0);
        assert_eq!(image.len() as u64, table_location + SECTOR_SIZE);
    }

    #[test]
    fn recovery_follows_ramdisk() {
        let (image, _, table) = pack(&[1; 10], &[2; 600], Some(&[3u8; 20][..]));
        let ramdisk = table.placement(SegmentKind::Ramdisk).unwrap();
        let recovery = table.placement(SegmentKind::Recovery).unwrap();
        assert_eq!(ramdisk, Placement { start_sector: 2, length_in_sectors: 2 });
        assert_eq!(recovery, Placement { start_sector: 4, length_in_sectors: 1 });

        let start = recovery.byte_offset().unwrap() as usize;
        assert_eq!(&image[start..start + 20], &[3; 20]);
        assert_eq!(image.len(), 5 * 512);
        let text = "recovery_offset=4;recovery_len=1;";
        assert!(String::from_utf8_lossy(&image[512..1024]).contains(text));
    }

    #[test]
    fn oversized_table_is_rejected_before_patching() {
        let mut writer = ImageWriter::new(Cursor::new(Vec::new()));
        writer.write_kernel(&mut &b"kernel"[..]).unwrap();
        let reserved = writer.reserve_table().unwrap();
        writer.append_segment(SegmentKind::Ramdisk, &mut &[0xEE; 8][..]).unwrap();
        for i in 0..40 {
            writer.table.push(
                format!("extra{i}"),
                Placement { start_sector: 1_000_000 + i, length_in_sectors: 1 },
            );
        }

        let err = writer.finish(reserved).unwrap_err();
        assert!(err.to_string().contains("reserved block"));
    }

    #[test]
    fn kernel_must_be_first() {
        let mut writer = ImageWriter::new(Cursor::new(Vec::new()));
        writer.write_kernel(&mut &b"abc"[..]).unwrap();
        assert!(writer.write_kernel(&mut &b"abc"[..]).is_err());
    }

    #[test]
    fn copy_data_handles_short_reads() {
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.0.len().min(buf.len()).min(3);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let mut out = Vec::new();
        let n = copy_data(&mut out, &mut Trickle(&data)).unwrap();
        assert_eq!(n, 2000);
        assert_eq!(out, data);
    }
}
