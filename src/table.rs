//! Offset table.
//!
//! The offset table is a small ASCII block stored in the sector right after the
//! kernel. It tells the bootloader where the ramdisk (and recovery, if present)
//! live, in sector units:
//!
//! ```text
//! \n\nBOOT_IMAGE_OFFSETS\nboot_offset=3;boot_len=1;\n\n
//! ```

use anyhow::{anyhow, bail, Context, Result};

use crate::layout::{Placement, SegmentKind};

/// Header line that opens the table.
pub const TABLE_HEADER: &str = "\n\nBOOT_IMAGE_OFFSETS\n";
const TABLE_TRAILER: &str = "\n\n";

/// Ordered list of recorded segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetTable {
    entries: Vec<(String, Placement)>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a placement under `key`. Entries are rendered in insertion order.
    pub fn push(&mut self, key: impl Into<String>, placement: Placement) {
        self.entries.push((key.into(), placement));
    }

    /// Records a placement for a segment kind the table knows about.
    /// Kinds without a table key (the kernel) are ignored.
    pub fn record(&mut self, kind: SegmentKind, placement: Placement) {
        if let Some(key) = kind.table_key() {
            self.push(key, placement);
        }
    }

    pub fn entries(&self) -> &[(String, Placement)] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<Placement> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, p)| *p)
    }

    /// Placement recorded for a segment kind.
    pub fn placement(&self, kind: SegmentKind) -> Option<Placement> {
        kind.table_key().and_then(|key| self.get(key))
    }

    /// Renders the table text exactly as it is stored in the image.
    pub fn render(&self) -> String {
        let mut text = String::from(TABLE_HEADER);
        for (key, p) in &self.entries {
            text.push_str(&format!(
                "{key}_offset={};{key}_len={};",
                p.start_sector, p.length_in_sectors
            ));
        }
        text.push_str(TABLE_TRAILER);
        text
    }

    /// Parses a table block as read from an image. Trailing zero bytes of the
    /// reserved sector are ignored.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        let text = std::str::from_utf8(&block[..end]).context("offset table is not valid text")?;
        let body = text
            .strip_prefix(TABLE_HEADER)
            .ok_or_else(|| anyhow!("missing BOOT_IMAGE_OFFSETS header"))?;
        let body = body.trim_end_matches('\n');

        let mut pending: Vec<(String, Option<u64>, Option<u64>)> = Vec::new();
        for field in body.split(';').filter(|f| !f.is_empty()) {
            let (name, value) = field
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed table field {field:?}"))?;
            let value: u64 = value
                .parse()
                .with_context(|| format!("bad value in table field {field:?}"))?;
            let (key, is_offset) = if let Some(key) = name.strip_suffix("_offset") {
                (key, true)
            } else if let Some(key) = name.strip_suffix("_len") {
                (key, false)
            } else {
                bail!("unknown table field {name:?}");
            };

            let idx = match pending.iter().position(|(k, _, _)| k == key) {
                Some(idx) => idx,
                None => {
                    pending.push((key.to_string(), None, None));
                    pending.len() - 1
                }
            };
            let slot = if is_offset { &mut pending[idx].1 } else { &mut pending[idx].2 };
            if slot.replace(value).is_some() {
                bail!("duplicate table field {name:?}");
            }
        }

        let mut table = OffsetTable::new();
        for (key, offset, len) in pending {
            match (offset, len) {
                (Some(start_sector), Some(length_in_sectors)) => table.push(
                    key,
                    Placement { start_sector, length_in_sectors },
                ),
                _ => bail!("incomplete table entry for {key:?}"),
            }
        }
        Ok(table)
    }
}
