//! Boot Image Packager Library.
//!
//! This library provides the core components for the `secbootimg` packager.
//! It is organized into several modules:
//! - `config`: CLI configuration.
//! - `packager`: The packaging run, from opening inputs to the final sync.
//! - `writer`: Sector-aligned segment output and the reserved table block.
//! - `table`: The BOOT_IMAGE_OFFSETS text table.
//! - `layout`: Segment kinds and their sector placements.
//! - `image`: Reading a packed image back.

pub mod config;
pub mod image;
pub mod layout;
pub mod packager;
pub mod table;
pub mod utils;
pub mod writer;
