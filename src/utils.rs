//! Utility functions.

/// Size of one bootloader sector. Every segment boundary and every
/// offset-table value is expressed in these units.
pub const SECTOR_SIZE: u64 = 512;

/// Aligns an address or size up to the next multiple of `align`.
/// `align` must be a power of two.
pub fn align_up(addr: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

/// Rounds a byte position up to the next sector boundary.
pub fn align(pos: u64) -> u64 {
    align_up(pos, SECTOR_SIZE)
}

/// Number of whole sectors needed to hold `len` bytes.
pub fn sectors_for(len: u64) -> u64 {
    align(len) / SECTOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_lands_on_boundary_within_one_sector() {
        for x in (0..4096).chain([u32::MAX as u64, (1 << 40) + 3]) {
            let a = align(x);
            assert_eq!(a % SECTOR_SIZE, 0, "x = {x}");
            assert!(a >= x);
            assert!(a - x < SECTOR_SIZE);
        }
    }

    #[test]
    fn aligned_values_are_fixed_points() {
        assert_eq!(align(0), 0);
        assert_eq!(align(512), 512);
        assert_eq!(align(513), 1024);
        assert_eq!(align(1000), 1024);
    }

    #[test]
    fn sectors_for_rounds_up() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(512), 1);
        assert_eq!(sectors_for(513), 2);
    }

    #[test]
    #[should_panic]
    fn align_up_rejects_non_power_of_two() {
        align_up(10, 3);
    }
}
