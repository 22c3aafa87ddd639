//! CRC-32 used for packet and memory checksums.
//!
//! Polynomial 0x04C11DB7, processed MSB first, no reflection and no final
//! xor. The seed is supplied by the caller; packets start from zero.

const POLY: u32 = 0x04C1_1DB7;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ POLY } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a checksum over `data` starting from `seed`.
pub fn update(seed: u32, data: &[u8]) -> u32 {
    data.iter().fold(seed, |crc, &byte| {
        TABLE[((crc >> 24) ^ u32::from(byte)) as usize & 0xFF] ^ (crc << 8)
    })
}

/// Checksum of `data` with a zero seed.
pub fn checksum(data: &[u8]) -> u32 {
    update(0, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_seed() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(update(0xDEAD_BEEF, &[]), 0xDEAD_BEEF);
    }

    #[test]
    fn test_incremental_matches_whole() {
        let data = b"nanoFramework debugger";
        let (head, tail) = data.split_at(7);
        assert_eq!(update(checksum(head), tail), checksum(data));
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(TABLE[0], 0);
        assert_eq!(TABLE[1], POLY);
        assert_eq!(TABLE[128], 0x690C_E0EE);
    }

    #[test]
    fn test_detects_single_bit_flips() {
        let data = [0x12u8, 0x34, 0x56, 0x78, 0x9A];
        let reference = checksum(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data;
                flipped[byte] ^= 1 << bit;
                assert_ne!(checksum(&flipped), reference, "flip at {byte}:{bit} undetected");
            }
        }
    }
}
