//! PS/2 frame encoding.
//!
//! Both directions use the same 11-bit frame: a start bit (0), eight data
//! bits LSB-first, an odd parity bit and a stop bit (1).

/// Number of bits in a complete frame, start and stop included.
pub const FRAME_BITS: usize = 11;

/// Returns the parity bit that makes the count of ones in `byte` plus the
/// parity bit odd.
pub fn odd_parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// The complete 11-bit frame for `byte`, in wire order.
pub fn encode(byte: u8) -> [bool; FRAME_BITS] {
    let mut bits = [false; FRAME_BITS];
    for (i, bit) in bits[1..9].iter_mut().enumerate() {
        *bit = byte & (1 << i) != 0;
    }
    bits[9] = odd_parity(byte);
    bits[10] = true;
    bits
}

/// The ten bits the host drives after the start bit when sending to the
/// keyboard: data, parity and stop.
pub fn host_bits(byte: u8) -> [bool; FRAME_BITS - 1] {
    let mut bits = [false; FRAME_BITS - 1];
    bits.copy_from_slice(&encode(byte)[1..]);
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity() {
        assert!(odd_parity(0x00));
        assert!(!odd_parity(0x01));
        assert!(odd_parity(0x03));
        assert!(!odd_parity(0xFE));
        assert!(odd_parity(0xFF));
    }

    #[test]
    fn test_encode_ack() {
        // 0xFA = 1111_1010, six ones so parity is 1
        let bits = encode(0xFA);
        assert_eq!(
            bits,
            [
                false, false, true, false, true, true, true, true, true, true, true
            ]
        );
    }

    #[test]
    fn test_host_bits_skip_start() {
        let bits = host_bits(0xED);
        assert_eq!(bits[..8], encode(0xED)[1..9]);
        assert_eq!(bits[8], odd_parity(0xED));
        assert!(bits[9]);
    }
}
