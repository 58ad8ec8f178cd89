//! Big-endian fixed-width integer codec.
//!
//! Every integer in the PDB/MOBI family is big-endian. All reads and writes
//! go through these helpers so the byte order is spelled out at each call
//! site. Reads past the end of the buffer return `None`; writes past the end
//! return `false` and leave the buffer untouched.

pub fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u24_be(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(3)?)?;
    Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
}

pub fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn write_u24_be(data: &mut [u8], offset: usize, value: u32) -> bool {
    let bytes = value.to_be_bytes();
    put(data, offset, &bytes[1..])
}

pub fn write_u32_be(data: &mut [u8], offset: usize, value: u32) -> bool {
    put(data, offset, &value.to_be_bytes())
}

fn put(data: &mut [u8], offset: usize, bytes: &[u8]) -> bool {
    match offset
        .checked_add(bytes.len())
        .and_then(|end| data.get_mut(offset..end))
    {
        Some(target) => {
            target.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_big_endian() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        assert_eq!(read_u16_be(&data, 0), Some(0x1234));
        assert_eq!(read_u24_be(&data, 1), Some(0x34_5678));
        assert_eq!(read_u32_be(&data, 1), Some(0x3456_789A));
        assert_eq!(read_u32_be(&data, 2), None);
    }

    #[test]
    fn test_write_big_endian() {
        let mut data = [0u8; 8];
        assert!(write_u32_be(&mut data, 0, 0xDEAD_BEEF));
        assert!(write_u24_be(&mut data, 4, 0x00AB_CDEF));
        assert_eq!(data, [0xDE, 0xAD, 0xBE, 0xEF, 0xAB, 0xCD, 0xEF, 0x00]);

        assert!(!write_u32_be(&mut data, 5, 1));
        assert_eq!(data[7], 0);
    }

    #[test]
    fn test_offset_overflow_is_out_of_range() {
        let data = [0u8; 4];
        assert_eq!(read_u32_be(&data, usize::MAX - 1), None);
    }
}
