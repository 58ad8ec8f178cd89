/// PalmDOC LZ77 decompression
///
/// - Bytes 0x01-0x08: copy the next `n` bytes literally
/// - Bytes 0x00, 0x09-0x7F: literal byte
/// - Bytes 0x80-0xBF: back-reference, combined with the next byte:
///   distance = (pair & 0x3FFF) >> 3, length = (pair & 7) + 3
/// - Bytes 0xC0-0xFF: space followed by (byte ^ 0x80)
pub fn decompress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 4);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        match c {
            0x01..=0x08 => {
                let end = (i + c as usize).min(input.len());
                output.extend_from_slice(&input[i..end]);
                i = end;
            }
            0x00 | 0x09..=0x7F => output.push(c),
            0xC0..=0xFF => {
                output.push(b' ');
                output.push(c ^ 0x80);
            }
            0x80..=0xBF => {
                let Some(&next) = input.get(i) else {
                    break;
                };
                i += 1;

                let pair = u16::from_be_bytes([c, next]);
                let distance = ((pair & 0x3FFF) >> 3) as usize;
                let length = (pair & 7) as usize + 3;

                if distance > 0 && distance <= output.len() {
                    for _ in 0..length {
                        let byte = output[output.len() - distance];
                        output.push(byte);
                    }
                }
            }
        }
    }

    output
}
