/// Finds the first offset at which the big-endian 32-bit word, ANDed with
/// `mask`, equals `pattern`.
///
/// Offsets are scanned byte by byte from the start of `data`; only words
/// that fit entirely inside `data` are considered.
///
/// ```
/// use tsdemux::utils::masked_scan_u32;
///
/// let data = [0x00, 0x47, 0x01, 0x00, 0x30];
/// assert_eq!(masked_scan_u32(&data, 0xff9fff20, 0x47010020), Some(1));
/// ```
pub fn masked_scan_u32(data: &[u8], mask: u32, pattern: u32) -> Option<usize> {
    if data.len() < 4 {
        return None;
    }
    let pattern = pattern & mask;
    let mut word = u32::from_be_bytes([0, data[0], data[1], data[2]]);
    for (i, &byte) in data[3..].iter().enumerate() {
        word = (word << 8) | byte as u32;
        if word & mask == pattern {
            return Some(i);
        }
    }
    None
}

/// Iterates over every match of [`masked_scan_u32`], restarting one byte
/// after each match.
pub fn masked_scan_all(data: &[u8], mask: u32, pattern: u32) -> impl Iterator<Item = usize> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        let found = start + masked_scan_u32(data.get(start..)?, mask, pattern)?;
        start = found + 1;
        Some(found)
    })
}
