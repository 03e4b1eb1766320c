//! The optional-header checksum, as `imagehlp!CheckSumMappedFile` computes
//! it: a 16-bit one's-complement style sum over the whole file with the
//! checksum field itself read as zero, plus the file length.

/// Computes the PE checksum of `bytes`. `checksum_offset` is the file
/// offset of the 4-byte `CheckSum` field, which is treated as zero.
pub fn checksum(bytes: &[u8], checksum_offset: usize) -> u32 {
    let field = checksum_offset..checksum_offset + 4;
    let at = |index: usize| -> u32 {
        if field.contains(&index) {
            0
        } else {
            u32::from(bytes[index])
        }
    };
    let mut sum: u32 = 0;
    let mut index = 0;
    while index < bytes.len() {
        let low = at(index);
        let high = if index + 1 < bytes.len() {
            at(index + 1)
        } else {
            0
        };
        sum += low | (high << 8);
        // Fold the carry back in after every word so the sum stays 16-bit.
        sum = (sum & 0xffff) + (sum >> 16);
        index += 2;
    }
    sum = (sum & 0xffff) + (sum >> 16);
    sum.wrapping_add(bytes.len() as u32)
}
