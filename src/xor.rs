
/// XORs two buffers byte by byte, stopping at the shorter one.
pub fn fixed_xor(first: &[u8], second: &[u8]) -> Vec<u8> {
    first.iter().zip(second).map(|(&a, &b)| a ^ b).collect()
}

pub fn xor_in_place(target: &mut [u8], mask: &[u8]) {
    for (b, &m) in target.iter_mut().zip(mask) {
        *b ^= m;
    }
}
