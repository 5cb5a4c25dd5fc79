use std::thread;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_constant_time_equals() {
        assert!(constant_time_equals(b"evidence", b"evidence"));
        assert!(!constant_time_equals(b"evidence", b"evidencE"));
        assert!(!constant_time_equals(b"evidence", b"evid"));
        assert!(constant_time_equals(b"", b""));
    }

    #[test]
    fn test_insecure_compare_leaks_matching_prefix() {
        let delay = Duration::from_millis(5);
        let start = Instant::now();
        assert!(!insecure_compare(b"abcdef", b"abcxyz", delay));
        assert!(start.elapsed() >= delay * 3);

        assert!(insecure_compare(b"abc", b"abc", Duration::from_millis(0)));
        assert!(!insecure_compare(b"abc", b"ab", Duration::from_millis(0)));
    }
}

/// Equality whose running time depends only on the lengths of the inputs.
/// Use it whenever a secret-derived value meets attacker-supplied bytes.
pub fn constant_time_equals(expected: &[u8], received: &[u8]) -> bool {
    constant_time_eq::constant_time_eq(expected, received)
}

/// Byte-at-a-time comparison that sleeps after every matching byte and
/// returns at the first mismatch. Leaks the length of the common prefix.
pub fn insecure_compare(expected: &[u8], received: &[u8], delay: Duration) -> bool {
    if expected.len() != received.len() {
        return false;
    }
    for (a, b) in expected.iter().zip(received) {
        if a != b {
            return false;
        }
        thread::sleep(delay);
    }
    true
}
