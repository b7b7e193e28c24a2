//! Jenkins one-at-a-time hash, used by RPF v3 entry names and the
//! localization table's key table.

pub fn jenkins_one_at_a_time(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_the_same() {
        assert_eq!(jenkins_one_at_a_time(b"common/data/handling.dat"), jenkins_one_at_a_time(b"common/data/handling.dat"));
    }

    #[test]
    fn different_input_usually_hashes_differently() {
        assert_ne!(jenkins_one_at_a_time(b"a"), jenkins_one_at_a_time(b"b"));
    }

    #[test]
    fn empty_input_hashes_to_zero() {
        assert_eq!(jenkins_one_at_a_time(b""), 0);
    }
}
