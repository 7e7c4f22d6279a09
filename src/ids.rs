//! Time-prefixed, lexicographically-sortable unique ids.
//!
//! 26 uppercase Crockford base32 characters: a 48-bit millisecond timestamp
//! (10 chars) followed by 80 bits of randomness (16 chars). Equal-prefix ids
//! sort in creation order, matching the ordering guarantee the relational
//! store relies on for `ORDER BY id` range scans.

use chrono::Utc;
use rand::RngCore;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
pub const ID_LEN: usize = 26;

/// Generate a new id stamped with the current time.
pub fn new_id() -> String {
    encode(Utc::now().timestamp_millis() as u64, &mut rand::thread_rng())
}

fn encode(timestamp_ms: u64, rng: &mut impl RngCore) -> String {
    let mut out = String::with_capacity(ID_LEN);

    // 48-bit timestamp -> 10 base32 characters, most-significant first.
    for i in (0..10).rev() {
        let shift = i * 5;
        let idx = ((timestamp_ms >> shift) & 0x1F) as usize;
        out.push(CROCKFORD[idx] as char);
    }

    // 80 bits of randomness -> 16 base32 characters.
    let mut rand_bytes = [0u8; 10];
    rng.fill_bytes(&mut rand_bytes);
    let mut acc: u128 = 0;
    for b in rand_bytes {
        acc = (acc << 8) | b as u128;
    }
    for i in (0..16).rev() {
        let shift = i * 5;
        let idx = ((acc >> shift) & 0x1F) as usize;
        out.push(CROCKFORD[idx] as char);
    }

    out
}

/// Structural validity check: exactly [`ID_LEN`] characters, all drawn from
/// the Crockford base32 alphabet. Does not check that the id was actually
/// issued by this process.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| CROCKFORD.contains(&b.to_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_valid_ids() {
        let id = new_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(is_valid_id(&id));
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }

    #[test]
    fn equal_prefix_sorts_by_creation_order() {
        let mut rng = rand::thread_rng();
        let earlier = encode(1_000, &mut rng);
        let later = encode(2_000, &mut rng);
        assert!(earlier < later);
    }

    #[test]
    fn rejects_wrong_length_and_bad_alphabet() {
        assert!(!is_valid_id("too-short"));
        assert!(!is_valid_id(&"I".repeat(ID_LEN))); // I is excluded from Crockford32
        assert!(!is_valid_id(&"L".repeat(ID_LEN))); // L is excluded
        assert!(!is_valid_id(&"O".repeat(ID_LEN))); // O is excluded
        assert!(!is_valid_id(&"U".repeat(ID_LEN))); // U is excluded
    }
}
