//! Serial number allocation.
//!
//! Serials are operator-facing: a fixed prefix, a second-granularity local
//! timestamp, and a random alphanumeric suffix. The store's uniqueness
//! constraint is the authoritative backstop; a collision surfaces as a
//! retryable append failure.

use std::sync::OnceLock;

use chrono::Local;
use rand::Rng;

const SERIAL_PREFIX: &str = "BTL";
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;

#[derive(Debug, Default)]
pub struct SerialAllocator;

impl SerialAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Allocate a serial: `BTL-<YYYYMMDDHHMMSS>-<6 random [A-Z0-9]>`.
    pub fn allocate(&self) -> String {
        let timestamp = Local::now().format("%Y%m%d%H%M%S");
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        format!("{SERIAL_PREFIX}-{timestamp}-{suffix}")
    }
}

/// Check a serial against the allocator's format.
pub fn validate_serial(serial: &str) -> bool {
    static SERIAL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = SERIAL_RE
        .get_or_init(|| regex::Regex::new(r"^BTL-\d{14}-[A-Z0-9]{6}$").expect("serial pattern"));
    re.is_match(serial)
}
