use nanoid::nanoid;

const ROOM_ID_LEN: usize = 6;
const KEY_LEN: usize = 12;

/// cyrb53: 53-bit non-cryptographic string hash over UTF-16 code units.
///
/// Peers compare these values, so the bit operations must stay exactly as
/// they are.
pub fn cyrb53(input: &str, seed: u32) -> u64 {
    let mut h1: u32 = 0xdead_beef ^ seed;
    let mut h2: u32 = 0x41c6_ce57 ^ seed;
    for unit in input.encode_utf16() {
        let ch = u32::from(unit);
        h1 = (h1 ^ ch).wrapping_mul(2_654_435_761);
        h2 = (h2 ^ ch).wrapping_mul(1_597_334_677);
    }
    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(2_246_822_507);
    h1 ^= (h2 ^ (h2 >> 13)).wrapping_mul(3_266_489_909);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(2_246_822_507);
    h2 ^= (h1 ^ (h1 >> 13)).wrapping_mul(3_266_489_909);
    4_294_967_296 * u64::from(2_097_151 & h2) + u64::from(h1)
}

/// Content fingerprint of a canonical media reference, as sent in `VideoState::id`.
pub fn fingerprint(canonical: &str) -> String {
    cyrb53(canonical, 0).to_string()
}

pub fn generate_room_id() -> String {
    nanoid!(ROOM_ID_LEN)
}

/// 72-bit shared key for media reference obfuscation
pub fn generate_key() -> String {
    nanoid!(KEY_LEN)
}

/// Format seconds into MM:SS or HH:MM:SS
pub fn format_time(seconds: f64) -> String {
    let total_secs = seconds.max(0.0) as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyrb53_matches_reference_values() {
        assert_eq!(cyrb53("a", 0), 7_929_297_801_672_961);
        assert_eq!(cyrb53("b", 0), 8_684_336_938_537_663);
        assert_eq!(cyrb53("revenge", 0), 4_051_478_007_546_757);
        assert_eq!(cyrb53("", 0), 3_338_908_027_751_811);
    }

    #[test]
    fn fingerprint_is_stable_decimal() {
        let id = fingerprint("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(id, "5775841584157002");
        assert_eq!(id, fingerprint("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn generated_identifiers_have_expected_length() {
        assert_eq!(generate_room_id().chars().count(), 6);
        assert_eq!(generate_key().chars().count(), 12);
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn format_time_switches_to_hours() {
        assert_eq!(format_time(-3.0), "00:00");
        assert_eq!(format_time(75.9), "01:15");
        assert_eq!(format_time(3_725.0), "01:02:05");
    }
}
