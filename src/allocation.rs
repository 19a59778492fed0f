//! Deterministic traffic allocation. The bucket value must be bit-for-bit
//! identical to what the remote service computes for the same identifiers,
//! across processes and across SDK languages, so the hash is a MurmurHash3
//! (32-bit) over UTF-16 code units rather than bytes.

const TOTAL_BUCKETS: i32 = 10_000;
const MAX_PERCENTAGE: f32 = 100.0;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn mix_k1(mut k1: u32) -> u32 {
    k1 = k1.wrapping_mul(C1);
    k1 = k1.rotate_left(15);
    k1.wrapping_mul(C2)
}

fn mix_h1(mut h1: u32, k1: u32) -> u32 {
    h1 ^= k1;
    h1 = h1.rotate_left(13);
    h1.wrapping_mul(5).wrapping_add(0xe654_6b64)
}

fn fmix(mut h1: u32, length: u32) -> u32 {
    h1 ^= length;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// MurmurHash3 32-bit over the string's UTF-16 code units, two units per
/// block, zero seed.
pub fn hash_unencoded_chars(input: &str) -> i32 {
    let units: Vec<u16> = input.encode_utf16().collect();
    let mut h1: u32 = 0;

    let mut chunks = units.chunks_exact(2);
    for pair in &mut chunks {
        let k1 = u32::from(pair[0]) | (u32::from(pair[1]) << 16);
        h1 = mix_h1(h1, mix_k1(k1));
    }
    if let [tail] = chunks.remainder() {
        h1 ^= mix_k1(u32::from(*tail));
    }

    fmix(h1, 2 * units.len() as u32) as i32
}

/// Identifier string the bucket hash is computed over. Visitor ids may carry
/// a `.{clusterhint}` suffix which must not influence allocation.
pub fn device_id(client_id: &str, activity_id: &str, visitor_id: &str, salt: &str) -> String {
    let visitor_id = match visitor_id.find('.') {
        Some(index) if index > 0 => &visitor_id[..index],
        _ => visitor_id,
    };
    format!("{client_id}.{activity_id}.{visitor_id}.{salt}")
}

/// Map identifiers into `[0, 100)` with two decimal places. Pure function:
/// same inputs, same bucket, always.
pub fn calculate_allocation(
    client_id: &str,
    activity_id: &str,
    visitor_id: &str,
    salt: &str,
) -> f64 {
    let hash = hash_unencoded_chars(&device_id(client_id, activity_id, visitor_id, salt));
    let bucket = hash.wrapping_abs() % TOTAL_BUCKETS;
    // f32 on purpose: the reference implementations round in single
    // precision and the bucket edges have to agree with them.
    let allocation = (bucket as f32 / TOTAL_BUCKETS as f32) * MAX_PERCENTAGE;
    f64::from((allocation * 100.0).round()) / 100.0
}
