//! Key layout. Ids are encoded big-endian so tree order equals numeric order,
//! which the chunked batch scans rely on.

pub fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub fn decode_id(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// `{user_id}{release_id}` in the primary ratings tree.
pub fn rating_key(user_id: u64, release_id: u64) -> [u8; 16] {
    pair_key(user_id, release_id)
}

/// `{release_id}{user_id}` in the per-release index.
pub fn rating_by_release_key(release_id: u64, user_id: u64) -> [u8; 16] {
    pair_key(release_id, user_id)
}

pub fn review_key(user_id: u64, review_id: u64) -> [u8; 16] {
    pair_key(user_id, review_id)
}

/// Decode the second id of a composite key.
pub fn decode_pair_tail(raw: &[u8]) -> Option<u64> {
    decode_id(raw.get(8..)?)
}

/// Inclusive key bounds covering every composite key whose leading id lies in `[first, last]`.
pub fn leading_id_range(first: u64, last: u64) -> ([u8; 16], [u8; 16]) {
    (pair_key(first, 0), pair_key(last, u64::MAX))
}

/// `{queue}:{release_id}{user_id}`: highest rating revision the queue's
/// summary already accounts for.
pub fn applied_revision_key(queue: &str, release_id: u64, user_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(queue.len() + 17);
    key.extend_from_slice(queue.as_bytes());
    key.push(b':');
    key.extend_from_slice(&pair_key(release_id, user_id));
    key
}

/// Rank index key. Ascending key order is score descending, then release id
/// ascending.
pub fn chart_rank_key(bayesian_score: f64, release_id: u64) -> [u8; 16] {
    pair_key(!sortable_bits(bayesian_score), release_id)
}

/// Map an f64 onto a u64 whose unsigned order matches `f64::total_cmp`.
fn sortable_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

pub fn lock_key(job_name: &str) -> String {
    format!("{}{}", crate::constants::LOCK_KEY_PREFIX, job_name)
}

pub fn outbox_key(event_id: &str) -> String {
    event_id.to_string()
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&a.to_be_bytes());
    out[8..].copy_from_slice(&b.to_be_bytes());
    out
}
