//! Id hashing for the deduplication pool and consumer dispatch.
//!
//! The dispatch hash must be stable across runs so that every event for a
//! given id always lands on the same consumer, whatever the process or the
//! machine; the standard library's randomized hashers cannot give us that.

use robinhood::Id;

/// djb2 over a byte string.
fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in bytes {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(u64::from(byte));
    }
    hash
}

/// Murmur3's 64-bit finalizer; mixes the bits of `k` thoroughly.
fn murmur64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

/// Hash an id by its raw bytes.
pub fn hash_id(id: &Id) -> u64 {
    djb2(id.as_bytes())
}

/// Hash an id, exploiting the fid structure of Lustre ids when present.
///
/// Lustre ids share long runs of identical bytes (the backend prefix, the
/// zeroed parent fid); hashing `seq ^ oid` through a finalizer spreads them
/// better than hashing the raw bytes.
pub fn hash_lu_id(id: &Id) -> u64 {
    match id.as_lu_fid() {
        Ok(fid) => murmur64(fid.seq ^ u64::from(fid.oid)),
        Err(_) => hash_id(id),
    }
}

/// The consumer a batch for `id` must be dispatched to.
pub fn consumer_index(id: &Id, nb_workers: usize) -> usize {
    (hash_id(id) % nb_workers.max(1) as u64) as usize
}
