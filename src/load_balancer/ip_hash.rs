//! Client IP affinity strategy.
//!
//! Hashes the client IP with 32-bit FNV-1a modulo the eligible subset size.
//! There is no consistent-hashing ring: when the eligible set changes size or
//! order, most clients are remapped to a different backend.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectionStrategy};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for IpHash {
    fn next_server(&self, eligible: &[Arc<Backend>], client_ip: &str) -> Option<Arc<Backend>> {
        if eligible.is_empty() {
            return None;
        }
        let idx = fnv1a_32(client_ip.as_bytes()) as usize % eligible.len();
        eligible.get(idx).cloned()
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}
