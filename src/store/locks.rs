//! DB-level advisory locks, used for session metadata merges.
//!
//! Postgres advisory locks are a single global 64-bit keyspace; we derive the
//! key from a stable hash of the string so callers never have to coordinate
//! integers by hand, and scope the lock to the current transaction
//! (`pg_advisory_xact_lock`) so it releases automatically on commit or
//! rollback even if a connection is recycled by the pool mid-failure.

use diesel::prelude::*;
use diesel::sql_types::BigInt;

/// FNV-1a 64-bit hash. Deterministic across processes and Rust versions,
/// which `std::collections::hash_map::DefaultHasher` is not guaranteed to be
/// (it's seeded per-process) — required here since every connection that
/// takes this lock must compute the same key for the same string.
fn fnv1a64(s: &str) -> i64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    // Postgres advisory lock keys are signed bigint; reinterpret the bits.
    hash as i64
}

/// Namespaced key for a session-scoped advisory lock.
pub fn session_lock_key(session_id: &str) -> i64 {
    fnv1a64(&format!("sessions:{session_id}"))
}

/// Namespaced key for a session+message-scoped advisory lock (used by
/// `putMessageMetadata`, which locks per entry).
pub fn message_lock_key(session_id: &str, message_uuid: &uuid::Uuid) -> i64 {
    fnv1a64(&format!("messages:{session_id}:{message_uuid}"))
}

/// Acquire a transaction-scoped advisory lock. Must be called within an open
/// transaction; the lock is released automatically at commit/rollback.
pub fn acquire_xact_lock(conn: &mut PgConnection, key: i64) -> QueryResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(key)
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_deterministic() {
        let a = fnv1a64("sessions:abc");
        let b = fnv1a64("sessions:abc");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(fnv1a64("sessions:abc"), fnv1a64("sessions:abd"));
    }

    #[test]
    fn namespacing_prevents_cross_table_collision_for_same_literal() {
        assert_ne!(session_lock_key("abc"), fnv1a64("abc"));
    }
}
