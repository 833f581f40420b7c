use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Custom epoch for generated ids: 2024-01-01T00:00:00Z in milliseconds.
const ID_EPOCH_MS: i64 = 1_704_067_200_000;

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Unique identifier for an order.
///
/// Wraps the `i64` produced by [`IdGenerator`] to provide type safety and
/// prevent mixing up order ids with other numeric identifiers (user ids,
/// address ids, SKU ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates an order id from a raw value, e.g. one read back from storage.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the underlying numeric value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<OrderId> for i64 {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

/// Snowflake-style order id generator.
///
/// Ids are `timestamp-ms (41 bits) | machine id (10 bits) | sequence (12
/// bits)` relative to a custom epoch, so they sort by creation time and stay
/// unique across up to 1024 cooperating processes.
///
/// The generator is an explicitly constructed component: build one at startup
/// with the process's machine id and inject it where orders are created.
/// Construction is cheap (one mutex); there is no lazy global state.
#[derive(Debug)]
pub struct IdGenerator {
    machine_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Creates a generator for the given machine id (truncated to 10 bits).
    pub fn new(machine_id: u16) -> Self {
        Self {
            machine_id: i64::from(machine_id) & ((1 << MACHINE_BITS) - 1),
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Issues the next order id.
    ///
    /// Monotonic per process: a clock that moves backwards is clamped to the
    /// last issued timestamp, and an exhausted sequence borrows the next
    /// millisecond instead of blocking.
    pub fn next(&self) -> OrderId {
        let mut state = self.state.lock().unwrap();

        let now_ms = (Utc::now().timestamp_millis() - ID_EPOCH_MS).max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                state.last_ms += 1;
                state.sequence = 0;
            }
        } else {
            state.last_ms = now_ms;
            state.sequence = 0;
        }

        let raw = (state.last_ms << (MACHINE_BITS + SEQUENCE_BITS))
            | (self.machine_id << SEQUENCE_BITS)
            | state.sequence;
        OrderId(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_creates_unique_ids() {
        let ids = IdGenerator::new(1);
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_monotonic() {
        let ids = IdGenerator::new(1);
        let mut prev = ids.next();
        for _ in 0..10_000 {
            let next = ids.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn machine_id_is_embedded() {
        let ids = IdGenerator::new(42);
        let raw = ids.next().as_i64();
        assert_eq!((raw >> SEQUENCE_BITS) & ((1 << MACHINE_BITS) - 1), 42);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = OrderId::from_raw(123_456);
        assert_eq!(id.as_i64(), 123_456);
        assert_eq!(id.to_string(), "123456");
    }

    #[test]
    fn serialization_roundtrip() {
        let ids = IdGenerator::new(7);
        let id = ids.next();
        let json = serde_json::to_string(&id).unwrap();
        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
