//! Fixed-capacity open-addressing table of per-key stations.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::{config::SlotPolicy, station::Station};

/// Why a key couldn't be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// Key isn't utf-8; checked once, when the key claims a slot
    InvalidKey,
    /// Every slot holds some other key
    Full,
}

#[derive(Clone)]
struct Slot {
    hash: u64,
    key: Box<[u8]>,
    station: Station,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            hash: 0,
            key: Box::default(),
            station: Station::EMPTY,
        }
    }
}

#[inline]
fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.finish()
}

/// Maps raw key bytes to [Station]s. Never grows: the slot array is allocated once.
/// A slot is claimed iff its station has a non-zero count.
pub struct AggregateTable {
    slots: Box<[Slot]>,
    policy: SlotPolicy,
    len: usize,
}

impl AggregateTable {
    pub fn new(capacity: usize, policy: SlotPolicy) -> Self {
        assert!(capacity > 0, "table needs at least one slot");
        Self {
            slots: vec![Slot::empty(); capacity].into_boxed_slice(),
            policy,
            len: 0,
        }
    }

    /// Adds `measurement` to the station for `key`, claiming a slot on first sighting
    #[inline]
    pub fn record(&mut self, key: &[u8], measurement: i16) -> Result<(), TableError> {
        let hash = hash_key(key);
        let capacity = self.slots.len();
        let mut idx = (hash % capacity as u64) as usize;

        if self.policy == SlotPolicy::FirstWriterWins {
            let slot = &mut self.slots[idx];
            if slot.station.is_empty() {
                Self::claim(slot, hash, key)?;
                self.len += 1;
            }
            slot.station.record(measurement);
            return Ok(());
        }

        for _ in 0..capacity {
            let slot = &mut self.slots[idx];
            if slot.station.is_empty() {
                Self::claim(slot, hash, key)?;
                self.len += 1;
                slot.station.record(measurement);
                return Ok(());
            }
            if slot.hash == hash && *slot.key == *key {
                slot.station.record(measurement);
                return Ok(());
            }
            idx += 1;
            if idx == capacity {
                idx = 0;
            }
        }
        Err(TableError::Full)
    }

    #[cold]
    fn claim(slot: &mut Slot, hash: u64, key: &[u8]) -> Result<(), TableError> {
        if std::str::from_utf8(key).is_err() {
            return Err(TableError::InvalidKey);
        }
        slot.hash = hash;
        slot.key = key.into();
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<&Station> {
        self.iter().find(|(k, _)| *k == key).map(|(_, s)| s)
    }

    /// Number of claimed slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claimed slots, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Station)> {
        self.slots
            .iter()
            .filter(|slot| !slot.station.is_empty())
            .map(|slot| (&*slot.key, &slot.station))
    }

    /// Consumes the table, yielding the owned key of every claimed slot
    pub fn into_entries(self) -> impl Iterator<Item = (Box<[u8]>, Station)> {
        self.slots
            .into_vec()
            .into_iter()
            .filter(|slot| !slot.station.is_empty())
            .map(|slot| (slot.key, slot.station))
    }
}
