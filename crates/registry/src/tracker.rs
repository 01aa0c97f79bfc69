//! In-memory tracker sets and the per-tier payment order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use fluxnode_consensus::Tier;
use fluxnode_primitives::encoding::{Encodable, Encoder};
use fluxnode_primitives::outpoint::OutPoint;

use crate::record::NodeRecord;

/// Which tracker set currently holds an outpoint. An outpoint lives in at
/// most one at any time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackerKind {
    Start,
    Dos,
    Confirmed,
}

impl TrackerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerKind::Start => "started",
            TrackerKind::Dos => "dos",
            TrackerKind::Confirmed => "confirmed",
        }
    }
}

/// Payment-order key. Never-paid nodes rank by confirmation height and sort
/// ahead of ever-paid nodes at the same height; the outpoint breaks ties.
/// Because the key is a pure function of record fields, undoing the field
/// restores the queue position exactly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PayeeKey {
    comparator_height: u32,
    ever_paid: bool,
    collateral: OutPoint,
}

impl PayeeKey {
    pub(crate) fn from_record(record: &NodeRecord) -> Option<Self> {
        if !record.is_confirmed() {
            return None;
        }
        let ever_paid = record.last_paid_height > 0;
        let comparator_height = if ever_paid {
            record.last_paid_height
        } else {
            record.confirmed_height
        };
        Some(Self {
            comparator_height,
            ever_paid,
            collateral: record.collateral,
        })
    }
}

impl Ord for PayeeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.comparator_height
            .cmp(&other.comparator_height)
            .then_with(|| self.ever_paid.cmp(&other.ever_paid))
            .then_with(|| self.collateral.cmp(&other.collateral))
    }
}

impl PartialOrd for PayeeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The full mutable registry state: three tracker maps, a reverse location
/// index, and the per-tier payment order derived from confirmed records.
#[derive(Default)]
pub struct RegistryState {
    start: BTreeMap<OutPoint, NodeRecord>,
    dos: BTreeMap<OutPoint, NodeRecord>,
    confirmed: BTreeMap<OutPoint, NodeRecord>,
    queues: [BTreeSet<PayeeKey>; Tier::COUNT],
    locations: HashMap<OutPoint, TrackerKind>,
    tip_height: Option<u32>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tip_height(&self) -> Option<u32> {
        self.tip_height
    }

    pub fn set_tip_height(&mut self, tip: Option<u32>) {
        self.tip_height = tip;
    }

    pub fn location(&self, outpoint: &OutPoint) -> Option<TrackerKind> {
        self.locations.get(outpoint).copied()
    }

    pub fn record(&self, outpoint: &OutPoint) -> Option<&NodeRecord> {
        match self.location(outpoint)? {
            TrackerKind::Start => self.start.get(outpoint),
            TrackerKind::Dos => self.dos.get(outpoint),
            TrackerKind::Confirmed => self.confirmed.get(outpoint),
        }
    }

    pub fn start_record(&self, outpoint: &OutPoint) -> Option<&NodeRecord> {
        self.start.get(outpoint)
    }

    pub fn dos_record(&self, outpoint: &OutPoint) -> Option<&NodeRecord> {
        self.dos.get(outpoint)
    }

    pub fn confirmed_record(&self, outpoint: &OutPoint) -> Option<&NodeRecord> {
        self.confirmed.get(outpoint)
    }

    pub fn start_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.start.values()
    }

    pub fn dos_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.dos.values()
    }

    pub fn confirmed_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.confirmed.values()
    }

    pub fn start_count(&self) -> usize {
        self.start.len()
    }

    pub fn dos_count(&self) -> usize {
        self.dos.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn insert_start(&mut self, record: NodeRecord) -> Result<(), &'static str> {
        let outpoint = record.collateral;
        if self.locations.contains_key(&outpoint) {
            return Err("outpoint already tracked");
        }
        self.start.insert(outpoint, record);
        self.locations.insert(outpoint, TrackerKind::Start);
        Ok(())
    }

    pub fn insert_dos(&mut self, record: NodeRecord) -> Result<(), &'static str> {
        let outpoint = record.collateral;
        if self.locations.contains_key(&outpoint) {
            return Err("outpoint already tracked");
        }
        self.dos.insert(outpoint, record);
        self.locations.insert(outpoint, TrackerKind::Dos);
        Ok(())
    }

    pub fn insert_confirmed(&mut self, record: NodeRecord) -> Result<(), &'static str> {
        let outpoint = record.collateral;
        if self.locations.contains_key(&outpoint) {
            return Err("outpoint already tracked");
        }
        let key = PayeeKey::from_record(&record).ok_or("confirmed record lacks confirm height")?;
        self.queues[record.tier.index()].insert(key);
        self.confirmed.insert(outpoint, record);
        self.locations.insert(outpoint, TrackerKind::Confirmed);
        Ok(())
    }

    /// Replaces an existing confirmed record, re-keying its queue entry.
    pub fn replace_confirmed(&mut self, record: NodeRecord) -> Result<(), &'static str> {
        let outpoint = record.collateral;
        let previous = self
            .confirmed
            .get(&outpoint)
            .ok_or("replace of unknown confirmed record")?;
        if previous.tier != record.tier {
            return Err("confirmed record changed tier");
        }
        let old_key =
            PayeeKey::from_record(previous).ok_or("confirmed record lacks confirm height")?;
        let new_key =
            PayeeKey::from_record(&record).ok_or("confirmed record lacks confirm height")?;
        let queue = &mut self.queues[record.tier.index()];
        queue.remove(&old_key);
        queue.insert(new_key);
        self.confirmed.insert(outpoint, record);
        Ok(())
    }

    pub fn remove_start(&mut self, outpoint: &OutPoint) -> Option<NodeRecord> {
        let record = self.start.remove(outpoint)?;
        self.locations.remove(outpoint);
        Some(record)
    }

    pub fn remove_dos(&mut self, outpoint: &OutPoint) -> Option<NodeRecord> {
        let record = self.dos.remove(outpoint)?;
        self.locations.remove(outpoint);
        Some(record)
    }

    pub fn remove_confirmed(&mut self, outpoint: &OutPoint) -> Option<NodeRecord> {
        let record = self.confirmed.remove(outpoint)?;
        if let Some(key) = PayeeKey::from_record(&record) {
            self.queues[record.tier.index()].remove(&key);
        }
        self.locations.remove(outpoint);
        Some(record)
    }

    /// Head of the tier's payment order, without mutating it.
    pub fn next_payment(&self, tier: Tier) -> Option<OutPoint> {
        self.queues[tier.index()]
            .first()
            .map(|key| key.collateral)
    }

    pub fn queue_len(&self, tier: Tier) -> usize {
        self.queues[tier.index()].len()
    }

    /// Zero-based position of an outpoint in its tier's payment order.
    pub fn queue_position(&self, tier: Tier, outpoint: &OutPoint) -> Option<usize> {
        self.queues[tier.index()]
            .iter()
            .position(|key| key.collateral == *outpoint)
    }

    pub fn queue_outpoints(&self, tier: Tier) -> Vec<OutPoint> {
        self.queues[tier.index()]
            .iter()
            .map(|key| key.collateral)
            .collect()
    }

    /// Canonical serialization of every tracker and queue; two states are
    /// equal exactly when these bytes are equal.
    pub fn serialize(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        for records in [&self.start, &self.dos, &self.confirmed] {
            encoder.write_varint(records.len() as u64);
            for record in records.values() {
                encoder.write_var_bytes(&record.encode());
            }
        }
        for tier in Tier::ALL {
            let queue = &self.queues[tier.index()];
            encoder.write_varint(queue.len() as u64);
            for key in queue {
                key.collateral.consensus_encode(&mut encoder);
            }
        }
        encoder.into_inner()
    }

    /// Structural checks: tracker disjointness, queue/confirmed agreement,
    /// height monotonicity. A failure here is a bug, not bad input.
    pub fn check_invariants(&self) -> Result<(), &'static str> {
        if self.locations.len() != self.start.len() + self.dos.len() + self.confirmed.len() {
            return Err("location index out of sync with trackers");
        }
        for (outpoint, kind) in &self.locations {
            let found = match kind {
                TrackerKind::Start => self.start.contains_key(outpoint),
                TrackerKind::Dos => self.dos.contains_key(outpoint),
                TrackerKind::Confirmed => self.confirmed.contains_key(outpoint),
            };
            if !found {
                return Err("location index points at missing record");
            }
        }
        let queue_total: usize = Tier::ALL
            .iter()
            .map(|tier| self.queues[tier.index()].len())
            .sum();
        if queue_total != self.confirmed.len() {
            return Err("queue sizes disagree with confirmed records");
        }
        for record in self.confirmed.values() {
            let key = PayeeKey::from_record(record)
                .ok_or("confirmed record lacks confirm height")?;
            if !self.queues[record.tier.index()].contains(&key) {
                return Err("confirmed record missing from its payment queue");
            }
            if record.added_height > record.confirmed_height
                || record.confirmed_height > record.last_confirmed_height
            {
                return Err("confirmed record heights are not monotone");
            }
        }
        Ok(())
    }
}
