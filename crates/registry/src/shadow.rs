//! Per-block diff over the registry state.
//!
//! `apply` and `undo` stage every mutation here first; nothing touches the
//! main trackers until the whole block has been accepted. On a consensus
//! rejection the shadow is simply dropped.

use std::collections::{BTreeMap, BTreeSet};

use fluxnode_primitives::outpoint::OutPoint;
use fluxnode_storage::{Column, WriteBatch};

use crate::record::NodeRecord;
use crate::tracker::{RegistryState, TrackerKind};

#[derive(Default)]
pub(crate) struct ShadowCache {
    start_added: BTreeMap<OutPoint, NodeRecord>,
    start_removed: BTreeSet<OutPoint>,
    dos_added: BTreeMap<OutPoint, NodeRecord>,
    dos_removed: BTreeSet<OutPoint>,
    confirmed_added: BTreeMap<OutPoint, NodeRecord>,
    confirmed_removed: BTreeSet<OutPoint>,
}

impl ShadowCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start_record<'a>(
        &'a self,
        base: &'a RegistryState,
        outpoint: &OutPoint,
    ) -> Option<&'a NodeRecord> {
        if let Some(record) = self.start_added.get(outpoint) {
            return Some(record);
        }
        if self.start_removed.contains(outpoint) {
            return None;
        }
        base.start_record(outpoint)
    }

    pub(crate) fn dos_record<'a>(
        &'a self,
        base: &'a RegistryState,
        outpoint: &OutPoint,
    ) -> Option<&'a NodeRecord> {
        if let Some(record) = self.dos_added.get(outpoint) {
            return Some(record);
        }
        if self.dos_removed.contains(outpoint) {
            return None;
        }
        base.dos_record(outpoint)
    }

    pub(crate) fn confirmed_record<'a>(
        &'a self,
        base: &'a RegistryState,
        outpoint: &OutPoint,
    ) -> Option<&'a NodeRecord> {
        if let Some(record) = self.confirmed_added.get(outpoint) {
            return Some(record);
        }
        if self.confirmed_removed.contains(outpoint) {
            return None;
        }
        base.confirmed_record(outpoint)
    }

    pub(crate) fn location(
        &self,
        base: &RegistryState,
        outpoint: &OutPoint,
    ) -> Option<TrackerKind> {
        if self.start_record(base, outpoint).is_some() {
            Some(TrackerKind::Start)
        } else if self.dos_record(base, outpoint).is_some() {
            Some(TrackerKind::Dos)
        } else if self.confirmed_record(base, outpoint).is_some() {
            Some(TrackerKind::Confirmed)
        } else {
            None
        }
    }

    pub(crate) fn insert_start(&mut self, record: NodeRecord) {
        self.start_added.insert(record.collateral, record);
    }

    pub(crate) fn insert_dos(&mut self, record: NodeRecord) {
        self.dos_added.insert(record.collateral, record);
    }

    /// Inserts or replaces a confirmed record.
    pub(crate) fn insert_confirmed(&mut self, record: NodeRecord) {
        self.confirmed_added.insert(record.collateral, record);
    }

    pub(crate) fn remove_start(&mut self, outpoint: &OutPoint) {
        self.start_added.remove(outpoint);
        self.start_removed.insert(*outpoint);
    }

    pub(crate) fn remove_dos(&mut self, outpoint: &OutPoint) {
        self.dos_added.remove(outpoint);
        self.dos_removed.insert(*outpoint);
    }

    pub(crate) fn remove_confirmed(&mut self, outpoint: &OutPoint) {
        self.confirmed_added.remove(outpoint);
        self.confirmed_removed.insert(*outpoint);
    }

    /// Visits the merged start view: base records not staged away, then
    /// staged additions.
    pub(crate) fn for_each_start(&self, base: &RegistryState, mut f: impl FnMut(&NodeRecord)) {
        for record in base.start_records() {
            if self.start_removed.contains(&record.collateral)
                || self.start_added.contains_key(&record.collateral)
            {
                continue;
            }
            f(record);
        }
        for record in self.start_added.values() {
            f(record);
        }
    }

    pub(crate) fn for_each_dos(&self, base: &RegistryState, mut f: impl FnMut(&NodeRecord)) {
        for record in base.dos_records() {
            if self.dos_removed.contains(&record.collateral)
                || self.dos_added.contains_key(&record.collateral)
            {
                continue;
            }
            f(record);
        }
        for record in self.dos_added.values() {
            f(record);
        }
    }

    pub(crate) fn for_each_confirmed(&self, base: &RegistryState, mut f: impl FnMut(&NodeRecord)) {
        for record in base.confirmed_records() {
            if self.confirmed_removed.contains(&record.collateral)
                || self.confirmed_added.contains_key(&record.collateral)
            {
                continue;
            }
            f(record);
        }
        for record in self.confirmed_added.values() {
            f(record);
        }
    }

    /// Stages the diff into a write batch: deletions first so that a
    /// same-tracker re-add within one block resolves to the final record.
    pub(crate) fn stage_batch(&self, batch: &mut WriteBatch) {
        for outpoint in &self.start_removed {
            batch.delete(Column::StartTracker, outpoint.key_bytes());
        }
        for outpoint in &self.dos_removed {
            batch.delete(Column::DosTracker, outpoint.key_bytes());
        }
        for outpoint in &self.confirmed_removed {
            batch.delete(Column::ConfirmedNode, outpoint.key_bytes());
        }
        for (outpoint, record) in &self.start_added {
            batch.put(Column::StartTracker, outpoint.key_bytes(), record.encode());
        }
        for (outpoint, record) in &self.dos_added {
            batch.put(Column::DosTracker, outpoint.key_bytes(), record.encode());
        }
        for (outpoint, record) in &self.confirmed_added {
            batch.put(Column::ConfirmedNode, outpoint.key_bytes(), record.encode());
        }
    }

    /// Applies the diff to the main state. Removals land before insertions
    /// so cross-tracker moves never trip the disjointness check.
    pub(crate) fn commit(self, state: &mut RegistryState) -> Result<(), &'static str> {
        for outpoint in &self.start_removed {
            state.remove_start(outpoint);
        }
        for outpoint in &self.dos_removed {
            state.remove_dos(outpoint);
        }
        for outpoint in &self.confirmed_removed {
            state.remove_confirmed(outpoint);
        }
        for (_, record) in self.start_added {
            state.insert_start(record)?;
        }
        for (_, record) in self.dos_added {
            state.insert_dos(record)?;
        }
        for (outpoint, record) in self.confirmed_added {
            if state.confirmed_record(&outpoint).is_some() {
                state.replace_confirmed(record)?;
            } else {
                state.insert_confirmed(record)?;
            }
        }
        Ok(())
    }
}
