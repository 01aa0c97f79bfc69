//! Persistence of records, undo data, and queue snapshots.
//!
//! Records live under the column of the tracker that owns them, keyed by
//! the encoded collateral outpoint. Undo rows are keyed by big-endian
//! height followed by the block hash, which keeps lookup-by-block cheap
//! while letting the reorg-horizon pruning scan one height prefix. All
//! mutations for one applied block travel in a single write batch.

use fluxnode_consensus::{Hash256, Tier};
use fluxnode_primitives::encoding::{Decodable, Decoder, Encodable, Encoder};
use fluxnode_primitives::outpoint::OutPoint;
use fluxnode_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::RegistryError;
use crate::record::NodeRecord;
use crate::tracker::RegistryState;
use crate::undo::BlockUndo;

const FORMAT_VERSION: u8 = 1;
const META_FORMAT_KEY: &[u8] = b"format";
const META_TIP_KEY: &[u8] = b"tip";

pub(crate) struct RegistryStore<S> {
    store: S,
}

impl<S: KeyValueStore> RegistryStore<S> {
    pub(crate) fn new(store: S) -> Self {
        Self { store }
    }

    /// Rebuilds the in-memory state from the tracker columns. A format
    /// bump comes back as an empty state so the driver can rebuild; stale
    /// undo rows above the recorded tip are discarded.
    pub(crate) fn load(&self) -> Result<RegistryState, RegistryError> {
        match self.store.get(Column::Meta, META_FORMAT_KEY)? {
            Some(version) if version != [FORMAT_VERSION] => {
                fluxnode_log::log_warn!(
                    "node registry store format changed; rebuild required"
                );
                return Ok(RegistryState::new());
            }
            Some(_) => {}
            None => {
                self.store
                    .put(Column::Meta, META_FORMAT_KEY, &[FORMAT_VERSION])?;
            }
        }

        let mut state = RegistryState::new();
        for (column, kind) in [
            (Column::StartTracker, TrackerColumn::Start),
            (Column::DosTracker, TrackerColumn::Dos),
            (Column::ConfirmedNode, TrackerColumn::Confirmed),
        ] {
            for (_, value) in self.store.scan_prefix(column, &[])? {
                let record = NodeRecord::decode(&value)
                    .map_err(|_| RegistryError::Invariant("corrupt node record in store"))?;
                let inserted = match kind {
                    TrackerColumn::Start => state.insert_start(record),
                    TrackerColumn::Dos => state.insert_dos(record),
                    TrackerColumn::Confirmed => state.insert_confirmed(record),
                };
                inserted.map_err(RegistryError::Invariant)?;
            }
        }

        let tip = match self.store.get(Column::Meta, META_TIP_KEY)? {
            Some(bytes) => Some(decode_tip(&bytes)?),
            None => None,
        };
        state.set_tip_height(tip);

        self.verify_queue_snapshots(&state)?;
        self.discard_stale_undo(tip)?;
        Ok(state)
    }

    fn verify_queue_snapshots(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let Some(tip) = state.tip_height() else {
            return Ok(());
        };
        for tier in Tier::ALL {
            let Some(bytes) = self.store.get(Column::PaymentQueue, &[tier.as_u8()])? else {
                continue;
            };
            let (snapshot_height, outpoints) = decode_queue_snapshot(&bytes)?;
            if snapshot_height != tip {
                continue;
            }
            if outpoints != state.queue_outpoints(tier) {
                return Err(RegistryError::Invariant(
                    "payment queue snapshot disagrees with records",
                ));
            }
        }
        Ok(())
    }

    fn discard_stale_undo(&self, tip: Option<u32>) -> Result<(), RegistryError> {
        for (key, _) in self.store.scan_prefix(Column::BlockUndo, &[])? {
            let height = undo_key_height(&key)?;
            let stale = match tip {
                Some(tip) => height > tip,
                None => true,
            };
            if stale {
                self.store.delete(Column::BlockUndo, &key)?;
            }
        }
        Ok(())
    }

    pub(crate) fn load_undo(
        &self,
        height: u32,
        block_hash: &Hash256,
    ) -> Result<Option<BlockUndo>, RegistryError> {
        let Some(bytes) = self
            .store
            .get(Column::BlockUndo, &undo_key(height, block_hash))?
        else {
            return Ok(None);
        };
        BlockUndo::decode(&bytes)
            .map(Some)
            .map_err(|_| RegistryError::Invariant("corrupt block undo in store"))
    }

    pub(crate) fn stage_undo(
        &self,
        batch: &mut WriteBatch,
        height: u32,
        block_hash: &Hash256,
        undo: &BlockUndo,
    ) {
        batch.put(Column::BlockUndo, undo_key(height, block_hash), undo.encode());
    }

    pub(crate) fn stage_undo_delete(
        &self,
        batch: &mut WriteBatch,
        height: u32,
        block_hash: &Hash256,
    ) {
        batch.delete(Column::BlockUndo, undo_key(height, block_hash));
    }

    /// Drops every undo row at exactly `height`; called once per applied
    /// block with the height that just fell below the reorg horizon.
    pub(crate) fn stage_undo_prune(
        &self,
        batch: &mut WriteBatch,
        height: u32,
    ) -> Result<(), RegistryError> {
        for (key, _) in self
            .store
            .scan_prefix(Column::BlockUndo, &height.to_be_bytes())?
        {
            batch.delete(Column::BlockUndo, key);
        }
        Ok(())
    }

    pub(crate) fn stage_tip(&self, batch: &mut WriteBatch, tip: Option<u32>) {
        match tip {
            Some(height) => batch.put(Column::Meta, META_TIP_KEY, height.to_le_bytes()),
            None => batch.delete(Column::Meta, META_TIP_KEY),
        }
    }

    pub(crate) fn stage_queue_snapshots(&self, batch: &mut WriteBatch, state: &RegistryState) {
        let Some(tip) = state.tip_height() else {
            return;
        };
        for tier in Tier::ALL {
            let mut encoder = Encoder::new();
            encoder.write_u32_le(tip);
            let outpoints = state.queue_outpoints(tier);
            encoder.write_varint(outpoints.len() as u64);
            for outpoint in outpoints {
                outpoint.consensus_encode(&mut encoder);
            }
            batch.put(Column::PaymentQueue, [tier.as_u8()], encoder.into_inner());
        }
    }

    /// Stages deletion of every row except the format marker; the final
    /// step of an atomic rebuild swap.
    pub(crate) fn stage_clear(&self, batch: &mut WriteBatch) -> Result<(), RegistryError> {
        for column in [
            Column::ConfirmedNode,
            Column::StartTracker,
            Column::DosTracker,
            Column::BlockUndo,
            Column::PaymentQueue,
        ] {
            for (key, _) in self.store.scan_prefix(column, &[])? {
                batch.delete(column, key);
            }
        }
        batch.delete(Column::Meta, META_TIP_KEY);
        Ok(())
    }

    pub(crate) fn stage_full_state(&self, batch: &mut WriteBatch, state: &RegistryState) {
        for record in state.start_records() {
            batch.put(
                Column::StartTracker,
                record.collateral.key_bytes(),
                record.encode(),
            );
        }
        for record in state.dos_records() {
            batch.put(
                Column::DosTracker,
                record.collateral.key_bytes(),
                record.encode(),
            );
        }
        for record in state.confirmed_records() {
            batch.put(
                Column::ConfirmedNode,
                record.collateral.key_bytes(),
                record.encode(),
            );
        }
    }

    pub(crate) fn write(&self, batch: &WriteBatch) -> Result<(), RegistryError> {
        self.store.write_batch(batch).map_err(RegistryError::Store)
    }

    pub(crate) fn flush(&self) -> Result<(), RegistryError> {
        self.store.flush().map_err(RegistryError::Store)
    }
}

#[derive(Clone, Copy)]
enum TrackerColumn {
    Start,
    Dos,
    Confirmed,
}

fn undo_key(height: u32, block_hash: &Hash256) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..4].copy_from_slice(&height.to_be_bytes());
    key[4..].copy_from_slice(block_hash);
    key
}

fn undo_key_height(key: &[u8]) -> Result<u32, RegistryError> {
    let prefix: [u8; 4] = key
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(RegistryError::Invariant("malformed block undo key"))?;
    Ok(u32::from_be_bytes(prefix))
}

fn decode_tip(bytes: &[u8]) -> Result<u32, RegistryError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| RegistryError::Invariant("malformed tip marker"))?;
    Ok(u32::from_le_bytes(raw))
}

fn decode_queue_snapshot(bytes: &[u8]) -> Result<(u32, Vec<OutPoint>), RegistryError> {
    parse_queue_snapshot(bytes)
        .map_err(|_| RegistryError::Invariant("corrupt payment queue snapshot"))
}

fn parse_queue_snapshot(
    bytes: &[u8],
) -> Result<(u32, Vec<OutPoint>), fluxnode_primitives::encoding::DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let height = decoder.read_u32_le()?;
    let len = decoder.read_varint()? as usize;
    let mut outpoints = Vec::with_capacity(len);
    for _ in 0..len {
        outpoints.push(OutPoint::consensus_decode(&mut decoder)?);
    }
    Ok((height, outpoints))
}
