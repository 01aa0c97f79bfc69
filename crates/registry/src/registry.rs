//! The registry value owned by the chain driver.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use fluxnode_consensus::{Amount, Hash256, RegistryParams, Tier};
use fluxnode_primitives::address::p2pkh_script;
use fluxnode_primitives::block::Block;
use fluxnode_primitives::hash::hash160;
use fluxnode_primitives::nodetx::CollateralScript;
use fluxnode_primitives::outpoint::OutPoint;
use fluxnode_storage::{KeyValueStore, WriteBatch};

use crate::engine;
use crate::error::RegistryError;
use crate::record::NodeRecord;
use crate::store::RegistryStore;
use crate::tracker::{RegistryState, TrackerKind};
use crate::undo::BlockUndo;

/// A spendable output as the UTXO engine reports it.
#[derive(Clone, Debug)]
pub struct CollateralOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    /// Height of the block that created the output.
    pub height: u32,
}

/// Lookup into the UTXO engine. The registry resolves every node
/// transaction's declared collateral through this.
pub trait UtxoView {
    fn lookup_output(&self, outpoint: &OutPoint) -> Option<CollateralOut>;
}

/// The chain engine surface the registry consumes: reduced blocks for
/// rescans, block times for operator queries, and the sync state.
pub trait ChainSource {
    fn tip_height(&self) -> Option<u32>;
    fn block_at(&self, height: u32) -> Option<Block>;
    fn block_time(&self, height: u32) -> Option<u32>;
    fn is_synced(&self) -> bool;
}

const REBUILD_LOG_INTERVAL: u32 = 10_000;

pub struct Registry<S: KeyValueStore> {
    params: RegistryParams,
    store: RegistryStore<S>,
    state: RwLock<RegistryState>,
    /// Resolved P2SH payment destinations; purely a query-time cache.
    p2sh_destinations: Mutex<HashMap<OutPoint, Vec<u8>>>,
}

impl<S: KeyValueStore> Registry<S> {
    /// Opens the registry over `store`, restoring the tracker state the
    /// last committed block left behind.
    pub fn open(store: S, params: RegistryParams) -> Result<Self, RegistryError> {
        let store = RegistryStore::new(store);
        let state = store.load()?;
        state.check_invariants().map_err(RegistryError::Invariant)?;
        Ok(Self {
            params,
            store,
            state: RwLock::new(state),
            p2sh_destinations: Mutex::new(HashMap::new()),
        })
    }

    pub fn params(&self) -> &RegistryParams {
        &self.params
    }

    /// Applies one block on top of the current tip. On success the undo
    /// record is both returned and written alongside the mutated records
    /// in a single batch; on a consensus rejection nothing changes.
    pub fn apply(
        &self,
        height: u32,
        block_hash: Hash256,
        block: &Block,
        utxo: &dyn UtxoView,
    ) -> Result<BlockUndo, RegistryError> {
        if block.hash != block_hash {
            return Err(RegistryError::Consensus("block hash mismatch"));
        }
        let mut state = self.state.write().expect("registry lock");
        if let Some(tip) = state.tip_height() {
            if height != tip + 1 {
                return Err(RegistryError::Consensus(
                    "block height not contiguous with registry tip",
                ));
            }
        }

        let (shadow, undo) = engine::apply_block(&state, &self.params, height, block, utxo)?;

        let mut batch = WriteBatch::new();
        shadow.stage_batch(&mut batch);
        if !undo.is_empty() {
            self.store.stage_undo(&mut batch, height, &block_hash, &undo);
        }
        if let Some(horizon) = height.checked_sub(self.params.max_reorg_depth) {
            self.store.stage_undo_prune(&mut batch, horizon)?;
        }
        self.store.stage_tip(&mut batch, Some(height));
        self.store.write(&batch)?;

        shadow.commit(&mut state).map_err(RegistryError::Invariant)?;
        state.set_tip_height(Some(height));
        Ok(undo)
    }

    /// Reverts the tip block using its undo record. Exact inverse of
    /// `apply`: every tracker, queue position, and record field returns to
    /// its pre-apply value.
    pub fn undo(
        &self,
        height: u32,
        block_hash: Hash256,
        undo: &BlockUndo,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write().expect("registry lock");
        if state.tip_height() != Some(height) {
            return Err(RegistryError::Consensus(
                "undo height is not the registry tip",
            ));
        }

        let shadow = engine::revert_block(&state, &self.params, height, undo)?;

        let new_tip = height.checked_sub(1);
        let mut batch = WriteBatch::new();
        shadow.stage_batch(&mut batch);
        self.store.stage_undo_delete(&mut batch, height, &block_hash);
        self.store.stage_tip(&mut batch, new_tip);
        self.store.write(&batch)?;

        shadow.commit(&mut state).map_err(RegistryError::Invariant)?;
        state.set_tip_height(new_tip);
        Ok(())
    }

    /// Stored undo record for a block, if it is still inside the reorg
    /// horizon.
    pub fn undo_data(
        &self,
        height: u32,
        block_hash: Hash256,
    ) -> Result<Option<BlockUndo>, RegistryError> {
        self.store.load_undo(height, &block_hash)
    }

    /// Head of the tier's payment queue, without mutating it.
    pub fn next_payment(&self, tier: Tier) -> Option<OutPoint> {
        let state = self.state.read().expect("registry lock");
        state.next_payment(tier)
    }

    /// Discards all registry state and replays `[from_height, tip]` from
    /// the chain source. The replay builds a side state; the live state
    /// and the store are swapped only after the whole range has applied
    /// cleanly, so a failure leaves the previous state untouched.
    pub fn rebuild(
        &self,
        from_height: u32,
        chain: &dyn ChainSource,
        utxo: &dyn UtxoView,
    ) -> Result<(), RegistryError> {
        let tip = chain
            .tip_height()
            .ok_or(RegistryError::NotApplicable("chain has no tip"))?;
        if from_height > tip {
            return Err(RegistryError::NotApplicable(
                "rebuild start is past the chain tip",
            ));
        }

        let mut state = self.state.write().expect("registry lock");

        fluxnode_log::log_info!(
            "rebuilding node registry from height {from_height} to {tip}"
        );
        let total = tip - from_height + 1;
        let mut side = RegistryState::new();
        let mut undos: Vec<(u32, Hash256, BlockUndo)> = Vec::new();
        for height in from_height..=tip {
            let block = chain
                .block_at(height)
                .ok_or(RegistryError::Invariant("missing block during rebuild"))?;
            let (shadow, undo) = engine::apply_block(&side, &self.params, height, &block, utxo)?;
            shadow.commit(&mut side).map_err(RegistryError::Invariant)?;
            side.set_tip_height(Some(height));
            if !undo.is_empty() && height + self.params.max_reorg_depth > tip {
                undos.push((height, block.hash, undo));
            }
            let done = height - from_height + 1;
            if done % REBUILD_LOG_INTERVAL == 0 {
                fluxnode_log::log_info!(
                    "node registry rebuild {done}/{total} ({}%)",
                    done * 100 / total
                );
            }
        }
        side.check_invariants().map_err(RegistryError::Invariant)?;

        let mut batch = WriteBatch::new();
        self.store.stage_clear(&mut batch)?;
        self.store.stage_full_state(&mut batch, &side);
        for (height, block_hash, undo) in &undos {
            self.store.stage_undo(&mut batch, *height, block_hash, undo);
        }
        self.store.stage_queue_snapshots(&mut batch, &side);
        self.store.stage_tip(&mut batch, Some(tip));
        self.store.write(&batch)?;

        *state = side;
        self.p2sh_destinations
            .lock()
            .expect("p2sh cache lock")
            .clear();
        fluxnode_log::log_info!("node registry rebuild complete at height {tip}");
        Ok(())
    }

    /// Explicit commit point: snapshots the payment queues, then pushes
    /// everything to durable media.
    pub fn flush(&self) -> Result<(), RegistryError> {
        let state = self.state.read().expect("registry lock");
        let mut batch = WriteBatch::new();
        self.store.stage_queue_snapshots(&mut batch, &state);
        self.store.stage_tip(&mut batch, state.tip_height());
        self.store.write(&batch)?;
        self.store.flush()
    }

    pub fn tip_height(&self) -> Option<u32> {
        let state = self.state.read().expect("registry lock");
        state.tip_height()
    }

    pub fn node_record(&self, outpoint: &OutPoint) -> Option<(TrackerKind, NodeRecord)> {
        let state = self.state.read().expect("registry lock");
        let kind = state.location(outpoint)?;
        state.record(outpoint).map(|record| (kind, record.clone()))
    }

    pub fn start_entries(&self) -> Vec<NodeRecord> {
        let state = self.state.read().expect("registry lock");
        state.start_records().cloned().collect()
    }

    pub fn dos_entries(&self) -> Vec<NodeRecord> {
        let state = self.state.read().expect("registry lock");
        state.dos_records().cloned().collect()
    }

    pub fn confirmed_entries(&self) -> Vec<NodeRecord> {
        let state = self.state.read().expect("registry lock");
        state.confirmed_records().cloned().collect()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.read().expect("registry lock");
        (
            state.start_count(),
            state.dos_count(),
            state.confirmed_count(),
        )
    }

    pub fn queue_position(&self, tier: Tier, outpoint: &OutPoint) -> Option<usize> {
        let state = self.state.read().expect("registry lock");
        state.queue_position(tier, outpoint)
    }

    /// Payment destination script for a node. P2SH collateral resolves
    /// through the UTXO view once and is cached.
    pub fn payment_script(&self, record: &NodeRecord, utxo: &dyn UtxoView) -> Option<Vec<u8>> {
        match &record.collateral_script {
            CollateralScript::Pubkey(pubkey) => Some(p2pkh_script(&hash160(pubkey))),
            CollateralScript::P2sh(_) => {
                let mut cache = self.p2sh_destinations.lock().expect("p2sh cache lock");
                if let Some(script) = cache.get(&record.collateral) {
                    return Some(script.clone());
                }
                let script = utxo.lookup_output(&record.collateral)?.script_pubkey;
                cache.insert(record.collateral, script.clone());
                Some(script)
            }
        }
    }

    /// Canonical bytes of the full tracker state; equal states serialize
    /// identically.
    pub fn serialize_state(&self) -> Vec<u8> {
        let state = self.state.read().expect("registry lock");
        state.serialize()
    }

    pub fn check_invariants(&self) -> Result<(), RegistryError> {
        let state = self.state.read().expect("registry lock");
        state.check_invariants().map_err(RegistryError::Invariant)
    }
}
