//! Block apply and revert.
//!
//! Both directions stage every mutation into a [`ShadowCache`] and never
//! touch the live state; the caller commits the shadow only after the whole
//! block has been accepted. The step order inside `apply_block` is
//! consensus-critical and must not be rearranged.

use std::collections::BTreeSet;

use fluxnode_consensus::{classify_collateral, RegistryParams, Tier};
use fluxnode_primitives::block::{Block, BlockTx};
use fluxnode_primitives::nodetx::{validate_node_tx, ConfirmKind, NodeTx};
use fluxnode_primitives::outpoint::OutPoint;

use crate::error::RegistryError;
use crate::record::NodeRecord;
use crate::registry::UtxoView;
use crate::shadow::ShadowCache;
use crate::tracker::RegistryState;
use crate::undo::BlockUndo;

pub(crate) fn apply_block(
    state: &RegistryState,
    params: &RegistryParams,
    height: u32,
    block: &Block,
    utxo: &dyn UtxoView,
) -> Result<(ShadowCache, BlockUndo), RegistryError> {
    let mut shadow = ShadowCache::new();
    let mut undo = BlockUndo::default();

    // Step 1: peek the payees before any transaction mutates the queues.
    let mut to_pay: Vec<(Tier, OutPoint)> = Vec::new();
    if height >= params.start_payments_height {
        for tier in Tier::ALL {
            if let Some(outpoint) = state.next_payment(tier) {
                to_pay.push((tier, outpoint));
            }
        }
    }

    // Step 2: scan transactions in block order.
    let mut spent_set: BTreeSet<OutPoint> = BTreeSet::new();
    let mut block_collaterals: BTreeSet<OutPoint> = BTreeSet::new();
    for tx in &block.txs {
        match tx {
            BlockTx::Standard { spends } => {
                spent_set.extend(spends.iter().copied());
            }
            BlockTx::Node(node_tx) => {
                apply_node_tx(
                    state,
                    params,
                    height,
                    utxo,
                    node_tx,
                    &mut block_collaterals,
                    &mut shadow,
                    &mut undo,
                )?;
            }
        }
    }

    // Step 3: start transactions that ran out of confirmation time move to
    // the DoS tracker.
    let mut start_expired = Vec::new();
    shadow.for_each_start(state, |record| {
        if record.added_height + params.start_expiration <= height {
            start_expired.push(record.clone());
        }
    });
    sort_sweep(&mut start_expired);
    for record in start_expired {
        shadow.remove_start(&record.collateral);
        shadow.insert_dos(record);
    }

    // Step 4: DoS entries past their hold window are deleted.
    let dos_cutoff = params.start_expiration + params.dos_remove;
    let mut dos_expired = Vec::new();
    shadow.for_each_dos(state, |record| {
        if record.added_height + dos_cutoff <= height {
            dos_expired.push(record.clone());
        }
    });
    sort_sweep(&mut dos_expired);
    for record in dos_expired {
        shadow.remove_dos(&record.collateral);
        undo.expired_dos.push(record);
    }

    // Step 5: confirmed nodes expire by missed re-confirm or by their
    // collateral being spent in this block.
    let mut confirmed_expired = Vec::new();
    shadow.for_each_confirmed(state, |record| {
        if record.last_confirmed_height + params.confirm_expiration <= height
            || spent_set.contains(&record.collateral)
        {
            confirmed_expired.push(record.clone());
        }
    });
    sort_sweep(&mut confirmed_expired);
    for record in confirmed_expired {
        shadow.remove_confirmed(&record.collateral);
        undo.expired_confirmed.push(record);
    }

    // Step 6: rotate the payees selected in step 1, if they survived.
    for (tier, outpoint) in to_pay {
        let Some(record) = shadow.confirmed_record(state, &outpoint) else {
            continue;
        };
        let mut record = record.clone();
        if record.tier != tier {
            return Err(RegistryError::Invariant("paid node tier mismatch"));
        }
        undo.last_paid_heights
            .insert(outpoint, record.last_paid_height);
        record.last_paid_height = height;
        shadow.insert_confirmed(record);
    }

    Ok((shadow, undo))
}

#[allow(clippy::too_many_arguments)]
fn apply_node_tx(
    state: &RegistryState,
    params: &RegistryParams,
    height: u32,
    utxo: &dyn UtxoView,
    node_tx: &NodeTx,
    block_collaterals: &mut BTreeSet<OutPoint>,
    shadow: &mut ShadowCache,
    undo: &mut BlockUndo,
) -> Result<(), RegistryError> {
    validate_node_tx(node_tx).map_err(RegistryError::Consensus)?;

    let collateral = *node_tx.collateral();
    if !block_collaterals.insert(collateral) {
        return Err(RegistryError::Consensus(
            "duplicate node collateral in block",
        ));
    }

    let coin = utxo
        .lookup_output(&collateral)
        .ok_or(RegistryError::Consensus("node collateral not found"))?;
    let tier = classify_collateral(height, coin.value, params).ok_or(RegistryError::Consensus(
        "node collateral amount matches no tier",
    ))?;
    if height.saturating_sub(coin.height) < params.collateral_maturity {
        return Err(RegistryError::Consensus("node collateral is immature"));
    }

    match node_tx {
        NodeTx::Start(start) => {
            if shadow.location(state, &collateral).is_some() {
                return Err(RegistryError::Consensus(
                    "node collateral already tracked",
                ));
            }
            shadow.insert_start(NodeRecord {
                collateral,
                collateral_amount: coin.value,
                tier,
                collateral_script: start.collateral_script.clone(),
                operator_pubkey: start.operator_pubkey.clone(),
                ip: String::new(),
                added_height: height,
                confirmed_height: 0,
                last_confirmed_height: 0,
                last_paid_height: 0,
            });
        }
        NodeTx::Confirm(confirm) => match confirm.kind {
            ConfirmKind::Initial => {
                let mut record = shadow
                    .start_record(state, &collateral)
                    .cloned()
                    .ok_or(RegistryError::Consensus(
                        "initial confirm for unstarted node",
                    ))?;
                if record.tier != tier {
                    return Err(RegistryError::Consensus(
                        "node collateral reclassified since start",
                    ));
                }
                shadow.remove_start(&collateral);
                record.confirmed_height = height;
                record.last_confirmed_height = height;
                record.ip = confirm.ip.clone();
                shadow.insert_confirmed(record);
            }
            ConfirmKind::Update => {
                let mut record = shadow
                    .confirmed_record(state, &collateral)
                    .cloned()
                    .ok_or(RegistryError::Consensus(
                        "update confirm for unconfirmed node",
                    ))?;
                if record.tier != tier {
                    return Err(RegistryError::Consensus(
                        "node collateral reclassified since confirm",
                    ));
                }
                undo.last_confirm_heights
                    .insert(collateral, record.last_confirmed_height);
                undo.last_ips.insert(collateral, record.ip.clone());
                record.last_confirmed_height = height;
                record.ip = confirm.ip.clone();
                shadow.insert_confirmed(record);
            }
        },
    }
    Ok(())
}

/// Reverses one block. Runs the apply steps backwards; the created and
/// promoted records carry their own markers (`added_height == height`,
/// `confirmed_height == height`), everything else comes out of the undo
/// record.
pub(crate) fn revert_block(
    state: &RegistryState,
    params: &RegistryParams,
    height: u32,
    undo: &BlockUndo,
) -> Result<ShadowCache, RegistryError> {
    let mut shadow = ShadowCache::new();

    // Step 6 inverse: restore the prior last-paid heights.
    for (outpoint, prior) in &undo.last_paid_heights {
        let mut record = shadow
            .confirmed_record(state, outpoint)
            .cloned()
            .ok_or(RegistryError::Invariant("undo payment for unknown node"))?;
        record.last_paid_height = *prior;
        shadow.insert_confirmed(record);
    }

    // Step 5 inverse: evicted confirmed records come back; the queue entry
    // is derived from the restored fields.
    for record in &undo.expired_confirmed {
        if shadow.location(state, &record.collateral).is_some() {
            return Err(RegistryError::Invariant(
                "undo restores an already tracked outpoint",
            ));
        }
        shadow.insert_confirmed(record.clone());
    }

    // Step 4 inverse: deleted DoS records come back.
    for record in &undo.expired_dos {
        if shadow.location(state, &record.collateral).is_some() {
            return Err(RegistryError::Invariant(
                "undo restores an already tracked outpoint",
            ));
        }
        shadow.insert_dos(record.clone());
    }

    // Step 3 inverse: entries that moved to the DoS tracker at this height
    // go back to the start tracker.
    let mut moved_back = Vec::new();
    shadow.for_each_dos(state, |record| {
        if record.added_height + params.start_expiration == height {
            moved_back.push(record.clone());
        }
    });
    sort_sweep(&mut moved_back);
    for record in moved_back {
        shadow.remove_dos(&record.collateral);
        shadow.insert_start(record);
    }

    // Step 2 inverse, update confirms: restore height and endpoint.
    for (outpoint, prior) in &undo.last_confirm_heights {
        let mut record = shadow
            .confirmed_record(state, outpoint)
            .cloned()
            .ok_or(RegistryError::Invariant(
                "undo update-confirm for unknown node",
            ))?;
        record.last_confirmed_height = *prior;
        if let Some(prior_ip) = undo.last_ips.get(outpoint) {
            record.ip = prior_ip.clone();
        }
        shadow.insert_confirmed(record);
    }

    // Step 2 inverse, initial confirms: demote back to the start tracker.
    let mut demoted = Vec::new();
    shadow.for_each_confirmed(state, |record| {
        if record.confirmed_height == height {
            demoted.push(record.clone());
        }
    });
    sort_sweep(&mut demoted);
    for mut record in demoted {
        shadow.remove_confirmed(&record.collateral);
        record.confirmed_height = 0;
        record.last_confirmed_height = 0;
        record.last_paid_height = 0;
        record.ip.clear();
        shadow.insert_start(record);
    }

    // Step 2 inverse, starts: records created at this height disappear.
    let mut created = Vec::new();
    shadow.for_each_start(state, |record| {
        if record.added_height == height {
            created.push(record.collateral);
        }
    });
    for outpoint in created {
        shadow.remove_start(&outpoint);
    }

    Ok(shadow)
}

/// Expiration sweeps iterate in ascending `added_height` with the outpoint
/// as tie-break, so the undo record bytes are identical across runs.
fn sort_sweep(records: &mut [NodeRecord]) {
    records.sort_by(|a, b| {
        (a.added_height, a.collateral).cmp(&(b.added_height, b.collateral))
    });
}
