//! Rebuild equivalence and persistence round trips.

mod common;

use std::sync::Arc;

use common::*;
use fluxnode_primitives::nodetx::ConfirmKind;
use fluxnode_registry::{ChainSource, RegistryError};
use fluxnode_storage::memory::MemoryStore;

fn scripted_chain(utxo: &mut MockUtxo) -> MockChain {
    let a = outpoint(0xe1);
    let b = outpoint(0xe2);
    let c = outpoint(0xe3);
    utxo.add(a, CUMULUS_AMOUNT, 1);
    utxo.add(b, NIMBUS_AMOUNT, 1);
    utxo.add(c, CUMULUS_AMOUNT, 1);

    let mut chain = MockChain::new();
    chain.push(2, block(2, 1, vec![start_tx(a), start_tx(b)]));
    chain.push(
        3,
        block(3, 2, vec![confirm_tx(a, ConfirmKind::Initial, "10.5.0.1:16125")]),
    );
    chain.push(
        4,
        block(
            4,
            3,
            vec![
                confirm_tx(b, ConfirmKind::Initial, "10.5.0.2:16125"),
                start_tx(c),
            ],
        ),
    );
    chain.push(
        5,
        block(5, 4, vec![confirm_tx(a, ConfirmKind::Update, "10.5.0.9:16125")]),
    );
    chain.push(6, block(6, 5, vec![spend_tx(vec![b])]));
    for height in 7..=12 {
        chain.push(height, block(height, 0x50 + height as u8, vec![]));
    }
    chain
}

fn drive(registry: &fluxnode_registry::Registry<Arc<MemoryStore>>, chain: &MockChain, utxo: &MockUtxo) {
    let mut height = 2;
    while let Some(block) = chain.block_at(height) {
        registry
            .apply(height, block.hash, &block, utxo)
            .expect("apply");
        height += 1;
    }
}

#[test]
fn rebuild_matches_incremental_state() {
    let mut utxo = MockUtxo::new();
    let chain = scripted_chain(&mut utxo);

    let incremental = new_registry();
    drive(&incremental, &chain, &utxo);

    let rebuilt = new_registry();
    rebuilt.rebuild(2, &chain, &utxo).expect("rebuild");

    assert_eq!(incremental.serialize_state(), rebuilt.serialize_state());
    assert_eq!(incremental.tip_height(), rebuilt.tip_height());
    rebuilt.check_invariants().expect("invariants");
}

#[test]
fn rebuild_replaces_existing_state() {
    let mut utxo = MockUtxo::new();
    let chain = scripted_chain(&mut utxo);

    let registry = new_registry();
    drive(&registry, &chain, &utxo);
    let before = registry.serialize_state();

    registry.rebuild(2, &chain, &utxo).expect("rebuild");
    assert_eq!(registry.serialize_state(), before);
}

#[test]
fn failed_rebuild_leaves_state_untouched() {
    let mut utxo = MockUtxo::new();
    let mut chain = scripted_chain(&mut utxo);

    let registry = new_registry();
    drive(&registry, &chain, &utxo);
    let before = registry.serialize_state();

    // A hole in the chain aborts the replay before the swap.
    chain.remove(5);
    let err = registry.rebuild(2, &chain, &utxo).unwrap_err();
    assert!(matches!(err, RegistryError::Invariant(_)));
    assert_eq!(registry.serialize_state(), before);
    assert_eq!(registry.tip_height(), Some(12));
}

#[test]
fn reopen_restores_identical_state() {
    let mut utxo = MockUtxo::new();
    let chain = scripted_chain(&mut utxo);

    let store = Arc::new(MemoryStore::new());
    let registry = new_registry_on(Arc::clone(&store));
    drive(&registry, &chain, &utxo);
    registry.flush().expect("flush");
    let before = registry.serialize_state();
    let tip = registry.tip_height();
    drop(registry);

    let reopened = new_registry_on(store);
    assert_eq!(reopened.serialize_state(), before);
    assert_eq!(reopened.tip_height(), tip);
    reopened.check_invariants().expect("invariants");
}

#[test]
fn reopen_after_rebuild_restores_identical_state() {
    let mut utxo = MockUtxo::new();
    let chain = scripted_chain(&mut utxo);

    let store = Arc::new(MemoryStore::new());
    let registry = new_registry_on(Arc::clone(&store));
    registry.rebuild(2, &chain, &utxo).expect("rebuild");
    let before = registry.serialize_state();
    drop(registry);

    let reopened = new_registry_on(store);
    assert_eq!(reopened.serialize_state(), before);
}

#[test]
fn undo_data_is_pruned_outside_reorg_horizon() {
    // Regtest keeps 20 blocks of undo; drive far enough past it.
    let mut utxo = MockUtxo::new();
    let node = outpoint(0xe9);
    utxo.add(node, CUMULUS_AMOUNT, 1);

    let registry = new_registry();
    let b2 = block(2, 1, vec![start_tx(node)]);
    let undo2 = registry.apply(2, b2.hash, &b2, &utxo).expect("start");
    assert!(undo2.is_empty());
    let b3 = block(
        3,
        2,
        vec![confirm_tx(node, ConfirmKind::Initial, "10.6.0.1:16125")],
    );
    registry.apply(3, b3.hash, &b3, &utxo).expect("confirm");

    // Keep the node alive so every paid block writes an undo row.
    let mut last_block = None;
    for height in 4..=40 {
        let txs = if height % 8 == 0 {
            vec![confirm_tx(node, ConfirmKind::Update, "10.6.0.1:16125")]
        } else {
            Vec::new()
        };
        let b = block(height, 0x60, txs);
        registry.apply(height, b.hash, &b, &utxo).expect("apply");
        last_block = Some(b);
    }

    // Height 10 was paid (undo row written) but now sits 30 below the tip.
    let b10_hash = {
        let mut hash = [0x60; 32];
        hash[..4].copy_from_slice(&10u32.to_le_bytes());
        hash
    };
    assert!(registry.undo_data(10, b10_hash).expect("load").is_none());
    // The tip's row is still present.
    let tip_block = last_block.unwrap();
    assert!(registry.undo_data(40, tip_block.hash).expect("load").is_some());
}
