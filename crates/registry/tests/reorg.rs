//! Reorg round trips: undo must be the exact inverse of apply.

mod common;

use common::*;
use fluxnode_consensus::Hash256;
use fluxnode_primitives::block::Block;
use fluxnode_primitives::nodetx::ConfirmKind;
use fluxnode_registry::BlockUndo;

/// Ten blocks mixing starts, confirms, update confirms, organic spends,
/// payments, and expirations.
fn scripted_blocks(utxo: &mut MockUtxo) -> Vec<(u32, Block)> {
    let a = outpoint(0xa1);
    let b = outpoint(0xa2);
    let c = outpoint(0xa3);
    let d = outpoint(0xa4);
    utxo.add(a, CUMULUS_AMOUNT, 1);
    utxo.add(b, NIMBUS_AMOUNT, 1);
    utxo.add(c, STRATUS_AMOUNT, 1);
    utxo.add(d, CUMULUS_AMOUNT, 1);

    vec![
        (2, block(2, 1, vec![start_tx(a), start_tx(b)])),
        (
            3,
            block(
                3,
                2,
                vec![
                    confirm_tx(a, ConfirmKind::Initial, "10.1.0.1:16125"),
                    start_tx(c),
                ],
            ),
        ),
        (
            4,
            block(
                4,
                3,
                vec![
                    confirm_tx(b, ConfirmKind::Initial, "10.1.0.2:16125"),
                    start_tx(d),
                ],
            ),
        ),
        (
            5,
            block(5, 4, vec![confirm_tx(c, ConfirmKind::Initial, "[2001:db8::7]:16125")]),
        ),
        (
            6,
            block(6, 5, vec![confirm_tx(a, ConfirmKind::Update, "10.1.0.9:16125")]),
        ),
        // d never confirms and an unrelated spend happens.
        (7, block(7, 6, vec![spend_tx(vec![outpoint(0xff)])])),
        (8, block(8, 7, vec![spend_tx(vec![b])])),
        // d hits start expiration at 9 (added 4 + 5).
        (9, block(9, 8, vec![])),
        (
            10,
            // Payments activate here; a and c rotate.
            block(10, 9, vec![confirm_tx(c, ConfirmKind::Update, "[2001:db8::8]:16125")]),
        ),
        (11, block(11, 10, vec![])),
    ]
}

#[test]
fn ten_block_reorg_restores_state_byte_for_byte() {
    let registry = new_registry();
    let mut utxo = MockUtxo::new();
    let blocks = scripted_blocks(&mut utxo);

    let mut snapshots: Vec<Vec<u8>> = vec![registry.serialize_state()];
    let mut undos: Vec<(u32, Hash256, BlockUndo)> = Vec::new();
    for (height, block) in &blocks {
        let undo = registry
            .apply(*height, block.hash, block, &utxo)
            .expect("apply");
        registry.check_invariants().expect("invariants");
        snapshots.push(registry.serialize_state());
        undos.push((*height, block.hash, undo));
    }

    for (index, (height, hash, undo)) in undos.iter().enumerate().rev() {
        registry.undo(*height, *hash, undo).expect("undo");
        registry.check_invariants().expect("invariants");
        assert_eq!(
            registry.serialize_state(),
            snapshots[index],
            "state mismatch after undoing height {height}"
        );
    }
    assert_eq!(registry.tip_height(), Some(1));
}

#[test]
fn apply_is_deterministic_across_runs() {
    let mut utxo = MockUtxo::new();
    let blocks = scripted_blocks(&mut utxo);

    let run = || {
        let registry = new_registry();
        let mut undo_bytes = Vec::new();
        for (height, block) in &blocks {
            let undo = registry
                .apply(*height, block.hash, block, &utxo)
                .expect("apply");
            undo_bytes.push(undo.encode());
        }
        (undo_bytes, registry.serialize_state())
    };

    let (undos_a, state_a) = run();
    let (undos_b, state_b) = run();
    assert_eq!(undos_a, undos_b);
    assert_eq!(state_a, state_b);
}

#[test]
fn undo_round_trips_through_the_store() {
    let registry = new_registry();
    let mut utxo = MockUtxo::new();
    let blocks = scripted_blocks(&mut utxo);

    for (height, block) in &blocks {
        registry
            .apply(*height, block.hash, block, &utxo)
            .expect("apply");
    }

    // The persisted undo record drives the same reversal as the returned
    // value.
    let (height, tip_block) = blocks.last().unwrap();
    let before = registry.serialize_state();
    let stored = registry
        .undo_data(*height, tip_block.hash)
        .expect("load undo")
        .expect("undo present");
    registry.undo(*height, tip_block.hash, &stored).expect("undo");
    assert_ne!(registry.serialize_state(), before);
    assert_eq!(registry.tip_height(), Some(height - 1));
}

#[test]
fn undo_rejects_non_tip_height() {
    let registry = new_registry();
    let mut utxo = MockUtxo::new();
    let blocks = scripted_blocks(&mut utxo);
    for (height, block) in &blocks {
        registry
            .apply(*height, block.hash, block, &utxo)
            .expect("apply");
    }
    let err = registry
        .undo(5, blocks[3].1.hash, &BlockUndo::default())
        .unwrap_err();
    assert!(matches!(
        err,
        fluxnode_registry::RegistryError::Consensus(_)
    ));
}
