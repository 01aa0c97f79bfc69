//! Shared fixtures for registry integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use fluxnode_consensus::{registry_params, Amount, Network, COIN};
use fluxnode_primitives::block::{Block, BlockTx};
use fluxnode_primitives::nodetx::{
    CollateralScript, ConfirmKind, ConfirmTx, NodeTx, StartTx,
};
use fluxnode_primitives::outpoint::OutPoint;
use fluxnode_registry::{ChainSource, CollateralOut, Registry, UtxoView};
use fluxnode_storage::memory::MemoryStore;

pub const CUMULUS_AMOUNT: Amount = 1_000 * COIN;
pub const NIMBUS_AMOUNT: Amount = 12_500 * COIN;
pub const STRATUS_AMOUNT: Amount = 40_000 * COIN;

/// secp256k1 generator point, compressed; a structurally valid pubkey.
pub fn operator_pubkey() -> Vec<u8> {
    let mut key = vec![0x02];
    key.extend_from_slice(&[
        0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87, 0x0b,
        0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16, 0xf8,
        0x17, 0x98,
    ]);
    key
}

pub fn outpoint(tag: u8) -> OutPoint {
    OutPoint::new([tag; 32], 0)
}

pub fn start_tx(collateral: OutPoint) -> BlockTx {
    BlockTx::Node(NodeTx::Start(StartTx {
        collateral,
        collateral_script: CollateralScript::Pubkey(operator_pubkey()),
        operator_pubkey: operator_pubkey(),
        sig_time: 0,
        signature: Vec::new(),
    }))
}

pub fn p2sh_start_tx(collateral: OutPoint, redeem: Vec<u8>) -> BlockTx {
    BlockTx::Node(NodeTx::Start(StartTx {
        collateral,
        collateral_script: CollateralScript::P2sh(redeem),
        operator_pubkey: operator_pubkey(),
        sig_time: 0,
        signature: Vec::new(),
    }))
}

pub fn confirm_tx(collateral: OutPoint, kind: ConfirmKind, ip: &str) -> BlockTx {
    BlockTx::Node(NodeTx::Confirm(ConfirmTx {
        collateral,
        kind,
        ip: ip.to_string(),
        sig_time: 0,
        signature: Vec::new(),
    }))
}

pub fn spend_tx(spends: Vec<OutPoint>) -> BlockTx {
    BlockTx::Standard { spends }
}

pub fn block(height: u32, tag: u8, txs: Vec<BlockTx>) -> Block {
    let mut hash = [tag; 32];
    hash[..4].copy_from_slice(&height.to_le_bytes());
    Block::new(hash, txs)
}

#[derive(Default)]
pub struct MockUtxo {
    outputs: HashMap<OutPoint, CollateralOut>,
}

impl MockUtxo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, outpoint: OutPoint, value: Amount, height: u32) {
        self.outputs.insert(
            outpoint,
            CollateralOut {
                value,
                script_pubkey: vec![0x76, 0xa9, 0x14],
                height,
            },
        );
    }

    pub fn add_with_script(
        &mut self,
        outpoint: OutPoint,
        value: Amount,
        height: u32,
        script_pubkey: Vec<u8>,
    ) {
        self.outputs.insert(
            outpoint,
            CollateralOut {
                value,
                script_pubkey,
                height,
            },
        );
    }
}

impl UtxoView for MockUtxo {
    fn lookup_output(&self, outpoint: &OutPoint) -> Option<CollateralOut> {
        self.outputs.get(outpoint).cloned()
    }
}

#[derive(Default)]
pub struct MockChain {
    blocks: HashMap<u32, Block>,
    pub synced: bool,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            synced: true,
        }
    }

    pub fn push(&mut self, height: u32, block: Block) {
        self.blocks.insert(height, block);
    }

    pub fn remove(&mut self, height: u32) {
        self.blocks.remove(&height);
    }
}

impl ChainSource for MockChain {
    fn tip_height(&self) -> Option<u32> {
        self.blocks.keys().copied().max()
    }

    fn block_at(&self, height: u32) -> Option<Block> {
        self.blocks.get(&height).cloned()
    }

    fn block_time(&self, height: u32) -> Option<u32> {
        Some(1_600_000_000 + height * 60)
    }

    fn is_synced(&self) -> bool {
        self.synced
    }
}

pub fn new_registry() -> Registry<Arc<MemoryStore>> {
    Registry::open(
        Arc::new(MemoryStore::new()),
        registry_params(Network::Regtest),
    )
    .expect("open registry")
}

pub fn new_registry_on(store: Arc<MemoryStore>) -> Registry<Arc<MemoryStore>> {
    Registry::open(store, registry_params(Network::Regtest)).expect("open registry")
}

/// Applies an empty block at `height`, asserting it is accepted.
pub fn apply_empty(registry: &Registry<Arc<MemoryStore>>, utxo: &MockUtxo, height: u32) {
    let block = block(height, 0xee, Vec::new());
    registry
        .apply(height, block.hash, &block, utxo)
        .expect("apply empty block");
}
