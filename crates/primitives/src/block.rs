//! The reduced block record the registry consumes.
//!
//! The chain engine strips each block down to the inputs spent by ordinary
//! transactions plus the node transactions, in block order. The coinbase is
//! omitted; its node payouts are derived, not observed.

use fluxnode_consensus::Hash256;

use crate::nodetx::NodeTx;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlockTx {
    /// A non-coinbase, non-node transaction, reduced to the prevouts it
    /// spends.
    Standard { spends: Vec<OutPoint> },
    Node(NodeTx),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub hash: Hash256,
    pub txs: Vec<BlockTx>,
}

impl Block {
    pub fn new(hash: Hash256, txs: Vec<BlockTx>) -> Self {
        Self { hash, txs }
    }

    pub fn node_txs(&self) -> impl Iterator<Item = &NodeTx> {
        self.txs.iter().filter_map(|tx| match tx {
            BlockTx::Node(node_tx) => Some(node_tx),
            BlockTx::Standard { .. } => None,
        })
    }
}
