//! Core registry types and consensus serialization.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod nodetx;
pub mod outpoint;

pub use address::{script_pubkey_to_address, AddressError};
pub use block::{Block, BlockTx};
pub use hash::{hash160, sha256, sha256d};
pub use nodetx::{validate_node_tx, CollateralScript, ConfirmKind, ConfirmTx, NodeTx, StartTx};
pub use outpoint::OutPoint;
