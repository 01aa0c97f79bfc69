//! Node lifecycle transaction payloads.
//!
//! Three operations drive the registry: a start pledges collateral, an
//! initial confirm activates the node, and update confirms keep it alive.

use secp256k1::PublicKey;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::outpoint::OutPoint;

/// Consensus cap on a P2SH redeem script.
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 10_000;

/// How the collateral is held, which also determines the payment
/// destination: a plain public key pays its P2PKH address, a redeem script
/// pays the P2SH destination resolved from the collateral UTXO.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CollateralScript {
    Pubkey(Vec<u8>),
    P2sh(Vec<u8>),
}

impl Encodable for CollateralScript {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match self {
            CollateralScript::Pubkey(bytes) => {
                encoder.write_u8(0);
                encoder.write_var_bytes(bytes);
            }
            CollateralScript::P2sh(bytes) => {
                encoder.write_u8(1);
                encoder.write_var_bytes(bytes);
            }
        }
    }
}

impl Decodable for CollateralScript {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        match decoder.read_u8()? {
            0 => Ok(CollateralScript::Pubkey(decoder.read_var_bytes()?)),
            1 => Ok(CollateralScript::P2sh(decoder.read_var_bytes()?)),
            _ => Err(DecodeError::InvalidData("unknown collateral script tag")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartTx {
    pub collateral: OutPoint,
    pub collateral_script: CollateralScript,
    pub operator_pubkey: Vec<u8>,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfirmKind {
    Initial = 0,
    Update = 1,
}

impl ConfirmKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ConfirmKind::Initial),
            1 => Some(ConfirmKind::Update),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfirmTx {
    pub collateral: OutPoint,
    pub kind: ConfirmKind,
    /// Endpoint the node advertises, e.g. `203.0.113.7:16125`.
    pub ip: String,
    pub sig_time: i64,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeTx {
    Start(StartTx),
    Confirm(ConfirmTx),
}

impl NodeTx {
    pub fn collateral(&self) -> &OutPoint {
        match self {
            NodeTx::Start(tx) => &tx.collateral,
            NodeTx::Confirm(tx) => &tx.collateral,
        }
    }
}

/// Structural checks that do not need chain context. Signature verification
/// belongs to the validation layer above the registry.
pub fn validate_node_tx(tx: &NodeTx) -> Result<(), &'static str> {
    match tx {
        NodeTx::Start(start) => {
            if start.collateral.is_null() {
                return Err("node start has null collateral");
            }
            if start.operator_pubkey.len() != 33 {
                return Err("node operator pubkey must be compressed");
            }
            PublicKey::from_slice(&start.operator_pubkey)
                .map_err(|_| "node operator pubkey invalid")?;
            match &start.collateral_script {
                CollateralScript::Pubkey(pubkey) => {
                    if pubkey.is_empty() {
                        return Err("node start missing collateral pubkey");
                    }
                }
                CollateralScript::P2sh(redeem) => {
                    if redeem.is_empty() {
                        return Err("node start missing redeem script");
                    }
                    if redeem.len() > MAX_REDEEM_SCRIPT_SIZE {
                        return Err("node redeem script too large");
                    }
                }
            }
        }
        NodeTx::Confirm(confirm) => {
            if confirm.collateral.is_null() {
                return Err("node confirm has null collateral");
            }
            if confirm.ip.is_empty() {
                return Err("node confirm missing endpoint");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_pubkey() -> Vec<u8> {
        // secp256k1 generator point, compressed.
        let mut key = vec![0x02];
        key.extend_from_slice(&[
            0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87,
            0x0b, 0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b,
            0x16, 0xf8, 0x17, 0x98,
        ]);
        key
    }

    fn start_tx() -> StartTx {
        StartTx {
            collateral: OutPoint::new([0x11; 32], 0),
            collateral_script: CollateralScript::Pubkey(valid_pubkey()),
            operator_pubkey: valid_pubkey(),
            sig_time: 0,
            signature: Vec::new(),
        }
    }

    #[test]
    fn accepts_well_formed_start() {
        assert_eq!(validate_node_tx(&NodeTx::Start(start_tx())), Ok(()));
    }

    #[test]
    fn rejects_null_collateral() {
        let mut tx = start_tx();
        tx.collateral = OutPoint::null();
        assert!(validate_node_tx(&NodeTx::Start(tx)).is_err());
    }

    #[test]
    fn rejects_uncompressed_operator_key() {
        let mut tx = start_tx();
        tx.operator_pubkey = vec![0x04; 65];
        assert_eq!(
            validate_node_tx(&NodeTx::Start(tx)),
            Err("node operator pubkey must be compressed")
        );
    }

    #[test]
    fn rejects_garbage_operator_key() {
        let mut tx = start_tx();
        tx.operator_pubkey = vec![0x02; 33];
        assert_eq!(
            validate_node_tx(&NodeTx::Start(tx)),
            Err("node operator pubkey invalid")
        );
    }

    #[test]
    fn rejects_confirm_without_endpoint() {
        let tx = ConfirmTx {
            collateral: OutPoint::new([0x22; 32], 1),
            kind: ConfirmKind::Initial,
            ip: String::new(),
            sig_time: 0,
            signature: Vec::new(),
        };
        assert!(validate_node_tx(&NodeTx::Confirm(tx)).is_err());
    }

    #[test]
    fn collateral_script_round_trips() {
        use crate::encoding::{decode, encode};
        for script in [
            CollateralScript::Pubkey(valid_pubkey()),
            CollateralScript::P2sh(vec![0x51, 0x87]),
        ] {
            let bytes = encode(&script);
            assert_eq!(decode::<CollateralScript>(&bytes).unwrap(), script);
        }
    }
}
