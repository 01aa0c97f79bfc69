//! The canonical record of a registered node.

use fluxnode_consensus::{Amount, Tier};
use fluxnode_primitives::encoding::{
    Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use fluxnode_primitives::nodetx::CollateralScript;
use fluxnode_primitives::outpoint::OutPoint;

/// One registered node, keyed by its collateral outpoint.
///
/// The serialized form feeds both the persistent store and the undo log:
/// fields in declaration order, varints for tier and heights, fixed-width
/// amount, length-prefixed keys and strings. Changing it is a
/// storage-format break.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    pub collateral: OutPoint,
    pub collateral_amount: Amount,
    pub tier: Tier,
    pub collateral_script: CollateralScript,
    pub operator_pubkey: Vec<u8>,
    /// Endpoint advertised by the node; empty until the first confirm.
    pub ip: String,
    pub added_height: u32,
    /// Height of the initial confirm, or 0 while unconfirmed.
    pub confirmed_height: u32,
    pub last_confirmed_height: u32,
    pub last_paid_height: u32,
}

impl NodeRecord {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_height > 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        fluxnode_primitives::encoding::decode(bytes)
    }
}

impl Encodable for NodeRecord {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.collateral.consensus_encode(encoder);
        encoder.write_i64_le(self.collateral_amount);
        encoder.write_varint(self.tier.as_u8() as u64);
        self.collateral_script.consensus_encode(encoder);
        encoder.write_var_bytes(&self.operator_pubkey);
        encoder.write_var_str(&self.ip);
        encoder.write_varint(self.added_height as u64);
        encoder.write_varint(self.confirmed_height as u64);
        encoder.write_varint(self.last_confirmed_height as u64);
        encoder.write_varint(self.last_paid_height as u64);
    }
}

impl Decodable for NodeRecord {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let collateral = OutPoint::consensus_decode(decoder)?;
        let collateral_amount = decoder.read_i64_le()?;
        let tier_raw = decoder.read_varint()?;
        let tier = u8::try_from(tier_raw)
            .ok()
            .and_then(Tier::from_u8)
            .ok_or(DecodeError::InvalidData("unknown node tier"))?;
        let collateral_script = CollateralScript::consensus_decode(decoder)?;
        let operator_pubkey = decoder.read_var_bytes()?;
        let ip = decoder.read_var_str()?;
        let added_height = read_height(decoder)?;
        let confirmed_height = read_height(decoder)?;
        let last_confirmed_height = read_height(decoder)?;
        let last_paid_height = read_height(decoder)?;
        Ok(Self {
            collateral,
            collateral_amount,
            tier,
            collateral_script,
            operator_pubkey,
            ip,
            added_height,
            confirmed_height,
            last_confirmed_height,
            last_paid_height,
        })
    }
}

fn read_height(decoder: &mut Decoder) -> Result<u32, DecodeError> {
    u32::try_from(decoder.read_varint()?)
        .map_err(|_| DecodeError::InvalidData("height out of range"))
}
