//! Collateral outpoint type.

use std::fmt;

use fluxnode_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Identifies the UTXO whose amount pledges a node into a tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    /// Canonical store key for this outpoint.
    pub fn key_bytes(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(&self.txid);
        key[32..].copy_from_slice(&self.vout.to_le_bytes());
        key
    }

    /// Transaction hash in display (big-endian) hex.
    pub fn txid_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.txid.iter().rev() {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid_hex(), self.vout)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.txid);
        encoder.write_u32_le(self.vout);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash()?;
        let vout = decoder.read_u32_le()?;
        Ok(Self { txid, vout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn encoding_round_trips() {
        let outpoint = OutPoint::new([0xab; 32], 7);
        let bytes = encode(&outpoint);
        assert_eq!(bytes.len(), 36);
        assert_eq!(decode::<OutPoint>(&bytes).unwrap(), outpoint);
    }

    #[test]
    fn ordering_is_txid_then_vout() {
        let a = OutPoint::new([1u8; 32], 5);
        let b = OutPoint::new([1u8; 32], 6);
        let c = OutPoint::new([2u8; 32], 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn display_reverses_txid() {
        let mut txid = [0u8; 32];
        txid[0] = 0x01;
        let outpoint = OutPoint::new(txid, 3);
        let rendered = outpoint.to_string();
        assert!(rendered.ends_with("01:3"));
        assert!(rendered.starts_with("00"));
    }
}
