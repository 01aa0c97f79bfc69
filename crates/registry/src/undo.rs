//! Per-block undo data.

use std::collections::BTreeMap;

use fluxnode_primitives::encoding::{
    Decodable, DecodeError, Decoder, Encodable, Encoder,
};
use fluxnode_primitives::outpoint::OutPoint;

use crate::record::NodeRecord;

/// Everything needed to reverse one block's registry mutations.
///
/// Serialization order is part of the on-disk format: expired DoS records,
/// expired confirmed records, prior last-confirm heights, prior last-paid
/// heights, then the prior-IP map. The IP map was appended after the format
/// shipped, so decoders treat end-of-stream after the fourth field as an
/// empty map while encoders always emit it. That tail is the format's sole
/// extension point; anything further needs a version byte.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    /// Records deleted from the DoS tracker this block.
    pub expired_dos: Vec<NodeRecord>,
    /// Records evicted from the confirmed tracker this block.
    pub expired_confirmed: Vec<NodeRecord>,
    /// Prior `last_confirmed_height` of every record update-confirmed this
    /// block.
    pub last_confirm_heights: BTreeMap<OutPoint, u32>,
    /// Prior `last_paid_height` of every record paid this block.
    pub last_paid_heights: BTreeMap<OutPoint, u32>,
    /// Prior `ip` of every record update-confirmed this block.
    pub last_ips: BTreeMap<OutPoint, String>,
}

impl BlockUndo {
    pub fn is_empty(&self) -> bool {
        self.expired_dos.is_empty()
            && self.expired_confirmed.is_empty()
            && self.last_confirm_heights.is_empty()
            && self.last_paid_heights.is_empty()
            && self.last_ips.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        write_records(&mut encoder, &self.expired_dos);
        write_records(&mut encoder, &self.expired_confirmed);
        encoder.write_varint(self.last_confirm_heights.len() as u64);
        for (outpoint, height) in &self.last_confirm_heights {
            outpoint.consensus_encode(&mut encoder);
            encoder.write_varint(*height as u64);
        }
        encoder.write_varint(self.last_paid_heights.len() as u64);
        for (outpoint, height) in &self.last_paid_heights {
            outpoint.consensus_encode(&mut encoder);
            encoder.write_varint(*height as u64);
        }
        encoder.write_varint(self.last_ips.len() as u64);
        for (outpoint, ip) in &self.last_ips {
            outpoint.consensus_encode(&mut encoder);
            encoder.write_var_str(ip);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let expired_dos = read_records(&mut decoder)?;
        let expired_confirmed = read_records(&mut decoder)?;
        let last_confirm_heights = read_height_map(&mut decoder)?;
        let last_paid_heights = read_height_map(&mut decoder)?;
        let last_ips = if decoder.is_empty() {
            BTreeMap::new()
        } else {
            let len = decoder.read_varint()? as usize;
            let mut map = BTreeMap::new();
            for _ in 0..len {
                let outpoint = OutPoint::consensus_decode(&mut decoder)?;
                let ip = decoder.read_var_str()?;
                map.insert(outpoint, ip);
            }
            map
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            expired_dos,
            expired_confirmed,
            last_confirm_heights,
            last_paid_heights,
            last_ips,
        })
    }
}

fn write_records(encoder: &mut Encoder, records: &[NodeRecord]) {
    encoder.write_varint(records.len() as u64);
    for record in records {
        encoder.write_var_bytes(&record.encode());
    }
}

fn read_records(decoder: &mut Decoder) -> Result<Vec<NodeRecord>, DecodeError> {
    let len = decoder.read_varint()? as usize;
    let mut records = Vec::with_capacity(len);
    for _ in 0..len {
        let bytes = decoder.read_var_bytes()?;
        records.push(
            NodeRecord::decode(&bytes)
                .map_err(|_| DecodeError::InvalidData("invalid node record in undo"))?,
        );
    }
    Ok(records)
}

fn read_height_map(decoder: &mut Decoder) -> Result<BTreeMap<OutPoint, u32>, DecodeError> {
    let len = decoder.read_varint()? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..len {
        let outpoint = OutPoint::consensus_decode(decoder)?;
        let height = u32::try_from(decoder.read_varint()?)
            .map_err(|_| DecodeError::InvalidData("height out of range"))?;
        map.insert(outpoint, height);
    }
    Ok(map)
}
