//! Operator-facing query surface.
//!
//! Builders for the JSON responses the node's RPC layer serves. Field
//! names and ordering follow the daemon's historical output, so existing
//! tooling keeps parsing.

use fluxnode_consensus::{Amount, Tier, COIN};
use fluxnode_primitives::address::script_pubkey_to_address;
use fluxnode_primitives::outpoint::OutPoint;
use fluxnode_storage::KeyValueStore;
use serde_json::{json, Map, Value};

use crate::error::RegistryError;
use crate::record::NodeRecord;
use crate::registry::{ChainSource, Registry, UtxoView};

/// All confirmed nodes, tier by tier in ascending order, ranked by queue
/// position. `filter` substring-matches the collateral, endpoint, address,
/// and tier name.
pub fn list_nodes<S: KeyValueStore>(
    registry: &Registry<S>,
    chain: &dyn ChainSource,
    utxo: &dyn UtxoView,
    filter: Option<&str>,
    tier_filter: Option<Tier>,
) -> Result<Value, RegistryError> {
    if !chain.is_synced() {
        return Err(RegistryError::NotApplicable(
            "wait until the chain is synced closer to the tip",
        ));
    }

    let mut list = Vec::new();
    for tier in Tier::ALL {
        if tier_filter.is_some_and(|wanted| wanted != tier) {
            continue;
        }
        let mut entries: Vec<(usize, NodeRecord)> = registry
            .confirmed_entries()
            .into_iter()
            .filter(|record| record.tier == tier)
            .filter_map(|record| {
                registry
                    .queue_position(tier, &record.collateral)
                    .map(|rank| (rank, record))
            })
            .collect();
        entries.sort_by_key(|(rank, _)| *rank);

        for (rank, record) in entries {
            let payment_address = payment_address(registry, utxo, &record);
            if let Some(filter) = filter {
                if !matches_filter(&record, payment_address.as_deref(), filter) {
                    continue;
                }
            }
            let mut info = Map::new();
            info.insert("collateral".into(), json!(record.collateral.to_string()));
            info.insert("txhash".into(), json!(record.collateral.txid_hex()));
            info.insert("outidx".into(), json!(record.collateral.vout));
            info.insert("ip".into(), json!(record.ip));
            info.insert("network".into(), json!(network_kind(&record.ip)));
            info.insert("added_height".into(), json!(record.added_height));
            info.insert("confirmed_height".into(), json!(record.confirmed_height));
            info.insert(
                "last_confirmed_height".into(),
                json!(record.last_confirmed_height),
            );
            info.insert("last_paid_height".into(), json!(record.last_paid_height));
            info.insert("tier".into(), json!(record.tier.as_str()));
            info.insert("payment_address".into(), json!(payment_address));
            info.insert("pubkey".into(), json!(hex(&record.operator_pubkey)));
            info.insert(
                "activesince".into(),
                json!(chain.block_time(record.added_height).unwrap_or(0)),
            );
            let lastpaid = if record.last_paid_height > 0 {
                chain.block_time(record.last_paid_height).unwrap_or(0)
            } else {
                0
            };
            info.insert("lastpaid".into(), json!(lastpaid));
            info.insert("rank".into(), json!(rank));
            info.insert("amount".into(), json!(format_money(record.collateral_amount)));
            list.push(Value::Object(info));
        }
    }
    Ok(Value::Array(list))
}

/// One node's lifecycle state and full record; absent nodes report as
/// expired, which is also what a spent collateral looks like.
pub fn node_status<S: KeyValueStore>(
    registry: &Registry<S>,
    chain: &dyn ChainSource,
    utxo: &dyn UtxoView,
    outpoint: &OutPoint,
) -> Result<Value, RegistryError> {
    let Some((kind, record)) = registry.node_record(outpoint) else {
        return Ok(json!({
            "status": "expired",
            "collateral": outpoint.to_string(),
        }));
    };

    let mut info = Map::new();
    info.insert("status".into(), json!(kind.as_str()));
    info.insert("collateral".into(), json!(record.collateral.to_string()));
    info.insert("txhash".into(), json!(record.collateral.txid_hex()));
    info.insert("outidx".into(), json!(record.collateral.vout));
    info.insert("ip".into(), json!(record.ip));
    info.insert("network".into(), json!(network_kind(&record.ip)));
    info.insert("added_height".into(), json!(record.added_height));
    info.insert("confirmed_height".into(), json!(record.confirmed_height));
    info.insert(
        "last_confirmed_height".into(),
        json!(record.last_confirmed_height),
    );
    info.insert("last_paid_height".into(), json!(record.last_paid_height));
    info.insert("tier".into(), json!(record.tier.as_str()));
    info.insert(
        "payment_address".into(),
        json!(payment_address(registry, utxo, &record)),
    );
    info.insert("pubkey".into(), json!(hex(&record.operator_pubkey)));
    info.insert(
        "activesince".into(),
        json!(chain.block_time(record.added_height).unwrap_or(0)),
    );
    let lastpaid = if record.last_paid_height > 0 {
        chain.block_time(record.last_paid_height).unwrap_or(0)
    } else {
        0
    };
    info.insert("lastpaid".into(), json!(lastpaid));
    info.insert("amount".into(), json!(format_money(record.collateral_amount)));
    Ok(Value::Object(info))
}

/// Start-tracker entries ordered by how soon they expire.
pub fn start_list<S: KeyValueStore>(
    registry: &Registry<S>,
    utxo: &dyn UtxoView,
) -> Result<Value, RegistryError> {
    let tip = registry.tip_height().unwrap_or(0) as i64;
    let expiration = registry.params().start_expiration as i64;

    let mut entries = registry.start_entries();
    entries.sort_by_key(|record| (record.added_height, record.collateral));
    let mut list = Vec::new();
    for record in entries {
        let expires_in = record.added_height as i64 + expiration - tip;
        list.push(json!({
            "collateral": record.collateral.to_string(),
            "added_height": record.added_height,
            "payment_address": payment_address(registry, utxo, &record),
            "expires_in": expires_in,
            "amount": format_money(record.collateral_amount),
        }));
    }
    Ok(Value::Array(list))
}

/// DoS-tracker entries ordered by how soon they become eligible again.
pub fn dos_list<S: KeyValueStore>(
    registry: &Registry<S>,
    utxo: &dyn UtxoView,
) -> Result<Value, RegistryError> {
    let tip = registry.tip_height().unwrap_or(0) as i64;
    let params = registry.params();
    let hold = (params.start_expiration + params.dos_remove) as i64;

    let mut entries = registry.dos_entries();
    entries.sort_by_key(|record| (record.added_height, record.collateral));
    let mut list = Vec::new();
    for record in entries {
        let eligible_in = record.added_height as i64 + hold - tip;
        list.push(json!({
            "collateral": record.collateral.to_string(),
            "added_height": record.added_height,
            "payment_address": payment_address(registry, utxo, &record),
            "eligible_in": eligible_in,
            "amount": format_money(record.collateral_amount),
        }));
    }
    Ok(Value::Array(list))
}

/// Totals, per-tier breakdown, and the endpoint network split.
pub fn node_count<S: KeyValueStore>(registry: &Registry<S>) -> Result<Value, RegistryError> {
    let confirmed = registry.confirmed_entries();
    let mut per_tier = [0usize; Tier::COUNT];
    let mut ipv4 = 0usize;
    let mut ipv6 = 0usize;
    let mut onion = 0usize;
    for record in &confirmed {
        per_tier[record.tier.index()] += 1;
        match network_kind(&record.ip) {
            "ipv6" => ipv6 += 1,
            "onion" => onion += 1,
            _ => ipv4 += 1,
        }
    }

    let mut info = Map::new();
    info.insert("total".into(), json!(confirmed.len()));
    info.insert("stable".into(), json!(confirmed.len()));
    for tier in Tier::ALL {
        let key = format!("{}-enabled", tier.as_str().to_ascii_lowercase());
        info.insert(key, json!(per_tier[tier.index()]));
    }
    info.insert("ipv4".into(), json!(ipv4));
    info.insert("ipv6".into(), json!(ipv6));
    info.insert("onion".into(), json!(onion));
    Ok(Value::Object(info))
}

/// The next payee of every tier that has one.
pub fn current_winner<S: KeyValueStore>(
    registry: &Registry<S>,
    utxo: &dyn UtxoView,
) -> Result<Value, RegistryError> {
    let mut info = Map::new();
    for tier in Tier::ALL {
        let Some(outpoint) = registry.next_payment(tier) else {
            continue;
        };
        let Some((_, record)) = registry.node_record(&outpoint) else {
            return Err(RegistryError::Invariant("winner missing from trackers"));
        };
        info.insert(
            format!("{} Winner", tier.as_str()),
            json!({
                "collateral": record.collateral.to_string(),
                "ip": record.ip,
                "added_height": record.added_height,
                "confirmed_height": record.confirmed_height,
                "last_confirmed_height": record.last_confirmed_height,
                "last_paid_height": record.last_paid_height,
                "tier": record.tier.as_str(),
                "payment_address": payment_address(registry, utxo, &record),
            }),
        );
    }
    Ok(Value::Object(info))
}

fn payment_address<S: KeyValueStore>(
    registry: &Registry<S>,
    utxo: &dyn UtxoView,
    record: &NodeRecord,
) -> Option<String> {
    let script = registry.payment_script(record, utxo)?;
    script_pubkey_to_address(&script, registry.params().network)
}

fn matches_filter(record: &NodeRecord, payment_address: Option<&str>, filter: &str) -> bool {
    record.collateral.to_string().contains(filter)
        || record.ip.contains(filter)
        || record.tier.as_str().contains(filter)
        || payment_address.is_some_and(|address| address.contains(filter))
}

/// Classifies an advertised endpoint as IPv4, IPv6, or onion.
fn network_kind(ip: &str) -> &'static str {
    let host = if let Some(rest) = ip.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if ip.matches(':').count() > 1 {
        ip
    } else {
        ip.split(':').next().unwrap_or(ip)
    };
    if host.ends_with(".onion") {
        "onion"
    } else if host.contains(':') {
        "ipv6"
    } else {
        "ipv4"
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn format_money(amount: Amount) -> String {
    format!("{}.{:08}", amount / COIN, (amount % COIN).abs())
}

#[cfg(test)]
mod tests {
    use super::{format_money, network_kind};
    use fluxnode_consensus::COIN;

    #[test]
    fn classifies_endpoints() {
        assert_eq!(network_kind("203.0.113.7:16125"), "ipv4");
        assert_eq!(network_kind("203.0.113.7"), "ipv4");
        assert_eq!(network_kind("[2001:db8::1]:16125"), "ipv6");
        assert_eq!(network_kind("2001:db8::1"), "ipv6");
        assert_eq!(
            network_kind("expyuzz4wqqyqhjn.onion:16125"),
            "onion"
        );
    }

    #[test]
    fn formats_money_in_coins() {
        assert_eq!(format_money(1_000 * COIN), "1000.00000000");
        assert_eq!(format_money(12_500 * COIN + 25), "12500.00000025");
    }
}
