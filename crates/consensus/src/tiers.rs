//! Node tiers and the collateral classifier.

use crate::money::Amount;
use crate::params::RegistryParams;

/// Collateral class of a node. Fixed at compile time; ordered by numeric
/// value, which is also the payment-selection order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Tier {
    Cumulus = 1,
    Nimbus = 2,
    Stratus = 3,
}

impl Tier {
    pub const COUNT: usize = 3;
    pub const ALL: [Tier; Tier::COUNT] = [Tier::Cumulus, Tier::Nimbus, Tier::Stratus];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Zero-based index into per-tier arrays.
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    pub fn from_u8(raw: u8) -> Option<Tier> {
        match raw {
            1 => Some(Tier::Cumulus),
            2 => Some(Tier::Nimbus),
            3 => Some(Tier::Stratus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Cumulus => "CUMULUS",
            Tier::Nimbus => "NIMBUS",
            Tier::Stratus => "STRATUS",
        }
    }
}

/// Maps a collateral amount at a height to its tier.
///
/// Tiers are probed in ascending order, so if a parameter update ever made
/// two schedules overlap the lower-numbered tier wins.
pub fn classify_collateral(height: u32, amount: Amount, params: &RegistryParams) -> Option<Tier> {
    Tier::ALL
        .into_iter()
        .find(|tier| collateral_matches_tier(height, amount, *tier, params))
}

pub fn collateral_matches_tier(
    height: u32,
    amount: Amount,
    tier: Tier,
    params: &RegistryParams,
) -> bool {
    let schedule = &params.collateral[tier.index()];
    if height < schedule.transition_start {
        amount == schedule.legacy_amount
    } else if height < schedule.transition_end {
        amount == schedule.legacy_amount || amount == schedule.amount
    } else {
        amount == schedule.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{registry_params, Network};

    #[test]
    fn tier_round_trip() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_u8(tier.as_u8()), Some(tier));
        }
        assert_eq!(Tier::from_u8(0), None);
        assert_eq!(Tier::from_u8(4), None);
    }

    #[test]
    fn classification_respects_transition_windows() {
        let params = registry_params(Network::Mainnet);
        let schedule = &params.collateral[Tier::Cumulus.index()];
        let before = schedule.transition_start - 1;
        let during = schedule.transition_start;
        let after = schedule.transition_end;

        assert_eq!(
            classify_collateral(before, schedule.legacy_amount, &params),
            Some(Tier::Cumulus)
        );
        assert_eq!(classify_collateral(before, schedule.amount, &params), None);
        assert_eq!(
            classify_collateral(during, schedule.legacy_amount, &params),
            Some(Tier::Cumulus)
        );
        assert_eq!(
            classify_collateral(during, schedule.amount, &params),
            Some(Tier::Cumulus)
        );
        assert_eq!(
            classify_collateral(after, schedule.legacy_amount, &params),
            None
        );
        assert_eq!(
            classify_collateral(after, schedule.amount, &params),
            Some(Tier::Cumulus)
        );
    }

    #[test]
    fn unmatched_amount_is_unclassified() {
        let params = registry_params(Network::Regtest);
        assert_eq!(classify_collateral(100, 1, &params), None);
        assert_eq!(classify_collateral(100, 0, &params), None);
    }

    #[test]
    fn overlap_resolves_to_lowest_tier() {
        let mut params = registry_params(Network::Regtest);
        // Force NIMBUS to share CUMULUS's amount; the classifier must pick
        // CUMULUS because it probes tiers in ascending order.
        params.collateral[Tier::Nimbus.index()].amount =
            params.collateral[Tier::Cumulus.index()].amount;
        let amount = params.collateral[Tier::Cumulus.index()].amount;
        assert_eq!(classify_collateral(50, amount, &params), Some(Tier::Cumulus));
    }
}
