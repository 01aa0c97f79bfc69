//! Chain-wide constants and registry consensus parameters.

pub mod money;
pub mod params;
pub mod tiers;

pub type Hash256 = [u8; 32];

pub use money::{Amount, COIN, MAX_MONEY};
pub use params::{registry_params, Network, RegistryParams, TierCollateral};
pub use tiers::{classify_collateral, collateral_matches_tier, Tier};
