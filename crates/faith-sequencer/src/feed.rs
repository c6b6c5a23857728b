//! Fixed-rate price feed.

use std::collections::HashMap;

use faith_core::error::FaithError;
use faith_core::traits::PriceFeedProvider;
use faith_core::types::AssetKind;

use crate::config::{FeedConfig, FeedRate};

/// Values deposits against a static rate table.
#[derive(Debug, Clone)]
pub struct FixedRateFeed {
    rates: HashMap<String, FeedRate>,
}

fn asset_name(asset: &AssetKind) -> String {
    match asset {
        AssetKind::Btc => "btc".into(),
        AssetKind::Eth => "eth".into(),
        AssetKind::Sol => "sol".into(),
        AssetKind::Usdc => "usdc".into(),
        AssetKind::Usdt => "usdt".into(),
        AssetKind::Other(name) => name.to_lowercase(),
    }
}

impl FixedRateFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            rates: config
                .rates
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
        }
    }
}

impl PriceFeedProvider for FixedRateFeed {
    /// `floor(amount * sats / per_units)`.
    fn btc_equivalent(&self, asset: &AssetKind, amount: u64) -> Result<u64, FaithError> {
        let name = asset_name(asset);
        let rate = self
            .rates
            .get(&name)
            .ok_or_else(|| FaithError::PriceFeed(format!("no rate for {name}")))?;
        if rate.per_units == 0 {
            return Err(FaithError::PriceFeed(format!("zero unit size for {name}")));
        }
        let sats = amount as u128 * rate.sats as u128 / rate.per_units as u128;
        u64::try_from(sats).map_err(|_| FaithError::PriceFeed(format!("{name} value overflows")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> FixedRateFeed {
        FixedRateFeed::new(&FeedConfig::default())
    }

    #[test]
    fn btc_is_identity() {
        assert_eq!(feed().btc_equivalent(&AssetKind::Btc, 12_345).unwrap(), 12_345);
    }

    #[test]
    fn one_eth_is_five_million_sats() {
        let wei = 1_000_000_000_000_000_000;
        assert_eq!(feed().btc_equivalent(&AssetKind::Eth, wei).unwrap(), 5_000_000);
    }

    #[test]
    fn stablecoin_rate() {
        // 25 USDC.
        assert_eq!(feed().btc_equivalent(&AssetKind::Usdc, 25_000_000).unwrap(), 25_000);
    }

    #[test]
    fn dust_rounds_down_to_zero() {
        assert_eq!(feed().btc_equivalent(&AssetKind::Eth, 1).unwrap(), 0);
    }

    #[test]
    fn unknown_asset_rejected() {
        let err = feed()
            .btc_equivalent(&AssetKind::Other("DOGE".into()), 1)
            .unwrap_err();
        assert!(matches!(err, FaithError::PriceFeed(_)));
    }

    #[test]
    fn other_asset_matched_case_insensitively() {
        let mut cfg = FeedConfig::default();
        cfg.rates.insert("Matic".into(), FeedRate { sats: 2, per_units: 1 });
        let f = FixedRateFeed::new(&cfg);
        assert_eq!(f.btc_equivalent(&AssetKind::Other("MATIC".into()), 10).unwrap(), 20);
    }
}
