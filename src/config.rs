//! Chain parameters the engine reads: limits, minimum difficulties and the
//! height-indexed algorithm share table.

use crate::diff::compact_to_target;
use crate::error::Error;
use crate::pow::PowType;
use num_bigint::BigUint;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Upper bound on the target of a hash algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashLimit {
    #[serde(with = "hex_target")]
    pub pow_limit: BigUint,
    pub pow_limit_bits: u32,
}

impl HashLimit {
    /// Limit whose full value is the decoded compact bits.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            pow_limit: compact_to_target(bits),
            pow_limit_bits: bits,
        }
    }
}

/// Percent of network difficulty each algorithm is entitled to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Shares(pub BTreeMap<PowType, u32>);

impl<'de> Deserialize<'de> for Shares {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        unique_map(d).map(Shares)
    }
}

/// Read-only proof-of-work parameters, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowConfig {
    pub blake2bd: HashLimit,
    pub keccak256: HashLimit,
    /// Compact minimum difficulties of the graph algorithms.
    pub cuckaroo_min_difficulty: u32,
    pub cuckatoo_min_difficulty: u32,
    pub cuckaroom_min_difficulty: u32,
    /// Share tables keyed by the main height they take effect at.
    #[serde(deserialize_with = "unique_map")]
    pub percent: BTreeMap<u64, Shares>,
    pub adjustment_start_height: u64,
}

impl Default for PowConfig {
    fn default() -> Self {
        let mut shares = BTreeMap::new();
        shares.insert(PowType::Blake2bd, 10);
        shares.insert(PowType::Cuckaroo, 70);
        shares.insert(PowType::Cuckatoo, 20);
        Self {
            blake2bd: HashLimit::from_bits(0x207f_ffff),
            keccak256: HashLimit::from_bits(0x207f_ffff),
            cuckaroo_min_difficulty: 0x0160_0000,
            cuckatoo_min_difficulty: 0x0160_0000,
            cuckaroom_min_difficulty: 0x0160_0000,
            percent: BTreeMap::from([(0, Shares(shares))]),
            adjustment_start_height: 1440 * 15 / 30,
        }
    }
}

impl PowConfig {
    /// Every share table must sum to exactly 100.
    pub fn check(&self) -> Result<(), Error> {
        if self.percent.is_empty() {
            return Err(Error::InvalidConfig("percent table is empty".into()));
        }
        for (height, shares) in &self.percent {
            let total: u32 = shares.0.values().sum();
            if total != 100 {
                return Err(Error::InvalidConfig(format!(
                    "shares at height {height} sum to {total}, expected 100"
                )));
            }
        }
        for pow_type in [PowType::Blake2bd, PowType::Keccak256] {
            if let Some(limit) = self.hash_limit(pow_type) {
                if limit.pow_limit.bits() == 0 {
                    return Err(Error::InvalidConfig(format!("{pow_type} pow limit is zero")));
                }
            }
        }
        Ok(())
    }

    /// Parse and check a JSON config.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Share of `pow_type` from the latest table at or below `height`.
    pub fn percent_at(&self, height: u64, pow_type: PowType) -> u32 {
        self.percent
            .range(..=height)
            .next_back()
            .and_then(|(_, shares)| shares.0.get(&pow_type))
            .copied()
            .unwrap_or(0)
    }

    /// Configured share as `percent << 32`.
    pub fn target_share(&self, height: u64, pow_type: PowType) -> BigUint {
        BigUint::from(self.percent_at(height, pow_type)) << 32
    }

    pub fn hash_limit(&self, pow_type: PowType) -> Option<&HashLimit> {
        match pow_type {
            PowType::Blake2bd => Some(&self.blake2bd),
            PowType::Keccak256 => Some(&self.keccak256),
            _ => None,
        }
    }

    /// Compact minimum difficulty of a graph algorithm.
    pub fn min_difficulty(&self, pow_type: PowType) -> Option<u32> {
        match pow_type {
            PowType::Cuckaroo => Some(self.cuckaroo_min_difficulty),
            PowType::Cuckatoo => Some(self.cuckatoo_min_difficulty),
            PowType::Cuckaroom => Some(self.cuckaroom_min_difficulty),
            _ => None,
        }
    }
}

/// Deserialize a map, rejecting repeated keys instead of keeping the last one.
fn unique_map<'de, D, K, V>(d: D) -> Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord + fmt::Debug,
    V: Deserialize<'de>,
{
    struct UniqueVisitor<K, V>(PhantomData<(K, V)>);

    impl<'de, K, V> Visitor<'de> for UniqueVisitor<K, V>
    where
        K: Deserialize<'de> + Ord + fmt::Debug,
        V: Deserialize<'de>,
    {
        type Value = BTreeMap<K, V>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map without repeated keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = BTreeMap::new();
            while let Some((key, value)) = access.next_entry::<K, V>()? {
                if map.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate key {key:?}")));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    d.deserialize_map(UniqueVisitor(PhantomData))
}

mod hex_target {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{value:064x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(d)?;
        let digits = text.strip_prefix("0x").unwrap_or(&text);
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| de::Error::custom(format!("invalid hex target {text:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PowConfig::default();
        assert_eq!(config.check(), Ok(()));
        assert_eq!(config.percent_at(0, PowType::Cuckaroo), 70);
        assert_eq!(config.percent_at(0, PowType::Cuckaroom), 0);
    }

    #[test]
    fn percent_uses_latest_table_at_or_below_height() {
        let mut config = PowConfig::default();
        config.percent.insert(
            100,
            Shares(BTreeMap::from([(PowType::Cuckaroom, 60), (PowType::Keccak256, 40)])),
        );
        assert_eq!(config.percent_at(99, PowType::Cuckaroom), 0);
        assert_eq!(config.percent_at(100, PowType::Cuckaroom), 60);
        assert_eq!(config.percent_at(5000, PowType::Keccak256), 40);
        assert_eq!(config.percent_at(5000, PowType::Blake2bd), 0);
        assert_eq!(config.target_share(100, PowType::Keccak256), BigUint::from(40u64 << 32));
    }

    #[test]
    fn check_rejects_bad_sums() {
        let mut config = PowConfig::default();
        config
            .percent
            .insert(10, Shares(BTreeMap::from([(PowType::Blake2bd, 99)])));
        assert!(matches!(config.check(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn json_round_trip() {
        let config = PowConfig::default();
        let json = config.to_json().expect("serializable");
        assert!(json.contains("\"cuckaroo\": 70"));
        assert_eq!(PowConfig::from_json(&json), Ok(config));
    }

    #[test]
    fn json_rejects_duplicates_and_unknown_algorithms() {
        let json = PowConfig::default().to_json().expect("serializable");
        let dup = json.replace("\"cuckaroo\": 70", "\"cuckaroo\": 35,\n      \"cuckaroo\": 35");
        assert!(PowConfig::from_json(&dup).is_err());
        let unknown = json.replace("\"cuckaroo\": 70", "\"x16rv3\": 70");
        assert!(PowConfig::from_json(&unknown).is_err());
    }
}
