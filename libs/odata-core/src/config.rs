//! Engine configuration and its layered loading.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::limits::ODataLimits;

/// Environment prefix for overrides, e.g. `ODATA__LIMITS__MAX_TOP=50`.
pub const ENV_PREFIX: &str = "ODATA__";

/// Plan cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of cached plans.
    pub max_entries: u64,

    /// Time-to-live for cached plans, e.g. `"10m"`. No expiry when unset.
    #[serde(with = "humantime_option")]
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: None,
        }
    }
}

/// Everything a [`crate::QueryEngine`] needs besides the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub limits: ODataLimits,
    pub cache: CacheConfig,
    /// Resolve property names ignoring ASCII case when no exact match exists.
    pub case_insensitive_properties: bool,
}

impl EngineConfig {
    /// Layered config:
    /// 1) defaults -> 2) YAML (if provided) -> 3) env (`ODATA__*`)
    ///
    /// # Errors
    /// Returns the figment error for unreadable files, malformed values and
    /// unknown keys.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    /// The provider stack behind [`Self::load`].
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

/// `Option<Duration>` as humantime text (`"90s"`, `"10m"`).
mod humantime_option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.collect_str(&humantime::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| humantime::parse_duration(&t).map_err(de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = EngineConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, EngineConfig::default());
            assert_eq!(config.cache.max_entries, 10_000);
            Ok(())
        });
    }

    #[test]
    fn yaml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "odata.yaml",
                r"
limits:
  max_top: 200
  max_expand_depth: 3
cache:
  ttl: 10m
case_insensitive_properties: true
",
            )?;
            jail.set_env("ODATA__LIMITS__MAX_TOP", "50");

            let config =
                EngineConfig::load(Some(Path::new("odata.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.limits.max_top, 50);
            assert_eq!(config.limits.max_expand_depth, 3);
            assert_eq!(config.cache.ttl, Some(Duration::from_secs(600)));
            assert!(config.case_insensitive_properties);
            Ok(())
        });
    }

    #[test]
    fn unknown_keys_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("odata.yaml", "limits:\n  max_topp: 1\n")?;
            assert!(EngineConfig::load(Some(Path::new("odata.yaml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn yaml_fixture_parses_with_humantime_ttl() {
        let config: EngineConfig = serde_saphyr::from_str(
            r"
cache:
  max_entries: 5
  ttl: 1m 30s
limits:
  max_skip: 10000
",
        )
        .unwrap();
        assert_eq!(config.cache.max_entries, 5);
        assert_eq!(config.cache.ttl, Some(Duration::from_secs(90)));
        assert_eq!(config.limits.max_skip, Some(10_000));
        assert_eq!(config.limits.max_top, ODataLimits::default().max_top);
    }

    #[test]
    fn ttl_serializes_as_humantime_text() {
        let config = CacheConfig {
            max_entries: 5,
            ttl: Some(Duration::from_secs(90)),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["ttl"], "1m 30s");
    }
}
