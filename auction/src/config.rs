use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::aggregator::CurrencyPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Timeout cannot be 0: {0}")]
    ZeroTimeout(&'static str),

    #[error("Default timeout {default_ms}ms exceeds maximum timeout {max_ms}ms")]
    DefaultExceedsMax { default_ms: u64, max_ms: u64 },

    #[error("Timeout margin {margin_ms}ms leaves no time for bidders (max timeout {max_ms}ms)")]
    MarginTooLarge { margin_ms: u64, max_ms: u64 },

    #[error("Duplicate bidder name: {0}")]
    DuplicateBidder(String),

    #[error("Empty bidder name")]
    EmptyBidderName,

    #[error("Maximum timeout {max_ms}ms exceeds the limit of {limit_ms}ms")]
    MaxTimeoutTooLarge { max_ms: u64, limit_ms: u64 },
}

/// Upper bound for `max_timeout_ms`.
pub const TIMEOUT_LIMIT_MS: u64 = 60_000;

fn default_timeout_ms() -> u64 {
    500
}

fn default_max_timeout_ms() -> u64 {
    1500
}

fn default_timeout_margin_ms() -> u64 {
    50
}

fn default_connect_timeout_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

/// Auction configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuctionConfig {
    /// Deadline for requests that do not carry `tmax`
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound applied to `tmax`
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Time reserved for merging and responding after the bidder deadline
    #[serde(default = "default_timeout_margin_ms")]
    pub timeout_margin_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub currency_policy: CurrencyPolicy,
    #[serde(default)]
    pub bidders: Vec<BidderConfig>,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            timeout_margin_ms: default_timeout_margin_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            currency_policy: CurrencyPolicy::default(),
            bidders: Vec::new(),
        }
    }
}

impl AuctionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("default_timeout_ms"));
        }
        if self.max_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("max_timeout_ms"));
        }
        if self.max_timeout_ms > TIMEOUT_LIMIT_MS {
            return Err(ValidationError::MaxTimeoutTooLarge {
                max_ms: self.max_timeout_ms,
                limit_ms: TIMEOUT_LIMIT_MS,
            });
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(ValidationError::DefaultExceedsMax {
                default_ms: self.default_timeout_ms,
                max_ms: self.max_timeout_ms,
            });
        }
        if self.timeout_margin_ms >= self.max_timeout_ms {
            return Err(ValidationError::MarginTooLarge {
                margin_ms: self.timeout_margin_ms,
                max_ms: self.max_timeout_ms,
            });
        }

        let mut names = HashSet::new();
        for bidder in &self.bidders {
            if bidder.name.is_empty() {
                return Err(ValidationError::EmptyBidderName);
            }
            if !names.insert(&bidder.name) {
                return Err(ValidationError::DuplicateBidder(bidder.name.clone()));
            }
        }

        Ok(())
    }

    /// The time bidders get for a request carrying `tmax`.
    ///
    /// `tmax` is capped at `max_timeout_ms`, falls back to `default_timeout_ms`
    /// when absent, and the margin is subtracted. Never shorter than 1ms and
    /// never longer than [`TIMEOUT_LIMIT_MS`], even for an unvalidated config.
    pub fn bidder_deadline(&self, tmax: Option<u64>) -> Duration {
        let budget = match tmax {
            Some(tmax) if tmax > 0 => tmax.min(self.max_timeout_ms),
            _ => self.default_timeout_ms,
        }
        .min(TIMEOUT_LIMIT_MS);
        Duration::from_millis(budget.saturating_sub(self.timeout_margin_ms).max(1))
    }
}

/// Request body compression applied before calling a bidder endpoint
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointCompression {
    #[default]
    None,
    Gzip,
}

/// A configured bidder
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BidderConfig {
    /// Name used in `imp.ext.prebid.bidder` and in seat bids
    pub name: String,
    /// Adapter implementation. Defaults to the bidder name.
    #[serde(default)]
    pub adapter: Option<String>,
    /// Invalid URLs are rejected during config deserialization.
    pub endpoint: Url,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint_compression: EndpointCompression,
}

impl BidderConfig {
    pub fn adapter_name(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let yaml = r#"
default_timeout_ms: 400
max_timeout_ms: 1000
timeout_margin_ms: 20
currency_policy: first_non_empty
bidders:
  - name: appnexus
    adapter: generic
    endpoint: http://appnexus.test/openrtb2
    endpoint_compression: gzip
  - name: rubicon
    endpoint: http://rubicon.test/auction
    enabled: false
"#;

        let config: AuctionConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout_ms, 200);
        assert_eq!(config.currency_policy, CurrencyPolicy::FirstNonEmpty);
        assert_eq!(config.bidders.len(), 2);
        assert_eq!(config.bidders[0].adapter_name(), "generic");
        assert_eq!(
            config.bidders[0].endpoint_compression,
            EndpointCompression::Gzip
        );
        assert_eq!(config.bidders[1].adapter_name(), "rubicon");
        assert!(!config.bidders[1].enabled);
        assert_eq!(
            config.bidders[1].endpoint_compression,
            EndpointCompression::None
        );

        // Duplicate bidder
        let mut config2 = config.clone();
        config2.bidders[1].name = "appnexus".into();
        assert_eq!(
            config2.validate(),
            Err(ValidationError::DuplicateBidder("appnexus".into()))
        );

        // Empty bidder name
        let mut config3 = config.clone();
        config3.bidders[0].name = String::new();
        assert_eq!(config3.validate(), Err(ValidationError::EmptyBidderName));

        // Default above max
        let mut config4 = config.clone();
        config4.default_timeout_ms = 2000;
        assert!(matches!(
            config4.validate(),
            Err(ValidationError::DefaultExceedsMax { .. })
        ));

        // Margin eats the whole budget
        let mut config5 = config;
        config5.timeout_margin_ms = 1000;
        assert!(matches!(
            config5.validate(),
            Err(ValidationError::MarginTooLarge { .. })
        ));
    }

    #[test]
    fn test_huge_max_timeout_rejected() {
        let config = AuctionConfig {
            max_timeout_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MaxTimeoutTooLarge {
                max_ms: u64::MAX,
                limit_ms: TIMEOUT_LIMIT_MS,
            })
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let yaml = r#"
bidders:
  - name: broken
    endpoint: "not a url"
"#;
        assert!(serde_yaml::from_str::<AuctionConfig>(yaml).is_err());
    }

    #[test]
    fn test_bidder_deadline() {
        let config = AuctionConfig {
            default_timeout_ms: 500,
            max_timeout_ms: 1000,
            timeout_margin_ms: 50,
            ..Default::default()
        };

        assert_eq!(config.bidder_deadline(None), Duration::from_millis(450));
        assert_eq!(config.bidder_deadline(Some(0)), Duration::from_millis(450));
        assert_eq!(config.bidder_deadline(Some(200)), Duration::from_millis(150));
        assert_eq!(config.bidder_deadline(Some(5000)), Duration::from_millis(950));

        let unbounded = AuctionConfig {
            default_timeout_ms: u64::MAX,
            max_timeout_ms: u64::MAX,
            timeout_margin_ms: 50,
            ..Default::default()
        };
        let limit = Duration::from_millis(TIMEOUT_LIMIT_MS - 50);
        assert_eq!(unbounded.bidder_deadline(None), limit);
        assert_eq!(unbounded.bidder_deadline(Some(u64::MAX)), limit);
        assert_eq!(config.bidder_deadline(Some(10)), Duration::from_millis(1));
    }
}
