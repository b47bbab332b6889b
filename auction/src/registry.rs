//! Maps configured bidder names to adapter instances.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::bidder::{Bidder, BidderName};
use crate::bidders;
use crate::config::{BidderConfig, EndpointCompression};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Bidder {bidder} uses unknown adapter {adapter}")]
    UnknownAdapter { bidder: String, adapter: String },

    #[error("Duplicate bidder name: {0}")]
    DuplicateBidder(String),

    #[error("Failed to build bidder {bidder}: {reason}")]
    Adapter { bidder: String, reason: String },
}

/// Constructs an adapter for one configured bidder.
pub type BuilderFn = fn(&BidderName, &BidderConfig) -> Result<Arc<dyn Bidder>, BuildError>;

/// Adapter name to constructor.
#[derive(Clone, Default)]
pub struct BuilderTable {
    builders: HashMap<String, BuilderFn>,
}

impl BuilderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding every adapter compiled into the server.
    pub fn with_builtin() -> Self {
        Self::new().register("generic", bidders::generic::build)
    }

    pub fn register(mut self, adapter: impl Into<String>, builder: BuilderFn) -> Self {
        self.builders.insert(adapter.into(), builder);
        self
    }

    pub fn get(&self, adapter: &str) -> Option<BuilderFn> {
        self.builders.get(adapter).copied()
    }
}

/// A bidder ready to take part in auctions.
#[derive(Clone)]
pub struct RegisteredBidder {
    pub bidder: Arc<dyn Bidder>,
    pub compression: EndpointCompression,
}

/// All enabled bidders, in configuration order.
///
/// Built once at startup and shared read-only between auctions.
#[derive(Clone, Default)]
pub struct BidderRegistry {
    bidders: IndexMap<BidderName, RegisteredBidder>,
}

impl BidderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every enabled bidder in `configs`. Disabled bidders are skipped,
    /// so requests naming them are treated like requests for unknown bidders.
    pub fn from_config(configs: &[BidderConfig], table: &BuilderTable) -> Result<Self, BuildError> {
        let mut registry = Self::new();

        for config in configs {
            if !config.enabled {
                tracing::info!(bidder = %config.name, "Bidder disabled, skipping");
                continue;
            }

            let adapter = config.adapter_name();
            let builder = table.get(adapter).ok_or_else(|| BuildError::UnknownAdapter {
                bidder: config.name.clone(),
                adapter: adapter.to_string(),
            })?;

            let bidder = builder(&config.name, config)?;
            registry.insert(config.name.clone(), bidder, config.endpoint_compression)?;
            tracing::debug!(bidder = %config.name, adapter, "Registered bidder");
        }

        Ok(registry)
    }

    pub fn insert(
        &mut self,
        name: BidderName,
        bidder: Arc<dyn Bidder>,
        compression: EndpointCompression,
    ) -> Result<(), BuildError> {
        if self.bidders.contains_key(&name) {
            return Err(BuildError::DuplicateBidder(name));
        }
        self.bidders.insert(
            name,
            RegisteredBidder {
                bidder,
                compression,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredBidder> {
        self.bidders.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bidders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &BidderName> {
        self.bidders.keys()
    }

    pub fn len(&self) -> usize {
        self.bidders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bidders.is_empty()
    }
}
