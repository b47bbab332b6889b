//! Auction core: splits an OpenRTB request across bidders, calls them in
//! parallel under one deadline and merges their bids.

pub mod aggregator;
pub mod analytics;
pub mod bidder;
pub mod bidders;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod metrics_defs;
pub mod openrtb;
pub mod registry;
pub mod splitter;

pub use aggregator::{AuctionResult, AuctionStatus, BidAggregator, CurrencyPolicy};
pub use analytics::{AnalyticsSink, AuctionObject};
pub use bidder::{Bidder, BidderName, EntryPoint};
pub use config::AuctionConfig;
pub use dispatcher::AuctionDispatcher;
pub use errors::{AuctionError, BidderError};
pub use registry::{BidderRegistry, BuilderTable};
