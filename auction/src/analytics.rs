//! Hook through which completed auctions are reported to analytics modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::aggregator::AuctionResult;
use crate::bidder::EntryPoint;
use crate::openrtb::BidRequest;

/// Everything an analytics module may want to know about one auction.
#[derive(Debug, Clone, Copy)]
pub struct AuctionObject<'a> {
    pub entry_point: EntryPoint,
    pub request: &'a BidRequest,
    pub result: &'a AuctionResult,
    pub start_time: DateTime<Utc>,
}

/// Receives one call per completed auction.
///
/// Implementations must return quickly: the call happens on the auction's
/// request path.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn log_auction(&self, object: &AuctionObject<'_>);
}
