//! Merges per-call outcomes into a single ranked auction result.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashSet;

use crate::bidder::{BidderName, TypedBid};
use crate::dispatcher::CallOutcome;
use crate::errors::BidderError;
use crate::openrtb::{Bid, BidResponse, MediaType, SeatBid};

/// Currency assumed when no bidder declares one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// OpenRTB no-bid reason "unknown error".
const NBR_UNKNOWN: i64 = 0;

/// Which declared currency wins when bidders disagree.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyPolicy {
    /// The last non-empty currency in outcome order.
    #[default]
    LastNonEmpty,
    /// The first non-empty currency in outcome order.
    FirstNonEmpty,
}

/// An error attributed to one seat in the final result.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatError {
    pub bidder: BidderName,
    pub error: BidderError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedBid {
    pub bid: TypedBid,
    /// Currency the bidder declared for this bid.
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionStatus {
    /// At least one valid bid.
    Bids,
    /// Nobody bid and nothing went wrong.
    NoBids,
    /// No valid bids and at least one bidder error.
    Failed,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Bids => "bids",
            AuctionStatus::NoBids => "no_bids",
            AuctionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuctionResult {
    pub status: AuctionStatus,
    /// Sorted by price, highest first.
    pub bids: Vec<RankedBid>,
    pub errors: Vec<SeatError>,
    pub currency: String,
}

impl AuctionResult {
    /// Renders the result as an OpenRTB response, one seat per bidder.
    ///
    /// Seats appear in the order of their best bid. Bidder errors are reported
    /// under `ext.errors.<bidder>`.
    pub fn into_bid_response(self, request_id: impl Into<String>) -> BidResponse {
        let nbr = self.bids.is_empty().then_some(NBR_UNKNOWN);

        let mut seats: IndexMap<BidderName, Vec<Bid>> = IndexMap::new();
        for ranked in self.bids {
            let TypedBid {
                mut bid,
                media_type,
                bidder,
            } = ranked.bid;
            annotate_media_type(&mut bid, media_type);
            seats.entry(bidder).or_default().push(bid);
        }

        let seatbid = seats
            .into_iter()
            .map(|(seat, bid)| SeatBid {
                bid,
                seat: Some(seat),
                extra: Map::new(),
            })
            .collect();

        let ext = (!self.errors.is_empty()).then(|| {
            let mut errors: Map<String, JsonValue> = Map::new();
            for seat_error in self.errors {
                let entry = errors
                    .entry(seat_error.bidder)
                    .or_insert_with(|| JsonValue::Array(Vec::new()));
                if let JsonValue::Array(list) = entry {
                    list.push(json!({
                        "kind": seat_error.error.kind(),
                        "message": seat_error.error.to_string(),
                    }));
                }
            }
            json!({ "errors": errors })
        });

        BidResponse {
            id: request_id.into(),
            seatbid,
            cur: Some(self.currency),
            nbr,
            ext,
            extra: Map::new(),
        }
    }
}

fn annotate_media_type(bid: &mut Bid, media_type: MediaType) {
    let ext = bid
        .ext
        .get_or_insert_with(|| JsonValue::Object(Map::new()));
    if let JsonValue::Object(ext) = ext {
        let prebid = ext
            .entry("prebid")
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(prebid) = prebid {
            prebid.insert("type".to_string(), json!(media_type.as_str()));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BidAggregator {
    currency_policy: CurrencyPolicy,
}

impl BidAggregator {
    pub fn new(currency_policy: CurrencyPolicy) -> Self {
        Self { currency_policy }
    }

    /// Merges outcomes into one result.
    ///
    /// Bids with a zero price are dropped silently. Negative or non-finite
    /// prices are reported as [`BidderError::InvalidBid`]. A bid is kept once
    /// per `(bidder, bid id, impression id)`.
    pub fn merge(&self, outcomes: Vec<CallOutcome>) -> AuctionResult {
        let mut currency: Option<String> = None;
        let mut seen = HashSet::new();
        let mut bids = Vec::new();
        let mut errors = Vec::new();

        for outcome in outcomes {
            let CallOutcome {
                bidder,
                bids: outcome_bids,
                currency: declared,
                errors: outcome_errors,
                ..
            } = outcome;

            let declared = declared.filter(|c| !c.is_empty());
            if let Some(declared) = &declared {
                match self.currency_policy {
                    CurrencyPolicy::LastNonEmpty => currency = Some(declared.clone()),
                    CurrencyPolicy::FirstNonEmpty => {
                        currency.get_or_insert_with(|| declared.clone());
                    }
                }
            }

            errors.extend(outcome_errors.into_iter().map(|error| SeatError {
                bidder: bidder.clone(),
                error,
            }));

            for mut typed in outcome_bids {
                typed.bidder = bidder.clone();
                let price = typed.bid.price;

                if !price.is_finite() || price < 0.0 {
                    errors.push(SeatError {
                        bidder: bidder.clone(),
                        error: BidderError::InvalidBid(format!(
                            "bid {} has invalid price {price}",
                            typed.bid.id
                        )),
                    });
                    continue;
                }
                if price == 0.0 {
                    tracing::debug!(bidder = %bidder, bid_id = %typed.bid.id, "Dropping zero-price bid");
                    continue;
                }
                if !seen.insert((
                    bidder.clone(),
                    typed.bid.id.clone(),
                    typed.bid.impid.clone(),
                )) {
                    tracing::debug!(bidder = %bidder, bid_id = %typed.bid.id, "Dropping duplicate bid");
                    continue;
                }

                bids.push(RankedBid {
                    currency: declared
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    bid: typed,
                });
            }
        }

        bids.sort_by(|a, b| {
            b.bid
                .bid
                .price
                .total_cmp(&a.bid.bid.price)
                .then_with(|| a.bid.bidder.cmp(&b.bid.bidder))
                .then_with(|| a.bid.bid.id.cmp(&b.bid.bid.id))
        });

        let status = if !bids.is_empty() {
            AuctionStatus::Bids
        } else if !errors.is_empty() {
            AuctionStatus::Failed
        } else {
            AuctionStatus::NoBids
        };

        AuctionResult {
            status,
            bids,
            errors,
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        }
    }
}
