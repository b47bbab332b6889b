//! The contract every demand-partner adapter implements.
//!
//! An adapter never performs I/O itself. It turns a bid request into a list of
//! [`CallPlan`]s, and later turns each raw HTTP response into typed bids. The
//! dispatcher owns the network, the deadline and the error isolation.

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::Serialize;

use crate::errors::BidderError;
use crate::openrtb::{Bid, BidRequest, MediaType};

/// Configured name of a bidder, as it appears in `imp.ext.prebid.bidder`.
pub type BidderName = String;

/// The surface an auction request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Auction,
    Amp,
    Video,
}

impl EntryPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Auction => "auction",
            EntryPoint::Amp => "amp",
            EntryPoint::Video => "video",
        }
    }
}

/// Request-scoped context handed to adapters alongside the bid request.
#[derive(Debug, Clone)]
pub struct ExtraRequestInfo {
    pub entry_point: EntryPoint,
}

/// One outbound HTTP call an adapter wants made on its behalf.
#[derive(Debug, Clone)]
pub struct CallPlan {
    pub bidder: BidderName,
    pub method: Method,
    pub uri: String,
    pub body: Bytes,
    pub headers: HeaderMap,
    /// Impressions covered by this call.
    pub imp_ids: Vec<String>,
}

impl CallPlan {
    /// A JSON `POST` with the headers OpenRTB endpoints expect.
    pub fn post_json(
        bidder: impl Into<BidderName>,
        uri: impl Into<String>,
        body: Bytes,
        imp_ids: Vec<String>,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=utf-8"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-openrtb-version"),
            HeaderValue::from_static("2.5"),
        );

        Self {
            bidder: bidder.into(),
            method: Method::POST,
            uri: uri.into(),
            body,
            headers,
            imp_ids,
        }
    }
}

/// Raw response to a [`CallPlan`], with the body fully read.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: StatusCode,
    pub body: Bytes,
    pub headers: HeaderMap,
}

/// A bid together with its media type and the bidder that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedBid {
    pub bid: Bid,
    pub media_type: MediaType,
    pub bidder: BidderName,
}

impl TypedBid {
    pub fn new(bid: Bid, media_type: MediaType, bidder: impl Into<BidderName>) -> Self {
        Self {
            bid,
            media_type,
            bidder: bidder.into(),
        }
    }
}

/// Bids decoded from one bidder response.
#[derive(Debug, Clone, Default)]
pub struct BidderResponse {
    /// Currency declared by the bidder. `None` means the bidder did not say.
    pub currency: Option<String>,
    pub bids: Vec<TypedBid>,
}

/// A demand-partner adapter.
///
/// Implementations must be cheap to share across concurrent auctions. Errors
/// are returned alongside partial results so that one bad impression does
/// not discard the bids for the others. Panics are caught by the dispatcher
/// and reported as [`BidderError::Panicked`].
pub trait Bidder: Send + Sync {
    fn build_requests(
        &self,
        request: &BidRequest,
        info: &ExtraRequestInfo,
    ) -> (Vec<CallPlan>, Vec<BidderError>);

    fn parse_response(
        &self,
        request: &BidRequest,
        plan: &CallPlan,
        response: &ResponseData,
    ) -> (Option<BidderResponse>, Vec<BidderError>);

    /// A call to make when `plan` is abandoned because the auction deadline
    /// passed. The default sends nothing.
    fn timeout_notification(&self, _plan: &CallPlan) -> Option<CallPlan> {
        None
    }
}
