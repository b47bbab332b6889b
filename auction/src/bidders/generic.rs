//! A pass-through adapter for endpoints that speak plain OpenRTB 2.5.
//!
//! The per-bidder request is posted as-is and the response is read as a
//! standard `BidResponse`.

use std::sync::Arc;
use url::Url;

use crate::bidder::{
    Bidder, BidderName, BidderResponse, CallPlan, ExtraRequestInfo, ResponseData, TypedBid,
};
use crate::config::BidderConfig;
use crate::errors::BidderError;
use crate::openrtb::{Bid, BidRequest, BidResponse, MediaType};
use crate::registry::BuildError;

pub struct GenericBidder {
    name: BidderName,
    endpoint: Url,
}

impl GenericBidder {
    pub fn new(name: impl Into<BidderName>, endpoint: Url) -> Self {
        Self {
            name: name.into(),
            endpoint,
        }
    }

    fn media_type(&self, bid: &Bid, request: &BidRequest) -> Result<MediaType, BidderError> {
        if let Some(mtype) = bid.mtype {
            return MediaType::from_mtype(mtype).ok_or_else(|| {
                BidderError::BadResponse(format!("bid {} has unsupported mtype {mtype}", bid.id))
            });
        }

        let imp = request
            .imp
            .iter()
            .find(|imp| imp.id == bid.impid)
            .ok_or_else(|| {
                BidderError::BadResponse(format!(
                    "bid {} references unknown impression {}",
                    bid.id, bid.impid
                ))
            })?;

        MediaType::for_imp(imp).ok_or_else(|| {
            BidderError::BadResponse(format!(
                "cannot infer media type of bid {} for impression {}",
                bid.id, bid.impid
            ))
        })
    }
}

pub fn build(name: &BidderName, config: &BidderConfig) -> Result<Arc<dyn Bidder>, BuildError> {
    if !matches!(config.endpoint.scheme(), "http" | "https") {
        return Err(BuildError::Adapter {
            bidder: name.clone(),
            reason: format!("unsupported endpoint scheme {}", config.endpoint.scheme()),
        });
    }
    Ok(Arc::new(GenericBidder::new(
        name.clone(),
        config.endpoint.clone(),
    )))
}

impl Bidder for GenericBidder {
    fn build_requests(
        &self,
        request: &BidRequest,
        _info: &ExtraRequestInfo,
    ) -> (Vec<CallPlan>, Vec<BidderError>) {
        match request.to_bytes() {
            Ok(body) => {
                let imp_ids = request.imp.iter().map(|imp| imp.id.clone()).collect();
                let plan = CallPlan::post_json(self.name.clone(), self.endpoint.as_str(), body, imp_ids);
                (vec![plan], Vec::new())
            }
            Err(e) => (Vec::new(), vec![BidderError::Build(e.to_string())]),
        }
    }

    fn parse_response(
        &self,
        request: &BidRequest,
        _plan: &CallPlan,
        response: &ResponseData,
    ) -> (Option<BidderResponse>, Vec<BidderError>) {
        let bid_response: BidResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => return (None, vec![BidderError::BadResponse(e.to_string())]),
        };

        let mut errors = Vec::new();
        let mut bids = Vec::new();
        for seatbid in bid_response.seatbid {
            for bid in seatbid.bid {
                match self.media_type(&bid, request) {
                    Ok(media_type) => bids.push(TypedBid::new(bid, media_type, self.name.clone())),
                    Err(e) => errors.push(e),
                }
            }
        }

        let response = BidderResponse {
            currency: bid_response.cur,
            bids,
        };
        (Some(response), errors)
    }
}
