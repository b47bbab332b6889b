//! Splits an incoming bid request into one request per bidder.
//!
//! Bidder parameters are read from `imp.ext.prebid.bidder.<name>`, falling
//! back to the legacy `imp.ext.<name>` layout. Each bidder receives a copy of
//! the request that holds only the impressions it was asked to bid on, with
//! its own parameters moved to `imp.ext.bidder`.

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::aggregator::SeatError;
use crate::bidder::BidderName;
use crate::errors::BidderError;
use crate::openrtb::{BidRequest, Imp};
use crate::registry::BidderRegistry;

/// `imp.ext` keys that never name a bidder.
const RESERVED_IMP_EXT_KEYS: &[&str] = &[
    "prebid", "bidder", "context", "data", "gpid", "skadn", "tid", "ae", "all", "general",
];

/// Keys carried over into every bidder's copy of `imp.ext`.
const PRESERVED_IMP_EXT_KEYS: &[&str] = &["context", "data", "gpid", "skadn", "tid", "ae"];

/// A bid request tailored to a single bidder.
#[derive(Debug, Clone)]
pub struct BidderRequest {
    pub bidder: BidderName,
    pub request: BidRequest,
}

/// Builds per-bidder requests in the order bidders first appear in the
/// impressions. Bidders missing from `registry` are reported once each and
/// get no request.
pub fn split(request: &BidRequest, registry: &BidderRegistry) -> (Vec<BidderRequest>, Vec<SeatError>) {
    let mut imps_by_bidder: IndexMap<BidderName, Vec<Imp>> = IndexMap::new();
    let mut errors = Vec::new();
    let mut reported = HashSet::new();

    for imp in &request.imp {
        for (bidder, params) in bidder_params(imp) {
            if !registry.contains(&bidder) {
                if reported.insert(bidder.clone()) {
                    tracing::debug!(bidder = %bidder, "Request names unknown bidder");
                    errors.push(SeatError {
                        error: BidderError::UnknownBidder(bidder.clone()),
                        bidder,
                    });
                }
                continue;
            }

            let bidder_imp = imp_for_bidder(imp, params);
            imps_by_bidder.entry(bidder).or_default().push(bidder_imp);
        }
    }

    let requests = imps_by_bidder
        .into_iter()
        .map(|(bidder, imps)| BidderRequest {
            bidder,
            request: request.with_imps(imps),
        })
        .collect();

    (requests, errors)
}

/// Bidder name and parameters for every bidder named in the impression.
fn bidder_params(imp: &Imp) -> Vec<(BidderName, JsonValue)> {
    let Some(JsonValue::Object(ext)) = &imp.ext else {
        return Vec::new();
    };

    let prebid_bidders = ext
        .get("prebid")
        .and_then(|prebid| prebid.get("bidder"))
        .and_then(JsonValue::as_object);

    match prebid_bidders {
        Some(bidders) => bidders
            .iter()
            .map(|(name, params)| (name.clone(), params.clone()))
            .collect(),
        None => ext
            .iter()
            .filter(|(key, _)| !RESERVED_IMP_EXT_KEYS.contains(&key.as_str()))
            .map(|(name, params)| (name.clone(), params.clone()))
            .collect(),
    }
}

fn imp_for_bidder(imp: &Imp, params: JsonValue) -> Imp {
    let mut ext = Map::new();
    if let Some(JsonValue::Object(original)) = &imp.ext {
        for key in PRESERVED_IMP_EXT_KEYS {
            if let Some(value) = original.get(*key) {
                ext.insert((*key).to_string(), value.clone());
            }
        }
    }
    ext.insert("bidder".to_string(), params);

    Imp {
        ext: Some(JsonValue::Object(ext)),
        ..imp.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bidders::generic::GenericBidder;
    use crate::config::EndpointCompression;
    use serde_json::json;
    use std::sync::Arc;
    use url::Url;

    fn registry(names: &[&str]) -> BidderRegistry {
        let mut registry = BidderRegistry::new();
        for name in names {
            let bidder = GenericBidder::new(*name, Url::parse("http://bidder.test").unwrap());
            registry
                .insert(name.to_string(), Arc::new(bidder), EndpointCompression::None)
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_split_by_bidder() {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [
                {"id": "1", "banner": {}, "ext": {
                    "gpid": "/slot/1",
                    "prebid": {"bidder": {"appnexus": {"placementId": 10}, "rubicon": {"zone": 1}}}
                }},
                {"id": "2", "video": {}, "ext": {
                    "prebid": {"bidder": {"rubicon": {"zone": 2}}}
                }}
            ],
            "site": {"id": "site-1"}
        }))
        .unwrap();

        let (requests, errors) = split(&request, &registry(&["appnexus", "rubicon"]));
        assert!(errors.is_empty());
        assert_eq!(requests.len(), 2);

        let appnexus = &requests[0];
        assert_eq!(appnexus.bidder, "appnexus");
        assert_eq!(appnexus.request.imp.len(), 1);
        assert_eq!(
            appnexus.request.imp[0].ext,
            Some(json!({"gpid": "/slot/1", "bidder": {"placementId": 10}}))
        );
        assert_eq!(appnexus.request.site, request.site);

        let rubicon = &requests[1];
        assert_eq!(rubicon.bidder, "rubicon");
        let imp_ids: Vec<&str> = rubicon.request.imp.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(imp_ids, vec!["1", "2"]);
        assert_eq!(
            rubicon.request.imp[1].ext,
            Some(json!({"bidder": {"zone": 2}}))
        );
    }

    #[test]
    fn test_legacy_ext_layout() {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [{"id": "1", "ext": {"appnexus": {"placementId": 7}, "context": {"data": 1}}}]
        }))
        .unwrap();

        let (requests, errors) = split(&request, &registry(&["appnexus"]));
        assert!(errors.is_empty());
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].request.imp[0].ext,
            Some(json!({"context": {"data": 1}, "bidder": {"placementId": 7}}))
        );
    }

    #[test]
    fn test_unknown_bidder_reported_once() {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [
                {"id": "1", "ext": {"prebid": {"bidder": {"ghost": {}, "appnexus": {}}}}},
                {"id": "2", "ext": {"prebid": {"bidder": {"ghost": {}}}}}
            ]
        }))
        .unwrap();

        let (requests, errors) = split(&request, &registry(&["appnexus"]));
        assert_eq!(requests.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].bidder, "ghost");
        assert_eq!(errors[0].error, BidderError::UnknownBidder("ghost".into()));
    }

    #[test]
    fn test_imp_without_ext() {
        let request: BidRequest = serde_json::from_value(json!({
            "id": "req-1",
            "imp": [{"id": "1", "banner": {}}]
        }))
        .unwrap();

        let (requests, errors) = split(&request, &registry(&["appnexus"]));
        assert!(requests.is_empty());
        assert!(errors.is_empty());
    }
}
