//! Parallel bidder fan-out under a single auction deadline.
//!
//! An auction runs in four steps:
//! 1. The request is split into one request per bidder.
//! 2. Each bidder builds its call plans. Panics are caught per bidder.
//! 3. Every call plan becomes a task in one `JoinSet`. Tasks still running at
//!    the deadline are aborted and reported as timeouts, and their bidders may
//!    receive a fire-and-forget timeout notification.
//! 4. All outcomes are merged into a ranked result and reported to analytics.
//!
//! One bidder failing, timing out or panicking never affects the outcomes of
//! the others.

use chrono::Utc;
use http::StatusCode;
use shared::{counter, histogram};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregator::{AuctionResult, BidAggregator};
use crate::analytics::{AnalyticsSink, AuctionObject};
use crate::bidder::{Bidder, BidderName, CallPlan, EntryPoint, ExtraRequestInfo, TypedBid};
use crate::config::{AuctionConfig, EndpointCompression};
use crate::errors::{AuctionError, BidderError, Result};
use crate::http::send_call;
use crate::metrics_defs::{
    AUCTION_DURATION, AUCTION_REQUESTS, BIDDER_LATENCY, BIDDER_REQUESTS, BIDS_RECEIVED,
    TIMEOUT_NOTIFICATIONS,
};
use crate::openrtb::BidRequest;
use crate::registry::BidderRegistry;
use crate::splitter::{self, BidderRequest};

/// Time allowed for a timeout notification to complete.
const TIMEOUT_NOTIFICATION_BUDGET: Duration = Duration::from_millis(200);

/// What happened to one bidder call, or to one bidder that never got as far
/// as making a call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub bidder: BidderName,
    pub bids: Vec<TypedBid>,
    pub currency: Option<String>,
    pub errors: Vec<BidderError>,
    /// `None` when no HTTP response was received.
    pub http_status: Option<StatusCode>,
    pub latency: Duration,
}

impl CallOutcome {
    pub fn new(bidder: impl Into<BidderName>) -> Self {
        Self {
            bidder: bidder.into(),
            bids: Vec::new(),
            currency: None,
            errors: Vec::new(),
            http_status: None,
            latency: Duration::ZERO,
        }
    }

    pub fn from_errors(bidder: impl Into<BidderName>, errors: Vec<BidderError>) -> Self {
        Self {
            errors,
            ..Self::new(bidder)
        }
    }

    fn metric_outcome(&self) -> &'static str {
        if self.errors.contains(&BidderError::Timeout) {
            "timeout"
        } else if !self.errors.is_empty() {
            "error"
        } else if self.bids.is_empty() {
            "no_bid"
        } else {
            "ok"
        }
    }
}

/// The calls planned for one bidder.
pub struct BidderCalls {
    pub bidder: BidderName,
    pub adapter: Arc<dyn Bidder>,
    pub compression: EndpointCompression,
    pub request: Arc<BidRequest>,
    pub plans: Vec<CallPlan>,
}

/// A spawned call, kept so that aborted tasks can be attributed.
struct PendingCall {
    bidder: BidderName,
    adapter: Arc<dyn Bidder>,
    plan: CallPlan,
}

pub struct AuctionDispatcher {
    client: reqwest::Client,
    registry: Arc<BidderRegistry>,
    config: AuctionConfig,
    aggregator: BidAggregator,
    analytics: Option<Arc<dyn AnalyticsSink>>,
}

impl AuctionDispatcher {
    pub fn new(registry: Arc<BidderRegistry>, config: AuctionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| AuctionError::HttpClientError(e.to_string()))?;
        Ok(Self::with_client(client, registry, config))
    }

    pub fn with_client(
        client: reqwest::Client,
        registry: Arc<BidderRegistry>,
        config: AuctionConfig,
    ) -> Self {
        Self {
            client,
            registry,
            aggregator: BidAggregator::new(config.currency_policy),
            config,
            analytics: None,
        }
    }

    /// Reports every completed auction to `sink`.
    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    /// Runs a complete auction for `request`.
    ///
    /// Only a malformed request fails the auction. Bidder failures end up in
    /// [`AuctionResult::errors`].
    pub async fn hold_auction(
        &self,
        request: BidRequest,
        entry_point: EntryPoint,
    ) -> Result<AuctionResult> {
        validate_request(&request)?;

        let started = Instant::now();
        let start_time = Utc::now();
        let deadline = started + self.config.bidder_deadline(request.tmax);

        let (bidder_requests, split_errors) = splitter::split(&request, &self.registry);
        let info = ExtraRequestInfo { entry_point };
        let (calls, mut outcomes) = self.build_call_plans(bidder_requests, &info);
        outcomes.extend(
            split_errors
                .into_iter()
                .map(|seat_error| CallOutcome::from_errors(seat_error.bidder, vec![seat_error.error])),
        );

        tracing::debug!(
            request_id = %request.id,
            bidders = calls.len(),
            deadline_ms = deadline.saturating_duration_since(started).as_millis() as u64,
            "Holding auction"
        );

        outcomes.extend(self.dispatch(calls, deadline).await);
        let result = self.aggregator.merge(outcomes);

        let status = result.status.as_str();
        counter!(AUCTION_REQUESTS, "entry_point" => entry_point.as_str(), "status" => status)
            .increment(1);
        histogram!(AUCTION_DURATION, "entry_point" => entry_point.as_str(), "status" => status)
            .record(started.elapsed().as_secs_f64());

        if let Some(sink) = &self.analytics {
            let object = AuctionObject {
                entry_point,
                request: &request,
                result: &result,
                start_time,
            };
            sink.log_auction(&object).await;
        }

        Ok(result)
    }

    /// Asks each bidder for its call plans.
    ///
    /// Returns the bidders with calls to make, plus error-only outcomes for
    /// bidders that reported build errors or panicked.
    pub fn build_call_plans(
        &self,
        requests: Vec<BidderRequest>,
        info: &ExtraRequestInfo,
    ) -> (Vec<BidderCalls>, Vec<CallOutcome>) {
        let mut calls = Vec::with_capacity(requests.len());
        let mut failures = Vec::new();

        for BidderRequest { bidder, request } in requests {
            let Some(registered) = self.registry.get(&bidder) else {
                failures.push(CallOutcome::from_errors(
                    bidder.clone(),
                    vec![BidderError::UnknownBidder(bidder)],
                ));
                continue;
            };

            let built = panic::catch_unwind(AssertUnwindSafe(|| {
                registered.bidder.build_requests(&request, info)
            }));

            match built {
                Ok((plans, errors)) => {
                    if !errors.is_empty() {
                        tracing::debug!(bidder = %bidder, errors = errors.len(), "Bidder reported build errors");
                        failures.push(CallOutcome::from_errors(bidder.clone(), errors));
                    }
                    if !plans.is_empty() {
                        calls.push(BidderCalls {
                            bidder,
                            adapter: registered.bidder.clone(),
                            compression: registered.compression,
                            request: Arc::new(request),
                            plans,
                        });
                    }
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    tracing::error!(bidder = %bidder, "Bidder panicked while building requests: {message}");
                    failures.push(CallOutcome::from_errors(
                        bidder,
                        vec![BidderError::Panicked(message)],
                    ));
                }
            }
        }

        (calls, failures)
    }

    /// Executes every planned call concurrently until all finish or
    /// `deadline` passes, whichever comes first.
    ///
    /// Produces exactly one outcome per call plan.
    pub async fn dispatch(&self, calls: Vec<BidderCalls>, deadline: Instant) -> Vec<CallOutcome> {
        let started = Instant::now();
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, PendingCall> = HashMap::new();

        for call in calls {
            for plan in call.plans {
                let client = self.client.clone();
                let adapter = call.adapter.clone();
                let request = call.request.clone();
                let bidder = call.bidder.clone();
                let compression = call.compression;
                let task_plan = plan.clone();

                let abort_handle = join_set.spawn(async move {
                    execute_call(&client, adapter.as_ref(), &request, bidder, task_plan, compression)
                        .await
                });

                pending.insert(
                    abort_handle.id(),
                    PendingCall {
                        bidder: call.bidder.clone(),
                        adapter: call.adapter.clone(),
                        plan,
                    },
                );
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        let deadline_timer = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline_timer);

        loop {
            tokio::select! {
                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else {
                        tracing::debug!("All bidder calls completed");
                        break;
                    };
                    if let Some(outcome) = handle_joined(joined, &mut pending, started) {
                        outcomes.push(outcome);
                    }
                }
                _ = &mut deadline_timer => {
                    tracing::debug!(
                        "Auction deadline reached, aborting {} bidder calls",
                        join_set.len()
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Aborted tasks may still have finished before the abort took effect
        while let Some(joined) = join_set.join_next_with_id().await {
            if let Some(outcome) = handle_joined(joined, &mut pending, started) {
                outcomes.push(outcome);
            }
        }

        let elapsed = started.elapsed();
        for (_, call) in pending.drain() {
            tracing::debug!(bidder = %call.bidder, uri = %call.plan.uri, "Bidder call timed out");
            let mut outcome = CallOutcome::from_errors(call.bidder.clone(), vec![BidderError::Timeout]);
            outcome.latency = elapsed;
            outcomes.push(outcome);
            self.notify_timeout(call);
        }

        for outcome in &outcomes {
            record_call_metrics(outcome);
        }

        outcomes
    }

    /// Fires the bidder's timeout notification, if it wants one, without
    /// waiting for the result.
    fn notify_timeout(&self, call: PendingCall) {
        let PendingCall {
            bidder,
            adapter,
            plan,
        } = call;

        let notification =
            match panic::catch_unwind(AssertUnwindSafe(|| adapter.timeout_notification(&plan))) {
                Ok(Some(notification)) => notification,
                Ok(None) => return,
                Err(payload) => {
                    tracing::error!(
                        bidder = %bidder,
                        "Bidder panicked while building timeout notification: {}",
                        panic_message(&*payload)
                    );
                    return;
                }
            };

        let client = self.client.clone();
        tokio::spawn(async move {
            let sent = tokio::time::timeout(
                TIMEOUT_NOTIFICATION_BUDGET,
                send_call(&client, &notification, EndpointCompression::None),
            )
            .await;

            let success = match sent {
                Ok(Ok(response)) => response.status.is_success(),
                Ok(Err(e)) => {
                    tracing::debug!(bidder = %bidder, error = %e, "Timeout notification failed");
                    false
                }
                Err(_) => {
                    tracing::debug!(bidder = %bidder, "Timeout notification timed out");
                    false
                }
            };

            counter!(
                TIMEOUT_NOTIFICATIONS,
                "bidder" => bidder,
                "success" => if success { "true" } else { "false" }
            )
            .increment(1);
        });
    }
}

fn validate_request(request: &BidRequest) -> Result<()> {
    if request.id.is_empty() {
        return Err(AuctionError::InvalidRequest("missing request id".to_string()));
    }
    if request.imp.is_empty() {
        return Err(AuctionError::InvalidRequest(
            "request has no impressions".to_string(),
        ));
    }
    if request.imp.iter().any(|imp| imp.id.is_empty()) {
        return Err(AuctionError::InvalidRequest(
            "impression without id".to_string(),
        ));
    }
    Ok(())
}

/// Runs one call plan to completion.
async fn execute_call(
    client: &reqwest::Client,
    adapter: &dyn Bidder,
    request: &BidRequest,
    bidder: BidderName,
    plan: CallPlan,
    compression: EndpointCompression,
) -> CallOutcome {
    let started = Instant::now();
    let mut outcome = CallOutcome::new(bidder);

    match send_call(client, &plan, compression).await {
        Ok(response) => {
            outcome.http_status = Some(response.status);
            if response.status == StatusCode::NO_CONTENT {
                tracing::debug!(bidder = %outcome.bidder, "Bidder returned no content");
            } else if !response.status.is_success() {
                outcome.errors.push(BidderError::BadStatus {
                    status: response.status,
                });
            } else {
                let (parsed, errors) = adapter.parse_response(request, &plan, &response);
                outcome.errors.extend(errors);
                if let Some(parsed) = parsed {
                    outcome.currency = parsed.currency;
                    outcome.bids = parsed
                        .bids
                        .into_iter()
                        .map(|mut typed| {
                            typed.bidder = outcome.bidder.clone();
                            typed
                        })
                        .collect();
                }
            }
        }
        Err(e) => {
            tracing::debug!(bidder = %outcome.bidder, error = %e, "Bidder call failed");
            outcome.errors.push(e);
        }
    }

    outcome.latency = started.elapsed();
    outcome
}

/// Turns a finished task into an outcome and stops tracking it.
///
/// Cancelled tasks stay tracked so they are reported as timeouts.
fn handle_joined(
    joined: Result<(tokio::task::Id, CallOutcome), tokio::task::JoinError>,
    pending: &mut HashMap<tokio::task::Id, PendingCall>,
    started: Instant,
) -> Option<CallOutcome> {
    match joined {
        Ok((id, outcome)) => {
            pending.remove(&id);
            Some(outcome)
        }
        Err(e) if e.is_panic() => {
            let call = pending.remove(&e.id())?;
            let message = panic_message(&*e.into_panic());
            tracing::error!(bidder = %call.bidder, "Bidder call panicked: {message}");
            let mut outcome =
                CallOutcome::from_errors(call.bidder, vec![BidderError::Panicked(message)]);
            outcome.latency = started.elapsed();
            Some(outcome)
        }
        Err(_) => None,
    }
}

fn record_call_metrics(outcome: &CallOutcome) {
    counter!(
        BIDDER_REQUESTS,
        "bidder" => outcome.bidder.clone(),
        "outcome" => outcome.metric_outcome()
    )
    .increment(1);
    histogram!(BIDDER_LATENCY, "bidder" => outcome.bidder.clone())
        .record(outcome.latency.as_secs_f64());
    for typed in &outcome.bids {
        counter!(
            BIDS_RECEIVED,
            "bidder" => outcome.bidder.clone(),
            "media_type" => typed.media_type.as_str()
        )
        .increment(1);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AuctionStatus;
    use crate::bidder::{BidderResponse, ResponseData};
    use crate::bidders::generic::GenericBidder;
    use shared::testutils::{MockResponse, MockServer, start_mock_server};
    use bytes::Bytes;
    use serde_json::{Map, json};
    use tokio::sync::Mutex;
    use url::Url;

    fn test_config() -> AuctionConfig {
        AuctionConfig {
            default_timeout_ms: 1000,
            max_timeout_ms: 2000,
            timeout_margin_ms: 0,
            ..Default::default()
        }
    }

    fn test_dispatcher(registry: BidderRegistry) -> AuctionDispatcher {
        AuctionDispatcher::new(Arc::new(registry), test_config()).unwrap()
    }

    fn auction_request(bidders: &[&str], tmax: Option<u64>) -> BidRequest {
        let params: Map<String, serde_json::Value> = bidders
            .iter()
            .map(|name| (name.to_string(), json!({})))
            .collect();
        serde_json::from_value(json!({
            "id": "req-1",
            "imp": [{"id": "1", "banner": {"w": 300, "h": 250}, "ext": {"prebid": {"bidder": params}}}],
            "tmax": tmax
        }))
        .unwrap()
    }

    async fn bidder_server(bid_id: &'static str, price: f64, currency: &'static str) -> MockServer {
        start_mock_server(move |_| {
            let body = json!({
                "id": "req-1",
                "cur": currency,
                "seatbid": [{"bid": [{"id": bid_id, "impid": "1", "price": price}]}]
            });
            MockResponse::json(StatusCode::OK, &serde_json::to_vec(&body).unwrap())
        })
        .await
    }

    fn register_generic(registry: &mut BidderRegistry, name: &str, server: &MockServer) {
        let bidder = GenericBidder::new(name, Url::parse(&server.url("/bid")).unwrap());
        registry
            .insert(name.to_string(), Arc::new(bidder), EndpointCompression::None)
            .unwrap();
    }

    struct PanicOnBuild;

    impl Bidder for PanicOnBuild {
        fn build_requests(
            &self,
            _request: &BidRequest,
            _info: &ExtraRequestInfo,
        ) -> (Vec<CallPlan>, Vec<BidderError>) {
            panic!("build exploded")
        }

        fn parse_response(
            &self,
            _request: &BidRequest,
            _plan: &CallPlan,
            _response: &ResponseData,
        ) -> (Option<BidderResponse>, Vec<BidderError>) {
            (None, Vec::new())
        }
    }

    struct PanicOnParse {
        endpoint: String,
    }

    impl Bidder for PanicOnParse {
        fn build_requests(
            &self,
            _request: &BidRequest,
            _info: &ExtraRequestInfo,
        ) -> (Vec<CallPlan>, Vec<BidderError>) {
            let plan = CallPlan::post_json("parse_panics", self.endpoint.clone(), Bytes::new(), vec![]);
            (vec![plan], Vec::new())
        }

        fn parse_response(
            &self,
            _request: &BidRequest,
            _plan: &CallPlan,
            _response: &ResponseData,
        ) -> (Option<BidderResponse>, Vec<BidderError>) {
            panic!("parse exploded")
        }
    }

    /// Plans one call per impression and reports a build error alongside.
    struct PartialBuilder {
        endpoint: String,
    }

    impl Bidder for PartialBuilder {
        fn build_requests(
            &self,
            request: &BidRequest,
            _info: &ExtraRequestInfo,
        ) -> (Vec<CallPlan>, Vec<BidderError>) {
            let plans = request
                .imp
                .iter()
                .map(|imp| {
                    CallPlan::post_json("partial", self.endpoint.clone(), Bytes::new(), vec![imp.id.clone()])
                })
                .collect();
            (plans, vec![BidderError::Build("missing placement".into())])
        }

        fn parse_response(
            &self,
            _request: &BidRequest,
            _plan: &CallPlan,
            _response: &ResponseData,
        ) -> (Option<BidderResponse>, Vec<BidderError>) {
            (None, Vec::new())
        }
    }

    struct NotifyingBidder {
        inner: GenericBidder,
        notify_url: String,
    }

    impl Bidder for NotifyingBidder {
        fn build_requests(
            &self,
            request: &BidRequest,
            info: &ExtraRequestInfo,
        ) -> (Vec<CallPlan>, Vec<BidderError>) {
            self.inner.build_requests(request, info)
        }

        fn parse_response(
            &self,
            request: &BidRequest,
            plan: &CallPlan,
            response: &ResponseData,
        ) -> (Option<BidderResponse>, Vec<BidderError>) {
            self.inner.parse_response(request, plan, response)
        }

        fn timeout_notification(&self, plan: &CallPlan) -> Option<CallPlan> {
            Some(CallPlan::post_json(
                plan.bidder.clone(),
                self.notify_url.clone(),
                Bytes::from_static(b"{\"timeout\":true}"),
                plan.imp_ids.clone(),
            ))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        auctions: Mutex<Vec<(EntryPoint, String, AuctionStatus)>>,
    }

    #[async_trait::async_trait]
    impl AnalyticsSink for RecordingSink {
        async fn log_auction(&self, object: &AuctionObject<'_>) {
            self.auctions.lock().await.push((
                object.entry_point,
                object.request.id.clone(),
                object.result.status,
            ));
        }
    }

    #[tokio::test]
    async fn test_all_bidders_respond() {
        let server_a = bidder_server("a1", 1.5, "EUR").await;
        let server_b = bidder_server("b1", 2.5, "").await;

        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "alpha", &server_a);
        register_generic(&mut registry, "beta", &server_b);
        let dispatcher = test_dispatcher(registry);

        let result = dispatcher
            .hold_auction(auction_request(&["alpha", "beta"], None), EntryPoint::Auction)
            .await
            .unwrap();

        assert_eq!(result.status, AuctionStatus::Bids);
        assert!(result.errors.is_empty());
        let ranked: Vec<(&str, &str)> = result
            .bids
            .iter()
            .map(|b| (b.bid.bidder.as_str(), b.bid.bid.id.as_str()))
            .collect();
        assert_eq!(ranked, vec![("beta", "b1"), ("alpha", "a1")]);
        assert_eq!(result.currency, "EUR");

        // Each bidder only sees its own parameters
        let sent = server_a.received().await;
        assert_eq!(sent.len(), 1);
        let sent_request = BidRequest::from_bytes(&sent[0].body).unwrap();
        assert_eq!(sent_request.imp[0].ext, Some(json!({"bidder": {}})));
    }

    #[tokio::test]
    async fn test_slow_bidder_times_out() {
        let fast = bidder_server("fast-bid", 1.0, "USD").await;
        let slow = start_mock_server(|_| {
            MockResponse::json(StatusCode::OK, b"{}").delayed(Duration::from_secs(5))
        })
        .await;

        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "fast", &fast);
        register_generic(&mut registry, "slow", &slow);
        let dispatcher = test_dispatcher(registry);

        let started = std::time::Instant::now();
        let result = dispatcher
            .hold_auction(auction_request(&["fast", "slow"], Some(300)), EntryPoint::Auction)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.bids.len(), 1);
        assert_eq!(result.bids[0].bid.bidder, "fast");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].bidder, "slow");
        assert_eq!(result.errors[0].error, BidderError::Timeout);
    }

    #[tokio::test]
    async fn test_panics_are_isolated() {
        let healthy = bidder_server("ok", 1.0, "USD").await;
        let answering = bidder_server("ignored", 1.0, "USD").await;

        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "healthy", &healthy);
        registry
            .insert("build_panics".into(), Arc::new(PanicOnBuild), EndpointCompression::None)
            .unwrap();
        registry
            .insert(
                "parse_panics".into(),
                Arc::new(PanicOnParse {
                    endpoint: answering.url("/bid"),
                }),
                EndpointCompression::None,
            )
            .unwrap();
        let dispatcher = test_dispatcher(registry);

        let result = dispatcher
            .hold_auction(
                auction_request(&["healthy", "build_panics", "parse_panics"], None),
                EntryPoint::Auction,
            )
            .await
            .unwrap();

        assert_eq!(result.bids.len(), 1);
        assert_eq!(result.bids[0].bid.bidder, "healthy");

        let mut panicked: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.error.kind() == "panic")
            .map(|e| e.bidder.as_str())
            .collect();
        panicked.sort();
        assert_eq!(panicked, vec!["build_panics", "parse_panics"]);
    }

    #[tokio::test]
    async fn test_status_codes() {
        let no_content = start_mock_server(|_| MockResponse::empty(StatusCode::NO_CONTENT)).await;
        let broken = start_mock_server(|_| MockResponse::empty(StatusCode::BAD_GATEWAY)).await;

        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "quiet", &no_content);
        register_generic(&mut registry, "broken", &broken);
        let dispatcher = test_dispatcher(registry);

        let result = dispatcher
            .hold_auction(auction_request(&["quiet", "broken"], None), EntryPoint::Amp)
            .await
            .unwrap();

        assert_eq!(result.status, AuctionStatus::Failed);
        assert!(result.bids.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].bidder, "broken");
        assert_eq!(
            result.errors[0].error,
            BidderError::BadStatus {
                status: StatusCode::BAD_GATEWAY
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_bidder_and_invalid_request() {
        let server = bidder_server("b", 1.0, "USD").await;
        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "known", &server);
        let dispatcher = test_dispatcher(registry);

        let result = dispatcher
            .hold_auction(auction_request(&["known", "ghost"], None), EntryPoint::Auction)
            .await
            .unwrap();
        assert_eq!(result.bids.len(), 1);
        assert_eq!(
            result.errors[0].error,
            BidderError::UnknownBidder("ghost".into())
        );

        let mut no_imps = auction_request(&["known"], None);
        no_imps.imp.clear();
        assert!(matches!(
            dispatcher.hold_auction(no_imps, EntryPoint::Auction).await,
            Err(AuctionError::InvalidRequest(_))
        ));

        let mut no_id = auction_request(&["known"], None);
        no_id.id.clear();
        assert!(matches!(
            dispatcher.hold_auction(no_id, EntryPoint::Auction).await,
            Err(AuctionError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_build_call_plans() {
        let mut registry = BidderRegistry::new();
        registry
            .insert(
                "partial".into(),
                Arc::new(PartialBuilder {
                    endpoint: "http://127.0.0.1:1/bid".into(),
                }),
                EndpointCompression::None,
            )
            .unwrap();
        registry
            .insert("build_panics".into(), Arc::new(PanicOnBuild), EndpointCompression::None)
            .unwrap();
        let dispatcher = test_dispatcher(registry);

        let request = auction_request(&[], None);
        let requests = vec![
            BidderRequest {
                bidder: "partial".into(),
                request: request.clone(),
            },
            BidderRequest {
                bidder: "build_panics".into(),
                request: request.clone(),
            },
            BidderRequest {
                bidder: "unregistered".into(),
                request,
            },
        ];
        let info = ExtraRequestInfo {
            entry_point: EntryPoint::Auction,
        };

        let (calls, failures) = dispatcher.build_call_plans(requests, &info);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bidder, "partial");
        assert_eq!(calls[0].plans.len(), 1);

        let kinds: Vec<(&str, &str)> = failures
            .iter()
            .map(|o| (o.bidder.as_str(), o.errors[0].kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("partial", "build"),
                ("build_panics", "panic"),
                ("unregistered", "unknown_bidder")
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_one_outcome_per_plan() {
        let server = start_mock_server(|_| MockResponse::empty(StatusCode::NO_CONTENT)).await;
        let mut registry = BidderRegistry::new();
        registry
            .insert(
                "partial".into(),
                Arc::new(PartialBuilder {
                    endpoint: server.url("/bid"),
                }),
                EndpointCompression::None,
            )
            .unwrap();
        let dispatcher = test_dispatcher(registry);

        let mut request = auction_request(&[], None);
        let mut second = request.imp[0].clone();
        second.id = "2".into();
        request.imp.push(second);

        let info = ExtraRequestInfo {
            entry_point: EntryPoint::Auction,
        };
        let (calls, _) = dispatcher.build_call_plans(
            vec![BidderRequest {
                bidder: "partial".into(),
                request,
            }],
            &info,
        );

        let outcomes = dispatcher
            .dispatch(calls, Instant::now() + Duration::from_secs(2))
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.bidder == "partial"));
        assert!(
            outcomes
                .iter()
                .all(|o| o.http_status == Some(StatusCode::NO_CONTENT) && o.errors.is_empty())
        );
        assert_eq!(server.received().await.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_notification_sent() {
        let slow = start_mock_server(|_| {
            MockResponse::json(StatusCode::OK, b"{}").delayed(Duration::from_secs(5))
        })
        .await;
        let notify = start_mock_server(|_| MockResponse::empty(StatusCode::OK)).await;

        let mut registry = BidderRegistry::new();
        let bidder = NotifyingBidder {
            inner: GenericBidder::new("notifier", Url::parse(&slow.url("/bid")).unwrap()),
            notify_url: notify.url("/timeout"),
        };
        registry
            .insert("notifier".into(), Arc::new(bidder), EndpointCompression::None)
            .unwrap();
        let dispatcher = test_dispatcher(registry);

        let result = dispatcher
            .hold_auction(auction_request(&["notifier"], Some(100)), EntryPoint::Auction)
            .await
            .unwrap();
        assert_eq!(result.status, AuctionStatus::Failed);

        let mut notified = Vec::new();
        for _ in 0..40 {
            notified = notify.received().await;
            if !notified.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].path, "/timeout");
        assert_eq!(&notified[0].body[..], b"{\"timeout\":true}");
    }

    #[tokio::test]
    async fn test_analytics_sink_receives_auction() {
        let server = bidder_server("b", 1.0, "USD").await;
        let mut registry = BidderRegistry::new();
        register_generic(&mut registry, "known", &server);
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = test_dispatcher(registry).with_analytics(sink.clone());

        dispatcher
            .hold_auction(auction_request(&["known"], None), EntryPoint::Video)
            .await
            .unwrap();

        let auctions = sink.auctions.lock().await;
        assert_eq!(
            auctions.as_slice(),
            &[(EntryPoint::Video, "req-1".to_string(), AuctionStatus::Bids)]
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
