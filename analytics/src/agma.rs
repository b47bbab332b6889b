//! Agma analytics: turns tracked auctions into events for the buffer
//! controller.
//!
//! An auction is tracked when the consent gate allows it and one of the
//! configured accounts matches the request's publisher or site/app. The
//! first matching account's code is attached to the event.

use async_trait::async_trait;
use auction::analytics::{AnalyticsSink, AuctionObject};
use auction::bidder::EntryPoint;
use auction::openrtb::{App, BidRequest, Device, Site, User};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use shared::counter;
use std::sync::Arc;

use crate::config::{AccountConfig, AnalyticsConfig, ConfigError};
use crate::controller::AnalyticsHandle;
use crate::metrics_defs::EVENTS_SKIPPED;

/// Decides whether a request may be tracked at all.
pub trait ConsentGate: Send + Sync {
    fn allows(&self, request: &BidRequest) -> bool;
}

/// Tracks every request.
pub struct AllowAll;

impl ConsentGate for AllowAll {
    fn allows(&self, _request: &BidRequest) -> bool {
        true
    }
}

/// Tracks only requests carrying a non-empty consent string.
pub struct RequireConsentString;

impl ConsentGate for RequireConsentString {
    fn allows(&self, request: &BidRequest) -> bool {
        request
            .user
            .as_ref()
            .and_then(|user| user.consent.as_deref())
            .is_some_and(|consent| !consent.is_empty())
    }
}

/// Source of `created_at` timestamps.
pub type Clock = fn() -> DateTime<Utc>;

#[derive(Serialize)]
struct AgmaEvent<'a> {
    #[serde(rename = "type")]
    event_type: EntryPoint,
    id: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    site: Option<&'a Site>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a App>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a User>,
    #[serde(serialize_with = "serialize_rfc3339")]
    created_at: DateTime<Utc>,
}

fn serialize_rfc3339<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

pub struct AgmaLogger {
    accounts: Vec<AccountConfig>,
    handle: AnalyticsHandle,
    consent: Arc<dyn ConsentGate>,
    clock: Clock,
}

impl AgmaLogger {
    pub fn new(
        config: &AnalyticsConfig,
        handle: AnalyticsHandle,
        consent: Arc<dyn ConsentGate>,
    ) -> Result<Self, ConfigError> {
        if config.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        Ok(Self {
            accounts: config.accounts.clone(),
            handle,
            consent,
            clock: Utc::now,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The account code to report `request` under, or `None` when the
    /// request must not be tracked.
    pub fn should_track(&self, request: &BidRequest) -> Option<&str> {
        if !self.consent.allows(request) {
            return None;
        }

        let publisher_id = request.publisher_id().unwrap_or_default();
        let site_app_id = site_app_id(request).unwrap_or_default();

        self.accounts
            .iter()
            .find(|account| {
                if account.publisher_id.is_empty() {
                    !site_app_id.is_empty() && account.site_app_id == site_app_id
                } else {
                    account.publisher_id == publisher_id
                        && (account.site_app_id.is_empty() || account.site_app_id == site_app_id)
                }
            })
            .map(|account| account.code.as_str())
    }

    /// Serializes one event with a fixed key order.
    pub fn serialize_event(
        &self,
        entry_point: EntryPoint,
        request: &BidRequest,
        code: &str,
    ) -> Result<Vec<u8>, serde_json::Error> {
        let event = AgmaEvent {
            event_type: entry_point,
            id: &request.id,
            code,
            site: request.site.as_ref(),
            app: request.app.as_ref(),
            device: request.device.as_ref(),
            user: request.user.as_ref(),
            created_at: (self.clock)(),
        };
        serde_json::to_vec(&event)
    }

    /// Queues an event for `request` if it is tracked.
    pub async fn log_request(&self, entry_point: EntryPoint, request: &BidRequest) {
        let Some(code) = self.should_track(request) else {
            counter!(EVENTS_SKIPPED, "reason" => "untracked").increment(1);
            return;
        };

        match self.serialize_event(entry_point, request, code) {
            Ok(payload) => self.handle.log_event(Bytes::from(payload)).await,
            Err(e) => {
                tracing::error!(error = %e, request_id = %request.id, "Failed to serialize analytics event");
                counter!(EVENTS_SKIPPED, "reason" => "serialization").increment(1);
            }
        }
    }
}

#[async_trait]
impl AnalyticsSink for AgmaLogger {
    async fn log_auction(&self, object: &AuctionObject<'_>) {
        self.log_request(object.entry_point, object.request).await;
    }
}

fn site_app_id(request: &BidRequest) -> Option<&str> {
    if let Some(site) = &request.site {
        return site.id.as_deref();
    }
    let app = request.app.as_ref()?;
    app.id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(app.bundle.as_deref())
}
