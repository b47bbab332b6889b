use shared::metrics_defs::{MetricDef, MetricType};

pub const AUCTION_REQUESTS: MetricDef = MetricDef {
    name: "auction.requests",
    metric_type: MetricType::Counter,
    description: "Auctions held. Tagged with entry_point, status.",
};

pub const AUCTION_DURATION: MetricDef = MetricDef {
    name: "auction.duration",
    metric_type: MetricType::Histogram,
    description: "Auction duration in seconds. Tagged with entry_point, status.",
};

pub const BIDDER_REQUESTS: MetricDef = MetricDef {
    name: "bidder.requests",
    metric_type: MetricType::Counter,
    description: "Bidder calls completed. Tagged with bidder, outcome.",
};

pub const BIDDER_LATENCY: MetricDef = MetricDef {
    name: "bidder.latency",
    metric_type: MetricType::Histogram,
    description: "Bidder call latency in seconds. Tagged with bidder.",
};

pub const BIDS_RECEIVED: MetricDef = MetricDef {
    name: "bidder.bids",
    metric_type: MetricType::Counter,
    description: "Bids returned by bidders. Tagged with bidder, media_type.",
};

pub const TIMEOUT_NOTIFICATIONS: MetricDef = MetricDef {
    name: "bidder.timeout_notifications",
    metric_type: MetricType::Counter,
    description: "Timeout notifications sent after the auction deadline. Tagged with bidder, success.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    AUCTION_REQUESTS,
    AUCTION_DURATION,
    BIDDER_REQUESTS,
    BIDDER_LATENCY,
    BIDS_RECEIVED,
    TIMEOUT_NOTIFICATIONS,
];
