use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_LOGGED: MetricDef = MetricDef {
    name: "analytics.events.logged",
    metric_type: MetricType::Counter,
    description: "Events accepted into the analytics queue",
};

pub const EVENTS_DROPPED: MetricDef = MetricDef {
    name: "analytics.events.dropped",
    metric_type: MetricType::Counter,
    description: "Events discarded before reaching the buffer. Tagged with reason.",
};

pub const EVENTS_SKIPPED: MetricDef = MetricDef {
    name: "analytics.events.skipped",
    metric_type: MetricType::Counter,
    description: "Auctions not tracked. Tagged with reason.",
};

pub const BATCHES_FLUSHED: MetricDef = MetricDef {
    name: "analytics.batches.flushed",
    metric_type: MetricType::Counter,
    description: "Batches handed to the sender. Tagged with reason.",
};

pub const BATCH_EVENTS: MetricDef = MetricDef {
    name: "analytics.batch.events",
    metric_type: MetricType::Histogram,
    description: "Number of events per flushed batch",
};

pub const BATCH_BYTES: MetricDef = MetricDef {
    name: "analytics.batch.bytes",
    metric_type: MetricType::Histogram,
    description: "Uncompressed size of each flushed batch in bytes",
};

pub const BATCH_SEND_FAILURES: MetricDef = MetricDef {
    name: "analytics.batches.failed",
    metric_type: MetricType::Counter,
    description: "Batches the collector did not accept. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_LOGGED,
    EVENTS_DROPPED,
    EVENTS_SKIPPED,
    BATCHES_FLUSHED,
    BATCH_EVENTS,
    BATCH_BYTES,
    BATCH_SEND_FAILURES,
];
