pub mod metrics_defs;
pub mod units;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutils;
