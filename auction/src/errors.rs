use http::StatusCode;
use thiserror::Error;

/// Result type alias for auction operations
pub type Result<T, E = AuctionError> = std::result::Result<T, E>;

/// Errors that reject an auction as a whole.
///
/// Anything that goes wrong with an individual bidder is reported as a
/// [`BidderError`] inside the auction result instead.
#[derive(Error, Debug)]
pub enum AuctionError {
    #[error("Invalid bid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),
}

/// A failure attributed to a single bidder during an auction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BidderError {
    #[error("Failed to build bidder request: {0}")]
    Build(String),

    #[error("Unexpected status code {status}")]
    BadStatus { status: StatusCode },

    #[error("Bidder request failed: {0}")]
    Transport(String),

    #[error("Bidder did not respond before the auction deadline")]
    Timeout,

    #[error("Malformed bidder response: {0}")]
    BadResponse(String),

    #[error("Invalid bid: {0}")]
    InvalidBid(String),

    #[error("Bidder panicked: {0}")]
    Panicked(String),

    #[error("Unknown bidder: {0}")]
    UnknownBidder(String),
}

impl BidderError {
    /// Stable identifier used in metric tags and response extensions.
    pub fn kind(&self) -> &'static str {
        match self {
            BidderError::Build(_) => "build",
            BidderError::BadStatus { .. } => "bad_status",
            BidderError::Transport(_) => "transport",
            BidderError::Timeout => "timeout",
            BidderError::BadResponse(_) => "bad_response",
            BidderError::InvalidBid(_) => "invalid_bid",
            BidderError::Panicked(_) => "panic",
            BidderError::UnknownBidder(_) => "unknown_bidder",
        }
    }
}
