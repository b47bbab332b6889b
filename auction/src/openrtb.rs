//! The subset of the OpenRTB 2.x object model the auction core touches.
//!
//! Only the fields that the splitter, the bidders, the aggregator and the
//! analytics logger read are modelled explicitly. Every other field is kept in
//! an `extra` map so that requests and responses survive a round trip through
//! the server unchanged.
//!
//! # Example
//! ```json
//! {
//!   "id": "auction-1",
//!   "imp": [{"id": "imp-1", "banner": {"w": 300, "h": 250},
//!            "ext": {"prebid": {"bidder": {"appnexus": {"placementId": 1}}}}}],
//!   "site": {"id": "site-1", "publisher": {"id": "pub-1"}},
//!   "tmax": 500
//! }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Unknown fields, passed through untouched.
pub type Extra = Map<String, JsonValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub imp: Vec<Imp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// Maximum time in milliseconds the caller is willing to wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmax: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cur: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

impl BidRequest {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Bytes::from(json))
    }

    /// Copies every field except the impressions, which are replaced by `imp`.
    pub fn with_imps(&self, imp: Vec<Imp>) -> BidRequest {
        BidRequest {
            id: self.id.clone(),
            imp,
            site: self.site.clone(),
            app: self.app.clone(),
            device: self.device.clone(),
            user: self.user.clone(),
            tmax: self.tmax,
            cur: self.cur.clone(),
            ext: self.ext.clone(),
            extra: self.extra.clone(),
        }
    }

    /// The publisher id from either the site or the app object.
    pub fn publisher_id(&self) -> Option<&str> {
        let publisher = match (&self.site, &self.app) {
            (Some(site), _) => site.publisher.as_ref(),
            (None, Some(app)) => app.publisher.as_ref(),
            (None, None) => None,
        };
        publisher.and_then(|p| p.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imp {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidfloor: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidfloorcur: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifa: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyeruid: Option<String>,

    /// TCF consent string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seatbid: Vec<SeatBid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur: Option<String>,

    /// No-bid reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbr: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeatBid {
    #[serde(default)]
    pub bid: Vec<Bid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,

    pub impid: String,

    #[serde(default)]
    pub price: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u64>,

    /// Creative markup type: 1 banner, 2 video, 3 audio, 4 native.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtype: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Banner,
    Video,
    Audio,
    Native,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Banner => "banner",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Native => "native",
        }
    }

    pub fn from_mtype(mtype: u8) -> Option<MediaType> {
        match mtype {
            1 => Some(MediaType::Banner),
            2 => Some(MediaType::Video),
            3 => Some(MediaType::Audio),
            4 => Some(MediaType::Native),
            _ => None,
        }
    }

    /// The media type to assume for a bid on `imp` when the bid does not say.
    ///
    /// Multi-format impressions resolve in the order banner, video, native,
    /// audio. `None` when the impression offers no format at all.
    pub fn for_imp(imp: &Imp) -> Option<MediaType> {
        [
            (imp.banner.is_some(), MediaType::Banner),
            (imp.video.is_some(), MediaType::Video),
            (imp.native.is_some(), MediaType::Native),
            (imp.audio.is_some(), MediaType::Audio),
        ]
        .into_iter()
        .find_map(|(offered, media_type)| offered.then_some(media_type))
    }
}
