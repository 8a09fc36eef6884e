//! Provider catalog and the static parameters of a run.
//!
//! A [`ProviderId`] names the third-party source being resolved. The id
//! selects the request adapter (see [`crate::adapter`]) and the request
//! defaults; the decoding itself lives in the provider script.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric provider identifier as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u32);

impl ProviderId {
    /// Own content; the URL is already playable.
    pub const SYSTEM: Self = Self(0);
    pub const CNTV: Self = Self(1);
    pub const TENCENT: Self = Self(2);
    pub const IQIYI: Self = Self(3);
    pub const YOUKU: Self = Self(4);
    pub const MANGO: Self = Self(5);
    pub const SOHU: Self = Self(6);
    pub const MIGU: Self = Self(7);
    /// TV catalog provider queried with an XML document.
    pub const HUASHU: Self = Self(8);
    pub const HAOQU: Self = Self(9);
    pub const DIANSHIJIA: Self = Self(10);
    pub const HANJUTV: Self = Self(11);
    pub const MIGU_MIRROR: Self = Self(12);

    /// Returns `true` when the URL needs no resolution at all.
    pub fn is_identity(self) -> bool {
        self == Self::SYSTEM
    }

    /// Map a provider name to a script-driven provider.
    ///
    /// Only names resolved through a script are mapped; every other name is
    /// the identity case and yields `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "youku" => Some(Self::YOUKU),
            _ => None,
        }
    }

    /// Catalog entry for this id, if it is a known provider.
    pub fn descriptor(self) -> Option<&'static ProviderDescriptor> {
        KNOWN_PROVIDERS.iter().find(|d| d.id == self)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor() {
            Some(d) => write!(f, "{}({})", d.name, self.0),
            None => write!(f, "provider({})", self.0),
        }
    }
}

impl FromStr for ProviderId {
    type Err = String;

    /// Accepts a numeric id or a catalog name (`"8"`, `"huashu"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Ok(Self(n));
        }
        KNOWN_PROVIDERS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(s))
            .map(|d| d.id)
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

/// Stream quality tier requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Smooth,
    Standard,
    High,
    P720,
    P1080,
}

impl Quality {
    /// Wire code sent in the `quality` field.
    pub fn code(self) -> u8 {
        match self {
            Self::Smooth => 1,
            Self::Standard => 2,
            Self::High => 3,
            Self::P720 => 4,
            Self::P1080 => 5,
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smooth" | "1" => Ok(Self::Smooth),
            "standard" | "sd" | "2" => Ok(Self::Standard),
            "high" | "hd" | "3" => Ok(Self::High),
            "720p" | "720" | "4" => Ok(Self::P720),
            "1080p" | "1080" | "5" => Ok(Self::P1080),
            other => Err(format!("unknown quality '{other}'")),
        }
    }
}

/// Kind of item being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    OnDemand,
    Live,
}

impl ContentType {
    /// Wire code sent in the `content_type` field.
    pub fn code(self) -> u32 {
        match self {
            Self::OnDemand => 2,
            Self::Live => 4,
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vod" | "on-demand" | "ondemand" | "2" => Ok(Self::OnDemand),
            "live" | "4" => Ok(Self::Live),
            other => Err(format!("unknown content type '{other}'")),
        }
    }
}

/// Catalog entry for a known provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    /// Short lowercase name.
    pub name: &'static str,
    /// Quality used when the caller supplies only a URL.
    pub default_quality: Quality,
    /// Content type used when the caller supplies only a URL.
    pub default_content_type: ContentType,
}

const fn web_page(id: ProviderId, name: &'static str) -> ProviderDescriptor {
    ProviderDescriptor {
        id,
        name,
        default_quality: Quality::High,
        default_content_type: ContentType::OnDemand,
    }
}

const fn live_tv(id: ProviderId, name: &'static str) -> ProviderDescriptor {
    ProviderDescriptor {
        id,
        name,
        default_quality: Quality::High,
        default_content_type: ContentType::Live,
    }
}

/// Every provider the catalog knows about.
pub static KNOWN_PROVIDERS: &[ProviderDescriptor] = &[
    web_page(ProviderId::SYSTEM, "system"),
    live_tv(ProviderId::CNTV, "cntv"),
    web_page(ProviderId::TENCENT, "tencent"),
    web_page(ProviderId::IQIYI, "iqiyi"),
    web_page(ProviderId::YOUKU, "youku"),
    web_page(ProviderId::MANGO, "mango"),
    web_page(ProviderId::SOHU, "sohu"),
    live_tv(ProviderId::MIGU, "migu"),
    live_tv(ProviderId::HUASHU, "huashu"),
    live_tv(ProviderId::HAOQU, "haoqu"),
    live_tv(ProviderId::DIANSHIJIA, "dianshijia"),
    web_page(ProviderId::HANJUTV, "hanjutv"),
    live_tv(ProviderId::MIGU_MIRROR, "migu-mirror"),
];

/// Static parameters of one run, fixed from the first iteration to the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySource {
    pub provider: ProviderId,
    pub quality: Quality,
    /// Channel category (national, satellite, local).
    pub tv_type: String,
    pub content_type: ContentType,
    /// Channel name or code, used by live providers.
    pub channel: String,
    /// Page URL being resolved.
    pub url: String,
}

impl PlaySource {
    /// Seed a source from a URL using the provider's defaults.
    ///
    /// Unknown providers get the generic web-page defaults.
    pub fn for_provider(provider: ProviderId, url: impl Into<String>) -> Self {
        let (quality, content_type) = provider.descriptor().map_or(
            (Quality::High, ContentType::OnDemand),
            |d| (d.default_quality, d.default_content_type),
        );
        Self {
            provider,
            quality,
            tv_type: String::new(),
            content_type,
            channel: String::new(),
            url: url.into(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub fn with_tv_type(mut self, tv_type: impl Into<String>) -> Self {
        self.tv_type = tv_type.into();
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }
}
