/// IWLS endpoint flavours and URL templates.
///
/// The public API (`/api/v1/...`) embeds each station's time-series list
/// in its metadata and encodes event dates as ISO-8601 strings. The
/// private flavours (`/rest/...`-style deployments) expose a per-station
/// time-series listing plus region/GNSS routes and encode event dates as
/// epoch milliseconds. Everything else is shared, so one enum carries the
/// differences instead of a type hierarchy.

use std::fmt;

pub const PUBLIC_API_URL: &str = "https://api-iwls.dfo-mpo.gc.ca/api/v1/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Public,
    PrivateProd,
    PrivateDev,
}

impl EndpointKind {
    /// Name used in configuration files.
    pub fn config_name(&self) -> &'static str {
        match self {
            EndpointKind::Public => "EndpointPublic",
            EndpointKind::PrivateProd => "EndpointPrivateProd",
            EndpointKind::PrivateDev => "EndpointPrivateDev",
        }
    }

    pub fn from_config_name(name: &str) -> Option<EndpointKind> {
        match name {
            "EndpointPublic" => Some(EndpointKind::Public),
            "EndpointPrivateProd" => Some(EndpointKind::PrivateProd),
            "EndpointPrivateDev" => Some(EndpointKind::PrivateDev),
            _ => None,
        }
    }

    pub fn is_private(&self) -> bool {
        !matches!(self, EndpointKind::Public)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// A concrete endpoint: flavour plus base URL. Private deployments carry
/// site-specific hosts, so their base URL is supplied at construction.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub kind: EndpointKind,
    base_url: String,
}

impl Endpoint {
    pub fn public() -> Endpoint {
        Endpoint {
            kind: EndpointKind::Public,
            base_url: PUBLIC_API_URL.to_string(),
        }
    }

    pub fn private(kind: EndpointKind, base_url: impl Into<String>) -> Endpoint {
        Endpoint {
            kind,
            base_url: base_url.into(),
        }
    }

    /// Default endpoint for a configured flavour. Private flavours start
    /// with an empty host and must be completed with `private()`.
    pub fn for_kind(kind: EndpointKind) -> Endpoint {
        match kind {
            EndpointKind::Public => Endpoint::public(),
            other => Endpoint::private(other, ""),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    pub fn stations(&self) -> String {
        self.url("stations")
    }

    pub fn station(&self, station_id: &str) -> String {
        self.url(&format!("stations/{station_id}"))
    }

    pub fn station_metadata(&self, station_id: &str) -> String {
        self.url(&format!("stations/{station_id}/metadata"))
    }

    /// Sample retrieval. The private flavour addresses the series inside
    /// the station resource; the public one selects it by query param.
    pub fn station_data(&self, station_id: &str, time_series_id: &str) -> String {
        if self.kind.is_private() {
            self.url(&format!(
                "stations/{station_id}/time-series/{time_series_id}/data"
            ))
        } else {
            self.url(&format!("stations/{station_id}/data"))
        }
    }

    /// Per-station time-series listing (private flavours only; the public
    /// API embeds the list in the station payload).
    pub fn station_time_series(&self, station_id: &str) -> String {
        self.url(&format!("stations/{station_id}/time-series/"))
    }

    pub fn chs_regions(&self) -> String {
        self.url("chsRegions/")
    }

    pub fn height_types(&self) -> String {
        if self.kind.is_private() {
            self.url("heights/")
        } else {
            self.url("height-types")
        }
    }

    pub fn phenomena(&self) -> String {
        self.url("phenomena")
    }

    pub fn tide_tables(&self) -> String {
        if self.kind.is_private() {
            self.url("tideTables/")
        } else {
            self.url("tide-tables")
        }
    }

    pub fn time_series_definitions(&self) -> String {
        self.url("time-series-definitions/")
    }
}
