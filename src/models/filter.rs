//! Categorical filters
//!
//! The fixed set of mutually exclusive filter buttons shown above the
//! connection list. At most one is active at a time.

use serde::{Deserialize, Serialize};

use crate::models::ConnectionRecord;

/// Negotiated HTTP protocol family of the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    Http1,
    Http2,
}

impl ProtocolVersion {
    fn prefix(&self) -> &'static str {
        match self {
            ProtocolVersion::Http1 => "http/1",
            ProtocolVersion::Http2 => "http/2",
        }
    }
}

/// Status class, matched on the first digit of the response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    fn leading_digit(&self) -> char {
        match self {
            StatusClass::Informational => '1',
            StatusClass::Success => '2',
            StatusClass::Redirection => '3',
            StatusClass::ClientError => '4',
            StatusClass::ServerError => '5',
        }
    }

    pub fn of(status: u16) -> Option<Self> {
        match status.to_string().chars().next()? {
            '1' => Some(StatusClass::Informational),
            '2' => Some(StatusClass::Success),
            '3' => Some(StatusClass::Redirection),
            '4' => Some(StatusClass::ClientError),
            '5' => Some(StatusClass::ServerError),
            _ => None,
        }
    }
}

/// Response content-type family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentFamily {
    Json,
    Xml,
    Text,
    Html,
    Js,
    Css,
    Image,
    Binary,
}

impl ContentFamily {
    fn matches(&self, content_type: &str) -> bool {
        match self {
            ContentFamily::Json => content_type.contains("json"),
            ContentFamily::Xml => content_type.contains("xml"),
            // exact match only, `text/plain; charset=..` does not count
            ContentFamily::Text => content_type == "text/plain",
            ContentFamily::Html => content_type.contains("html"),
            ContentFamily::Js => content_type.contains("javascript"),
            ContentFamily::Css => content_type.contains("css"),
            ContentFamily::Image => content_type.contains("image"),
            ContentFamily::Binary => content_type.contains("octet-stream"),
        }
    }
}

/// One filter button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoricalFilter {
    /// Matches every connection, pending ones included
    All,
    Version(ProtocolVersion),
    Status(StatusClass),
    ContentType(ContentFamily),
}

const VERSION_FILTERS: [CategoricalFilter; 2] = [
    CategoricalFilter::Version(ProtocolVersion::Http1),
    CategoricalFilter::Version(ProtocolVersion::Http2),
];

const STATUS_FILTERS: [CategoricalFilter; 5] = [
    CategoricalFilter::Status(StatusClass::Informational),
    CategoricalFilter::Status(StatusClass::Success),
    CategoricalFilter::Status(StatusClass::Redirection),
    CategoricalFilter::Status(StatusClass::ClientError),
    CategoricalFilter::Status(StatusClass::ServerError),
];

const CONTENT_FILTERS: [CategoricalFilter; 8] = [
    CategoricalFilter::ContentType(ContentFamily::Json),
    CategoricalFilter::ContentType(ContentFamily::Xml),
    CategoricalFilter::ContentType(ContentFamily::Text),
    CategoricalFilter::ContentType(ContentFamily::Html),
    CategoricalFilter::ContentType(ContentFamily::Js),
    CategoricalFilter::ContentType(ContentFamily::Css),
    CategoricalFilter::ContentType(ContentFamily::Image),
    CategoricalFilter::ContentType(ContentFamily::Binary),
];

impl CategoricalFilter {
    /// Buttons in display order, one slice per divider-separated group
    pub fn groups() -> [&'static [CategoricalFilter]; 4] {
        [
            &[CategoricalFilter::All],
            &VERSION_FILTERS,
            &STATUS_FILTERS,
            &CONTENT_FILTERS,
        ]
    }

    pub fn all_filters() -> impl Iterator<Item = CategoricalFilter> {
        Self::groups().into_iter().flatten().copied()
    }

    /// Button label
    pub fn label(&self) -> &'static str {
        match self {
            CategoricalFilter::All => "All",
            CategoricalFilter::Version(ProtocolVersion::Http1) => "HTTP1",
            CategoricalFilter::Version(ProtocolVersion::Http2) => "HTTP2",
            CategoricalFilter::Status(StatusClass::Informational) => "100",
            CategoricalFilter::Status(StatusClass::Success) => "200",
            CategoricalFilter::Status(StatusClass::Redirection) => "300",
            CategoricalFilter::Status(StatusClass::ClientError) => "400",
            CategoricalFilter::Status(StatusClass::ServerError) => "500",
            CategoricalFilter::ContentType(ContentFamily::Json) => "JSON",
            CategoricalFilter::ContentType(ContentFamily::Xml) => "XML",
            CategoricalFilter::ContentType(ContentFamily::Text) => "TEXT",
            CategoricalFilter::ContentType(ContentFamily::Html) => "HTML",
            CategoricalFilter::ContentType(ContentFamily::Js) => "JS",
            CategoricalFilter::ContentType(ContentFamily::Css) => "CSS",
            CategoricalFilter::ContentType(ContentFamily::Image) => "IMAGE",
            CategoricalFilter::ContentType(ContentFamily::Binary) => "BINARY",
        }
    }

    /// Parse a button label (case-insensitive)
    pub fn from_label(label: &str) -> Option<Self> {
        Self::all_filters().find(|f| f.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Evaluate against a connection. Anything other than `All` needs a response.
    pub fn matches(&self, conn: &ConnectionRecord) -> bool {
        if let CategoricalFilter::All = self {
            return true;
        }
        let Some(res) = &conn.response else {
            return false;
        };
        match self {
            CategoricalFilter::All => true,
            CategoricalFilter::Version(version) => res
                .version
                .to_ascii_lowercase()
                .starts_with(version.prefix()),
            CategoricalFilter::Status(class) => res
                .status
                .to_string()
                .starts_with(class.leading_digit()),
            CategoricalFilter::ContentType(family) => res
                .content_type()
                .is_some_and(|content_type| family.matches(&content_type)),
        }
    }
}

impl std::fmt::Display for CategoricalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for CategoricalFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown filter: {s}"))
    }
}
