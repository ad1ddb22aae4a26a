//! Core data models shared across the collection pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{COLLECTOR_VERSION, DATA_VERSION};

/// The kind of principal an output record describes. The kind selects the
/// writer (and thus the output file) a record is routed to, and doubles as
/// the type label stored in the resolver cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    User,
    Group,
    Computer,
    Domain,
    Gpo,
    Ou,
    Container,
    CertTemplate,
    CertAuthority,
}

impl RecordKind {
    /// All kinds, in the order writers are reported.
    pub const ALL: [RecordKind; 9] = [
        RecordKind::User,
        RecordKind::Group,
        RecordKind::Computer,
        RecordKind::Domain,
        RecordKind::Gpo,
        RecordKind::Ou,
        RecordKind::Container,
        RecordKind::CertTemplate,
        RecordKind::CertAuthority,
    ];

    /// The data-type string used for file names and meta tags.
    pub fn data_type(self) -> &'static str {
        match self {
            RecordKind::User => "users",
            RecordKind::Group => "groups",
            RecordKind::Computer => "computers",
            RecordKind::Domain => "domains",
            RecordKind::Gpo => "gpos",
            RecordKind::Ou => "ous",
            RecordKind::Container => "containers",
            RecordKind::CertTemplate => "certtemplates",
            RecordKind::CertAuthority => "certauthorities",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.data_type())
    }
}

/// One record emitted by a processor. The payload is already serialized to
/// a JSON value; the pipeline only inspects the kind for routing.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub kind: RecordKind,
    pub value: Value,
}

impl OutputRecord {
    pub fn new(kind: RecordKind, value: Value) -> Self {
        Self { kind, value }
    }
}

/// Metadata footer appended to every output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaTag {
    pub count: u64,
    pub collection_methods: u32,
    #[serde(rename = "type")]
    pub data_type: String,
    pub version: u32,
    pub collector_version: String,
}

impl MetaTag {
    pub fn new(count: u64, collection_methods: u32, data_type: &str) -> Self {
        Self {
            count,
            collection_methods,
            data_type: data_type.to_string(),
            version: DATA_VERSION,
            collector_version: COLLECTOR_VERSION.to_string(),
        }
    }
}

/// A domain targeted for enumeration. Identity is the domain SID: two
/// entries with the same SID are the same domain regardless of name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationDomain {
    pub name: String,
    pub domain_sid: String,
}

impl EnumerationDomain {
    /// Build a domain entry, uppercasing both fields.
    pub fn new(name: &str, domain_sid: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            domain_sid: domain_sid.to_uppercase(),
        }
    }
}

impl PartialEq for EnumerationDomain {
    fn eq(&self, other: &Self) -> bool {
        self.domain_sid == other.domain_sid
    }
}

impl Eq for EnumerationDomain {}

/// Direction of a domain trust as recorded on the trustedDomain object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDirection {
    Disabled,
    Inbound,
    Outbound,
    Bidirectional,
}

impl TrustDirection {
    /// Decode the trustDirection attribute value.
    pub fn from_attribute(value: u32) -> Self {
        match value {
            1 => TrustDirection::Inbound,
            2 => TrustDirection::Outbound,
            3 => TrustDirection::Bidirectional,
            _ => TrustDirection::Disabled,
        }
    }

    /// True when the trust can be followed outward for domain recursion.
    pub fn is_traversable(self) -> bool {
        matches!(self, TrustDirection::Outbound | TrustDirection::Bidirectional)
    }
}

/// One trust relationship discovered on a domain.
#[derive(Debug, Clone)]
pub struct TrustRecord {
    pub target_name: String,
    pub target_sid: String,
    pub direction: TrustDirection,
}

/// Totals reported when a collection pass finishes.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub objects_processed: u64,
    pub records_written: u64,
    pub files: Vec<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_tag_carries_contract_version() {
        let meta = MetaTag::new(3, 0b101, "users");
        assert_eq!(meta.version, DATA_VERSION);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "users");
        assert_eq!(json["count"], 3);
        assert_eq!(json["collection_methods"], 5);
    }

    #[test]
    fn test_enumeration_domain_identity_is_sid() {
        let a = EnumerationDomain::new("child.example.local", "s-1-5-21-1-2-3");
        let b = EnumerationDomain::new("CHILD", "S-1-5-21-1-2-3");
        assert_eq!(a, b);
        assert_eq!(a.name, "CHILD.EXAMPLE.LOCAL");
        assert_eq!(a.domain_sid, "S-1-5-21-1-2-3");
    }

    #[test]
    fn test_trust_direction_traversal() {
        assert!(TrustDirection::from_attribute(2).is_traversable());
        assert!(TrustDirection::from_attribute(3).is_traversable());
        assert!(!TrustDirection::from_attribute(1).is_traversable());
        assert!(!TrustDirection::from_attribute(0).is_traversable());
    }
}
