//! Directory entries modeled as attribute bags.

use std::collections::HashMap;

use crate::models::RecordKind;

// sAMAccountType values relevant to kind inference.
const SAM_GROUP_OBJECT: &str = "268435456";
const SAM_NON_SECURITY_GROUP_OBJECT: &str = "268435457";
const SAM_ALIAS_OBJECT: &str = "536870912";
const SAM_USER_OBJECT: &str = "805306368";
const SAM_MACHINE_ACCOUNT: &str = "805306369";

/// One entry returned by an LDAP query: a multi-valued attribute bag.
///
/// Attribute names are case-insensitive per LDAP; they are lowercased on
/// insertion so lookups can use any casing. Binary attributes (SIDs, GUIDs)
/// are stored pre-stringified by the transport.
#[derive(Debug, Clone, Default)]
pub struct DirectoryObject {
    attributes: HashMap<String, Vec<String>>,
}

impl DirectoryObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute insertion, mostly for tests and transports.
    pub fn with_attribute(mut self, name: &str, values: Vec<String>) -> Self {
        self.set(name, values);
        self
    }

    pub fn set(&mut self, name: &str, values: Vec<String>) {
        self.attributes.insert(name.to_lowercase(), values);
    }

    /// First value of an attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of an attribute.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.attributes
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Split the first value of a string attribute on a separator.
    pub fn split_property(&self, name: &str, sep: char) -> Vec<String> {
        self.get(name)
            .map(|v| v.split(sep).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The object SID, when present.
    pub fn security_identifier(&self) -> Option<&str> {
        self.get("objectsid")
    }

    /// The object GUID, when present.
    pub fn guid(&self) -> Option<&str> {
        self.get("objectguid")
    }

    pub fn distinguished_name(&self) -> Option<&str> {
        self.get("distinguishedname")
    }

    /// The unique identifier preferred for output records: SID first, GUID
    /// as fallback for principals without one (GPOs, some containers).
    pub fn object_identifier(&self) -> Option<&str> {
        self.security_identifier().or_else(|| self.guid())
    }

    /// Infer the record kind from objectClass, falling back to
    /// sAMAccountType. Computer is checked before user since machine
    /// accounts carry both classes.
    pub fn kind(&self) -> Option<RecordKind> {
        let classes = self.get_all("objectclass");
        let has_class = |c: &str| classes.iter().any(|v| v.eq_ignore_ascii_case(c));

        if has_class("computer") {
            return Some(RecordKind::Computer);
        }
        if has_class("group") {
            return Some(RecordKind::Group);
        }
        if has_class("user") || has_class("person") {
            return Some(RecordKind::User);
        }
        if has_class("domain") || has_class("domaindns") {
            return Some(RecordKind::Domain);
        }
        if has_class("grouppolicycontainer") {
            return Some(RecordKind::Gpo);
        }
        if has_class("organizationalunit") {
            return Some(RecordKind::Ou);
        }
        if has_class("pkicertificatetemplate") {
            return Some(RecordKind::CertTemplate);
        }
        if has_class("certificationauthority") || has_class("pkienrollmentservice") {
            return Some(RecordKind::CertAuthority);
        }
        if has_class("container") {
            return Some(RecordKind::Container);
        }

        match self.get("samaccounttype") {
            Some(SAM_MACHINE_ACCOUNT) => Some(RecordKind::Computer),
            Some(SAM_USER_OBJECT) => Some(RecordKind::User),
            Some(SAM_GROUP_OBJECT) | Some(SAM_NON_SECURITY_GROUP_OBJECT)
            | Some(SAM_ALIAS_OBJECT) => Some(RecordKind::Group),
            _ => None,
        }
    }

    /// The DNS domain this entry belongs to, derived from its DN.
    pub fn domain_name(&self) -> Option<String> {
        self.distinguished_name().map(dn_to_domain)
    }
}

/// Convert a distinguished name to its uppercased DNS domain, e.g.
/// `CN=x,DC=child,DC=example,DC=local` → `CHILD.EXAMPLE.LOCAL`.
pub fn dn_to_domain(dn: &str) -> String {
    dn.split(',')
        .filter_map(|part| {
            let part = part.trim();
            part.get(..3)
                .filter(|p| p.eq_ignore_ascii_case("dc="))
                .map(|_| part[3..].to_uppercase())
        })
        .collect::<Vec<_>>()
        .join(".")
}
