//! LDAP filter and attribute projection built from the method bitset.
//!
//! Each collection pass issues one paged query per naming context; the
//! filter is the OR of the clauses contributed by every selected method,
//! optionally AND-ed with a user-supplied extra filter.

use crate::methods::CollectionMethods;

// Filter clauses per object family. sAMAccountType is used where possible
// since it is indexed on every DC.
const CLAUSE_PRINCIPALS: &str =
    "(|(samaccounttype=268435456)(samaccounttype=268435457)(samaccounttype=536870912)(samaccounttype=805306368)(samaccounttype=805306369))";
const CLAUSE_COMPUTERS: &str = "(samaccounttype=805306369)";
const CLAUSE_DOMAINS: &str = "(objectclass=domain)";
const CLAUSE_GPOS: &str = "(objectclass=grouppolicycontainer)";
const CLAUSE_CONTAINERS: &str =
    "(|(objectclass=container)(objectclass=organizationalunit)(objectclass=domain))";
const CLAUSE_SPN_USERS: &str = "(&(samaccounttype=805306368)(serviceprincipalname=*))";
const CLAUSE_CERT_OBJECTS: &str =
    "(|(objectclass=pkicertificatetemplate)(objectclass=certificationauthority)(objectclass=pkienrollmentservice))";

const BASE_ATTRIBUTES: &[&str] = &[
    "objectsid",
    "objectguid",
    "distinguishedname",
    "samaccountname",
    "samaccounttype",
    "objectclass",
];

/// A prepared query: filter string plus attribute projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapQueryData {
    pub filter: String,
    pub attributes: Vec<&'static str>,
}

impl LdapQueryData {
    /// True when no selected method contributes to this naming context.
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }
}

/// Build the default-naming-context query for a method selection.
pub fn default_nc_data(
    methods: CollectionMethods,
    extra_filter: Option<&str>,
    collect_all_properties: bool,
) -> LdapQueryData {
    let mut clauses: Vec<&str> = Vec::new();
    let mut attributes: Vec<&'static str> = BASE_ATTRIBUTES.to_vec();

    if methods
        .intersects(CollectionMethods::GROUP | CollectionMethods::ACL | CollectionMethods::OBJECT_PROPS)
    {
        push_unique(&mut clauses, CLAUSE_PRINCIPALS);
        attributes.extend_from_slice(&["member", "memberof", "primarygroupid"]);
    }
    if methods.has_computer_methods() {
        push_unique(&mut clauses, CLAUSE_COMPUTERS);
        attributes.extend_from_slice(&["dnshostname", "useraccountcontrol", "operatingsystem"]);
    }
    if methods.intersects(CollectionMethods::TRUSTS) {
        push_unique(&mut clauses, CLAUSE_DOMAINS);
    }
    if methods.intersects(CollectionMethods::GPO_LOCAL_GROUP | CollectionMethods::OBJECT_PROPS) {
        push_unique(&mut clauses, CLAUSE_GPOS);
        attributes.extend_from_slice(&["displayname", "gpcfilesyspath"]);
    }
    if methods.intersects(CollectionMethods::CONTAINER) {
        push_unique(&mut clauses, CLAUSE_CONTAINERS);
        attributes.push("gplink");
    }
    if methods.intersects(CollectionMethods::SPN_TARGETS) {
        push_unique(&mut clauses, CLAUSE_SPN_USERS);
        attributes.push("serviceprincipalname");
    }
    if methods.intersects(CollectionMethods::ACL) {
        attributes.push("ntsecuritydescriptor");
    }
    if methods.intersects(CollectionMethods::OBJECT_PROPS) {
        attributes.extend_from_slice(&[
            "description",
            "whencreated",
            "lastlogontimestamp",
            "pwdlastset",
            "admincount",
            "homedirectory",
            "scriptpath",
            "profilepath",
            "useraccountcontrol",
        ]);
    }

    let mut data = LdapQueryData {
        filter: combine_or(&clauses),
        attributes: if collect_all_properties {
            vec!["*"]
        } else {
            dedup(attributes)
        },
    };
    if let Some(extra) = extra_filter {
        if !data.filter.is_empty() {
            data.filter = format!("(&{}{})", data.filter, extra);
        }
    }
    data
}

/// Build the configuration-naming-context query. Only certificate and
/// container methods enumerate the configuration partition.
pub fn config_nc_data(methods: CollectionMethods) -> LdapQueryData {
    let mut clauses: Vec<&str> = Vec::new();
    let mut attributes: Vec<&'static str> = BASE_ATTRIBUTES.to_vec();

    if methods.intersects(CollectionMethods::CERT_SERVICES) {
        push_unique(&mut clauses, CLAUSE_CERT_OBJECTS);
        attributes.extend_from_slice(&[
            "displayname",
            "certificatetemplates",
            "mspki-certificate-name-flag",
            "mspki-enrollment-flag",
            "cacertificate",
        ]);
    }
    if methods.intersects(CollectionMethods::CONTAINER) {
        push_unique(&mut clauses, "(objectclass=container)");
    }

    LdapQueryData {
        filter: combine_or(&clauses),
        attributes: dedup(attributes),
    }
}

fn push_unique<'a>(clauses: &mut Vec<&'a str>, clause: &'a str) {
    if !clauses.contains(&clause) {
        clauses.push(clause);
    }
}

fn combine_or(clauses: &[&str]) -> String {
    match clauses.len() {
        0 => String::new(),
        1 => clauses[0].to_string(),
        _ => format!("(|{})", clauses.concat()),
    }
}

fn dedup(attributes: Vec<&'static str>) -> Vec<&'static str> {
    let mut seen = Vec::with_capacity(attributes.len());
    for attr in attributes {
        if !seen.contains(&attr) {
            seen.push(attr);
        }
    }
    seen
}
