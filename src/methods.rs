//! Collection method bitset and flag resolution.
//!
//! Each named category of data the collector can gather is a bit in
//! [`CollectionMethods`]. The CLI accepts a comma-separated list of method
//! names which is resolved to a bitset plus a DC-only boolean.

use anyhow::{bail, Result};
use bitflags::bitflags;

bitflags! {
    /// Bitset of the data categories one pass gathers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollectionMethods: u32 {
        const GROUP           = 1;
        const LOCAL_ADMIN     = 1 << 1;
        const GPO_LOCAL_GROUP = 1 << 2;
        const SESSION         = 1 << 3;
        const LOGGED_ON       = 1 << 4;
        const TRUSTS          = 1 << 5;
        const ACL             = 1 << 6;
        const CONTAINER       = 1 << 7;
        const RDP             = 1 << 8;
        const OBJECT_PROPS    = 1 << 9;
        const DCOM            = 1 << 10;
        const SPN_TARGETS     = 1 << 11;
        const PS_REMOTE       = 1 << 12;
        const USER_RIGHTS     = 1 << 13;
        const CERT_SERVICES   = 1 << 14;
    }
}

impl CollectionMethods {
    /// Methods run by the `Default` token.
    pub fn default_set() -> Self {
        Self::GROUP
            | Self::LOCAL_ADMIN
            | Self::SESSION
            | Self::TRUSTS
            | Self::ACL
            | Self::CONTAINER
            | Self::RDP
            | Self::OBJECT_PROPS
            | Self::DCOM
            | Self::SPN_TARGETS
            | Self::PS_REMOTE
            | Self::CERT_SERVICES
    }

    /// Methods run by the `ComputerOnly` token.
    pub fn computer_only_set() -> Self {
        Self::LOCAL_ADMIN
            | Self::SESSION
            | Self::RDP
            | Self::DCOM
            | Self::PS_REMOTE
            | Self::LOGGED_ON
            | Self::USER_RIGHTS
    }

    /// Methods run against domain controllers only (`DCOnly` token).
    pub fn dc_only_set() -> Self {
        Self::GROUP
            | Self::TRUSTS
            | Self::ACL
            | Self::CONTAINER
            | Self::OBJECT_PROPS
            | Self::GPO_LOCAL_GROUP
            | Self::CERT_SERVICES
    }

    /// Subset rerun on every loop pass: the session-flavored methods of the
    /// original selection, falling back to plain session collection when the
    /// selection had none.
    pub fn loop_set(self) -> Self {
        let looped = self & (Self::SESSION | Self::LOGGED_ON);
        if looped.is_empty() {
            Self::SESSION
        } else {
            looped
        }
    }

    /// True when any computer-targeted method is selected.
    pub fn has_computer_methods(self) -> bool {
        self.intersects(
            Self::LOCAL_ADMIN
                | Self::SESSION
                | Self::LOGGED_ON
                | Self::RDP
                | Self::DCOM
                | Self::PS_REMOTE
                | Self::USER_RIGHTS,
        )
    }
}

/// A method selection resolved from the CLI: the bitset plus the DC-only
/// restriction, which is a targeting constraint rather than a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMethods {
    pub methods: CollectionMethods,
    pub dc_only: bool,
}

/// Resolve a list of method tokens to a bitset and DC-only flag.
///
/// Tokens are case-insensitive. `DCOnly` cannot be combined with computer
/// enumeration tokens since it suppresses host connections entirely.
pub fn resolve_methods(tokens: &[String]) -> Result<ResolvedMethods> {
    let mut methods = CollectionMethods::empty();
    let mut dc_only = false;

    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.to_ascii_lowercase().as_str() {
            "all" => {
                methods |= CollectionMethods::default_set()
                    | CollectionMethods::LOGGED_ON
                    | CollectionMethods::GPO_LOCAL_GROUP
            }
            "default" => methods |= CollectionMethods::default_set(),
            "computeronly" => methods |= CollectionMethods::computer_only_set(),
            "dconly" => {
                methods |= CollectionMethods::dc_only_set();
                dc_only = true;
            }
            "group" => methods |= CollectionMethods::GROUP,
            "localadmin" | "localgroup" => methods |= CollectionMethods::LOCAL_ADMIN,
            "gpolocalgroup" => methods |= CollectionMethods::GPO_LOCAL_GROUP,
            "session" => methods |= CollectionMethods::SESSION,
            "loggedon" => methods |= CollectionMethods::LOGGED_ON,
            "trusts" => methods |= CollectionMethods::TRUSTS,
            "acl" => methods |= CollectionMethods::ACL,
            "container" => methods |= CollectionMethods::CONTAINER,
            "rdp" => methods |= CollectionMethods::RDP,
            "objectprops" => methods |= CollectionMethods::OBJECT_PROPS,
            "dcom" => methods |= CollectionMethods::DCOM,
            "spntargets" => methods |= CollectionMethods::SPN_TARGETS,
            "psremote" => methods |= CollectionMethods::PS_REMOTE,
            "userrights" => methods |= CollectionMethods::USER_RIGHTS,
            "certservices" => methods |= CollectionMethods::CERT_SERVICES,
            other => bail!("unknown collection method: {}", other),
        }
    }

    if methods.is_empty() {
        methods = CollectionMethods::default_set();
    }

    if dc_only && methods.has_computer_methods() {
        bail!("DCOnly cannot be combined with computer enumeration methods");
    }

    Ok(ResolvedMethods { methods, dc_only })
}
