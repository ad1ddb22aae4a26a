//! Pluggable per-object processing.
//!
//! The pipeline dispatches every dequeued directory object through a
//! [`ProcessorSet`]. Deep processing (ACL parsing, session enumeration,
//! registry collection) plugs in through the [`ObjectProcessor`] trait; the
//! built-in [`BaseObjectProcessor`] maps an object to its base output
//! record so every selected kind is represented end to end.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::cache::ResolverCache;
use crate::ldap::DirectoryObject;
use crate::methods::CollectionMethods;
use crate::models::{OutputRecord, RecordKind};

/// Shared state handed to every processor invocation.
pub struct ProcessorContext {
    pub cache: Arc<ResolverCache>,
    pub methods: CollectionMethods,
    pub dc_only: bool,
    pub collect_all_properties: bool,
    pub skip_registry_logged_on: bool,
    pub track_computer_calls: bool,
    pub session_user: Option<String>,
}

/// One processing step applied to directory objects of matching kinds.
#[async_trait]
pub trait ObjectProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this processor runs for the given kind under the selected
    /// methods.
    fn applies(&self, kind: RecordKind, methods: CollectionMethods) -> bool;

    async fn process(
        &self,
        object: &DirectoryObject,
        ctx: &ProcessorContext,
    ) -> Result<Vec<OutputRecord>>;
}

/// The registered processors, applied in registration order.
pub struct ProcessorSet {
    processors: Vec<Box<dyn ObjectProcessor>>,
}

impl ProcessorSet {
    pub fn with_defaults() -> Self {
        Self {
            processors: vec![Box::new(BaseObjectProcessor)],
        }
    }

    pub fn register(&mut self, processor: Box<dyn ObjectProcessor>) {
        self.processors.push(processor);
    }

    /// Run every applicable processor over one object. Processor failures
    /// are per-object errors: logged and skipped, never fatal to the run.
    pub async fn process_object(
        &self,
        object: &DirectoryObject,
        ctx: &ProcessorContext,
    ) -> Vec<OutputRecord> {
        let Some(kind) = object.kind() else {
            debug!(
                "Skipping unclassifiable object {}",
                object.distinguished_name().unwrap_or("<no dn>")
            );
            return Vec::new();
        };

        let mut records = Vec::new();
        for processor in &self.processors {
            if !processor.applies(kind, ctx.methods) {
                continue;
            }
            match processor.process(object, ctx).await {
                Ok(mut produced) => records.append(&mut produced),
                Err(e) => warn!(
                    "Processor {} failed on {}: {}",
                    processor.name(),
                    object.distinguished_name().unwrap_or("<no dn>"),
                    e
                ),
            }
        }
        records
    }
}

/// Maps a directory object to its base output record and feeds the
/// resolver cache with the identity facts every later lookup needs.
pub struct BaseObjectProcessor;

// Attributes copied into Properties when the object carries them.
const PROPERTY_ATTRIBUTES: &[&str] = &[
    "description",
    "operatingsystem",
    "dnshostname",
    "whencreated",
    "admincount",
    "useraccountcontrol",
];

#[async_trait]
impl ObjectProcessor for BaseObjectProcessor {
    fn name(&self) -> &'static str {
        "base"
    }

    fn applies(&self, _kind: RecordKind, _methods: CollectionMethods) -> bool {
        true
    }

    async fn process(
        &self,
        object: &DirectoryObject,
        ctx: &ProcessorContext,
    ) -> Result<Vec<OutputRecord>> {
        let Some(identifier) = object.object_identifier() else {
            debug!(
                "Object {} has neither SID nor GUID, skipping",
                object.distinguished_name().unwrap_or("<no dn>")
            );
            return Ok(Vec::new());
        };
        let identifier = identifier.to_uppercase();
        let Some(kind) = object.kind() else {
            return Ok(Vec::new());
        };
        let domain = object.domain_name().unwrap_or_default();

        let name = display_name(object, kind, &domain);
        let mut properties = Map::new();
        properties.insert("name".to_string(), json!(name));
        properties.insert("domain".to_string(), json!(domain));
        if let Some(dn) = object.distinguished_name() {
            properties.insert("distinguishedname".to_string(), json!(dn.to_uppercase()));
        }
        for &attr in PROPERTY_ATTRIBUTES {
            if let Some(value) = object.get(attr) {
                properties.insert(attr.to_string(), json!(value));
            }
        }
        let spns = object.get_all("serviceprincipalname");
        if !spns.is_empty() {
            properties.insert("serviceprincipalnames".to_string(), json!(spns));
        }

        // Identity facts feed the cache so later passes resolve without
        // another query.
        ctx.cache.add_value_to_id(&name, &identifier);
        ctx.cache.add_id_type(&identifier, kind);
        if !domain.is_empty() {
            if kind == RecordKind::Domain {
                ctx.cache.add_sid_to_domain(&identifier, &domain);
            } else if let Some(domain_sid) = sid_domain_prefix(&identifier) {
                ctx.cache.add_sid_to_domain(&domain_sid, &domain);
            }
        }

        let record = json!({
            "ObjectIdentifier": identifier,
            "Properties": Value::Object(properties),
        });
        Ok(vec![OutputRecord::new(kind, record)])
    }
}

/// The display name of an object: `SAM@DOMAIN` for principals, the domain
/// name itself for domain heads, the DN's leading component otherwise.
fn display_name(object: &DirectoryObject, kind: RecordKind, domain: &str) -> String {
    if kind == RecordKind::Domain {
        return domain.to_string();
    }
    if let Some(sam) = object.get("samaccountname") {
        return format!("{}@{}", sam.to_uppercase(), domain);
    }
    object
        .distinguished_name()
        .and_then(|dn| dn.split(',').next())
        .and_then(|rdn| rdn.split('=').nth(1))
        .map(|cn| format!("{}@{}", cn.to_uppercase(), domain))
        .unwrap_or_else(|| domain.to_string())
}

/// The domain prefix of a principal SID (the SID minus its trailing RID),
/// or `None` for SIDs outside the domain authority.
fn sid_domain_prefix(sid: &str) -> Option<String> {
    if !sid.starts_with(crate::constants::DOMAIN_SID_PREFIX) {
        return None;
    }
    sid.rsplit_once('-').map(|(prefix, _rid)| prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{computer_object, user_object};

    fn context() -> ProcessorContext {
        ProcessorContext {
            cache: Arc::new(ResolverCache::default()),
            methods: CollectionMethods::default_set(),
            dc_only: false,
            collect_all_properties: false,
            skip_registry_logged_on: false,
            track_computer_calls: false,
            session_user: None,
        }
    }

    #[tokio::test]
    async fn test_base_record_shape() {
        let ctx = context();
        let set = ProcessorSet::with_defaults();
        let object = user_object("jdoe", "S-1-5-21-1-2-3-1105", "example.local");

        let records = set.process_object(&object, &ctx).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::User);
        let value = &records[0].value;
        assert_eq!(value["ObjectIdentifier"], "S-1-5-21-1-2-3-1105");
        assert_eq!(value["Properties"]["name"], "JDOE@EXAMPLE.LOCAL");
        assert_eq!(value["Properties"]["domain"], "EXAMPLE.LOCAL");
    }

    #[tokio::test]
    async fn test_cache_learns_identity_facts() {
        let ctx = context();
        let set = ProcessorSet::with_defaults();
        let object = computer_object("WS01$", "S-1-5-21-1-2-3-1104", "example.local");

        set.process_object(&object, &ctx).await;

        assert_eq!(
            ctx.cache.get_value_to_id("WS01$@EXAMPLE.LOCAL"),
            Some("S-1-5-21-1-2-3-1104".to_string())
        );
        assert_eq!(
            ctx.cache.get_id_type("S-1-5-21-1-2-3-1104"),
            Some(RecordKind::Computer)
        );
        assert_eq!(
            ctx.cache.get_sid_to_domain("S-1-5-21-1-2-3"),
            Some("EXAMPLE.LOCAL".to_string())
        );
    }

    #[tokio::test]
    async fn test_unclassifiable_object_yields_nothing() {
        let ctx = context();
        let set = ProcessorSet::with_defaults();
        let object = DirectoryObject::new()
            .with_attribute("objectClass", vec!["top".into()])
            .with_attribute("objectSid", vec!["S-1-5-21-1-2-3-9999".into()]);
        assert!(set.process_object(&object, &ctx).await.is_empty());
    }

    #[test]
    fn test_sid_domain_prefix() {
        assert_eq!(
            sid_domain_prefix("S-1-5-21-1-2-3-500"),
            Some("S-1-5-21-1-2-3".to_string())
        );
        assert_eq!(sid_domain_prefix("S-1-5-32-544"), None);
    }
}
