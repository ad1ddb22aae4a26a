//! Domain discovery.
//!
//! Resolves the list of domains one run enumerates: the single configured
//! domain, every domain of the forest, or the transitive closure of
//! outbound/bidirectional trusts discovered breadth-first.

use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::constants::UNKNOWN_SID;
use crate::ldap::LdapClient;
use crate::models::EnumerationDomain;

/// Discovery mode selected by the run flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Single,
    SearchForest,
    RecurseDomains,
}

impl DiscoveryMode {
    pub fn from_flags(search_forest: bool, recurse_domains: bool) -> Self {
        if search_forest {
            DiscoveryMode::SearchForest
        } else if recurse_domains {
            DiscoveryMode::RecurseDomains
        } else {
            DiscoveryMode::Single
        }
    }
}

/// Produce the list of target domains. Fails when the initial domain cannot
/// be resolved; every other resolution failure degrades to a warning.
pub async fn domains_for_enumeration(
    client: &dyn LdapClient,
    initial_domain: &str,
    mode: DiscoveryMode,
) -> Result<Vec<EnumerationDomain>> {
    let initial = resolve_domain(client, initial_domain)
        .await
        .context(format!("Could not resolve initial domain {}", initial_domain))?;

    let domains = match mode {
        DiscoveryMode::Single => vec![initial],
        DiscoveryMode::SearchForest => {
            let mut forest = client
                .forest_domains(&initial.name)
                .await
                .context(format!("Could not enumerate forest of {}", initial.name))?;
            // The initial domain leads; forest results follow in input order.
            let mut domains = vec![initial];
            for domain in forest.drain(..) {
                if !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
            domains
        }
        DiscoveryMode::RecurseDomains => recurse_trusts(client, initial).await,
    };

    info!(
        "Enumerating {} domain(s): {}",
        domains.len(),
        domains
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(domains)
}

async fn resolve_domain(client: &dyn LdapClient, name: &str) -> Result<EnumerationDomain> {
    let sid = client
        .domain_sid(name)
        .await?
        .unwrap_or_else(|| UNKNOWN_SID.to_string());
    Ok(EnumerationDomain::new(name, &sid))
}

/// Breadth-first walk over trust edges. Deduplicates by SID; the first
/// occurrence of a domain wins, and the initial domain is always first.
async fn recurse_trusts(
    client: &dyn LdapClient,
    initial: EnumerationDomain,
) -> Vec<EnumerationDomain> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut results: Vec<EnumerationDomain> = Vec::new();
    let mut queue: VecDeque<EnumerationDomain> = VecDeque::new();

    seen.insert(initial.domain_sid.clone());
    queue.push_back(initial);

    while let Some(domain) = queue.pop_front() {
        debug!("Enumerating trusts of {}", domain.name);
        let trusts = match client.domain_trusts(&domain.name).await {
            Ok(trusts) => trusts,
            Err(e) => {
                warn!("Could not enumerate trusts of {}: {}", domain.name, e);
                Vec::new()
            }
        };
        results.push(domain);

        for trust in trusts {
            if !trust.direction.is_traversable() {
                continue;
            }
            if trust.target_sid == UNKNOWN_SID {
                warn!(
                    "Skipping trust to {} with unresolvable SID",
                    trust.target_name
                );
                continue;
            }
            if seen.insert(trust.target_sid.clone()) {
                queue.push_back(EnumerationDomain::new(&trust.target_name, &trust.target_sid));
            }
        }
    }

    results
}
