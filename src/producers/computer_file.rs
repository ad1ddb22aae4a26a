//! Producer fed by an explicit host list file.
//!
//! Each line of the file is either a SID or a hostname resolved against the
//! active domain. Unresolvable lines are logged and skipped; the run itself
//! always completes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::constants::DOMAIN_SID_PREFIX;
use crate::producers::{emit, ObjectProducer, ProducerContext};

pub struct ComputerFileProducer {
    ctx: ProducerContext,
    path: PathBuf,
}

impl ComputerFileProducer {
    pub fn new(ctx: ProducerContext, path: PathBuf) -> Self {
        Self { ctx, path }
    }
}

#[async_trait]
impl ObjectProducer for ComputerFileProducer {
    async fn produce(&self) -> Result<()> {
        let domain = self
            .ctx
            .domains
            .first()
            .context("No active domain for computer file resolution")?;
        let file = File::open(&self.path)
            .await
            .context(format!("Failed to open computer file {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        while let Some(line) = lines.next_line().await? {
            if self.ctx.should_stop() {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let sid = if line.to_uppercase().starts_with(DOMAIN_SID_PREFIX) {
                line.to_uppercase()
            } else {
                match self.ctx.client.resolve_host_sid(&domain.name, line).await {
                    Ok(Some(sid)) => sid,
                    Ok(None) => {
                        warn!("Could not resolve {} to a SID, skipping", line);
                        continue;
                    }
                    Err(e) => {
                        warn!("Host resolution failed for {}: {}", line, e);
                        continue;
                    }
                }
            };

            match self
                .ctx
                .client
                .entry_by_sid(&domain.name, &sid, &self.ctx.default_nc.attributes)
                .await
            {
                Ok(Some(object)) => {
                    if !emit(&self.ctx, object).await {
                        break;
                    }
                }
                Ok(None) => debug!("No directory entry for {}", sid),
                Err(e) => warn!("Entry fetch failed for {}: {}", sid, e),
            }
        }
        Ok(())
    }

    /// Host lists never touch the configuration partition.
    async fn produce_config_nc(&self) -> Result<()> {
        Ok(())
    }
}
