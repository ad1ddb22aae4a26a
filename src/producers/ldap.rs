//! Default producer: full LDAP enumeration of every target domain.

use anyhow::Result;
use async_trait::async_trait;

use crate::ldap::NamingContext;
use crate::producers::{stream_config_nc, stream_domain, ObjectProducer, ProducerContext};

pub struct LdapProducer {
    ctx: ProducerContext,
}

impl LdapProducer {
    pub fn new(ctx: ProducerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ObjectProducer for LdapProducer {
    async fn produce(&self) -> Result<()> {
        if self.ctx.default_nc.is_empty() {
            return Ok(());
        }
        for domain in &self.ctx.domains {
            if self.ctx.should_stop() {
                break;
            }
            stream_domain(&self.ctx, domain, NamingContext::Default, &self.ctx.default_nc)
                .await;
        }
        Ok(())
    }

    async fn produce_config_nc(&self) -> Result<()> {
        stream_config_nc(&self.ctx).await
    }
}
