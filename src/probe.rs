use anyhow::{anyhow, Context, Result};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence, ICMP};
use tracing::{debug, info};

/// Liveness check against a single address.
///
/// `Ok(false)` and `Err(_)` are both treated as "unreachable" by the monitors;
/// the error only ends up in debug logs.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<bool>;
}

/// ICMP echo probe. Needs raw socket privileges (or unprivileged ICMP sockets).
pub struct IcmpProbe {
    v4: PingClient,
    v6: PingClient,
    dns_resolver: TokioResolver,
    attempts: u16,
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(attempts: u16, timeout: Duration) -> Result<Self> {
        let v4 = PingClient::new(&PingConfig::default())
            .context("Failed to create ICMPv4 ping client")?;
        let v6 = PingClient::new(&PingConfig::builder().kind(ICMP::V6).build())
            .context("Failed to create ICMPv6 ping client")?;

        let dns_resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build();

        info!("DNS resolver configured: Cloudflare 1.1.1.1 / 1.0.0.1");

        Ok(Self {
            v4,
            v6,
            dns_resolver,
            attempts: attempts.max(1),
            timeout,
        })
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        let lookup = self
            .dns_resolver
            .lookup_ip(address)
            .await
            .with_context(|| format!("DNS resolution failed for {}", address))?;
        lookup
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No IP address found for {}", address))
    }
}

#[async_trait::async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, address: &str) -> Result<bool> {
        let ip = self.resolve(address).await?;
        let client = if ip.is_ipv6() { &self.v6 } else { &self.v4 };

        let payload = [0u8; 56];
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        for seq in 0..self.attempts {
            match pinger.ping(PingSequence(seq), &payload).await {
                Ok((_, latency)) => {
                    debug!(%address, latency_ms = latency.as_secs_f64() * 1000.0, "ICMP response");
                    return Ok(true);
                }
                Err(e) => {
                    debug!(%address, attempt = seq + 1, "ICMP request failed: {}", e);
                    if seq + 1 < self.attempts {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
        Ok(false)
    }
}
