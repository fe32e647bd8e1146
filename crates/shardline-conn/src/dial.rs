//! Channel establishment.
//!
//! [`GrpcDialer`] turns a member address into an established tonic
//! channel. Dialing blocks until the channel is connected or the overall
//! dial timeout expires, retrying failed connects with capped
//! exponential backoff in between.

use std::error::Error as StdError;
use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::error::{ConnError, ConnResult};

/// HTTP/2 and TCP keepalive settings applied to every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub interval: Duration,
    pub timeout: Duration,
    /// Send pings even when no stream is open.
    pub while_idle: bool,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            while_idle: false,
        }
    }
}

/// Backoff between connect attempts within one dial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl DialBackoff {
    /// Delay after `retries` consecutive failed connects.
    pub fn delay(&self, retries: u32) -> Duration {
        let factor = self.multiplier.powi(retries.min(64) as i32);
        let delay = self.base.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for DialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(3),
            multiplier: 1.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DialOptions {
    /// Bound on the whole dial, backoff included.
    pub timeout: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    pub backoff: DialBackoff,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            backoff: DialBackoff::default(),
        }
    }
}

/// A channel that can be handed out repeatedly and closed exactly once.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Address the channel is connected to.
    fn target(&self) -> &str;

    /// Release the channel.
    fn close(self) -> ConnResult<()>;
}

/// An established gRPC channel to one member.
#[derive(Debug, Clone)]
pub struct GrpcChannel {
    target: String,
    channel: Channel,
}

impl GrpcChannel {
    pub fn new(target: impl Into<String>, channel: Channel) -> Self {
        Self {
            target: target.into(),
            channel,
        }
    }

    /// A handle for building RPC stubs. Clones share one connection.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

impl Transport for GrpcChannel {
    fn target(&self) -> &str {
        &self.target
    }

    /// Drops this handle. The connection itself shuts down once the last
    /// stub built on it is dropped as well.
    fn close(self) -> ConnResult<()> {
        debug!(addr = %self.target, "closing channel");
        drop(self.channel);
        Ok(())
    }
}

/// Establishes channels to member addresses.
#[tonic::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> ConnResult<GrpcChannel>;
}

/// Dials members over tonic with TLS, keepalive, and backoff.
#[derive(Debug, Clone)]
pub struct GrpcDialer {
    tls: Option<ClientTlsConfig>,
    keepalive: Keepalive,
    options: DialOptions,
}

impl GrpcDialer {
    pub fn new(tls: Option<ClientTlsConfig>, keepalive: Keepalive, options: DialOptions) -> Self {
        Self {
            tls,
            keepalive,
            options,
        }
    }

    fn endpoint(&self, addr: &str) -> ConnResult<Endpoint> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let uri = format!("{scheme}://{addr}");

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ConnError::Dial {
                addr: addr.to_string(),
                reason: format!("invalid address: {}", error_chain(&e)),
            })?
            .connect_timeout(self.options.connect_timeout)
            .tcp_keepalive(Some(self.keepalive.interval))
            .http2_keep_alive_interval(self.keepalive.interval)
            .keep_alive_timeout(self.keepalive.timeout)
            .keep_alive_while_idle(self.keepalive.while_idle);

        match &self.tls {
            Some(tls) => endpoint.tls_config(tls.clone()).map_err(|e| ConnError::Dial {
                addr: addr.to_string(),
                reason: format!("tls: {}", error_chain(&e)),
            }),
            None => Ok(endpoint),
        }
    }
}

#[tonic::async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, addr: &str) -> ConnResult<GrpcChannel> {
        let endpoint = self.endpoint(addr)?;
        let backoff = self.options.backoff;

        let mut last_error: Option<String> = None;
        let connect = async {
            let mut retries = 0u32;
            loop {
                match endpoint.connect().await {
                    Ok(channel) => return channel,
                    Err(e) => {
                        let delay = backoff.delay(retries);
                        let reason = error_chain(&e);
                        debug!(%addr, retries, ?delay, error = %reason, "connect attempt failed");
                        last_error = Some(reason);
                        retries += 1;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        };

        let outcome = tokio::time::timeout(self.options.timeout, connect).await;
        match outcome {
            Ok(channel) => {
                debug!(%addr, "channel established");
                Ok(GrpcChannel::new(addr, channel))
            }
            Err(_) => Err(ConnError::Dial {
                addr: addr.to_string(),
                reason: format!(
                    "timed out after {:?}: {}",
                    self.options.timeout,
                    last_error.unwrap_or_else(|| "no connect attempt completed".to_string())
                ),
            }),
        }
    }
}

/// Render an error with its sources; tonic's transport errors hide the
/// interesting part in the chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
