//! Reachability probes.
//!
//! A [`Prober`] answers one question about one address: did it respond, how
//! fast, and was the response healthy. The health monitor wraps every probe
//! in its own timeout and folds the result into a [`ProbeOutcome`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::net::TcpStream;

use crate::BoxFuture;
use crate::error::ProbeError;

/// Reply from a peer that answered a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    /// Whether the peer answered with a healthy response.
    pub ok: bool,
    /// Round-trip time.
    pub latency: Duration,
}

/// Classified result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Peer answered with a healthy response.
    Healthy {
        /// Round-trip time.
        latency: Duration,
    },
    /// Peer answered but reported an error.
    Degraded {
        /// Round-trip time.
        latency: Duration,
    },
    /// Peer could not be reached, or the probe timed out.
    Unreachable,
}

impl ProbeOutcome {
    /// Classifies a prober result.
    #[must_use]
    pub fn from_result(result: &Result<ProbeReply, ProbeError>) -> Self {
        match result {
            Ok(reply) if reply.ok => Self::Healthy {
                latency: reply.latency,
            },
            Ok(reply) => Self::Degraded {
                latency: reply.latency,
            },
            Err(_) => Self::Unreachable,
        }
    }

    /// Returns true for [`ProbeOutcome::Healthy`].
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

/// Transport-level probe primitive.
pub trait Prober: Send + Sync {
    /// Probes `address`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or unreachable.
    fn probe<'a>(
        &'a self,
        address: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<ProbeReply, ProbeError>>;
}

/// Runs one probe under an independent timeout.
///
/// A timeout is classified exactly like an unreachable peer.
pub async fn probe_with_timeout(
    prober: &dyn Prober,
    address: &str,
    timeout: Duration,
) -> ProbeOutcome {
    let result = match tokio::time::timeout(timeout, prober.probe(address, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    if let Err(err) = &result {
        tracing::debug!(address, error = %err, "Probe failed");
    }
    ProbeOutcome::from_result(&result)
}

/// Probes by opening a TCP connection.
///
/// Accepts `host:port`, `[v6]:port`, and `/ip4|ip6|dns|dns4|dns6/<host>/tcp/<port>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl TcpProber {
    /// Creates a TCP prober.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Prober for TcpProber {
    fn probe<'a>(
        &'a self,
        address: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<ProbeReply, ProbeError>> {
        Box::pin(async move {
            let target = dial_target(address)?;
            let started = Instant::now();
            match tokio::time::timeout(timeout, TcpStream::connect(target.as_str())).await {
                Ok(Ok(_stream)) => Ok(ProbeReply {
                    ok: true,
                    latency: started.elapsed(),
                }),
                Ok(Err(err)) => Err(ProbeError::Unreachable(err.to_string())),
                Err(_) => Err(ProbeError::Timeout(timeout)),
            }
        })
    }
}

/// Converts a peer address into a `host:port` string `TcpStream` can dial.
///
/// # Errors
///
/// Returns [`ProbeError::InvalidAddress`] for anything else.
pub fn dial_target(address: &str) -> Result<String, ProbeError> {
    let address = address.trim();
    let invalid = || ProbeError::InvalidAddress(address.to_string());

    if !address.starts_with('/') {
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }
        return Ok(address.to_string());
    }

    let parts: Vec<&str> = address.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        [proto, host, "tcp", port, ..] if !host.is_empty() && port.parse::<u16>().is_ok() => {
            match *proto {
                "ip4" | "dns" | "dns4" | "dns6" => Ok(format!("{host}:{port}")),
                "ip6" => Ok(format!("[{host}]:{port}")),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

/// Prober answering from a fixed script, keyed by address.
///
/// Addresses without a script entry are unreachable. Useful when embedding
/// the manager without a network, and in tests.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    replies: RwLock<HashMap<String, ScriptedReply>>,
}

#[derive(Debug, Clone, Copy)]
struct ScriptedReply {
    reply: Option<ProbeReply>,
    delay: Duration,
}

impl ScriptedProber {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a healthy reply.
    pub fn healthy(&self, address: impl Into<String>, latency: Duration) {
        self.set(address, Some(ProbeReply { ok: true, latency }), Duration::ZERO);
    }

    /// Scripts a reachable-but-error reply.
    pub fn degraded(&self, address: impl Into<String>, latency: Duration) {
        self.set(address, Some(ProbeReply { ok: false, latency }), Duration::ZERO);
    }

    /// Scripts an unreachable peer.
    pub fn unreachable(&self, address: impl Into<String>) {
        self.set(address, None, Duration::ZERO);
    }

    /// Scripts a healthy reply that only arrives after `delay`.
    pub fn slow(&self, address: impl Into<String>, delay: Duration) {
        self.set(
            address,
            Some(ProbeReply {
                ok: true,
                latency: delay,
            }),
            delay,
        );
    }

    fn set(&self, address: impl Into<String>, reply: Option<ProbeReply>, delay: Duration) {
        self.replies
            .write()
            .insert(address.into(), ScriptedReply { reply, delay });
    }
}

impl Prober for ScriptedProber {
    fn probe<'a>(
        &'a self,
        address: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<ProbeReply, ProbeError>> {
        let scripted = self.replies.read().get(address).copied();
        Box::pin(async move {
            let Some(scripted) = scripted else {
                return Err(ProbeError::Unreachable(address.to_string()));
            };
            if !scripted.delay.is_zero() {
                tokio::time::sleep(scripted.delay).await;
            }
            scripted
                .reply
                .ok_or_else(|| ProbeError::Unreachable(address.to_string()))
        })
    }
}
