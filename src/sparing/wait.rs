//! Confirmation / Wait Protocol
//!
//! Bounded polling loops that wait for a virtual drive (and, when the peer
//! SP is alive, its peer instance) to acknowledge a requested transition.
//!
//! Every wait enforces a floor on the configured timeout, settles briefly
//! before the first probe and then probes once per poll interval. A probe
//! that fails aborts the wait immediately; running out of time is reported
//! separately as a timeout. All sleeping goes through the injected
//! [`Clock`] so tests can run on virtual time.

use crate::domain::ports::{Clock, ClockRef, PeerMonitor, TopologyService, VirtualDriveService};
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::config::SparingTunables;
use crate::sparing::metrics::SparingMetrics;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Clocks
// =============================================================================

/// Wall-clock time backed by the tokio timer
#[derive(Debug)]
pub struct TokioClock {
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: tokio::time::Instant::now(),
        })
    }
}

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Virtual time: sleeping advances the clock instantly
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Move virtual time forward without sleeping
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Confirmations
// =============================================================================

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStep {
    Satisfied,
    Pending,
    /// The awaited transition can no longer happen
    Failed(String),
}

/// Acknowledgement awaited from a virtual drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// New edge attached and swapped in
    SwapIn { edge_index: EdgeIndex },
    /// Edge detached and swapped out
    SwapOut { edge_index: EdgeIndex },
    /// Configuration mode change applied and equal to the target
    ConfigMode(VdConfigMode),
    /// Swap request handed back; waits while the request is in progress
    SwapRequestComplete,
    /// Operator copy started
    UserCopyStarted,
    /// Checkpoint moved to the end marker for a complete or abort command
    CopyCompleteOrFailed(SwapCommand),
}

impl Confirmation {
    pub fn name(&self) -> &'static str {
        match self {
            Confirmation::SwapIn { .. } => "edge swap-in",
            Confirmation::SwapOut { .. } => "edge swap-out",
            Confirmation::ConfigMode(_) => "configuration mode change",
            Confirmation::SwapRequestComplete => "swap request complete",
            Confirmation::UserCopyStarted => "user copy start",
            Confirmation::CopyCompleteOrFailed(_) => "copy complete or failed",
        }
    }

    /// Edge index the confirmation refers to, if any
    pub fn edge_index(&self) -> Option<EdgeIndex> {
        match self {
            Confirmation::SwapIn { edge_index } | Confirmation::SwapOut { edge_index } => {
                Some(*edge_index)
            }
            _ => None,
        }
    }

    /// Evaluate one status bundle
    pub fn evaluate(&self, info: &VirtualDriveInfo) -> WaitStep {
        let satisfied = match self {
            Confirmation::SwapIn { .. } => info.swap_in_complete,
            Confirmation::SwapOut { .. } => info.swap_out_complete,
            Confirmation::ConfigMode(expected) => {
                info.change_mode_complete && info.configuration_mode == Some(*expected)
            }
            Confirmation::SwapRequestComplete => !info.request_in_progress,
            Confirmation::UserCopyStarted => info.user_copy_started,
            Confirmation::CopyCompleteOrFailed(command) => {
                if !info.request_in_progress {
                    return WaitStep::Failed("copy request no longer in progress".into());
                }
                match command {
                    SwapCommand::AbortCopy => info.copy_failed_in_progress,
                    _ => info.copy_complete_in_progress,
                }
            }
        };
        if satisfied {
            WaitStep::Satisfied
        } else {
            WaitStep::Pending
        }
    }
}

// =============================================================================
// Waiter
// =============================================================================

/// Runs bounded polling waits on behalf of the gateway
pub struct Waiter {
    clock: ClockRef,
    tunables: SparingTunables,
    metrics: Arc<SparingMetrics>,
}

impl Waiter {
    pub fn new(clock: ClockRef, tunables: SparingTunables, metrics: Arc<SparingMetrics>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            tunables,
            metrics,
        })
    }

    /// Poll `probe` until it is satisfied or the floored timeout elapses
    pub async fn wait_for<F, Fut>(
        &self,
        what: &'static str,
        object_id: ObjectId,
        timeout_secs: u32,
        probe: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WaitStep>>,
    {
        let policy = self.tunables.wait_policy();
        self.poll_until(
            what,
            object_id,
            policy.effective_timeout_secs(timeout_secs),
            policy.settle_delay(),
            policy.poll_interval(),
            probe,
        )
        .await
    }

    /// Wait for a virtual drive to acknowledge `confirmation`
    pub async fn confirm(
        &self,
        vd: &dyn VirtualDriveService,
        vd_object_id: ObjectId,
        confirmation: Confirmation,
    ) -> Result<()> {
        if let Some(edge_index) = confirmation.edge_index() {
            if edge_index > SECOND_EDGE_INDEX {
                return Err(Error::InvalidEdgeIndex {
                    object_id: vd_object_id,
                    edge_index,
                });
            }
        }

        let timeout_secs = match confirmation {
            Confirmation::CopyCompleteOrFailed(_) => self.tunables.copy_wait_timeout_secs(),
            _ => self.tunables.operation_timeout_secs(),
        };

        debug!(
            "Waiting for {} on vd {:#x} (timeout {}s)",
            confirmation.name(),
            vd_object_id,
            timeout_secs
        );

        self.wait_for(confirmation.name(), vd_object_id, timeout_secs, move || async move {
            let info = vd.get_info(vd_object_id).await?;
            Ok(confirmation.evaluate(&info))
        })
        .await
    }

    /// Wait until the object, and its peer instance when `also_check_peer`
    /// is set and the peer is alive, reaches `target`. Probes every
    /// `interval`, starting one interval after the call.
    pub async fn wait_for_lifecycle_state(
        &self,
        topology: &dyn TopologyService,
        peer: &dyn PeerMonitor,
        object_id: ObjectId,
        target: LifecycleState,
        also_check_peer: bool,
        interval: Duration,
    ) -> Result<()> {
        let policy = self.tunables.wait_policy();
        self.poll_until(
            "lifecycle state",
            object_id,
            policy.effective_timeout_secs(self.tunables.operation_timeout_secs()),
            interval,
            interval,
            move || async move {
                let (local, peer_state) =
                    lifecycle_states(topology, peer, object_id, also_check_peer).await?;
                Ok(if local == target && peer_state == target {
                    WaitStep::Satisfied
                } else {
                    WaitStep::Pending
                })
            },
        )
        .await
    }

    /// Bring an object out of hibernation and wait for it (and its peer) to
    /// become Ready. Objects that can no longer become Ready fail at once.
    pub async fn wait_for_ready(
        &self,
        topology: &dyn TopologyService,
        peer: &dyn PeerMonitor,
        object_id: ObjectId,
    ) -> Result<()> {
        let (local, peer_state) = lifecycle_states(topology, peer, object_id, true).await?;
        if !local.can_become_ready() || !peer_state.can_become_ready() {
            return Err(Error::WaitTransport {
                what: "object ready",
                object_id,
                reason: format!("local state {} peer state {}", local, peer_state),
            });
        }
        if local == LifecycleState::Ready && peer_state == LifecycleState::Ready {
            return Ok(());
        }

        info!(
            "Object {:#x} is {} (peer {}); requesting exit from hibernation",
            object_id, local, peer_state
        );
        topology.exit_hibernation(object_id).await?;

        let interval = self.tunables.wait_policy().ready_poll_interval();
        self.wait_for_lifecycle_state(topology, peer, object_id, LifecycleState::Ready, true, interval)
            .await
    }

    async fn poll_until<F, Fut>(
        &self,
        what: &'static str,
        object_id: ObjectId,
        total_secs: u32,
        settle: Duration,
        interval: Duration,
        mut probe: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WaitStep>>,
    {
        let total = Duration::from_secs(u64::from(total_secs));
        let started = self.clock.elapsed();

        self.clock.sleep(settle).await;
        let mut waited = Duration::ZERO;
        let mut step = Self::probe_once(what, object_id, &mut probe).await?;

        while step == WaitStep::Pending && waited < total {
            self.clock.sleep(interval).await;
            waited += interval;
            step = Self::probe_once(what, object_id, &mut probe).await?;
        }

        match step {
            WaitStep::Satisfied => {
                self.metrics.record_wait_satisfied();
                debug!(
                    "{} on object {:#x} confirmed after {:?}",
                    what,
                    object_id,
                    self.clock.elapsed().saturating_sub(started)
                );
                Ok(())
            }
            WaitStep::Pending => {
                self.metrics.record_wait_timeout();
                warn!(
                    "Timed out waiting for {} on object {:#x} after {}s",
                    what,
                    object_id,
                    waited.as_secs()
                );
                Err(Error::Timeout {
                    what,
                    object_id,
                    waited_secs: waited.as_secs() as u32,
                })
            }
            WaitStep::Failed(reason) => {
                warn!("Wait for {} on object {:#x} failed: {}", what, object_id, reason);
                Err(Error::WaitTransport {
                    what,
                    object_id,
                    reason,
                })
            }
        }
    }

    async fn probe_once<F, Fut>(what: &'static str, object_id: ObjectId, probe: &mut F) -> Result<WaitStep>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WaitStep>>,
    {
        probe().await.map_err(|e| Error::WaitTransport {
            what,
            object_id,
            reason: e.to_string(),
        })
    }
}

/// Local and peer lifecycle state; a peer that is not alive counts as Ready
async fn lifecycle_states(
    topology: &dyn TopologyService,
    peer: &dyn PeerMonitor,
    object_id: ObjectId,
    also_check_peer: bool,
) -> Result<(LifecycleState, LifecycleState)> {
    let local = topology.lifecycle_state(object_id).await?;
    let peer_state = if also_check_peer && peer.is_peer_alive() {
        topology.peer_lifecycle_state(object_id).await?
    } else {
        LifecycleState::Ready
    };
    Ok((local, peer_state))
}
