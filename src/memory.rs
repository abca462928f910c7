//! In-Memory Array
//!
//! A complete array behind every port, held in concurrent maps. Used by the
//! scenario runner and by tests.
//!
//! Transactions keep an undo journal: every mutation made under a
//! transaction records the value it replaced, abort replays the journal in
//! reverse and commit discards it. When auto-acknowledge is on (the
//! default) the virtual drives raise the same progress flags a real virtual
//! drive would, so confirmation waits are satisfied on the first probe.

use crate::domain::ports::*;
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::event_log::EventRecord;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Exported offset given to every drive and edge unless overridden
pub const DEFAULT_EXPORTED_OFFSET: Lba = 0x10000;

/// Block size given to every drive unless overridden
pub const DEFAULT_BLOCK_SIZE: u32 = 520;

/// Capacity of the edge created by [`InMemoryArray::add_virtual_drive`]
pub const DEFAULT_EDGE_CAPACITY: Lba = 1000;

// =============================================================================
// State
// =============================================================================

/// One virtual drive with its two edges
#[derive(Debug, Clone)]
struct VirtualDriveState {
    mode: VdConfigMode,
    edges: [Option<EdgeSpec>; 2],
    /// Progress flags and overrides returned by get-info
    info: VirtualDriveInfo,
    desired: DesiredSpareProfile,
    upstream: UpstreamInfo,
    lifecycle: LifecycleState,
    permanent_spare_marker: bool,
    job_complete_count: u32,
    rollback_requests: u32,
}

impl VirtualDriveState {
    /// Drive the virtual drive currently exports
    fn original(&self) -> Option<ObjectId> {
        let edge = self
            .mode
            .permanent_spare_edge()
            .or_else(|| self.mode.mirror_edges().map(|(source, _)| source))?;
        self.edges[edge as usize].as_ref().map(|e| e.server_id)
    }
}

/// Value replaced by a transactional mutation
#[derive(Debug, Clone)]
enum Undo {
    Edge {
        vd_object_id: ObjectId,
        edge_index: EdgeIndex,
        previous: Option<EdgeSpec>,
    },
    ConfigType {
        pvd_object_id: ObjectId,
        previous: PvdConfigType,
    },
    PoolId {
        pvd_object_id: ObjectId,
        previous: Option<u32>,
    },
    ConfigMode {
        vd_object_id: ObjectId,
        previous: VdConfigMode,
    },
}

// =============================================================================
// In-Memory Array
// =============================================================================

/// Every port of an array in one process
pub struct InMemoryArray {
    drives: DashMap<ObjectId, CandidateDriveProfile>,
    /// Spare pool in enumeration order
    spares: RwLock<IndexSet<ObjectId>>,
    vds: DashMap<ObjectId, VirtualDriveState>,
    peer_states: DashMap<ObjectId, LifecycleState>,
    swap_pending: DashSet<ObjectId>,

    transactions: Mutex<IndexMap<TransactionId, Vec<Undo>>>,
    next_transaction_id: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    encrypted: AtomicBool,
    peer_alive: AtomicBool,
    auto_acknowledge: AtomicBool,
    swap_in_verdict: Mutex<SwapValidationVerdict>,
    swap_out_verdict: Mutex<SwapValidationVerdict>,
    failing: DashSet<String>,

    events: Mutex<Vec<EventRecord>>,
    notifications: Mutex<Vec<JobNotification>>,
    hibernation_requests: Mutex<Vec<ObjectId>>,
}

impl InMemoryArray {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            drives: DashMap::new(),
            spares: RwLock::new(IndexSet::new()),
            vds: DashMap::new(),
            peer_states: DashMap::new(),
            swap_pending: DashSet::new(),
            transactions: Mutex::new(IndexMap::new()),
            next_transaction_id: AtomicU64::new(1),
            transactions_started: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_aborted: AtomicU64::new(0),
            encrypted: AtomicBool::new(false),
            peer_alive: AtomicBool::new(true),
            auto_acknowledge: AtomicBool::new(true),
            swap_in_verdict: Mutex::new(SwapValidationVerdict::Accepted),
            swap_out_verdict: Mutex::new(SwapValidationVerdict::Accepted),
            failing: DashSet::new(),
            events: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            hibernation_requests: Mutex::new(Vec::new()),
        })
    }

    /// Array with one healthy virtual drive passing through `original`
    pub fn with_virtual_drive(vd_object_id: ObjectId, original: ObjectId) -> Arc<Self> {
        let array = Self::new();
        array.add_virtual_drive(vd_object_id, original, DriveType::Sas);
        array
    }

    /// Ready drive profile with the default offset and block size
    pub fn drive(object_id: ObjectId, drive_type: DriveType, capacity: Lba) -> CandidateDriveProfile {
        CandidateDriveProfile {
            object_id,
            drive_type,
            configured_capacity: capacity,
            exported_offset: DEFAULT_EXPORTED_OFFSET,
            block_size: DEFAULT_BLOCK_SIZE,
            pool_id: None,
            end_of_life: false,
            single_loss_failure: false,
            path_state: PathState::Enabled,
            lifecycle_state: LifecycleState::Ready,
            config_type: PvdConfigType::Unconsumed,
            has_upstream_raid_group: false,
            location: DriveLocation::new(0, 0, object_id % 25),
            serial_number: format!("SN{:08X}", object_id),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Add a virtual drive in pass-thru-first-edge mode with `original`
    /// bound to its first edge. The original drive is created when missing.
    pub fn add_virtual_drive(&self, vd_object_id: ObjectId, original: ObjectId, drive_type: DriveType) {
        let mut original_drive = self
            .drives
            .get(&original)
            .map(|d| d.clone())
            .unwrap_or_else(|| Self::drive(original, drive_type, DEFAULT_EDGE_CAPACITY * 4));
        original_drive.config_type = PvdConfigType::Raid;
        original_drive.has_upstream_raid_group = true;
        let location = original_drive.location;
        self.drives.insert(original, original_drive);

        let edge = EdgeSpec {
            server_id: original,
            client_id: vd_object_id,
            client_index: FIRST_EDGE_INDEX,
            capacity: DEFAULT_EDGE_CAPACITY,
            offset: DEFAULT_EXPORTED_OFFSET,
        };
        self.vds.insert(
            vd_object_id,
            VirtualDriveState {
                mode: VdConfigMode::PassThruFirstEdge,
                edges: [Some(edge), None],
                info: VirtualDriveInfo::default(),
                desired: DesiredSpareProfile {
                    original_object_id: Some(original),
                    drive_type,
                    capacity_required: DEFAULT_EDGE_CAPACITY,
                    exported_offset: DEFAULT_EXPORTED_OFFSET,
                    block_size: DEFAULT_BLOCK_SIZE,
                    location,
                },
                upstream: UpstreamInfo {
                    upstream_object_id: vd_object_id + 0x1000,
                    is_redundant: true,
                    is_ready: true,
                    is_in_use: true,
                    is_degraded: false,
                    copy_in_progress: false,
                    rekey_in_progress: false,
                },
                lifecycle: LifecycleState::Ready,
                permanent_spare_marker: false,
                job_complete_count: 0,
                rollback_requests: 0,
            },
        );
        debug!("Added vd {:#x} over pvd {:#x}", vd_object_id, original);
    }

    pub fn add_drive(&self, profile: CandidateDriveProfile) {
        self.drives.insert(profile.object_id, profile);
    }

    /// Add a drive and enrol it in the spare pool
    pub fn add_spare(&self, profile: CandidateDriveProfile) {
        let object_id = profile.object_id;
        self.add_drive(profile);
        self.spares.write().insert(object_id);
    }

    pub fn update_drive<F: FnOnce(&mut CandidateDriveProfile)>(&self, object_id: ObjectId, f: F) {
        if let Some(mut drive) = self.drives.get_mut(&object_id) {
            f(&mut drive);
        }
    }

    pub fn update_vd_info<F: FnOnce(&mut VirtualDriveInfo)>(&self, vd_object_id: ObjectId, f: F) {
        if let Some(mut vd) = self.vds.get_mut(&vd_object_id) {
            f(&mut vd.info);
        }
    }

    pub fn update_upstream<F: FnOnce(&mut UpstreamInfo)>(&self, vd_object_id: ObjectId, f: F) {
        if let Some(mut vd) = self.vds.get_mut(&vd_object_id) {
            f(&mut vd.upstream);
        }
    }

    pub fn update_desired<F: FnOnce(&mut DesiredSpareProfile)>(&self, vd_object_id: ObjectId, f: F) {
        if let Some(mut vd) = self.vds.get_mut(&vd_object_id) {
            f(&mut vd.desired);
        }
    }

    /// Change a mode outside any transaction
    pub fn set_config_mode(&self, vd_object_id: ObjectId, mode: VdConfigMode) {
        if let Some(mut vd) = self.vds.get_mut(&vd_object_id) {
            vd.mode = mode;
        }
    }

    pub fn set_lifecycle_state(&self, object_id: ObjectId, state: LifecycleState) {
        if let Some(mut vd) = self.vds.get_mut(&object_id) {
            vd.lifecycle = state;
            return;
        }
        self.update_drive(object_id, |drive| drive.lifecycle_state = state);
    }

    pub fn set_peer_lifecycle_state(&self, object_id: ObjectId, state: LifecycleState) {
        self.peer_states.insert(object_id, state);
    }

    pub fn set_pool_id(&self, object_id: ObjectId, pool_id: Option<u32>) {
        self.update_drive(object_id, |drive| drive.pool_id = pool_id);
    }

    pub fn set_peer_alive(&self, alive: bool) {
        self.peer_alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_encrypted(&self, encrypted: bool) {
        self.encrypted.store(encrypted, Ordering::SeqCst);
    }

    /// When off, virtual drives apply changes but never raise progress flags
    pub fn set_auto_acknowledge(&self, enabled: bool) {
        self.auto_acknowledge.store(enabled, Ordering::SeqCst);
    }

    pub fn set_swap_in_verdict(&self, verdict: SwapValidationVerdict) {
        *self.swap_in_verdict.lock() = verdict;
    }

    pub fn set_swap_out_verdict(&self, verdict: SwapValidationVerdict) {
        *self.swap_out_verdict.lock() = verdict;
    }

    /// Make every later call of the named port operation fail
    pub fn fail_operation(&self, operation: &str) {
        self.failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn edge_server(&self, vd_object_id: ObjectId, edge_index: EdgeIndex) -> Option<ObjectId> {
        let vd = self.vds.get(&vd_object_id)?;
        vd.edges
            .get(edge_index as usize)?
            .as_ref()
            .map(|edge| edge.server_id)
    }

    pub fn config_mode(&self, vd_object_id: ObjectId) -> Option<VdConfigMode> {
        self.vds.get(&vd_object_id).map(|vd| vd.mode)
    }

    pub fn config_type(&self, object_id: ObjectId) -> Option<PvdConfigType> {
        self.drives.get(&object_id).map(|drive| drive.config_type)
    }

    pub fn permanent_spare_marker_set(&self, vd_object_id: ObjectId) -> bool {
        self.vds
            .get(&vd_object_id)
            .map(|vd| vd.permanent_spare_marker)
            .unwrap_or(false)
    }

    pub fn user_copy_started(&self, vd_object_id: ObjectId) -> bool {
        self.vds
            .get(&vd_object_id)
            .map(|vd| vd.info.user_copy_started)
            .unwrap_or(false)
    }

    pub fn swap_pending(&self, object_id: ObjectId) -> bool {
        self.swap_pending.contains(&object_id)
    }

    pub fn job_complete_count(&self, vd_object_id: ObjectId) -> u32 {
        self.vds
            .get(&vd_object_id)
            .map(|vd| vd.job_complete_count)
            .unwrap_or(0)
    }

    pub fn rollback_requests(&self, vd_object_id: ObjectId) -> u32 {
        self.vds
            .get(&vd_object_id)
            .map(|vd| vd.rollback_requests)
            .unwrap_or(0)
    }

    pub fn has_open_transactions(&self) -> bool {
        !self.transactions.lock().is_empty()
    }

    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::SeqCst)
    }

    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::SeqCst)
    }

    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::SeqCst)
    }

    pub fn exit_hibernation_requests(&self) -> Vec<ObjectId> {
        self.hibernation_requests.lock().clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    pub fn notifications(&self) -> Vec<JobNotification> {
        self.notifications.lock().clone()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check(&self, operation: &'static str, object_id: ObjectId) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(Error::gateway(operation, object_id, "injected failure"));
        }
        Ok(())
    }

    fn acknowledging(&self) -> bool {
        self.auto_acknowledge.load(Ordering::SeqCst)
    }

    /// Append to the journal of an open transaction
    fn journal(&self, transaction_id: TransactionId, undo: Undo) -> Result<()> {
        let mut transactions = self.transactions.lock();
        let journal = transactions
            .get_mut(&transaction_id)
            .ok_or(Error::TransactionNotOpen { transaction_id })?;
        journal.push(undo);
        Ok(())
    }

    fn checked_edge(vd_object_id: ObjectId, edge_index: EdgeIndex) -> Result<usize> {
        if edge_index > SECOND_EDGE_INDEX {
            return Err(Error::InvalidEdgeIndex {
                object_id: vd_object_id,
                edge_index,
            });
        }
        Ok(edge_index as usize)
    }

    fn vd<T>(&self, vd_object_id: ObjectId, f: impl FnOnce(&VirtualDriveState) -> T) -> Result<T> {
        self.vds
            .get(&vd_object_id)
            .map(|vd| f(vd.value()))
            .ok_or(Error::ObjectNotFound {
                object_id: vd_object_id,
            })
    }

    fn vd_mut<T>(
        &self,
        vd_object_id: ObjectId,
        f: impl FnOnce(&mut VirtualDriveState) -> T,
    ) -> Result<T> {
        self.vds
            .get_mut(&vd_object_id)
            .map(|mut vd| f(vd.value_mut()))
            .ok_or(Error::ObjectNotFound {
                object_id: vd_object_id,
            })
    }

    fn set_edge(
        &self,
        transaction_id: TransactionId,
        vd_object_id: ObjectId,
        edge_index: EdgeIndex,
        edge: Option<EdgeSpec>,
    ) -> Result<()> {
        let slot = Self::checked_edge(vd_object_id, edge_index)?;
        let previous = self.vd(vd_object_id, |vd| vd.edges[slot].clone())?;
        self.journal(
            transaction_id,
            Undo::Edge {
                vd_object_id,
                edge_index,
                previous,
            },
        )?;
        let acknowledge = self.acknowledging();
        self.vd_mut(vd_object_id, |vd| {
            let attached = edge.is_some();
            vd.edges[slot] = edge;
            if acknowledge {
                if attached {
                    vd.info.swap_in_complete = true;
                } else {
                    vd.info.swap_out_complete = true;
                }
            }
        })
    }

    fn undo(&self, undo: Undo) {
        match undo {
            Undo::Edge {
                vd_object_id,
                edge_index,
                previous,
            } => {
                if let Some(mut vd) = self.vds.get_mut(&vd_object_id) {
                    vd.edges[edge_index as usize] = previous;
                }
            }
            Undo::ConfigType {
                pvd_object_id,
                previous,
            } => self.update_drive(pvd_object_id, |drive| drive.config_type = previous),
            Undo::PoolId {
                pvd_object_id,
                previous,
            } => self.update_drive(pvd_object_id, |drive| drive.pool_id = previous),
            Undo::ConfigMode {
                vd_object_id,
                previous,
            } => self.set_config_mode(vd_object_id, previous),
        }
    }
}

// =============================================================================
// Configuration Database
// =============================================================================

#[async_trait]
impl ConfigDatabase for InMemoryArray {
    async fn start_transaction(&self, job_number: u64) -> Result<TransactionId> {
        self.check("start_transaction", 0)?;
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        self.transactions.lock().insert(transaction_id, Vec::new());
        self.transactions_started.fetch_add(1, Ordering::SeqCst);
        debug!("Job {} opened transaction {}", job_number, transaction_id);
        Ok(transaction_id)
    }

    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        self.check("commit_transaction", 0)?;
        self.transactions
            .lock()
            .shift_remove(&transaction_id)
            .ok_or(Error::TransactionNotOpen { transaction_id })?;
        self.transactions_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        self.check("abort_transaction", 0)?;
        let journal = self
            .transactions
            .lock()
            .shift_remove(&transaction_id)
            .ok_or(Error::TransactionNotOpen { transaction_id })?;
        let changes = journal.len();
        for undo in journal.into_iter().rev() {
            self.undo(undo);
        }
        self.transactions_aborted.fetch_add(1, Ordering::SeqCst);
        info!("Transaction {} aborted; {} changes undone", transaction_id, changes);
        Ok(())
    }

    async fn create_edge(&self, transaction_id: TransactionId, edge: &EdgeSpec) -> Result<()> {
        self.check("create_edge", edge.client_id)?;
        if !self.drives.contains_key(&edge.server_id) {
            return Err(Error::ObjectNotFound {
                object_id: edge.server_id,
            });
        }
        self.set_edge(transaction_id, edge.client_id, edge.client_index, Some(edge.clone()))
    }

    async fn destroy_edge(
        &self,
        transaction_id: TransactionId,
        client_id: ObjectId,
        client_index: EdgeIndex,
    ) -> Result<()> {
        self.check("destroy_edge", client_id)?;
        self.set_edge(transaction_id, client_id, client_index, None)
    }

    async fn update_drive_record(&self, update: &DriveRecordUpdate) -> Result<()> {
        self.check("update_drive_record", update.object_id)?;
        let pvd_object_id = update.object_id;
        let current = self
            .drives
            .get(&pvd_object_id)
            .map(|drive| (drive.config_type, drive.pool_id))
            .ok_or(Error::ObjectNotFound {
                object_id: pvd_object_id,
            })?;

        match &update.change {
            DriveRecordChange::ConfigType(config_type) => {
                self.journal(
                    update.transaction_id,
                    Undo::ConfigType {
                        pvd_object_id,
                        previous: current.0,
                    },
                )?;
                let config_type = *config_type;
                self.update_drive(pvd_object_id, |drive| drive.config_type = config_type);
            }
            DriveRecordChange::PoolId(pool_id) => {
                self.journal(
                    update.transaction_id,
                    Undo::PoolId {
                        pvd_object_id,
                        previous: current.1,
                    },
                )?;
                let pool_id = *pool_id;
                self.update_drive(pvd_object_id, |drive| drive.pool_id = pool_id);
            }
        }
        Ok(())
    }

    async fn update_vd_config_mode(
        &self,
        transaction_id: TransactionId,
        vd_object_id: ObjectId,
        mode: VdConfigMode,
    ) -> Result<()> {
        self.check("update_vd_config_mode", vd_object_id)?;
        let previous = self.vd(vd_object_id, |vd| vd.mode)?;
        self.journal(
            transaction_id,
            Undo::ConfigMode {
                vd_object_id,
                previous,
            },
        )?;
        let acknowledge = self.acknowledging();
        self.vd_mut(vd_object_id, |vd| {
            vd.mode = mode;
            if acknowledge {
                vd.info.change_mode_complete = true;
            }
        })
    }

    async fn drive_pool_id(&self, pvd_object_id: ObjectId) -> Result<Option<u32>> {
        self.check("drive_pool_id", pvd_object_id)?;
        self.drives
            .get(&pvd_object_id)
            .map(|drive| drive.pool_id)
            .ok_or(Error::ObjectNotFound {
                object_id: pvd_object_id,
            })
    }

    async fn mark_swap_pending(&self, pvd_object_id: ObjectId) -> Result<()> {
        self.check("mark_swap_pending", pvd_object_id)?;
        self.swap_pending.insert(pvd_object_id);
        Ok(())
    }

    async fn clear_swap_pending(&self, pvd_object_id: ObjectId) -> Result<()> {
        self.check("clear_swap_pending", pvd_object_id)?;
        self.swap_pending.remove(&pvd_object_id);
        Ok(())
    }

    async fn is_encrypted(&self) -> Result<bool> {
        Ok(self.encrypted.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Topology
// =============================================================================

#[async_trait]
impl TopologyService for InMemoryArray {
    async fn object_class(&self, object_id: ObjectId) -> Result<ObjectClass> {
        if self.vds.contains_key(&object_id) {
            return Ok(ObjectClass::VirtualDrive);
        }
        if self.drives.contains_key(&object_id) {
            return Ok(ObjectClass::ProvisionDrive);
        }
        if self
            .vds
            .iter()
            .any(|vd| vd.upstream.upstream_object_id == object_id)
        {
            return Ok(ObjectClass::RaidGroup);
        }
        Err(Error::ObjectNotFound { object_id })
    }

    async fn drive_profile(&self, pvd_object_id: ObjectId) -> Result<CandidateDriveProfile> {
        self.check("drive_profile", pvd_object_id)?;
        self.drives
            .get(&pvd_object_id)
            .map(|drive| drive.clone())
            .ok_or(Error::ObjectNotFound {
                object_id: pvd_object_id,
            })
    }

    async fn spare_pool(&self, vd_object_id: ObjectId) -> Result<Vec<ObjectId>> {
        self.check("spare_pool", vd_object_id)?;
        Ok(self
            .spares
            .read()
            .iter()
            .copied()
            .filter(|pvd| self.config_type(*pvd) == Some(PvdConfigType::Unconsumed))
            .collect())
    }

    async fn block_edge_info(&self, object_id: ObjectId, edge_index: EdgeIndex) -> Result<BlockEdgeInfo> {
        self.check("block_edge_info", object_id)?;
        let slot = Self::checked_edge(object_id, edge_index)?;
        let edge = self.vd(object_id, |vd| vd.edges[slot].clone())?;
        Ok(match edge {
            Some(edge) => BlockEdgeInfo {
                server_id: Some(edge.server_id),
                client_index: edge_index,
                capacity: edge.capacity,
                offset: edge.offset,
            },
            None => BlockEdgeInfo {
                server_id: None,
                client_index: edge_index,
                capacity: 0,
                offset: 0,
            },
        })
    }

    async fn lifecycle_state(&self, object_id: ObjectId) -> Result<LifecycleState> {
        if let Some(vd) = self.vds.get(&object_id) {
            return Ok(vd.lifecycle);
        }
        self.drives
            .get(&object_id)
            .map(|drive| drive.lifecycle_state)
            .ok_or(Error::ObjectNotFound { object_id })
    }

    async fn peer_lifecycle_state(&self, object_id: ObjectId) -> Result<LifecycleState> {
        if let Some(state) = self.peer_states.get(&object_id) {
            return Ok(*state);
        }
        self.lifecycle_state(object_id).await
    }

    async fn exit_hibernation(&self, object_id: ObjectId) -> Result<()> {
        self.check("exit_hibernation", object_id)?;
        self.hibernation_requests.lock().push(object_id);
        let local = self.lifecycle_state(object_id).await?;
        if matches!(local, LifecycleState::Hibernate | LifecycleState::PendingHibernate) {
            self.set_lifecycle_state(object_id, LifecycleState::Ready);
        }
        if let Some(mut peer) = self.peer_states.get_mut(&object_id) {
            if matches!(*peer, LifecycleState::Hibernate | LifecycleState::PendingHibernate) {
                *peer = LifecycleState::Ready;
            }
        }
        Ok(())
    }

    async fn upstream_info(&self, vd_object_id: ObjectId) -> Result<UpstreamInfo> {
        self.check("upstream_info", vd_object_id)?;
        self.vd(vd_object_id, |vd| vd.upstream.clone())
    }
}

// =============================================================================
// Virtual Drive
// =============================================================================

#[async_trait]
impl VirtualDriveService for InMemoryArray {
    async fn get_info(&self, vd_object_id: ObjectId) -> Result<VirtualDriveInfo> {
        self.check("get_info", vd_object_id)?;
        self.vd(vd_object_id, |vd| {
            let mut info = vd.info.clone();
            info.configuration_mode = Some(vd.mode);
            if info.original_pvd_object_id.is_none() {
                info.original_pvd_object_id = vd.original();
            }
            info
        })
    }

    async fn desired_spare_profile(&self, vd_object_id: ObjectId) -> Result<DesiredSpareProfile> {
        self.check("desired_spare_profile", vd_object_id)?;
        self.vd(vd_object_id, |vd| {
            let mut desired = vd.desired.clone();
            desired.original_object_id = vd.original();
            desired
        })
    }

    async fn validate_swap_in(&self, request: &SwapRequest) -> Result<SwapValidationVerdict> {
        self.check("validate_swap_in", request.vd_object_id)?;
        Ok(*self.swap_in_verdict.lock())
    }

    async fn validate_swap_out(&self, request: &SwapRequest) -> Result<SwapValidationVerdict> {
        self.check("validate_swap_out", request.vd_object_id)?;
        Ok(*self.swap_out_verdict.lock())
    }

    async fn swap_request_complete(&self, request: &SwapRequest) -> Result<()> {
        self.check("swap_request_complete", request.vd_object_id)?;
        let acknowledge = self.acknowledging();
        self.vd_mut(request.vd_object_id, |vd| {
            if acknowledge {
                vd.info.request_in_progress = false;
                vd.info.copy_complete_in_progress = false;
                vd.info.copy_failed_in_progress = false;
            }
        })
    }

    async fn start_user_copy(&self, request: &SwapRequest) -> Result<()> {
        self.check("start_user_copy", request.vd_object_id)?;
        let acknowledge = self.acknowledging();
        self.vd_mut(request.vd_object_id, |vd| {
            if acknowledge {
                vd.info.user_copy_started = true;
            }
        })
    }

    async fn swap_request_rollback(&self, vd_object_id: ObjectId, command: SwapCommand) -> Result<()> {
        self.check("swap_request_rollback", vd_object_id)?;
        debug!("Vd {:#x} rolling back {}", vd_object_id, command);
        self.vd_mut(vd_object_id, |vd| vd.rollback_requests += 1)
    }

    async fn send_job_complete(&self, vd_object_id: ObjectId) -> Result<()> {
        self.check("send_job_complete", vd_object_id)?;
        self.vd_mut(vd_object_id, |vd| vd.job_complete_count += 1)
    }

    async fn set_checkpoint_to_end_marker(&self, vd_object_id: ObjectId, command: SwapCommand) -> Result<()> {
        self.check("set_checkpoint_to_end_marker", vd_object_id)?;
        let acknowledge = self.acknowledging();
        self.vd_mut(vd_object_id, |vd| {
            if acknowledge {
                vd.info.request_in_progress = true;
                match command {
                    SwapCommand::AbortCopy => vd.info.copy_failed_in_progress = true,
                    _ => vd.info.copy_complete_in_progress = true,
                }
            }
        })
    }

    async fn set_permanent_spare_marker(&self, vd_object_id: ObjectId) -> Result<()> {
        self.check("set_permanent_spare_marker", vd_object_id)?;
        self.vd_mut(vd_object_id, |vd| vd.permanent_spare_marker = true)
    }

    async fn permanent_spare_marker(&self, vd_object_id: ObjectId) -> Result<bool> {
        self.vd(vd_object_id, |vd| vd.permanent_spare_marker)
    }
}

// =============================================================================
// Peer / Event Log / Notifications
// =============================================================================

impl PeerMonitor for InMemoryArray {
    fn is_peer_alive(&self) -> bool {
        self.peer_alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventLog for InMemoryArray {
    async fn write_event(&self, record: EventRecord) -> Result<()> {
        self.check("write_event", record.vd_object_id)?;
        self.events.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl NotificationBus for InMemoryArray {
    async fn send_notification(&self, notification: JobNotification) -> Result<()> {
        self.check("send_notification", notification.vd_object_id)?;
        self.notifications.lock().push(notification);
        Ok(())
    }
}
