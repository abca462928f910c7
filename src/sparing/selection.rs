//! Spare Selection Engine
//!
//! Chooses the replacement drive for a virtual drive. Every candidate from
//! the spare pool must pass all hard rules; survivors are ranked by a
//! priority bitmask built from the soft rules, where a higher bit always
//! outweighs every lower bit. Equal bitmasks go to the lower object id.

use crate::domain::ports::{TopologyServiceRef, VirtualDriveServiceRef};
use crate::domain::types::*;
use crate::error::{Error, Result};
use crate::sparing::metrics::SparingMetrics;
use crate::sparing::taxonomy::{InternalError, JobError};
use crate::sparing::tier::{desired_tier, tier_entry, PerformanceTierEntry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Priority Bitmask
// =============================================================================

/// Soft rules, by bit position. Bit 0 is the least significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityRule {
    MatchingEnclosure = 0,
    BestFit = 1,
    MatchingPort = 2,
    BestOffset = 3,
    MatchingDriveType = 4,
    MatchingBlockSize = 5,
}

impl PriorityRule {
    /// Most significant first
    pub const ALL: [PriorityRule; 6] = [
        PriorityRule::MatchingBlockSize,
        PriorityRule::MatchingDriveType,
        PriorityRule::BestOffset,
        PriorityRule::MatchingPort,
        PriorityRule::BestFit,
        PriorityRule::MatchingEnclosure,
    ];

    pub fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// Bits that may be set in a [`SelectionPriority`]
pub const PRIORITY_VALID_MASK: u32 = (1 << PriorityRule::ALL.len()) - 1;

/// Unsigned bitmask of satisfied soft rules; larger is better
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SelectionPriority(u32);

impl SelectionPriority {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & PRIORITY_VALID_MASK)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn set(&mut self, rule: PriorityRule) {
        self.0 |= rule.bit();
    }

    pub fn clear(&mut self, rule: PriorityRule) {
        self.0 &= !rule.bit();
    }

    pub fn contains(&self, rule: PriorityRule) -> bool {
        self.0 & rule.bit() != 0
    }
}

impl std::fmt::Display for SelectionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#08b}", self.0)
    }
}

/// Whether a candidate beats the current selection: strictly higher
/// priority, or equal priority and lower object id
pub fn prefer_candidate(
    candidate_priority: SelectionPriority,
    candidate_id: ObjectId,
    selected_priority: SelectionPriority,
    selected_id: ObjectId,
) -> bool {
    candidate_priority > selected_priority
        || (candidate_priority == selected_priority && candidate_id < selected_id)
}

// =============================================================================
// Hard Rules
// =============================================================================

/// `current` can hold `required` blocks. An unknown capacity never can.
pub fn capacity_check(required: Lba, current: Lba) -> bool {
    current != LBA_INVALID && current >= required
}

/// Drive is usable: not end-of-life, path up, object Ready or Hibernate,
/// not lost on one SP
pub fn is_drive_healthy(candidate: &CandidateDriveProfile) -> bool {
    !candidate.end_of_life
        && matches!(candidate.path_state, PathState::Enabled | PathState::Slumber)
        && matches!(
            candidate.lifecycle_state,
            LifecycleState::Ready | LifecycleState::Hibernate
        )
        && !candidate.single_loss_failure
}

/// Rules every candidate must pass, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardRule {
    Healthy,
    Offset,
    NotReserved,
    PerformanceTier,
    BlockSize,
    Capacity,
}

impl HardRule {
    pub const ALL: [HardRule; 6] = [
        HardRule::Healthy,
        HardRule::Offset,
        HardRule::NotReserved,
        HardRule::PerformanceTier,
        HardRule::BlockSize,
        HardRule::Capacity,
    ];

    /// Block size is not enforced: 4k drives may replace 520-byte drives
    pub fn is_enabled(&self) -> bool {
        !matches!(self, HardRule::BlockSize)
    }

    pub fn passes(&self, criteria: &SelectionCriteria, candidate: &CandidateDriveProfile) -> bool {
        let desired = &criteria.desired;
        match self {
            HardRule::Healthy => {
                desired.original_object_id == Some(candidate.object_id) || is_drive_healthy(candidate)
            }
            HardRule::Offset => candidate.exported_offset <= desired.exported_offset,
            HardRule::NotReserved => candidate.pool_id.is_none(),
            HardRule::PerformanceTier => criteria.tier.position(candidate.drive_type).is_some(),
            HardRule::BlockSize => candidate.block_size == desired.block_size,
            HardRule::Capacity => {
                capacity_check(desired.capacity_required, candidate.configured_capacity)
            }
        }
    }
}

impl std::fmt::Display for HardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardRule::Healthy => write!(f, "healthy"),
            HardRule::Offset => write!(f, "offset"),
            HardRule::NotReserved => write!(f, "not_reserved"),
            HardRule::PerformanceTier => write!(f, "performance_tier"),
            HardRule::BlockSize => write!(f, "block_size"),
            HardRule::Capacity => write!(f, "capacity"),
        }
    }
}

// =============================================================================
// Criteria and Ranking
// =============================================================================

/// Desired profile plus its resolved performance tier
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub desired: DesiredSpareProfile,
    pub tier: PerformanceTierEntry,
}

impl SelectionCriteria {
    pub fn new(desired: DesiredSpareProfile) -> Result<Self> {
        let tier = tier_entry(desired_tier(desired.drive_type)?)?;
        Ok(Self { desired, tier })
    }

    /// First enabled hard rule the candidate fails, if any
    pub fn failed_hard_rule(&self, candidate: &CandidateDriveProfile) -> Option<HardRule> {
        HardRule::ALL
            .iter()
            .filter(|rule| rule.is_enabled())
            .find(|rule| !rule.passes(self, candidate))
            .copied()
    }
}

/// Current best candidate
#[derive(Debug, Clone, Serialize)]
pub struct RankedSpare {
    pub object_id: ObjectId,
    pub priority: SelectionPriority,
    pub profile: CandidateDriveProfile,
}

fn offset_distance(a: Lba, b: Lba) -> Lba {
    a.abs_diff(b)
}

/// Soft-rule bitmask of `candidate`. Best offset and best fit are relative
/// to the current selection, whose bit is cleared when the candidate is
/// strictly better.
pub fn soft_rule_priority(
    criteria: &SelectionCriteria,
    candidate: &CandidateDriveProfile,
    selected: Option<&mut RankedSpare>,
) -> SelectionPriority {
    let desired = &criteria.desired;
    let mut priority = SelectionPriority::default();

    if candidate.block_size == desired.block_size {
        priority.set(PriorityRule::MatchingBlockSize);
    }
    if candidate.drive_type == desired.drive_type {
        priority.set(PriorityRule::MatchingDriveType);
    }
    if candidate.location.port == desired.location.port {
        priority.set(PriorityRule::MatchingPort);
    }
    if candidate.location.enclosure == desired.location.enclosure {
        priority.set(PriorityRule::MatchingEnclosure);
    }

    match selected {
        None => {
            priority.set(PriorityRule::BestOffset);
            priority.set(PriorityRule::BestFit);
        }
        Some(selected) => {
            let candidate_distance = offset_distance(candidate.exported_offset, desired.exported_offset);
            let selected_distance =
                offset_distance(selected.profile.exported_offset, desired.exported_offset);
            if candidate_distance <= selected_distance {
                priority.set(PriorityRule::BestOffset);
                if candidate_distance < selected_distance {
                    selected.priority.clear(PriorityRule::BestOffset);
                }
            }

            let candidate_capacity = candidate.configured_capacity;
            let selected_capacity = selected.profile.configured_capacity;
            if candidate_capacity <= selected_capacity {
                priority.set(PriorityRule::BestFit);
                if candidate_capacity < selected_capacity {
                    selected.priority.clear(PriorityRule::BestFit);
                }
            }
        }
    }

    priority
}

/// Run hard and soft rules over `candidates` and return the winner
pub fn select_best(
    criteria: &SelectionCriteria,
    candidates: &[CandidateDriveProfile],
) -> Option<RankedSpare> {
    let mut selected: Option<RankedSpare> = None;

    for candidate in candidates {
        if let Some(rule) = criteria.failed_hard_rule(candidate) {
            debug!(
                "Spare {:#x} ({} {}) rejected by hard rule {}",
                candidate.object_id, candidate.drive_type, candidate.location, rule
            );
            continue;
        }

        if criteria.tier.position(candidate.drive_type) != Some(0) {
            info!(
                "Spare {:#x} type {} is a de-rated substitute in tier {}",
                candidate.object_id, candidate.drive_type, criteria.tier.tier
            );
        }

        let priority = soft_rule_priority(criteria, candidate, selected.as_mut());
        let replace = match &selected {
            None => true,
            Some(current) => prefer_candidate(
                priority,
                candidate.object_id,
                current.priority,
                current.object_id,
            ),
        };

        if replace {
            if let Some(current) = &selected {
                debug!(
                    "Spare {:#x} priority {} replaces {:#x} priority {}",
                    candidate.object_id, priority, current.object_id, current.priority
                );
            }
            selected = Some(RankedSpare {
                object_id: candidate.object_id,
                priority,
                profile: candidate.clone(),
            });
        }
    }

    selected
}

// =============================================================================
// Spare Selector
// =============================================================================

/// Select phase worker: validates the spare request and picks a drive
pub struct SpareSelector {
    topology: TopologyServiceRef,
    vd: VirtualDriveServiceRef,
    metrics: Arc<SparingMetrics>,
}

impl SpareSelector {
    pub fn new(
        topology: TopologyServiceRef,
        vd: VirtualDriveServiceRef,
        metrics: Arc<SparingMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            topology,
            vd,
            metrics,
        })
    }

    /// Best spare from the pool of `vd_object_id` for `desired`
    pub async fn find_best_suitable_spare(
        &self,
        vd_object_id: ObjectId,
        desired: &DesiredSpareProfile,
    ) -> Result<RankedSpare> {
        let criteria = SelectionCriteria::new(desired.clone())?;

        let pool = self.topology.spare_pool(vd_object_id).await?;
        if pool.is_empty() {
            self.metrics.record_selection(false, 0);
            warn!("No spares available for vd {:#x}", vd_object_id);
            return Err(Error::NoSparesAvailable { vd_object_id });
        }

        let mut candidates = Vec::with_capacity(pool.len());
        for pvd in &pool {
            match self.topology.drive_profile(*pvd).await {
                Ok(profile) => candidates.push(profile),
                Err(e) => debug!("Skipping spare {:#x}: {}", pvd, e),
            }
        }

        match select_best(&criteria, &candidates) {
            Some(ranked) => {
                self.metrics.record_selection(true, candidates.len());
                info!(
                    "Selected spare {:#x} ({} at {}) priority {} for vd {:#x} from {} candidates",
                    ranked.object_id,
                    ranked.profile.drive_type,
                    ranked.profile.location,
                    ranked.priority,
                    vd_object_id,
                    candidates.len()
                );
                Ok(ranked)
            }
            None => {
                self.metrics.record_selection(false, candidates.len());
                warn!(
                    "No suitable spare for vd {:#x} among {} candidates",
                    vd_object_id,
                    candidates.len()
                );
                Err(Error::NoSuitableSpare { vd_object_id })
            }
        }
    }

    /// Fill in the swap edge, original drive and spare of `request`.
    /// Failures set the request status and internal error before returning.
    pub async fn select_spare(&self, request: &mut SwapRequest) -> Result<ObjectId> {
        let desired = self.validate_spare_request(request).await?;

        match self
            .find_best_suitable_spare(request.vd_object_id, &desired)
            .await
        {
            Ok(ranked) => {
                request.spare_object_id = Some(ranked.object_id);
                Ok(ranked.object_id)
            }
            Err(e) => {
                request.spare_object_id = None;
                request.internal_error = e.internal_code().unwrap_or(InternalError::None);
                request.status_code = e.job_error();
                Err(e)
            }
        }
    }

    async fn validate_spare_request(&self, request: &mut SwapRequest) -> Result<DesiredSpareProfile> {
        let vd_object_id = request.vd_object_id;

        let info = self.vd.get_info(vd_object_id).await.map_err(|e| {
            error!("Failed to get info for vd {:#x}: {}", vd_object_id, e);
            reject(request, JobError::InternalError)
        })?;

        let mode = info.configuration_mode.unwrap_or(VdConfigMode::Unknown);
        let swap_edge = if request.command == SwapCommand::PermanentSpare {
            mode.permanent_spare_edge()
        } else {
            mode.copy_swap_in_edge()
        };
        let (Some(swap_edge), Some(source_edge)) = (swap_edge, mode.permanent_spare_edge()) else {
            warn!(
                "Vd {:#x} in mode {} has no edge for {}",
                vd_object_id, mode, request.command
            );
            let code = if request.command == SwapCommand::PermanentSpare {
                JobError::InvalidPermSpareEdgeIndex
            } else {
                JobError::InvalidProactiveSpareEdgeIndex
            };
            return Err(reject(request, code));
        };
        request.swap_edge_index = Some(swap_edge);

        let edge = self
            .topology
            .block_edge_info(vd_object_id, source_edge)
            .await
            .map_err(|e| {
                error!(
                    "Failed to get edge {} of vd {:#x}: {}",
                    source_edge, vd_object_id, e
                );
                reject(request, JobError::InternalError)
            })?;
        if request.orig_pvd_object_id.is_none() {
            request.orig_pvd_object_id = edge.server_id;
        }

        let mut desired = self
            .vd
            .desired_spare_profile(vd_object_id)
            .await
            .map_err(|e| {
                error!("Failed to get desired spare profile for vd {:#x}: {}", vd_object_id, e);
                reject(request, JobError::InternalError)
            })?;
        desired.original_object_id = request.orig_pvd_object_id;

        if !desired.drive_type.is_valid() {
            error!("Vd {:#x} desires an invalid drive type", vd_object_id);
            return Err(reject(request, JobError::InternalError));
        }
        if let Err(e) = desired_tier(desired.drive_type) {
            warn!("Vd {:#x} desired type has no tier: {}", vd_object_id, e);
            return Err(reject(request, JobError::InvalidDesiredSpareDriveType));
        }

        let upstream = self.topology.upstream_info(vd_object_id).await.map_err(|e| {
            error!("Failed to get upstream info for vd {:#x}: {}", vd_object_id, e);
            reject(request, JobError::InternalError)
        })?;
        let refusal = if !upstream.is_redundant {
            Some(JobError::SpareRaidGroupNotRedundant)
        } else if !upstream.is_ready {
            Some(JobError::PresentlyRaidGroupBroken)
        } else if !upstream.is_in_use {
            Some(JobError::SpareRaidGroupUnconsumed)
        } else {
            None
        };
        if let Some(code) = refusal {
            info!(
                "Upstream {:#x} of vd {:#x} refuses a spare: {}",
                upstream.upstream_object_id, vd_object_id, code
            );
            return Err(reject(request, code));
        }

        Ok(desired)
    }
}

fn reject(request: &mut SwapRequest, code: JobError) -> Error {
    request.status_code = code;
    Error::JobFailed { job_error: code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{TopologyService, VirtualDriveService};
    use crate::memory::InMemoryArray;
    use assert_matches::assert_matches;

    fn desired() -> DesiredSpareProfile {
        DesiredSpareProfile {
            original_object_id: Some(0x100),
            drive_type: DriveType::Sas,
            capacity_required: 1000,
            exported_offset: 0x10000,
            block_size: 520,
            location: DriveLocation::new(0, 1, 4),
        }
    }

    fn candidate(object_id: ObjectId, capacity: Lba) -> CandidateDriveProfile {
        let mut profile = InMemoryArray::drive(object_id, DriveType::Sas, capacity);
        profile.exported_offset = 0x10000;
        profile.block_size = 520;
        profile.location = DriveLocation::new(0, 1, object_id % 25);
        profile
    }

    #[test]
    fn test_capacity_check() {
        assert!(!capacity_check(1000, 999));
        assert!(capacity_check(1000, 1000));
        assert!(capacity_check(1000, 1001));
        assert!(!capacity_check(0, LBA_INVALID));
    }

    #[test]
    fn test_capacity_excludes_smaller_drive() {
        let criteria = SelectionCriteria::new(desired()).unwrap();
        assert_eq!(
            criteria.failed_hard_rule(&candidate(0x200, 999)),
            Some(HardRule::Capacity)
        );
        assert_eq!(criteria.failed_hard_rule(&candidate(0x201, 1000)), None);
    }

    #[test]
    fn test_hard_rules_in_order() {
        let criteria = SelectionCriteria::new(desired()).unwrap();

        let mut unhealthy = candidate(0x200, 900);
        unhealthy.end_of_life = true;
        assert_eq!(criteria.failed_hard_rule(&unhealthy), Some(HardRule::Healthy));

        let mut far = candidate(0x201, 2000);
        far.exported_offset = 0x20000;
        assert_eq!(criteria.failed_hard_rule(&far), Some(HardRule::Offset));

        let mut reserved = candidate(0x202, 2000);
        reserved.pool_id = Some(3);
        assert_eq!(criteria.failed_hard_rule(&reserved), Some(HardRule::NotReserved));

        let mut flash = candidate(0x203, 2000);
        flash.drive_type = DriveType::SasFlashHe;
        assert_eq!(criteria.failed_hard_rule(&flash), Some(HardRule::PerformanceTier));

        let mut big_blocks = candidate(0x204, 2000);
        big_blocks.block_size = 4160;
        assert_eq!(criteria.failed_hard_rule(&big_blocks), None);
    }

    #[test]
    fn test_original_drive_skips_health_rule() {
        let criteria = SelectionCriteria::new(desired()).unwrap();
        let mut original = candidate(0x100, 2000);
        original.lifecycle_state = LifecycleState::Fail;
        assert_eq!(criteria.failed_hard_rule(&original), None);
    }

    #[test]
    fn test_higher_bitmask_wins() {
        let a = SelectionPriority::from_bits(0b000110);
        let b = SelectionPriority::from_bits(0b000101);
        assert!(prefer_candidate(a, 0x300, b, 0x200));
        assert!(!prefer_candidate(b, 0x200, a, 0x300));
    }

    #[test]
    fn test_bit_significance() {
        let mut high = SelectionPriority::default();
        high.set(PriorityRule::MatchingBlockSize);
        let mut low = SelectionPriority::default();
        for rule in PriorityRule::ALL.iter().skip(1) {
            low.set(*rule);
        }
        assert!(high > low);
        assert_eq!(low.bits() | high.bits(), PRIORITY_VALID_MASK);
        assert!(!low.contains(PriorityRule::MatchingBlockSize));
    }

    #[test]
    fn test_equal_priority_lower_id_wins() {
        let criteria = SelectionCriteria::new(desired()).unwrap();
        let forward = [candidate(0x205, 2000), candidate(0x201, 2000)];
        let reverse = [candidate(0x201, 2000), candidate(0x205, 2000)];

        assert_eq!(select_best(&criteria, &forward).unwrap().object_id, 0x201);
        assert_eq!(select_best(&criteria, &reverse).unwrap().object_id, 0x201);
    }

    #[test]
    fn test_best_fit_prefers_smaller_drive() {
        let criteria = SelectionCriteria::new(desired()).unwrap();
        let pool = [candidate(0x201, 4000), candidate(0x209, 1200), candidate(0x205, 2000)];

        let ranked = select_best(&criteria, &pool).unwrap();
        assert_eq!(ranked.object_id, 0x209);
        assert!(ranked.priority.contains(PriorityRule::BestFit));
    }

    #[test]
    fn test_matching_type_beats_substitute() {
        let mut flash_desired = desired();
        flash_desired.drive_type = DriveType::SasFlashHe;
        let criteria = SelectionCriteria::new(flash_desired).unwrap();

        let mut substitute = candidate(0x201, 1000);
        substitute.drive_type = DriveType::SataFlashHe;
        let mut exact = candidate(0x202, 8000);
        exact.drive_type = DriveType::SasFlashHe;

        let ranked = select_best(&criteria, &[substitute, exact]).unwrap();
        assert_eq!(ranked.object_id, 0x202);
        assert!(ranked.priority.contains(PriorityRule::MatchingDriveType));
    }

    #[tokio::test]
    async fn test_selection_never_prefers_lower_bitmask() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        // Same type, block size, port and enclosure; only the relative
        // rules tell the candidates apart
        let pool = [
            (0x210, 0x10000, 5000),
            (0x211, 0x8000, 1000),
            (0x212, 0x10000, 3000),
            (0x213, 0x10000, 3000),
            (0x214, 0x20000, 1000),
        ];
        for (object_id, offset, capacity) in pool {
            let mut drive = InMemoryArray::drive(object_id, DriveType::Sas, capacity);
            drive.exported_offset = offset;
            drive.location = DriveLocation::new(0, 0, 1);
            array.add_spare(drive);
        }
        let selector = SpareSelector::new(array.clone(), array.clone(), SparingMetrics::new());

        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let spare = selector.select_spare(&mut request).await.unwrap();
        assert_eq!(spare, 0x212);

        let desired = array.desired_spare_profile(0x10c).await.unwrap();
        let winner = selector
            .find_best_suitable_spare(0x10c, &desired)
            .await
            .unwrap();
        assert_eq!(winner.object_id, 0x212);
        assert!(winner.priority.contains(PriorityRule::BestOffset));
        assert!(winner.priority.contains(PriorityRule::BestFit));

        // Every eligible drive, ranked against the winner, scores no higher
        let criteria = SelectionCriteria::new(desired).unwrap();
        for (object_id, _, _) in pool {
            let drive = array.drive_profile(object_id).await.unwrap();
            if criteria.failed_hard_rule(&drive).is_some() {
                assert_eq!(object_id, 0x214);
                continue;
            }
            let priority = soft_rule_priority(&criteria, &drive, Some(&mut winner.clone()));
            assert!(priority <= winner.priority, "{:#x} outranks the winner", object_id);
            if priority == winner.priority {
                assert!(winner.object_id <= object_id);
            }
        }

        let runner_up = soft_rule_priority(
            &criteria,
            &array.drive_profile(0x211).await.unwrap(),
            Some(&mut winner.clone()),
        );
        assert!(!runner_up.contains(PriorityRule::BestOffset));
        assert!(runner_up.contains(PriorityRule::BestFit));
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let array = InMemoryArray::new();
        let selector = SpareSelector::new(array.clone(), array.clone(), SparingMetrics::new());

        let result = selector.find_best_suitable_spare(0x10c, &desired()).await;
        assert_matches!(result, Err(Error::NoSparesAvailable { vd_object_id: 0x10c }));
    }

    #[tokio::test]
    async fn test_select_spare_fills_request() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 4000));
        array.add_spare(InMemoryArray::drive(0x202, DriveType::Sas, 2000));
        let metrics = SparingMetrics::new();
        let selector = SpareSelector::new(array.clone(), array.clone(), metrics.clone());

        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let spare = selector.select_spare(&mut request).await.unwrap();

        assert_eq!(spare, 0x202);
        assert_eq!(request.spare_object_id, Some(0x202));
        assert_eq!(request.orig_pvd_object_id, Some(0x100));
        assert_eq!(request.swap_edge_index, Some(FIRST_EDGE_INDEX));
        assert_eq!(metrics.snapshot().selections_succeeded, 1);
    }

    #[tokio::test]
    async fn test_select_spare_no_suitable() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 10));
        let selector = SpareSelector::new(array.clone(), array.clone(), SparingMetrics::new());

        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let result = selector.select_spare(&mut request).await;

        assert_matches!(result, Err(Error::NoSuitableSpare { .. }));
        assert_eq!(request.status_code, JobError::PresentlyNoSuitableSpare);
        assert_eq!(request.internal_error, InternalError::NoSuitableSpare);
        assert_eq!(request.spare_object_id, None);
    }

    #[tokio::test]
    async fn test_select_spare_rejects_non_redundant_upstream() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.update_upstream(0x10c, |upstream| upstream.is_redundant = false);
        let selector = SpareSelector::new(array.clone(), array.clone(), SparingMetrics::new());

        let mut request = SwapRequest::new(SwapCommand::PermanentSpare, 0x10c);
        let result = selector.select_spare(&mut request).await;

        assert_matches!(
            result,
            Err(Error::JobFailed {
                job_error: JobError::SpareRaidGroupNotRedundant
            })
        );
        assert_eq!(request.status_code, JobError::SpareRaidGroupNotRedundant);
    }

    #[tokio::test]
    async fn test_copy_uses_the_other_edge() {
        let array = InMemoryArray::with_virtual_drive(0x10c, 0x100);
        array.add_spare(InMemoryArray::drive(0x201, DriveType::Sas, 4000));
        let selector = SpareSelector::new(array.clone(), array.clone(), SparingMetrics::new());

        let mut request = SwapRequest::new(SwapCommand::ProactiveCopy, 0x10c);
        selector.select_spare(&mut request).await.unwrap();
        assert_eq!(request.swap_edge_index, Some(SECOND_EDGE_INDEX));
        assert_eq!(request.orig_pvd_object_id, Some(0x100));
    }
}
