//! Performance Tier Table
//!
//! Groups drive types that may stand in for one another. Each tier lists its
//! canonical drive type first followed by de-rated substitutes. The table is
//! static; lookups hand out owned copies of entries.

use crate::domain::types::DriveType;
use crate::error::{Error, Result};
use serde::Serialize;
use tracing::warn;

/// Number of tiers in the table
pub const TIER_COUNT: usize = 9;

/// Static tier table, indexed by tier number
static PERFORMANCE_TIERS: [&[DriveType]; TIER_COUNT] = [
    &[DriveType::SasFlashHe, DriveType::SataFlashHe],
    &[DriveType::SasNl],
    &[DriveType::Sas],
    &[DriveType::SataFlashHe, DriveType::SasFlashHe],
    &[DriveType::SataPaddlecard],
    &[DriveType::SasFlashMe],
    &[DriveType::SasFlashLe],
    &[DriveType::SasFlashRi],
    &[DriveType::Invalid],
];

/// One tier of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceTierEntry {
    pub tier: usize,
    /// Canonical type first, substitutes after
    pub drive_types: Vec<DriveType>,
}

impl PerformanceTierEntry {
    pub fn primary(&self) -> Option<DriveType> {
        self.drive_types.first().copied()
    }

    /// Position of a drive type in this tier; 0 is an exact match
    pub fn position(&self, drive_type: DriveType) -> Option<usize> {
        self.drive_types.iter().position(|t| *t == drive_type)
    }
}

/// Copy of one tier entry
pub fn tier_entry(tier: usize) -> Result<PerformanceTierEntry> {
    PERFORMANCE_TIERS
        .get(tier)
        .map(|types| PerformanceTierEntry {
            tier,
            drive_types: types.to_vec(),
        })
        .ok_or(Error::InvalidTier(tier))
}

/// Copy of the whole table
pub fn tier_table() -> Vec<PerformanceTierEntry> {
    (0..TIER_COUNT).filter_map(|tier| tier_entry(tier).ok()).collect()
}

/// Tier a replacement for `drive_type` must come from
pub fn desired_tier(drive_type: DriveType) -> Result<usize> {
    desired_tier_in(&PERFORMANCE_TIERS, drive_type)
}

fn desired_tier_in(table: &[&[DriveType]], drive_type: DriveType) -> Result<usize> {
    if !drive_type.is_valid() {
        return Err(Error::InvalidDriveType(drive_type.to_string()));
    }

    if let Some(tier) = table.iter().position(|types| types.first() == Some(&drive_type)) {
        return Ok(tier);
    }

    match table.iter().position(|types| types.contains(&drive_type)) {
        Some(tier) => {
            warn!(
                "Drive type {} has no primary tier, using secondary tier {}",
                drive_type, tier
            );
            Ok(tier)
        }
        None => Err(Error::InvalidDriveType(drive_type.to_string())),
    }
}

/// Position of `drive_type` in `tier`, or `None` if the tier does not list it
pub fn drive_type_position(tier: usize, drive_type: DriveType) -> Result<Option<usize>> {
    Ok(tier_entry(tier)?.position(drive_type))
}

/// Lowest tier that lists `drive_type`
pub fn tier_group(drive_type: DriveType) -> Option<usize> {
    PERFORMANCE_TIERS
        .iter()
        .position(|types| types.contains(&drive_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_every_valid_type_has_a_tier() {
        for drive_type in DriveType::ALL.iter().filter(|t| t.is_valid()) {
            let tier = desired_tier(*drive_type).unwrap();
            assert_eq!(
                drive_type_position(tier, *drive_type).unwrap(),
                Some(0),
                "{} should be canonical in its tier",
                drive_type
            );
            assert!(tier_group(*drive_type).is_some());
        }
    }

    #[test]
    fn test_table_shape() {
        let table = tier_table();
        assert_eq!(table.len(), TIER_COUNT);
        assert!(table.iter().all(|entry| !entry.drive_types.is_empty()));
        assert_eq!(table[8].primary(), Some(DriveType::Invalid));
    }

    #[test]
    fn test_flash_tiers() {
        assert_eq!(desired_tier(DriveType::SasFlashHe).unwrap(), 0);
        assert_eq!(desired_tier(DriveType::SataFlashHe).unwrap(), 3);
        assert_eq!(drive_type_position(0, DriveType::SataFlashHe).unwrap(), Some(1));
        assert_eq!(tier_group(DriveType::SataFlashHe), Some(0));
        assert_eq!(drive_type_position(2, DriveType::SasNl).unwrap(), None);
    }

    #[test]
    fn test_invalid_lookups() {
        assert_matches!(desired_tier(DriveType::Invalid), Err(Error::InvalidDriveType(_)));
        assert_matches!(tier_entry(TIER_COUNT), Err(Error::InvalidTier(9)));
    }

    #[test]
    fn test_secondary_tier_fallback() {
        let table: [&[DriveType]; 2] = [&[DriveType::Sas, DriveType::SasNl], &[DriveType::SasFlashLe]];
        assert_eq!(desired_tier_in(&table, DriveType::SasNl).unwrap(), 0);
        assert_eq!(desired_tier_in(&table, DriveType::SasFlashLe).unwrap(), 1);
        assert_matches!(
            desired_tier_in(&table, DriveType::SasFlashRi),
            Err(Error::InvalidDriveType(_))
        );
    }

    #[test]
    fn test_entries_are_copies() {
        let mut entry = tier_entry(1).unwrap();
        entry.drive_types.push(DriveType::Sas);
        assert_eq!(tier_entry(1).unwrap().drive_types, vec![DriveType::SasNl]);
    }
}
