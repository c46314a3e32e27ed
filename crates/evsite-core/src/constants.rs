//! Planning constants and cost parameters.
//!
//! The defaults describe the reference fleet study: distances in miles,
//! costs in dollars, one optimization day scaled to a 365-day year.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Full vehicle range when fully charged (miles).
pub const FULL_RANGE: f64 = 250.0;
/// Mean of the daily remaining-range draw (miles).
pub const RANGE_MEAN: f64 = 100.0;
/// Standard deviation of the daily remaining-range draw (miles).
pub const RANGE_STD_DEV: f64 = 50.0;
/// Floor of the daily remaining-range draw (miles).
pub const RANGE_FLOOR: f64 = 20.0;
/// Probability that a vehicle seeks a charge on a given day.
pub const CHARGING_PROBABILITY: f64 = 0.5;

/// Maximum number of chargers that can be installed at one location.
pub const STATION_CAPACITY: u32 = 8;
/// Vehicles one charger can serve per day.
pub const QUEUE_SIZE: u32 = 2;

/// Default one-off cost of opening a location ($).
pub const DEFAULT_BUILD_COST: f64 = 5000.0;
/// Default yearly upkeep per installed charger ($).
pub const DEFAULT_MAINTENANCE_COST: f64 = 500.0;
/// Default cost per mile driven to a charger ($/mile).
pub const DEFAULT_DRIVE_COST: f64 = 0.041;
/// Default cost per mile of charge delivered ($/mile).
pub const DEFAULT_CHARGE_COST: f64 = 0.0388;
/// Default minimum fraction of vehicles that must be served.
pub const DEFAULT_SERVICE_LEVEL: f64 = 0.95;

/// Refined locations closer than this to an existing candidate enter the
/// probabilistic proximity filter (miles).
pub const DEFAULT_MIN_DISTANCE: f64 = 1.0;
/// Neighborhood radius for the filter's demand/capacity density estimate
/// (miles).
pub const DEFAULT_COUNTING_RADIUS: f64 = 15.0;

/// Objective-delta tolerance for declaring the heuristic stable.
pub const STABILITY_EPSILON: f64 = 0.1;
/// A refined location moving less than this is considered stalled (miles).
pub const STALL_DISTANCE: f64 = 0.1;
/// Std-dev of the random offset applied to a stalled refined location.
pub const STALL_PERTURBATION_STD_DEV: f64 = 0.3;

/// Scale factor from sampled days to a year of operation.
pub const ANNUALIZATION_DAYS: f64 = 365.0;

/// Dollar cost coefficients of the placement objective.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostParams {
    /// One-off cost of opening a location.
    pub build_cost: f64,
    /// Yearly upkeep per installed charger.
    pub maintenance_cost: f64,
    /// Cost per mile driven to the allocated charger.
    pub drive_cost: f64,
    /// Cost per mile of charge delivered.
    pub charge_cost: f64,
}

impl CostParams {
    /// Combined per-mile cost of driving to a charger and recharging the
    /// miles spent getting there.
    pub fn drive_charge_cost(&self) -> f64 {
        self.drive_cost + self.charge_cost
    }
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            build_cost: DEFAULT_BUILD_COST,
            maintenance_cost: DEFAULT_MAINTENANCE_COST,
            drive_cost: DEFAULT_DRIVE_COST,
            charge_cost: DEFAULT_CHARGE_COST,
        }
    }
}

/// Station sizing and service-guarantee parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StationParams {
    /// Maximum chargers per location.
    pub capacity: u32,
    /// Vehicles per charger per day.
    pub queue_size: u32,
    /// Minimum fraction of vehicles that must be allocated, in (0, 1].
    pub service_level: f64,
    /// Optional exact number of locations the network must build.
    pub fixed_station_count: Option<usize>,
}

impl StationParams {
    /// Validated constructor; the service level must lie in (0, 1].
    pub fn new(
        capacity: u32,
        queue_size: u32,
        service_level: f64,
        fixed_station_count: Option<usize>,
    ) -> PlanResult<Self> {
        if service_level <= 0.0 || service_level > 1.0 {
            return Err(PlanError::Validation(
                "service level must be within (0, 1]".into(),
            ));
        }
        Ok(Self {
            capacity,
            queue_size,
            service_level,
            fixed_station_count,
        })
    }

    /// Default sizing with a caller-chosen service level.
    pub fn with_service_level(service_level: f64) -> PlanResult<Self> {
        Self::new(STATION_CAPACITY, QUEUE_SIZE, service_level, None)
    }
}

impl Default for StationParams {
    fn default() -> Self {
        Self {
            capacity: STATION_CAPACITY,
            queue_size: QUEUE_SIZE,
            service_level: DEFAULT_SERVICE_LEVEL,
            fixed_station_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_charge_cost_sums_components() {
        let costs = CostParams::default();
        assert!(
            (costs.drive_charge_cost() - (DEFAULT_DRIVE_COST + DEFAULT_CHARGE_COST)).abs() < 1e-12
        );
    }

    #[test]
    fn test_service_level_bounds() {
        assert!(StationParams::with_service_level(0.0).is_err());
        assert!(StationParams::with_service_level(1.2).is_err());
        assert!(StationParams::with_service_level(1.0).is_ok());
        assert!(StationParams::with_service_level(0.5).is_ok());
    }
}
