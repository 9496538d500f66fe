//! Fan groups and the per-cycle fan command plan
//!
//! A [`CommandPlanner`] maps each CPU reading through the threshold table and
//! emits one [`FanCommand`] per fan in that CPU's group.

use crate::cpu_temp::TemperatureSnapshot;
use crate::errors::{FanControlError, Result};
use crate::threshold::ThresholdTable;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Fans thermally attached to one CPU socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanGroup {
    pub cpu: u8,
    pub fans: Vec<u8>,
    #[serde(default = "default_installed")]
    pub installed: bool,
}

fn default_installed() -> bool {
    true
}

impl FanGroup {
    pub fn new(cpu: u8, fans: Vec<u8>) -> Self {
        Self {
            cpu,
            fans,
            installed: true,
        }
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }
}

/// Validated mapping from logical CPU id to the fans it drives.
///
/// Groups marked as not installed are dropped at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanGroupAssignment {
    groups: BTreeMap<u8, Vec<u8>>,
}

impl FanGroupAssignment {
    pub fn new(groups: &[FanGroup]) -> Result<Self> {
        let mut assigned = BTreeMap::new();
        let mut owner: HashMap<u8, u8> = HashMap::new();

        for group in groups {
            if group.cpu == 0 {
                return Err(FanControlError::Config(
                    "fan group CPU ids start at 1".to_string(),
                ));
            }
            if assigned.contains_key(&group.cpu) {
                return Err(FanControlError::Config(format!(
                    "CPU {} has more than one fan group",
                    group.cpu
                )));
            }
            if group.fans.is_empty() {
                return Err(FanControlError::Config(format!(
                    "fan group for CPU {} has no fans",
                    group.cpu
                )));
            }
            if !group.installed {
                debug!("CPU {} fan group not installed, ignoring", group.cpu);
                continue;
            }

            let mut fans = Vec::with_capacity(group.fans.len());
            for &fan in &group.fans {
                if let Some(previous) = owner.insert(fan, group.cpu) {
                    return Err(FanControlError::Config(format!(
                        "fan {} is assigned to both CPU {} and CPU {}",
                        fan, previous, group.cpu
                    )));
                }
                fans.push(fan);
            }
            assigned.insert(group.cpu, fans);
        }

        if assigned.is_empty() {
            return Err(FanControlError::Config(
                "no installed fan groups configured".to_string(),
            ));
        }

        Ok(Self { groups: assigned })
    }

    pub fn fans_for(&self, cpu: u8) -> Option<&[u8]> {
        self.groups.get(&cpu).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// One `fan p <id> max <duty>` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanCommand {
    pub fan: u8,
    pub duty: u8,
}

impl FanCommand {
    pub fn new(fan: u8, duty: u8) -> Self {
        Self { fan, duty }
    }
}

impl fmt::Display for FanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fan p {} max {}", self.fan, self.duty)
    }
}

/// Turns a temperature snapshot into this cycle's fan commands
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    thresholds: ThresholdTable,
    groups: FanGroupAssignment,
}

impl CommandPlanner {
    pub fn new(thresholds: ThresholdTable, groups: FanGroupAssignment) -> Self {
        Self { thresholds, groups }
    }

    /// Commands ordered by ascending CPU id, then by configured fan order.
    ///
    /// CPUs reporting zero or below are treated as absent sensors, and CPUs
    /// without an installed fan group are skipped.
    pub fn plan(&self, snapshot: &TemperatureSnapshot) -> Vec<FanCommand> {
        let mut commands = Vec::new();

        for (cpu, temp) in snapshot.iter() {
            if temp <= 0 {
                debug!("CPU-{} reports {}°C, treating sensor as absent", cpu, temp);
                continue;
            }

            let Some(fans) = self.groups.fans_for(cpu) else {
                debug!("CPU-{} has no installed fan group", cpu);
                continue;
            };

            let duty = self.thresholds.duty_for(temp);
            debug!("CPU-{} at {}°C -> duty {}", cpu, temp, duty);
            commands.extend(fans.iter().map(|&fan| FanCommand::new(fan, duty)));
        }

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual_groups(cpu2_installed: bool) -> Vec<FanGroup> {
        let cpu2 = FanGroup::new(2, vec![4, 5, 6, 7]);
        vec![
            FanGroup::new(1, vec![0, 1, 2, 3]),
            if cpu2_installed { cpu2 } else { cpu2.not_installed() },
        ]
    }

    fn planner(cpu2_installed: bool) -> CommandPlanner {
        CommandPlanner::new(
            ThresholdTable::standard(),
            FanGroupAssignment::new(&dual_groups(cpu2_installed)).unwrap(),
        )
    }

    #[test]
    fn test_hot_cpu_sets_full_duty() {
        let snapshot: TemperatureSnapshot = vec![(1, 72)].into_iter().collect();
        let commands = planner(false).plan(&snapshot);

        assert_eq!(
            commands,
            vec![
                FanCommand::new(0, 255),
                FanCommand::new(1, 255),
                FanCommand::new(2, 255),
                FanCommand::new(3, 255),
            ]
        );
    }

    #[test]
    fn test_zero_reading_is_excluded() {
        let snapshot: TemperatureSnapshot = vec![(1, 50), (2, 0)].into_iter().collect();
        let commands = planner(true).plan(&snapshot);

        assert_eq!(commands.len(), 4);
        assert!(commands.iter().all(|c| c.fan <= 3 && c.duty == 50));
    }

    #[test]
    fn test_plan_orders_by_cpu_then_fan() {
        let snapshot: TemperatureSnapshot = vec![(2, 61), (1, 56)].into_iter().collect();
        let lines: Vec<String> = planner(true)
            .plan(&snapshot)
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            lines,
            vec![
                "fan p 0 max 70",
                "fan p 1 max 70",
                "fan p 2 max 70",
                "fan p 3 max 70",
                "fan p 4 max 100",
                "fan p 5 max 100",
                "fan p 6 max 100",
                "fan p 7 max 100",
            ]
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let snapshot: TemperatureSnapshot = vec![(1, 66), (2, 58)].into_iter().collect();
        let planner = planner(true);
        assert_eq!(planner.plan(&snapshot), planner.plan(&snapshot));
    }

    #[test]
    fn test_uninstalled_group_is_skipped() {
        let snapshot: TemperatureSnapshot = vec![(1, 40), (2, 80)].into_iter().collect();
        let commands = planner(false).plan(&snapshot);
        assert_eq!(commands.len(), 4);
        assert!(commands.iter().all(|c| c.duty == 50));
    }

    #[test]
    fn test_fan_collision_is_config_error() {
        let groups = vec![
            FanGroup::new(1, vec![0, 1, 2, 3]),
            FanGroup::new(2, vec![3, 4]),
        ];
        let err = FanGroupAssignment::new(&groups).unwrap_err();
        assert!(err.to_string().contains("fan 3"));
    }

    #[test]
    fn test_collision_with_uninstalled_group_is_allowed() {
        let groups = vec![
            FanGroup::new(1, vec![0, 1, 2, 3]),
            FanGroup::new(2, vec![0, 1]).not_installed(),
        ];
        let assignment = FanGroupAssignment::new(&groups).unwrap();
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.fans_for(2), None);
    }

    #[test]
    fn test_rejects_bad_groups() {
        assert!(FanGroupAssignment::new(&[FanGroup::new(0, vec![1])]).is_err());
        assert!(FanGroupAssignment::new(&[FanGroup::new(1, vec![])]).is_err());
        assert!(FanGroupAssignment::new(&[
            FanGroup::new(1, vec![0]),
            FanGroup::new(1, vec![1]),
        ])
        .is_err());
        assert!(FanGroupAssignment::new(&[FanGroup::new(1, vec![0]).not_installed()]).is_err());
    }

    #[test]
    fn test_arbitrary_group_count() {
        let groups: Vec<FanGroup> = (1..=4).map(|cpu| FanGroup::new(cpu, vec![cpu * 10])).collect();
        let planner = CommandPlanner::new(
            ThresholdTable::standard(),
            FanGroupAssignment::new(&groups).unwrap(),
        );
        let snapshot: TemperatureSnapshot = (1..=4).map(|cpu| (cpu, 60)).collect();
        let fans: Vec<u8> = planner.plan(&snapshot).iter().map(|c| c.fan).collect();
        assert_eq!(fans, vec![10, 20, 30, 40]);
    }
}
