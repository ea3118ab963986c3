//! # System configuration model
//!
//! The controller describes its motion groups and stages in `system.ini`,
//! fetched over FTP at connect time. This module parses that file into the
//! group and stage records the client caches.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use configparser::ini::Ini;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not parse system.ini: {0}")]
    Malformed(String),

    #[error("system.ini has no [GROUPS] section")]
    MissingGroups,
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A motion group: its vendor category and member positioners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Vendor group category, e.g. `SingleAxisInUse` or `MultipleAxesInUse`
    pub category: String,

    /// Names of the positioners in this group, in declaration order
    pub positioners: Vec<String>,
}

/// A stage: the hardware behind one positioner.
///
/// The limits are not part of `system.ini`, they are queried from the
/// controller after parsing and filled in by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Vendor stage type string
    pub stage_type: String,

    /// Maximum velocity reported by the controller
    pub max_velocity: Option<f64>,

    /// Maximum acceleration reported by the controller, derated by 3
    pub max_acceleration: Option<f64>,

    /// Lower user travel limit
    pub low_limit: Option<f64>,

    /// Upper user travel limit
    pub high_limit: Option<f64>,
}

/// The parsed contents of `system.ini`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Groups by name
    pub groups: BTreeMap<String, GroupConfig>,

    /// Stages by full name (`Group.Positioner`)
    pub stages: BTreeMap<String, StageConfig>,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl GroupConfig {
    /// Whether this group can run PVT trajectories.
    pub fn is_pvt_capable(&self) -> bool {
        self.category.to_ascii_lowercase().starts_with("multiple")
    }
}

impl SystemConfig {
    /// Parse `system.ini` text.
    ///
    /// Group names are listed per category in the `[GROUPS]` section. A
    /// section named after a group carries its `PositionerInUse` list, and
    /// any section with a `PlugNumber` key is a stage (named
    /// `Group.Positioner`). Option keys are matched case-insensitively,
    /// section names are not.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::new_cs();
        let sections = ini
            .read(text.to_string())
            .map_err(ConfigError::Malformed)?;

        let mut config = SystemConfig::default();

        // Populate the group list first, from the [GROUPS] section
        let group_section = sections
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("groups"))
            .ok_or(ConfigError::MissingGroups)?
            .1;

        for (category, names) in group_section {
            let names = match names {
                Some(n) if !n.trim().is_empty() => n,
                _ => continue,
            };

            for name in names.split(',') {
                config.groups.insert(
                    name.trim().to_string(),
                    GroupConfig {
                        category: category.clone(),
                        positioners: Vec::new(),
                    },
                );
            }
        }

        // Remaining sections are either group detail or stage sections
        for (section, items) in &sections {
            if ["DEFAULT", "GENERAL", "GROUPS"].contains(&section.as_str()) {
                continue;
            }

            if let Some(group) = config.groups.get_mut(section) {
                if let Some(list) = get_ci(items, "PositionerInUse") {
                    group.positioners = list.split(',').map(|p| p.trim().to_string()).collect();
                }
            } else if get_ci(items, "PlugNumber").is_some() {
                config.stages.insert(
                    section.clone(),
                    StageConfig {
                        stage_type: get_ci(items, "StageName").unwrap_or_default().to_string(),
                        ..Default::default()
                    },
                );
            }
        }

        Ok(config)
    }

    /// Names of the groups capable of running PVT trajectories.
    pub fn pvt_groups(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, g)| g.is_pvt_capable())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Full stage names (`Group.Positioner`) of a group's members.
    pub fn group_stages(&self, group: &str) -> Vec<String> {
        match self.groups.get(group) {
            Some(g) => g
                .positioners
                .iter()
                .map(|p| format!("{}.{}", group, p))
                .collect(),
            None => Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Case-insensitive option lookup within a section.
fn get_ci<'a>(
    items: &'a std::collections::HashMap<String, Option<String>>,
    key: &str,
) -> Option<&'a str> {
    items
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, v)| v.as_deref())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SYSTEM_INI: &str = "\
[GENERAL]
BootScriptFileName =

[GROUPS]
SingleAxisInUse = Theta
MultipleAxesInUse = FineXY
XYInUse =

[Theta]
PositionerInUse = Rot

[FineXY]
PositionerInUse = X, Y

[Theta.Rot]
PlugNumber = 1
StageName = RGV100BL

[FineXY.X]
PlugNumber = 2
StageName = XMS50

[FineXY.Y]
PlugNumber = 3
StageName = XMS50
";

    #[test]
    fn test_parse_groups() {
        let config = SystemConfig::parse(SYSTEM_INI).unwrap();

        assert_eq!(config.groups.len(), 2);

        let theta = &config.groups["Theta"];
        assert_eq!(theta.category, "SingleAxisInUse");
        assert_eq!(theta.positioners, vec!["Rot"]);
        assert!(!theta.is_pvt_capable());

        let xy = &config.groups["FineXY"];
        assert_eq!(xy.category, "MultipleAxesInUse");
        assert_eq!(xy.positioners, vec!["X", "Y"]);
        assert!(xy.is_pvt_capable());

        assert_eq!(config.pvt_groups(), vec!["FineXY"]);
    }

    #[test]
    fn test_parse_stages() {
        let config = SystemConfig::parse(SYSTEM_INI).unwrap();

        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages["Theta.Rot"].stage_type, "RGV100BL");
        assert_eq!(config.stages["FineXY.X"].stage_type, "XMS50");

        // Limits are only known after querying the controller
        assert!(config.stages["FineXY.X"].max_velocity.is_none());

        assert_eq!(
            config.group_stages("FineXY"),
            vec!["FineXY.X", "FineXY.Y"]
        );
        assert!(config.group_stages("Nope").is_empty());
    }

    #[test]
    fn test_option_keys_are_case_insensitive() {
        let text = "\
[GROUPS]
SingleAxisInUse = G

[G]
POSITIONERINUSE = P

[G.P]
plugnumber = 4
stagename = ILS150
";
        let config = SystemConfig::parse(text).unwrap();
        assert_eq!(config.groups["G"].positioners, vec!["P"]);
        assert_eq!(config.stages["G.P"].stage_type, "ILS150");
    }

    #[test]
    fn test_missing_groups_section() {
        assert!(matches!(
            SystemConfig::parse("[Theta]\nPositionerInUse = Rot\n"),
            Err(ConfigError::MissingGroups)
        ));
    }
}
