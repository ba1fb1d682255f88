use ahash::AHashMap;

use super::selection::{PairedSelection, SelectionPolicy, WeightSelection};
use super::subgroup::{ClusterSubgroups, LineageSubgroups, SubgroupPolicy, TrivialSubgroups};
use crate::config::DriverConfig;
use crate::error::{Result, WeError};

pub type SelectionFactory = fn(&DriverConfig) -> Box<dyn SelectionPolicy>;
pub type SubgroupFactory = fn(&DriverConfig) -> Box<dyn SubgroupPolicy>;

/// Name → policy constructors. Resolved once when a driver is built.
pub struct PolicyRegistry {
    selection: AHashMap<String, SelectionFactory>,
    subgroup: AHashMap<String, SubgroupFactory>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register_selection("weight", |_| Box::new(WeightSelection));
        reg.register_selection("paired", |_| Box::new(PairedSelection));
        reg.register_subgroup("trivial", |_| Box::new(TrivialSubgroups));
        reg.register_subgroup("lineage", |_| Box::new(LineageSubgroups));
        reg.register_subgroup("cluster", |cfg| {
            Box::new(ClusterSubgroups {
                radius: cfg.subgroup_radius,
            })
        });
        reg
    }
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            selection: AHashMap::default(),
            subgroup: AHashMap::default(),
        }
    }

    pub fn register_selection(&mut self, name: &str, factory: SelectionFactory) {
        self.selection.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn register_subgroup(&mut self, name: &str, factory: SubgroupFactory) {
        self.subgroup.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn selection(&self, cfg: &DriverConfig) -> Result<Box<dyn SelectionPolicy>> {
        let key = cfg.sorting_policy.to_ascii_lowercase();
        self.selection
            .get(&key)
            .map(|f| f(cfg))
            .ok_or_else(|| WeError::config(format!("unknown sorting policy {:?}", cfg.sorting_policy)))
    }

    pub fn subgroup(&self, cfg: &DriverConfig) -> Result<Box<dyn SubgroupPolicy>> {
        let key = cfg.subgroup_policy.to_ascii_lowercase();
        self.subgroup
            .get(&key)
            .map(|f| f(cfg))
            .ok_or_else(|| WeError::config(format!("unknown subgroup policy {:?}", cfg.subgroup_policy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let reg = PolicyRegistry::default();
        let cfg = DriverConfig {
            sorting_policy: "Paired".into(),
            subgroup_policy: "cluster".into(),
            ..DriverConfig::default()
        };
        assert_eq!(reg.selection(&cfg).unwrap().name(), "paired");
        assert_eq!(reg.subgroup(&cfg).unwrap().name(), "cluster");
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let reg = PolicyRegistry::default();
        let cfg = DriverConfig {
            sorting_policy: "fancy".into(),
            ..DriverConfig::default()
        };
        assert!(matches!(reg.selection(&cfg), Err(WeError::Configuration { .. })));
    }
}
