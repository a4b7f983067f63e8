use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub cycles: u64,
    pub log_level: u64,
    /// Inject `[fabric] link_failures` random faults before the run.
    pub faults: bool,
    pub json: bool,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cycles: 10_000,
            log_level: 0,
            faults: false,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_falls_back_to_defaults() {
        let config = SimConfig::from_section(None);
        assert_eq!(10_000, config.cycles);
        assert!(!config.faults);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let table: Table = toml::from_str("[sim]\ncycles = 42\n").unwrap();
        let config = SimConfig::from_section(table.get("sim"));
        assert_eq!(42, config.cycles);
        assert_eq!(0, config.log_level);
    }
}
