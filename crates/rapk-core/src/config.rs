use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use rapk_build::{ForgeLayout, Strategy};
use rapk_util::{env_value, expand_user, parse_flag, state_file_path};
use serde::{Deserialize, Serialize};
use tracing::warn;

const CONFIG_FILE: &str = "rapk-config.json";
const DEFAULT_DELETE_DELAY_SECS: u64 = 3;

const ENV_CORE_DIR: &str = "RAPK_CORE_DIR";
const ENV_WORK_DIR: &str = "RAPK_WORK_DIR";
const ENV_OUTPUT_DIR: &str = "RAPK_OUTPUT_DIR";
const ENV_STRATEGY: &str = "RAPK_STRATEGY";
const ENV_DELETE_DELAY_SECS: &str = "RAPK_DELETE_DELAY_SECS";
const ENV_VERIFY_OUTPUT: &str = "RAPK_VERIFY_OUTPUT";
const ENV_RECORD_HISTORY: &str = "RAPK_RECORD_HISTORY";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeConfig {
    pub core_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub strategy: Strategy,
    pub delete_delay_secs: u64,
    pub verify_output: bool,
    pub record_history: bool,
}

/// On-disk form: every key optional, missing keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    core_dir: Option<String>,
    work_dir: Option<String>,
    output_dir: Option<String>,
    strategy: Option<Strategy>,
    delete_delay_secs: Option<u64>,
    verify_output: Option<bool>,
    record_history: Option<bool>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        let core_dir = PathBuf::from("CORE");
        Self {
            work_dir: default_work_dir(&core_dir),
            output_dir: PathBuf::from("FINISHED_HERE"),
            core_dir,
            strategy: Strategy::default(),
            delete_delay_secs: DEFAULT_DELETE_DELAY_SECS,
            verify_output: false,
            record_history: true,
        }
    }
}

/// Windows keeps the toolchain next to the project to stay clear of
/// path-length limits; elsewhere it goes under the temp directory.
fn default_work_dir(core_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        core_dir.join("..").join("android_build_env")
    } else {
        std::env::temp_dir().join("android_build_env")
    }
}

impl ForgeConfig {
    /// Defaults, then `rapk-config.json` in the state dir, then `RAPK_*`
    /// environment variables.
    pub fn load() -> Self {
        let mut cfg = ForgeConfig::default();
        let path = config_path();
        match fs::read_to_string(&path) {
            Ok(data) => {
                if let Err(err) = cfg.apply_json(&data) {
                    warn!("Failed to parse {}: {err}", path.display());
                }
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}", path.display());
                }
            }
        }
        cfg.apply_overrides(env_value);
        cfg
    }

    pub fn apply_json(&mut self, data: &str) -> Result<(), serde_json::Error> {
        let file: ConfigFile = serde_json::from_str(data)?;
        let core_changed = file.core_dir.is_some();
        if let Some(dir) = file.core_dir {
            self.core_dir = expand_user(&dir);
        }
        match file.work_dir {
            Some(dir) => self.work_dir = expand_user(&dir),
            None if core_changed && cfg!(windows) => {
                self.work_dir = default_work_dir(&self.core_dir)
            }
            None => {}
        }
        if let Some(dir) = file.output_dir {
            self.output_dir = expand_user(&dir);
        }
        if let Some(strategy) = file.strategy {
            self.strategy = strategy;
        }
        if let Some(secs) = file.delete_delay_secs {
            self.delete_delay_secs = secs;
        }
        if let Some(verify) = file.verify_output {
            self.verify_output = verify;
        }
        if let Some(record) = file.record_history {
            self.record_history = record;
        }
        Ok(())
    }

    /// Applies `RAPK_*` overrides looked up through `lookup`. Unparseable
    /// values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CORE_DIR) {
            self.core_dir = expand_user(&dir);
            if cfg!(windows) && lookup(ENV_WORK_DIR).is_none() {
                self.work_dir = default_work_dir(&self.core_dir);
            }
        }
        if let Some(dir) = lookup(ENV_WORK_DIR) {
            self.work_dir = expand_user(&dir);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = expand_user(&dir);
        }
        if let Some(value) = lookup(ENV_STRATEGY) {
            match value.parse() {
                Ok(strategy) => self.strategy = strategy,
                Err(err) => warn!("ignoring {ENV_STRATEGY}: {err}"),
            }
        }
        if let Some(value) = lookup(ENV_DELETE_DELAY_SECS) {
            match value.parse() {
                Ok(secs) => self.delete_delay_secs = secs,
                Err(err) => warn!("ignoring {ENV_DELETE_DELAY_SECS}={value:?}: {err}"),
            }
        }
        if let Some(value) = lookup(ENV_VERIFY_OUTPUT) {
            self.verify_output = parse_flag(&value);
        }
        if let Some(value) = lookup(ENV_RECORD_HISTORY) {
            self.record_history = parse_flag(&value);
        }
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_secs)
    }

    pub fn layout(&self) -> ForgeLayout {
        ForgeLayout::new(&self.core_dir, &self.work_dir, &self.output_dir)
    }
}

pub fn config_path() -> PathBuf {
    state_file_path(CONFIG_FILE)
}
