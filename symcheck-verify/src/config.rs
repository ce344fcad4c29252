//! `symcheck.toml` loading.

use std::path::{Path, PathBuf};

use crate::error::VerifyError;
use crate::solver::SmtProfile;
use crate::state::{
    AllocationTable, RecursionPattern, RecursionProfile, DEFAULT_MEMORY_SIZE, DEFAULT_UNROLL_BOUND,
    MAX_UNROLL_BOUND,
};

pub const CONFIG_FILE_NAME: &str = "symcheck.toml";

pub const ENV_PROFILE: &str = "SYMCHECK_PROFILE";
pub const ENV_TIMEOUT_MS: &str = "SYMCHECK_TIMEOUT_MS";

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    pub profile: SmtProfile,
    /// Overrides the profile's timeout.
    pub timeout_ms: Option<u32>,
    pub memory_size: i64,
    pub unroll_bound: u32,
    pub random_seed: u32,
    pub exponential_call_threshold: i64,
    pub exponential_input_bound: i64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            profile: SmtProfile::Ci,
            timeout_ms: None,
            memory_size: DEFAULT_MEMORY_SIZE,
            unroll_bound: DEFAULT_UNROLL_BOUND,
            random_seed: 0,
            exponential_call_threshold: 100,
            exponential_input_bound: 20,
        }
    }
}

impl VerifierConfig {
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms.unwrap_or_else(|| self.profile.timeout_ms())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, VerifyError> {
        Self::parse(text).map_err(VerifyError::config)
    }

    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VerifyError::config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| VerifyError::config(format!("{}: {e}", path.display())))
    }

    fn parse(text: &str) -> Result<Self, String> {
        let cfg: VerifierConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        cfg.check_ranges()?;
        Ok(cfg)
    }

    /// Explicit path if given, else the nearest `symcheck.toml` at or above
    /// `start`, else defaults. Returns the file that was used, if any.
    pub fn discover(
        explicit: Option<&Path>,
        start: &Path,
    ) -> Result<(Self, Option<PathBuf>), VerifyError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match find_config(start) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Apply `SYMCHECK_PROFILE` / `SYMCHECK_TIMEOUT_MS` through `lookup`.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, VerifyError> {
        if let Some(raw) = lookup(ENV_PROFILE) {
            self.profile = SmtProfile::parse(&raw).ok_or_else(|| {
                VerifyError::config(format!(
                    "{ENV_PROFILE}={raw}: expected one of fast, ci, thorough"
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let ms = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| VerifyError::config(format!("{ENV_TIMEOUT_MS}={raw}: {e}")))?;
            self.timeout_ms = Some(ms);
        }
        Ok(self)
    }

    pub fn with_process_env(self) -> Result<Self, VerifyError> {
        self.apply_env(|k| std::env::var(k).ok())
    }

    pub fn validate(&self) -> Result<(), VerifyError> {
        self.check_ranges().map_err(VerifyError::config)
    }

    fn check_ranges(&self) -> Result<(), String> {
        if self.memory_size <= 0 {
            return Err("memory_size must be positive".to_string());
        }
        if self.unroll_bound == 0 {
            return Err("unroll_bound must be at least 1".to_string());
        }
        if self.unroll_bound > MAX_UNROLL_BOUND {
            return Err(format!("unroll_bound must be at most {MAX_UNROLL_BOUND}"));
        }
        if self.exponential_input_bound < 0 {
            return Err("exponential_input_bound must not be negative".to_string());
        }
        Ok(())
    }

    pub fn allocation_table(&self) -> AllocationTable {
        AllocationTable::new(self.memory_size)
    }

    pub fn recursion_profile(&self, pattern: impl RecursionPattern + 'static) -> RecursionProfile {
        RecursionProfile::new(pattern, self.unroll_bound)
    }

    #[cfg(feature = "z3")]
    pub fn z3_oracle(&self) -> crate::solver::z3_oracle::Z3Oracle {
        crate::solver::z3_oracle::Z3Oracle::with_options(self.timeout_ms(), self.random_seed)
    }
}

pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = VerifierConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg, VerifierConfig::default());
        assert_eq!(cfg.timeout_ms(), 250);
    }

    #[test]
    fn explicit_timeout_overrides_profile() {
        let text = "profile = \"thorough\"\ntimeout_ms = 75\n";
        let cfg = VerifierConfig::from_toml_str(text).expect("parse");
        assert_eq!(cfg.profile, SmtProfile::Thorough);
        assert_eq!(cfg.timeout_ms(), 75);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = VerifierConfig::from_toml_str("memroy_size = 10\n").expect_err("typo");
        assert!(matches!(err, VerifyError::Config { .. }));
    }

    #[test]
    fn unroll_bound_is_range_checked() {
        assert!(VerifierConfig::from_toml_str("unroll_bound = 0\n").is_err());
        let err = VerifierConfig::from_toml_str("unroll_bound = 200000\n").expect_err("too deep");
        assert!(err.to_string().contains("at most 1024"), "{err}");

        let cfg = VerifierConfig::from_toml_str("unroll_bound = 1024\n").expect("at the limit");
        assert_eq!(cfg.recursion_profile(crate::state::Factorial).unroll_bound(), MAX_UNROLL_BOUND);
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = VerifierConfig::default()
            .apply_env(|k| match k {
                ENV_PROFILE => Some("Fast".to_string()),
                ENV_TIMEOUT_MS => Some("40".to_string()),
                _ => None,
            })
            .expect("env");
        assert_eq!(cfg.profile, SmtProfile::Fast);
        assert_eq!(cfg.timeout_ms(), 40);

        let err = VerifierConfig::default()
            .apply_env(|k| (k == ENV_PROFILE).then(|| "slow".to_string()))
            .expect_err("bad profile");
        assert!(err.to_string().contains("SYMCHECK_PROFILE"));
    }

    #[test]
    fn discovery_walks_up_to_nearest_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "memory_size = 64\n").expect("write");

        let (cfg, used) = VerifierConfig::discover(None, &nested).expect("discover");
        assert_eq!(cfg.memory_size, 64);
        assert_eq!(used, Some(dir.path().join(CONFIG_FILE_NAME)));
        assert_eq!(cfg.allocation_table().memory_size(), 64);
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "random_seed = 7\n").expect("write");
        let (cfg, used) = VerifierConfig::discover(Some(&path), dir.path()).expect("discover");
        assert_eq!(cfg.random_seed, 7);
        assert_eq!(used.as_deref(), Some(path.as_path()));
    }
}
