//! Test description data model (spec.md §3, §6.1) and its YAML loader.
//!
//! Loading itself is a thin wrapper — parsing, structured-response
//! handling, and the interactive config reader are explicitly out of
//! scope (spec.md §1). This module only owns the shape of the document
//! and the small amount of validation/defaulting needed to hand a
//! well-formed [`TestDescription`] to the engine.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::errors::DescriptionError;

/// Grace period after engine startup before the reboot-aware reconnection
/// policy (spec.md §4.1) may activate, regardless of `sleep_sock_wait`.
pub const SLEEP_SOCK_WAIT_GRACE_PERIOD_SECS: f64 = 30.0;

fn default_timeout() -> f64 {
    300.0
}
fn default_sleep_min() -> f64 {
    30.0
}
fn default_sleep_max() -> f64 {
    120.0
}
fn default_test_max_timeouts() -> u32 {
    2
}
fn default_wait_prompt_enter() -> u32 {
    1000
}
fn default_wait_prompt_return() -> u32 {
    2000
}

/// Recognized scalar tunables (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(rename = "infiniteTest")]
    pub infinite_test: bool,
    #[serde(default = "default_sleep_min")]
    pub sleep_min: f64,
    #[serde(default = "default_sleep_max")]
    pub sleep_max: f64,
    #[serde(default = "default_test_max_timeouts")]
    pub test_max_timeouts: u32,
    pub sendendr: bool,
    #[serde(rename = "waitPrompt_enter", default = "default_wait_prompt_enter")]
    pub wait_prompt_enter: u32,
    #[serde(rename = "waitPrompt_return", default = "default_wait_prompt_return")]
    pub wait_prompt_return: u32,
    /// Sleep applied before reconnecting under the telnet reboot-aware
    /// policy (spec.md §4.1). Zero disables the policy. Not part of the
    /// spec's enumerated scalar list but required by §4.1's description —
    /// see DESIGN.md for the Open Question resolution.
    #[serde(default)]
    pub sleep_sock_wait: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            infinite_test: false,
            sleep_min: default_sleep_min(),
            sleep_max: default_sleep_max(),
            test_max_timeouts: default_test_max_timeouts(),
            sendendr: false,
            wait_prompt_enter: default_wait_prompt_enter(),
            wait_prompt_return: default_wait_prompt_return(),
            sleep_sock_wait: 0.0,
        }
    }
}

fn ordered_string_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut out = Vec::with_capacity(mapping.len());
    for (k, v) in mapping {
        let key = k
            .as_str()
            .ok_or_else(|| serde::de::Error::custom("marker key must be a string"))?
            .to_string();
        let val = v
            .as_str()
            .ok_or_else(|| serde::de::Error::custom("marker value must be a string"))?
            .to_string();
        out.push((key, val));
    }
    Ok(out)
}

fn default_markers() -> Vec<(String, String)> {
    Vec::new()
}

/// The immutable test description loaded from YAML (spec.md §3, §6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TestDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub info: serde_yaml::Mapping,
    #[serde(deserialize_with = "ordered_string_pairs", default = "default_markers")]
    pub markers: Vec<(String, String)>,
    #[serde(
        deserialize_with = "ordered_string_pairs",
        default = "default_markers",
        rename = "markers_cfg"
    )]
    pub markers_cfg: Vec<(String, String)>,
    #[serde(default)]
    pub prompts: HashSet<String>,
    #[serde(default)]
    pub triggers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub actions: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub user_inp: HashMap<String, String>,
    #[serde(rename = "initconfig", default)]
    pub config_seq: Vec<String>,
    #[serde(rename = "test", default)]
    pub test_seq: Vec<String>,
    #[serde(default)]
    pub options: Options,
}

impl Options {
    /// Catches option values that would otherwise panic or misbehave deep
    /// inside the engine — `rand::gen_range` panics if `sleep_min >
    /// sleep_max`, and a non-positive `timeout` would fire the main timer
    /// immediately or never. Caught here so a bad description fails fast
    /// as **config failed** (spec.md §4.7) instead of mid-run.
    fn validate(&self) -> Result<(), DescriptionError> {
        if self.timeout <= 0.0 {
            return Err(DescriptionError::InvalidOption {
                field: "timeout",
                expected: "> 0",
                got: self.timeout.to_string(),
            });
        }
        if self.sleep_min < 0.0 {
            return Err(DescriptionError::InvalidOption {
                field: "sleep_min",
                expected: ">= 0",
                got: self.sleep_min.to_string(),
            });
        }
        if self.sleep_min > self.sleep_max {
            return Err(DescriptionError::InvalidOption {
                field: "sleep_min",
                expected: "<= sleep_max",
                got: format!("{} > {}", self.sleep_min, self.sleep_max),
            });
        }
        if self.sleep_sock_wait < 0.0 {
            return Err(DescriptionError::InvalidOption {
                field: "sleep_sock_wait",
                expected: ">= 0",
                got: self.sleep_sock_wait.to_string(),
            });
        }
        Ok(())
    }
}

impl TestDescription {
    /// Union of `markers` and `markers_cfg`, active during the config
    /// phase (spec.md §3). `markers` entries come first so a name
    /// collision between the two tables prefers the config-only marker,
    /// matching a later declaration's precedence during iteration.
    pub fn config_markers(&self) -> Vec<(String, String)> {
        let mut merged = self.markers.clone();
        merged.extend(self.markers_cfg.iter().cloned());
        merged
    }

    /// The `overwatcher revision required` integer from `info`, if present.
    pub fn required_revision(&self) -> Option<i64> {
        self.info
            .get("overwatcher revision required")
            .and_then(|v| v.as_i64())
    }

    /// Sequence tokens (`config_seq`/`test_seq`) that resolve to none of
    /// the driver's four dispatch categories — user input, an action
    /// list, a modifier, or a declared state name. Spec.md §7: an
    /// unrecognized reference is fatal, and should be caught at load
    /// time rather than mid-run.
    pub fn unknown_sequence_tokens(&self) -> Vec<String> {
        let known_states: HashSet<&str> = self
            .markers
            .iter()
            .chain(self.markers_cfg.iter())
            .map(|(_, state)| state.as_str())
            .collect();

        self.config_seq
            .iter()
            .chain(self.test_seq.iter())
            .filter(|token| {
                !self.user_inp.contains_key(token.as_str())
                    && !self.actions.contains_key(token.as_str())
                    && crate::modifiers::Modifier::from_token(token).is_none()
                    && !known_states.contains(token.as_str())
            })
            .cloned()
            .collect()
    }
}

/// Loads and defaults a [`TestDescription`] from a YAML file at `path`.
///
/// `name`/`full_name` fall back to the file stem when absent, matching
/// `original_source/fakeOverwatcher.py`'s convention of deriving the log
/// file name from the test file's basename.
pub fn load(path: &Path) -> Result<TestDescription, DescriptionError> {
    let text = std::fs::read_to_string(path)?;
    let mut description: TestDescription = serde_yaml::from_str(&text)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_string());

    if description.name.is_none() {
        description.name = Some(stem.clone());
    }
    if description.full_name.is_none() {
        description.full_name = description.name.clone();
    }

    if description.test_seq.is_empty() {
        return Err(DescriptionError::MissingField("test"));
    }

    description.options.validate()?;

    Ok(description)
}

/// Builds a minimal, uniquely-named description for use by other modules'
/// tests that need a `TestLogger` but don't care about its contents.
#[cfg(test)]
pub fn load_test_fixture() -> TestDescription {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);

    TestDescription {
        name: Some(format!(
            "overwatcher-fixture-{}-{unique}",
            std::process::id()
        )),
        full_name: Some("fixture".to_string()),
        info: serde_yaml::Mapping::new(),
        markers: Vec::new(),
        markers_cfg: Vec::new(),
        prompts: HashSet::new(),
        triggers: HashMap::new(),
        actions: HashMap::new(),
        user_inp: HashMap::new(),
        config_seq: Vec::new(),
        test_seq: vec!["READY".to_string()],
        options: Options::default(),
    }
}
