//! Rule bundle loading with schema and invariant validation.
//!
//! The [`RuleProvider`] trait is the seam for the externally authored
//! rule metadata a session fetches once its host is ready. The provided
//! implementation reads a JSON file; tests script the trait directly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::rules::{Rule, validate_rules};

pub const RULES_SCHEMA: &str = include_str!("../../schemas/rules.schema.json");

/// Externally authored rules plus any server-side error annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBundle {
    pub rules: Vec<Rule>,
    pub annotations: Vec<String>,
}

/// Abstraction over rule-metadata fetching.
pub trait RuleProvider {
    fn fetch(&self) -> Result<RuleBundle>;
}

/// Provider backed by a rule bundle JSON file.
pub struct FileRuleProvider {
    path: PathBuf,
}

impl FileRuleProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleProvider for FileRuleProvider {
    fn fetch(&self) -> Result<RuleBundle> {
        load_bundle(&self.path)
    }
}

/// Provider for sessions with no externally configured rules.
pub struct NoExternalRules;

impl RuleProvider for NoExternalRules {
    fn fetch(&self) -> Result<RuleBundle> {
        Ok(RuleBundle::default())
    }
}

/// Load and validate a rule bundle (schema + semantic invariants).
pub fn load_bundle(path: &Path) -> Result<RuleBundle> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read rules {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse rules {}", path.display()))?;
    validate_schema(&value)?;
    let bundle: RuleBundle = serde_json::from_value(value)
        .with_context(|| format!("deserialize rules {}", path.display()))?;
    let errors = validate_rules(&bundle.rules);
    if !errors.is_empty() {
        return Err(anyhow!("rule invariants failed: {}", errors.join("; ")));
    }
    Ok(bundle)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(RULES_SCHEMA).context("parse embedded rules schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "rules schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
