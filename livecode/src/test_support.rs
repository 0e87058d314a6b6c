//! Test-only helpers: fixture rules, scripted providers, channel
//! transports.

use std::sync::mpsc::Receiver;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::rules::{Rule, RuleKind};
use crate::io::rules_store::{RuleBundle, RuleProvider};
use crate::io::transport::{ChannelTransport, Transport};

/// A minimal page satisfying every base rule.
pub const BALANCED_PAGE: &str = "<html><head><title>X</title></head><body></body></html>";

/// A JS_VAR_EQUALS rule with an expected value and type.
pub fn var_rule(needle: &str, value: Value, value_type: &str) -> Rule {
    let mut rule = Rule::new(RuleKind::JsVarEquals, needle);
    rule.value = Some(value);
    rule.value_type = Some(value_type.to_string());
    rule
}

/// A JS_FUNC_EQUALS rule with no value expectations.
pub fn func_rule(needle: &str) -> Rule {
    Rule::new(RuleKind::JsFuncEquals, needle)
}

/// Provider returning a fixed bundle, the scripted stand-in for the
/// rule-metadata backend.
pub struct StaticRules {
    bundle: RuleBundle,
}

impl StaticRules {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            bundle: RuleBundle {
                rules,
                annotations: Vec::new(),
            },
        }
    }
}

impl RuleProvider for StaticRules {
    fn fetch(&self) -> Result<RuleBundle> {
        Ok(self.bundle.clone())
    }
}

/// Provider whose fetch always fails.
pub struct FailingRules;

impl RuleProvider for FailingRules {
    fn fetch(&self) -> Result<RuleBundle> {
        Err(anyhow!("rule backend unavailable"))
    }
}

/// A boxed channel transport plus the receiving end for assertions.
pub fn channel_transport() -> (Box<dyn Transport>, Receiver<Value>) {
    let (transport, rx) = ChannelTransport::pair();
    (Box::new(transport), rx)
}
