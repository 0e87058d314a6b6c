//! Rule definitions, the base rule set, and aggregate scoring.
//!
//! Rules are supplied externally as JSON (see `io::rules_store`) or
//! generated here as the base well-formedness set. Scoring state lives on
//! the rules themselves (`passing`), but aggregates (ratio, intent) are
//! always derived, never stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of check a rule performs.
///
/// Wire names match the external rule JSON (`"CONTAINS"`, ...). A kind
/// this crate has no evaluator for deserializes as [`RuleKind::Unknown`]
/// and is counted failing rather than rejecting the whole rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Contains,
    ContainsOne,
    Nests,
    CssContains,
    ContainsSelfClose,
    JsMatches,
    JsUses,
    JsVarEquals,
    JsFuncEquals,
    #[serde(other)]
    Unknown,
}

impl RuleKind {
    pub fn label(self) -> &'static str {
        match self {
            RuleKind::Contains => "CONTAINS",
            RuleKind::ContainsOne => "CONTAINS_ONE",
            RuleKind::Nests => "NESTS",
            RuleKind::CssContains => "CSS_CONTAINS",
            RuleKind::ContainsSelfClose => "CONTAINS_SELF_CLOSE",
            RuleKind::JsMatches => "JS_MATCHES",
            RuleKind::JsUses => "JS_USES",
            RuleKind::JsVarEquals => "JS_VAR_EQUALS",
            RuleKind::JsFuncEquals => "JS_FUNC_EQUALS",
            RuleKind::Unknown => "UNKNOWN",
        }
    }
}

/// A single correctness check with its last evaluation outcome.
///
/// `passing == None` means the rule has not been evaluated yet; for the
/// runtime-only kinds (JS_VAR_EQUALS / JS_FUNC_EQUALS) it stays `None`
/// until a run reports a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub needle: String,
    /// Required ancestor tag, used by NESTS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outer: Option<String>,
    /// Expected runtime value, used by the dynamic matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expected runtime `typeof`, used by the dynamic matcher.
    #[serde(
        default,
        rename = "valueType",
        alias = "varType",
        alias = "argType",
        skip_serializing_if = "Option::is_none"
    )]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing: Option<bool>,
}

impl Rule {
    pub fn new(kind: RuleKind, needle: &str) -> Self {
        Self {
            kind,
            needle: needle.to_string(),
            outer: None,
            value: None,
            value_type: None,
            passing: None,
        }
    }

    pub fn nests(needle: &str, outer: &str) -> Self {
        let mut rule = Self::new(RuleKind::Nests, needle);
        rule.outer = Some(outer.to_string());
        rule
    }

    /// A rule counts as failing until it has affirmatively passed.
    pub fn is_failing(&self) -> bool {
        self.passing != Some(true)
    }
}

/// Pass/fail intent bands derived from the good ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Danger,
    Warning,
    Success,
}

impl Intent {
    pub fn label(self) -> &'static str {
        match self {
            Intent::Danger => "danger",
            Intent::Warning => "warning",
            Intent::Success => "success",
        }
    }
}

/// Base rules plus externally supplied rules, order preserved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Seed a rule set: base well-formedness rules (unless `lax`) followed
    /// by the externally supplied rules.
    pub fn with_base(external: Vec<Rule>, lax: bool) -> Self {
        let mut rules = if lax { Vec::new() } else { base_rules() };
        rules.extend(external);
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fraction of currently-passing rules over total rules.
    ///
    /// An empty rule set is vacuously passing.
    pub fn good_ratio(&self) -> f64 {
        if self.rules.is_empty() {
            return 1.0;
        }
        let failing = self.rules.iter().filter(|r| r.is_failing()).count();
        (self.rules.len() - failing) as f64 / self.rules.len() as f64
    }

    pub fn is_passing(&self) -> bool {
        self.rules.iter().all(|r| !r.is_failing())
    }

    pub fn intent(&self) -> Intent {
        let ratio = self.good_ratio();
        if ratio < 0.5 {
            Intent::Danger
        } else if ratio < 1.0 {
            Intent::Warning
        } else {
            Intent::Success
        }
    }
}

/// The eleven rules every well-formed page satisfies: one `html`, `head`,
/// `title`, and `body` each, nested the standard way.
pub fn base_rules() -> Vec<Rule> {
    vec![
        Rule::new(RuleKind::Contains, "html"),
        Rule::new(RuleKind::Contains, "head"),
        Rule::new(RuleKind::Contains, "title"),
        Rule::new(RuleKind::Contains, "body"),
        Rule::new(RuleKind::ContainsOne, "html"),
        Rule::new(RuleKind::ContainsOne, "head"),
        Rule::new(RuleKind::ContainsOne, "title"),
        Rule::new(RuleKind::ContainsOne, "body"),
        Rule::nests("head", "html"),
        Rule::nests("body", "html"),
        Rule::nests("title", "head"),
    ]
}

/// Check semantic invariants not expressible in the rule JSON Schema:
/// - needle must be non-empty
/// - NESTS requires `outer`
/// - the kind must have an evaluator
pub fn validate_rules(rules: &[Rule]) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        let at = format!("rule {} ({})", index, rule.kind.label());
        if rule.needle.trim().is_empty() {
            errors.push(format!("{at}: needle must be non-empty"));
        }
        if rule.kind == RuleKind::Nests && rule.outer.as_deref().unwrap_or("").trim().is_empty() {
            errors.push(format!("{at}: NESTS requires an outer tag"));
        }
        if rule.kind == RuleKind::Unknown {
            errors.push(format!("{at}: unknown rule kind"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_rules_are_eleven() {
        assert_eq!(base_rules().len(), 11);
    }

    #[test]
    fn with_base_lax_skips_base_rules() {
        let set = RuleSet::with_base(vec![Rule::new(RuleKind::Contains, "p")], true);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn ratio_counts_unevaluated_rules_as_failing() {
        let mut rules = vec![
            Rule::new(RuleKind::Contains, "html"),
            Rule::new(RuleKind::Contains, "body"),
        ];
        rules[0].passing = Some(true);
        let set = RuleSet::new(rules);
        assert_eq!(set.good_ratio(), 0.5);
        assert!(!set.is_passing());
    }

    #[test]
    fn empty_rule_set_is_vacuously_passing() {
        let set = RuleSet::default();
        assert_eq!(set.good_ratio(), 1.0);
        assert!(set.is_passing());
        assert_eq!(set.intent(), Intent::Success);
    }

    #[test]
    fn intent_bands_follow_the_ratio() {
        let mut rules: Vec<Rule> = (0..4).map(|_| Rule::new(RuleKind::Contains, "p")).collect();
        let danger = RuleSet::new(rules.clone());
        assert_eq!(danger.intent(), Intent::Danger);

        for rule in rules.iter_mut().take(3) {
            rule.passing = Some(true);
        }
        let warning = RuleSet::new(rules.clone());
        assert_eq!(warning.intent(), Intent::Warning);

        rules[3].passing = Some(true);
        let success = RuleSet::new(rules);
        assert_eq!(success.intent(), Intent::Success);
    }

    #[test]
    fn rule_kind_wire_names_round_trip() {
        let json = r#"{"type":"JS_VAR_EQUALS","needle":"x","value":5,"varType":"number"}"#;
        let rule: Rule = serde_json::from_str(json).expect("parse rule");
        assert_eq!(rule.kind, RuleKind::JsVarEquals);
        assert_eq!(rule.value_type.as_deref(), Some("number"));
        assert_eq!(rule.value, Some(serde_json::json!(5)));
    }

    #[test]
    fn unknown_kind_deserializes_and_fails_validation() {
        let json = r#"{"type":"HAS_ARIA","needle":"x"}"#;
        let rule: Rule = serde_json::from_str(json).expect("parse rule");
        assert_eq!(rule.kind, RuleKind::Unknown);
        let errors = validate_rules(&[rule]);
        assert_eq!(errors, vec!["rule 0 (UNKNOWN): unknown rule kind".to_string()]);
    }

    #[test]
    fn validate_rules_requires_outer_for_nests() {
        let rule = Rule::new(RuleKind::Nests, "head");
        let errors = validate_rules(&[rule]);
        assert_eq!(errors, vec!["rule 0 (NESTS): NESTS requires an outer tag".to_string()]);
    }
}
