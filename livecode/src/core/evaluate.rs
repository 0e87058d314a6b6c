//! Static rule evaluation.
//!
//! Every call re-scores every rule against the current editor text; the
//! result is a new [`RuleSet`] rather than an in-place mutation, so a
//! static pass can never observe a half-applied dynamic update. The two
//! runtime-only kinds pass through whatever the last run reported.

use regex::Regex;
use tracing::warn;

use crate::core::extract::style_contents;
use crate::core::rules::{Rule, RuleKind, RuleSet};
use crate::markup::DocumentNode;

/// Inputs for the structural and raw-text rule kinds. The tree is parsed
/// from the full editor text, script tags included.
#[derive(Debug, Clone, Copy)]
pub struct StaticPayload<'a> {
    pub raw_text: &'a str,
    pub tree: &'a [DocumentNode],
}

/// Inputs for the script-text rule kinds.
#[derive(Debug, Clone, Copy)]
pub struct DynamicPayload<'a> {
    pub script: &'a str,
}

/// Score every rule and return the newly scored set.
pub fn evaluate(set: &RuleSet, statics: &StaticPayload, dynamics: &DynamicPayload) -> RuleSet {
    let rules = set
        .rules
        .iter()
        .map(|rule| {
            let mut scored = rule.clone();
            scored.passing = score(rule, statics, dynamics);
            scored
        })
        .collect();
    RuleSet::new(rules)
}

fn score(rule: &Rule, statics: &StaticPayload, dynamics: &DynamicPayload) -> Option<bool> {
    match rule.kind {
        RuleKind::Contains => Some(count_tag(statics.tree, &rule.needle) >= 1),
        RuleKind::ContainsOne => Some(count_tag(statics.tree, &rule.needle) == 1),
        RuleKind::Nests => {
            let passing = match rule.outer.as_deref() {
                Some(outer) if !outer.trim().is_empty() => {
                    nests(statics.tree, &rule.needle, outer)
                }
                // NESTS without an outer tag cannot pass.
                _ => false,
            };
            Some(passing)
        }
        RuleKind::CssContains => Some(
            style_contents(statics.tree)
                .iter()
                .any(|body| body.contains(&rule.needle)),
        ),
        RuleKind::ContainsSelfClose => Some(contains_self_close(statics.raw_text, &rule.needle)),
        RuleKind::JsMatches => Some(js_matches(dynamics.script, &rule.needle)),
        RuleKind::JsUses => Some(dynamics.script.contains(&rule.needle)),
        // Runtime-only kinds: keep whatever the last run reported.
        RuleKind::JsVarEquals | RuleKind::JsFuncEquals => rule.passing,
        RuleKind::Unknown => Some(false),
    }
}

fn count_tag(nodes: &[DocumentNode], tag: &str) -> usize {
    let mut count = 0;
    for node in nodes {
        if node.tag == tag {
            count += 1;
        }
        count += count_tag(&node.children, tag);
    }
    count
}

/// True iff some `outer` element has a `needle` element anywhere in its
/// subtree.
fn nests(nodes: &[DocumentNode], needle: &str, outer: &str) -> bool {
    for node in nodes {
        if node.tag == outer && count_tag(&node.children, needle) >= 1 {
            return true;
        }
        if nests(&node.children, needle, outer) {
            return true;
        }
    }
    false
}

fn contains_self_close(raw_text: &str, needle: &str) -> bool {
    let pattern = format!(r"<\s*{}(\s[^>]*)?/\s*>", regex::escape(needle));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(raw_text),
        Err(_) => false,
    }
}

/// The needle is a regex over raw script text. A pattern that does not
/// compile is a misconfigured rule: warn and count it failing.
fn js_matches(script: &str, needle: &str) -> bool {
    match Regex::new(needle) {
        Ok(re) => re.is_match(script),
        Err(err) => {
            warn!(pattern = needle, %err, "JS_MATCHES pattern does not compile");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::base_rules;
    use crate::markup::parse;

    fn scored(rules: Vec<Rule>, text: &str, script: &str) -> RuleSet {
        let tree = parse(text);
        evaluate(
            &RuleSet::new(rules),
            &StaticPayload {
                raw_text: text,
                tree: &tree,
            },
            &DynamicPayload { script },
        )
    }

    /// A balanced skeleton page satisfies all eleven base rules.
    #[test]
    fn balanced_document_passes_all_base_rules() {
        let text = "<html><head><title>X</title></head><body></body></html>";
        let set = scored(base_rules(), text, "");
        assert!(set.is_passing());
        assert_eq!(set.good_ratio(), 1.0);
    }

    #[test]
    fn contains_one_fails_on_duplicates() {
        let set = scored(
            vec![Rule::new(RuleKind::ContainsOne, "p")],
            "<p>a</p><p>b</p>",
            "",
        );
        assert_eq!(set.rules[0].passing, Some(false));
    }

    #[test]
    fn nests_requires_the_ancestor() {
        let inside = scored(
            vec![Rule::nests("title", "head")],
            "<head><title>x</title></head>",
            "",
        );
        assert_eq!(inside.rules[0].passing, Some(true));

        let outside = scored(
            vec![Rule::nests("title", "head")],
            "<head></head><title>x</title>",
            "",
        );
        assert_eq!(outside.rules[0].passing, Some(false));
    }

    #[test]
    fn nests_without_outer_cannot_pass() {
        let set = scored(
            vec![Rule::new(RuleKind::Nests, "title")],
            "<head><title>x</title></head>",
            "",
        );
        assert_eq!(set.rules[0].passing, Some(false));
    }

    #[test]
    fn css_contains_searches_style_bodies() {
        let set = scored(
            vec![Rule::new(RuleKind::CssContains, "font-size")],
            "<style>p { font-size: 12px; }</style>",
            "",
        );
        assert_eq!(set.rules[0].passing, Some(true));

        let plain = scored(
            vec![Rule::new(RuleKind::CssContains, "font-size")],
            "<p>font-size</p>",
            "",
        );
        assert_eq!(plain.rules[0].passing, Some(false));
    }

    #[test]
    fn contains_self_close_matches_raw_text() {
        let set = scored(
            vec![Rule::new(RuleKind::ContainsSelfClose, "br")],
            "line<br/>break",
            "",
        );
        assert_eq!(set.rules[0].passing, Some(true));

        let spaced = scored(
            vec![Rule::new(RuleKind::ContainsSelfClose, "img")],
            r#"<img src="a.png" />"#,
            "",
        );
        assert_eq!(spaced.rules[0].passing, Some(true));

        let open = scored(
            vec![Rule::new(RuleKind::ContainsSelfClose, "br")],
            "line<br>break",
            "",
        );
        assert_eq!(open.rules[0].passing, Some(false));
    }

    #[test]
    fn js_uses_is_a_substring_match() {
        let set = scored(
            vec![Rule::new(RuleKind::JsUses, "alert")],
            "",
            "alert('hi');",
        );
        assert_eq!(set.rules[0].passing, Some(true));
    }

    #[test]
    fn js_matches_treats_needle_as_regex() {
        let set = scored(
            vec![Rule::new(RuleKind::JsMatches, r"var\s+x")],
            "",
            "var x = 1;",
        );
        assert_eq!(set.rules[0].passing, Some(true));
    }

    #[test]
    fn invalid_js_matches_pattern_counts_failing() {
        let set = scored(vec![Rule::new(RuleKind::JsMatches, "(")], "", "anything");
        assert_eq!(set.rules[0].passing, Some(false));
    }

    /// Runtime-only kinds keep the value the last run reported.
    #[test]
    fn runtime_kinds_pass_through_previous_outcome() {
        let mut rule = Rule::new(RuleKind::JsVarEquals, "x");
        rule.passing = Some(true);
        let set = scored(vec![rule], "<p>x</p>", "var x = 1;");
        assert_eq!(set.rules[0].passing, Some(true));

        let fresh = scored(vec![Rule::new(RuleKind::JsVarEquals, "x")], "", "");
        assert_eq!(fresh.rules[0].passing, None);
    }

    #[test]
    fn unknown_kind_counts_failing() {
        let set = scored(vec![Rule::new(RuleKind::Unknown, "x")], "", "");
        assert_eq!(set.rules[0].passing, Some(false));
    }
}
