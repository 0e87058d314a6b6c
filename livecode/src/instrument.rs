//! Script instrumentation: rewriting a learner's script into a
//! self-reporting program.
//!
//! The rewritten program runs inside the isolated host, where `parent`
//! resolves to the host page. Its reporter (`parent.report`) forwards
//! console output, tracked rule values, caught errors, and the completion
//! signal back across the message channel; `parent.loopGuard` is the
//! host-supplied pre-execution safety pass for runaway loops.
//!
//! Instrumentation is a pure function of `(document, script, rules)`:
//! the same inputs always produce identical output, and it is only ever
//! applied to the pre-instrumentation learner script, never to its own
//! output.

use std::collections::HashSet;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::rules::{RuleKind, RuleSet};
use crate::core::scan;

/// The reporter callee the host exposes to instrumented programs.
pub const REPORT_CALLEE: &str = "parent.report";

const CONSOLE_CALL: &str = "console.log(";
const CONSOLE_REWRITE: &str = "parent.report(\"console\", ";
const SHELL_TEMPLATE: &str = include_str!("templates/shell.js");

/// Result of one instrumentation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrumented {
    /// The full document with the raw script body replaced by the shell.
    pub document: String,
    /// The reporting program before shell wrapping (useful in tests and
    /// diagnostics).
    pub body: String,
    /// Rules with instrument-time outcomes applied: JS_VAR_EQUALS reset
    /// to failing until the run reports, JS_FUNC_EQUALS set from
    /// call-site presence in the source text.
    pub rules: RuleSet,
}

/// Rewrite `script` into a self-reporting program and substitute it back
/// into `document` in place of the raw script body.
pub fn instrument(document: &str, script: &str, rules: &RuleSet) -> Result<Instrumented> {
    // Step 1: redirect console output through the reporter.
    let js = script.replace(CONSOLE_CALL, CONSOLE_REWRITE);

    let mut rules = rules.clone();
    let mut inits: Vec<String> = Vec::new();
    let mut reports: Vec<String> = Vec::new();
    // Dedup by root identifier: `points.x` and `points.y` zero-init and
    // report `points` once.
    let mut instrumented_roots: HashSet<String> = HashSet::new();

    for rule in &mut rules.rules {
        match rule.kind {
            RuleKind::JsVarEquals => {
                rule.passing = Some(false);
                let root = rule.needle.split('.').next().unwrap_or(&rule.needle);
                if !root.is_empty() && instrumented_roots.insert(root.to_string()) {
                    inits.push(format!("{root}=undefined;"));
                    reports.push(format!(
                        "parent.report('rule', '{needle}', {needle});",
                        needle = rule.needle
                    ));
                }
            }
            RuleKind::JsFuncEquals => {
                let argument = if rule.needle == "console.log" {
                    // Step 1 already rewrote console calls; search for the
                    // reporter instead of the original callee.
                    scan::reported_argument(&js, CONSOLE_REWRITE)
                } else {
                    scan::last_call_argument(&js, &rule.needle)
                };
                rule.passing = Some(argument.is_some());
                let arg_text = match argument {
                    Some(text) if !text.is_empty() => text,
                    _ => "null".to_string(),
                };
                reports.push(format!(
                    "parent.report('rule', '{}', {});",
                    rule.needle, arg_text
                ));
            }
            _ => {}
        }
    }

    let mut body = String::new();
    for init in &inits {
        body.push_str(init);
        body.push('\n');
    }
    body.push_str(&js);
    if !body.ends_with('\n') {
        body.push('\n');
    }
    for report in &reports {
        body.push_str(report);
        body.push('\n');
    }
    // The completion report fires exactly once per run; the shell's catch
    // arm covers the throwing path.
    body.push_str("parent.report('completed');\n");

    let shell = render_shell(&body)?;
    let document = document.replacen(script, &shell, 1);
    debug!(
        script_bytes = script.len(),
        body_bytes = body.len(),
        "instrumented script"
    );

    Ok(Instrumented {
        document,
        body,
        rules,
    })
}

fn render_shell(body: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("shell", SHELL_TEMPLATE)
        .expect("shell template should be valid");
    let template = env.get_template("shell")?;
    let source = serde_json::to_string(body).context("encode script body")?;
    let rendered = template.render(context! { source => source })?;
    Ok(rendered)
}
