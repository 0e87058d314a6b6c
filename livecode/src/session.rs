//! The sandbox session: an asynchronous protocol with the isolated
//! execution host.
//!
//! One session exists per editor instance. It owns the readiness
//! handshake, ships render/execute payloads over the [`Transport`] seam,
//! and demultiplexes inbound reports into rule updates and the console
//! log. The machine is single-threaded and deterministic: timers are
//! deadlines fired by an explicit [`Session::poll`], and every mutating
//! call returns the [`SessionEvent`]s it produced instead of invoking
//! callbacks.
//!
//! The origin check in [`Session::receive`] is the sole authorization:
//! messages from any other origin are dropped unprocessed, as are
//! malformed envelopes. Nothing on the inbound path is fatal.

use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::evaluate::{DynamicPayload, StaticPayload, evaluate};
use crate::core::extract::{has_script, strip, title_text};
use crate::core::rules::{Intent, RuleSet};
use crate::core::runtime_match::apply_runtime_value;
use crate::instrument::instrument;
use crate::io::config::SandboxConfig;
use crate::io::protocol::{InboundMessage, OutboundMessage};
use crate::io::rules_store::{RuleBundle, RuleProvider};
use crate::io::transport::Transport;
use crate::markup::{parse, serialize};

/// Handshake state with the isolated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Unestablished,
    Handshaking,
    Ready,
}

/// Terminal state of the most recent execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Pending,
    Completed,
    CaughtError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    /// An execute request waiting out its settle delay.
    Pending { deadline: Instant },
    Executing { caught: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Rules,
    Console,
}

/// Change notifications returned by every mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Ready,
    ContentsChanged,
    /// The editor text gained or lost an executable script.
    ScriptPresence { present: bool },
    Scored {
        ratio: f64,
        intent: Intent,
        passing: bool,
    },
    ConsoleAppended,
    PanelOpened(Panel),
    ExecutionScheduled,
    ExecutionDispatched,
    RunCompleted { outcome: RunOutcome },
}

/// Localized string lookup supplied by the embedding surface.
pub trait Localizer {
    fn lookup(&self, key: &str) -> String;
}

/// Localizer that returns keys unchanged.
pub struct IdentityLocalizer;

impl Localizer for IdentityLocalizer {
    fn lookup(&self, key: &str) -> String {
        key.to_string()
    }
}

/// One console event: the argument tuple of a forwarded console call, or
/// a single error description from a `catch` report.
pub type ConsoleEntry = Vec<Value>;

pub struct Session {
    config: SandboxConfig,
    transport: Box<dyn Transport>,
    provider: Box<dyn RuleProvider>,
    localizer: Box<dyn Localizer>,
    readiness: Readiness,
    next_ping: Instant,
    contents: String,
    title: String,
    /// The pre-instrumentation learner script, tracked separately from
    /// anything already sent to the host.
    current_script: String,
    script_present: bool,
    rules: RuleSet,
    annotations: Vec<String>,
    console: Vec<ConsoleEntry>,
    run: RunState,
    last_outcome: Option<RunOutcome>,
    changes_made: bool,
}

impl Session {
    /// Open a session against the configured host origin. The first
    /// handshake ping goes out on the first `poll`.
    pub fn open(
        config: SandboxConfig,
        transport: Box<dyn Transport>,
        provider: Box<dyn RuleProvider>,
        localizer: Box<dyn Localizer>,
        initial_contents: impl Into<String>,
        now: Instant,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = Self {
            config,
            transport,
            provider,
            localizer,
            readiness: Readiness::Unestablished,
            next_ping: now,
            contents: initial_contents.into(),
            title: String::new(),
            current_script: String::new(),
            script_present: false,
            rules: RuleSet::default(),
            annotations: Vec::new(),
            console: Vec::new(),
            run: RunState::Idle,
            last_outcome: None,
            changes_made: false,
        };
        session.update_title();
        Ok(session)
    }

    /// Fire any timer whose deadline has passed: the handshake ping while
    /// the host has not answered, and the execute-settle dispatch.
    /// Embedders call this from their event loop.
    pub fn poll(&mut self, now: Instant) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();
        if self.readiness != Readiness::Ready && now >= self.next_ping {
            self.transport.send(&OutboundMessage::Wakeup)?;
            if self.readiness == Readiness::Unestablished {
                self.readiness = Readiness::Handshaking;
            }
            // No backoff: pings continue until the host answers.
            self.next_ping = now + Duration::from_millis(self.config.ping_interval_ms);
            debug!("sent handshake ping");
        }
        if let RunState::Pending { deadline } = self.run {
            if now >= deadline {
                events.extend(self.dispatch_execution()?);
            }
        }
        Ok(events)
    }

    /// Handle one inbound message. `origin` must match the configured
    /// host origin exactly; everything else is dropped silently.
    pub fn receive(&mut self, origin: &str, data: &Value, now: Instant) -> Result<Vec<SessionEvent>> {
        if origin != self.config.origin {
            debug!(origin, "dropped message from unexpected origin");
            return Ok(Vec::new());
        }
        let Some(message) = InboundMessage::parse(data) else {
            debug!("dropped malformed message");
            return Ok(Vec::new());
        };
        match message {
            InboundMessage::Awake => self.on_awake(now),
            _ if self.readiness != Readiness::Ready => {
                debug!("dropped report before handshake completed");
                Ok(Vec::new())
            }
            InboundMessage::Console(args) => Ok(self.push_console(args)),
            InboundMessage::Catch(description) => {
                if let RunState::Executing { caught } = &mut self.run {
                    *caught = true;
                }
                Ok(self.push_console(vec![Value::String(description)]))
            }
            InboundMessage::Rule { needle, value } => {
                let updated = apply_runtime_value(&self.rules, &needle, &value);
                if updated == self.rules {
                    return Ok(Vec::new());
                }
                self.rules = updated;
                Ok(vec![self.scored_event()])
            }
            InboundMessage::Completed => self.on_completed(),
        }
    }

    /// Replace the editor contents. Cancels any pending execution, ships
    /// a script-free render, and re-scores static rules.
    pub fn set_contents(&mut self, text: impl Into<String>, now: Instant) -> Result<Vec<SessionEvent>> {
        self.contents = text.into();
        self.changes_made = true;
        self.update_title();
        self.cancel_pending();
        let mut events = vec![SessionEvent::ContentsChanged];
        if self.readiness == Readiness::Ready {
            events.extend(self.render(false, now)?);
        }
        Ok(events)
    }

    /// Request execution of the current script: render, then dispatch the
    /// instrumented document once the settle delay elapses.
    pub fn execute(&mut self, now: Instant) -> Result<Vec<SessionEvent>> {
        if self.readiness != Readiness::Ready {
            debug!("execute requested before sandbox ready");
            return Ok(Vec::new());
        }
        self.render(true, now)
    }

    /// Tear the session down. The handshake schedule dies with the value;
    /// the method exists so embedders have an explicit end-of-life call.
    pub fn close(self) {}

    pub fn get_contents(&self) -> &str {
        &self.contents
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_passing(&self) -> bool {
        self.rules.is_passing()
    }

    pub fn good_ratio(&self) -> f64 {
        self.rules.good_ratio()
    }

    pub fn intent(&self) -> Intent {
        self.rules.intent()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.changes_made
    }

    pub fn mark_saved(&mut self) {
        self.changes_made = false;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn script_present(&self) -> bool {
        self.script_present
    }

    pub fn console(&self) -> &[ConsoleEntry] {
        &self.console
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    /// First `awake`: complete the handshake, fetch external rules, seed
    /// the rule set, and emit the initial render. Later `awake`s are
    /// no-ops.
    fn on_awake(&mut self, now: Instant) -> Result<Vec<SessionEvent>> {
        if self.readiness == Readiness::Ready {
            debug!("duplicate awake ignored");
            return Ok(Vec::new());
        }
        self.readiness = Readiness::Ready;
        info!(origin = %self.config.origin, "sandbox ready");
        let bundle = match self.provider.fetch() {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(%err, "rule fetch failed; continuing with base rules only");
                RuleBundle::default()
            }
        };
        self.rules = RuleSet::with_base(bundle.rules, self.config.lax);
        self.annotations = bundle.annotations;
        let mut events = vec![SessionEvent::Ready];
        events.extend(self.render(self.config.execute_on_ready, now)?);
        Ok(events)
    }

    /// Ship the current contents: script-free markup on the preview
    /// channel, static re-score, and optionally a scheduled execution.
    fn render(&mut self, execute: bool, now: Instant) -> Result<Vec<SessionEvent>> {
        self.cancel_pending();
        let mut events = Vec::new();
        let tree = parse(&self.contents);
        if has_script(&self.contents) {
            let (stripped, extract) = strip(&tree);
            self.set_script_presence(extract.found, &mut events);
            self.current_script = extract.source.unwrap_or_default();
            self.transport
                .send(&OutboundMessage::Document(serialize(&stripped)))?;
        } else {
            self.set_script_presence(false, &mut events);
            self.current_script.clear();
            self.transport
                .send(&OutboundMessage::Document(self.contents.clone()))?;
        }
        self.rules = evaluate(
            &self.rules,
            &StaticPayload {
                raw_text: &self.contents,
                tree: &tree,
            },
            &DynamicPayload {
                script: &self.current_script,
            },
        );
        events.push(self.scored_event());
        if execute && !self.current_script.is_empty() {
            self.run = RunState::Pending {
                deadline: now + Duration::from_millis(self.config.execute_settle_ms),
            };
            events.push(SessionEvent::ExecutionScheduled);
        }
        Ok(events)
    }

    /// The settle delay elapsed: instrument the learner script and ship
    /// the executable document. The console log belongs to the new run.
    fn dispatch_execution(&mut self) -> Result<Vec<SessionEvent>> {
        self.run = RunState::Idle;
        if self.current_script.is_empty() {
            return Ok(Vec::new());
        }
        let before = self.rules.clone();
        let instrumented = instrument(&self.contents, &self.current_script, &self.rules)?;
        self.console.clear();
        self.transport
            .send(&OutboundMessage::Document(instrumented.document))?;
        self.rules = instrumented.rules;
        self.run = RunState::Executing { caught: false };
        self.last_outcome = Some(RunOutcome::Pending);
        info!("dispatched instrumented script to sandbox");
        let mut events = vec![SessionEvent::ExecutionDispatched];
        if self.rules != before {
            events.push(self.scored_event());
        }
        Ok(events)
    }

    /// The run's terminal event, authoritative regardless of how the
    /// preceding reports were ordered. A stale `completed` (no run
    /// executing) is attributed to the current run: it re-scores but
    /// leaves a merely-pending dispatch in place.
    fn on_completed(&mut self) -> Result<Vec<SessionEvent>> {
        let outcome = match self.run {
            RunState::Executing { caught: true } => RunOutcome::CaughtError,
            _ => RunOutcome::Completed,
        };
        if matches!(self.run, RunState::Executing { .. }) {
            self.run = RunState::Idle;
        }
        self.last_outcome = Some(outcome);
        let tree = parse(&self.contents);
        self.rules = evaluate(
            &self.rules,
            &StaticPayload {
                raw_text: &self.contents,
                tree: &tree,
            },
            &DynamicPayload {
                script: &self.current_script,
            },
        );
        Ok(vec![
            self.scored_event(),
            SessionEvent::RunCompleted { outcome },
        ])
    }

    fn cancel_pending(&mut self) {
        if matches!(self.run, RunState::Pending { .. }) {
            self.run = RunState::Idle;
        }
    }

    fn push_console(&mut self, entry: ConsoleEntry) -> Vec<SessionEvent> {
        if self.console.len() >= self.config.max_console_entries {
            self.console.remove(0);
        }
        self.console.push(entry);
        vec![
            SessionEvent::ConsoleAppended,
            SessionEvent::PanelOpened(Panel::Console),
        ]
    }

    fn set_script_presence(&mut self, present: bool, events: &mut Vec<SessionEvent>) {
        if self.script_present != present {
            self.script_present = present;
            events.push(SessionEvent::ScriptPresence { present });
        }
    }

    fn scored_event(&self) -> SessionEvent {
        SessionEvent::Scored {
            ratio: self.rules.good_ratio(),
            intent: self.rules.intent(),
            passing: self.rules.is_passing(),
        }
    }

    fn update_title(&mut self) {
        let tree = parse(&self.contents);
        self.title = title_text(&tree).unwrap_or_else(|| self.localizer.lookup("Webpage"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BALANCED_PAGE, StaticRules, channel_transport, var_rule};
    use serde_json::json;
    use std::sync::mpsc::Receiver;

    fn open(
        contents: &str,
        rules: Vec<crate::core::rules::Rule>,
        now: Instant,
    ) -> (Session, Receiver<Value>) {
        let (transport, rx) = channel_transport();
        let session = Session::open(
            SandboxConfig::default(),
            transport,
            Box::new(StaticRules::new(rules)),
            Box::new(IdentityLocalizer),
            contents,
            now,
        )
        .expect("open");
        (session, rx)
    }

    fn awake(session: &mut Session, now: Instant) -> Vec<SessionEvent> {
        session
            .receive(&SandboxConfig::default().origin, &json!("awake"), now)
            .expect("awake")
    }

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    /// Pings repeat on the configured interval and stop once ready.
    #[test]
    fn handshake_pings_until_awake() {
        let now = Instant::now();
        let (mut session, rx) = open(BALANCED_PAGE, Vec::new(), now);
        assert_eq!(session.readiness(), Readiness::Unestablished);

        session.poll(now).expect("poll");
        assert_eq!(session.readiness(), Readiness::Handshaking);
        assert_eq!(rx.try_recv().expect("ping"), json!("wakeup"));

        // Before the interval elapses nothing is resent.
        session.poll(ms(now, 500)).expect("poll");
        assert!(rx.try_recv().is_err());

        session.poll(ms(now, 1000)).expect("poll");
        assert_eq!(rx.try_recv().expect("ping"), json!("wakeup"));

        awake(&mut session, ms(now, 1100));
        session.poll(ms(now, 3000)).expect("poll");
        // Only the initial render remains on the channel; no more pings.
        assert_eq!(rx.try_recv().expect("render"), json!(BALANCED_PAGE));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn awake_seeds_base_rules_and_scores() {
        let now = Instant::now();
        let (mut session, _rx) = open(BALANCED_PAGE, Vec::new(), now);
        let events = awake(&mut session, now);
        assert_eq!(events[0], SessionEvent::Ready);
        assert_eq!(session.rules().len(), 11);
        assert!(session.is_passing());
        assert_eq!(session.good_ratio(), 1.0);
    }

    #[test]
    fn duplicate_awake_is_ignored() {
        let now = Instant::now();
        let (mut session, _rx) = open(BALANCED_PAGE, Vec::new(), now);
        awake(&mut session, now);
        let events = awake(&mut session, now);
        assert!(events.is_empty());
    }

    #[test]
    fn provider_failure_falls_back_to_base_rules() {
        let now = Instant::now();
        let (transport, _rx) = channel_transport();
        let mut session = Session::open(
            SandboxConfig::default(),
            transport,
            Box::new(crate::test_support::FailingRules),
            Box::new(IdentityLocalizer),
            BALANCED_PAGE,
            now,
        )
        .expect("open");
        awake(&mut session, now);
        assert_eq!(session.readiness(), Readiness::Ready);
        assert_eq!(session.rules().len(), 11);
    }

    /// The preview channel never sees the raw script body.
    #[test]
    fn render_ships_stripped_markup() {
        let now = Instant::now();
        let (mut session, rx) = open(BALANCED_PAGE, Vec::new(), now);
        awake(&mut session, now);
        rx.try_recv().expect("initial render");

        session
            .set_contents(
                "<html><body><script>secret();</script><p>hi</p></body></html>",
                now,
            )
            .expect("set contents");
        let shipped = rx.try_recv().expect("render");
        let shipped = shipped.as_str().expect("string payload");
        assert!(!shipped.contains("secret()"));
        assert!(shipped.contains("<p>hi</p>"));
        assert!(session.script_present());
    }

    #[test]
    fn script_presence_events_fire_on_transitions() {
        let now = Instant::now();
        let (mut session, _rx) = open("<p>plain</p>", Vec::new(), now);
        awake(&mut session, now);

        let events = session
            .set_contents("<script>go();</script>", now)
            .expect("set contents");
        assert!(events.contains(&SessionEvent::ScriptPresence { present: true }));

        let events = session.set_contents("<p>plain</p>", now).expect("set contents");
        assert!(events.contains(&SessionEvent::ScriptPresence { present: false }));
    }

    /// An emptied script tag clears the tracked script so a later execute
    /// has nothing to dispatch.
    #[test]
    fn emptied_script_tag_clears_tracked_script() {
        let now = Instant::now();
        let (mut session, rx) = open("<script>go();</script>", Vec::new(), now);
        awake(&mut session, now);
        session
            .set_contents("<script>   </script>", now)
            .expect("set contents");
        assert!(session.script_present());

        let events = session.execute(now).expect("execute");
        assert!(!events.contains(&SessionEvent::ExecutionScheduled));
        while rx.try_recv().is_ok() {}
        session.poll(ms(now, 5000)).expect("poll");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn execute_dispatches_after_settle_delay() {
        let now = Instant::now();
        let (mut session, rx) = open("<script>var x=5;</script>", Vec::new(), now);
        awake(&mut session, now);
        let events = session.execute(now).expect("execute");
        assert!(events.contains(&SessionEvent::ExecutionScheduled));
        while rx.try_recv().is_ok() {}

        // Not yet: the settle delay has not elapsed.
        session.poll(ms(now, 500)).expect("poll");
        assert!(rx.try_recv().is_err());

        let events = session.poll(ms(now, 1000)).expect("poll");
        assert!(events.contains(&SessionEvent::ExecutionDispatched));
        let shipped = rx.try_recv().expect("dispatch");
        assert!(shipped.as_str().expect("string").contains("parent.loopGuard"));
    }

    /// A content change inside the settle window cancels the dispatch.
    #[test]
    fn content_change_cancels_pending_execution() {
        let now = Instant::now();
        let (mut session, rx) = open("<script>var x=5;</script>", Vec::new(), now);
        awake(&mut session, now);
        session.execute(now).expect("execute");
        session
            .set_contents("<script>var x=6;</script>", ms(now, 200))
            .expect("set contents");
        while rx.try_recv().is_ok() {}

        session.poll(ms(now, 2000)).expect("poll");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rule_reports_update_matching_rules() {
        let now = Instant::now();
        let rules = vec![var_rule("x", json!(5), "number")];
        let (mut session, _rx) = open("<script>var x=5;</script>", rules, now);
        awake(&mut session, now);
        let origin = SandboxConfig::default().origin;

        let events = session
            .receive(&origin, &json!(["rule", "x", 5]), now)
            .expect("receive");
        assert_eq!(events.len(), 1);
        let rule = session
            .rules()
            .rules
            .iter()
            .find(|r| r.needle == "x")
            .expect("rule");
        assert_eq!(rule.passing, Some(true));

        // Reapplying the same report is a no-op change.
        let events = session
            .receive(&origin, &json!(["rule", "x", 5]), now)
            .expect("receive");
        assert!(events.is_empty());
    }

    #[test]
    fn console_log_is_capped() {
        let now = Instant::now();
        let config = SandboxConfig {
            max_console_entries: 2,
            ..SandboxConfig::default()
        };
        let (transport, _rx) = channel_transport();
        let mut session = Session::open(
            config,
            transport,
            Box::new(StaticRules::new(Vec::new())),
            Box::new(IdentityLocalizer),
            BALANCED_PAGE,
            now,
        )
        .expect("open");
        awake(&mut session, now);
        let origin = SandboxConfig::default().origin;
        for i in 0..3 {
            session
                .receive(&origin, &json!(["console", i]), now)
                .expect("receive");
        }
        assert_eq!(session.console().len(), 2);
        assert_eq!(session.console()[0], vec![json!(1)]);
    }

    #[test]
    fn title_tracks_contents_with_localized_fallback() {
        let now = Instant::now();
        let (mut session, _rx) = open(BALANCED_PAGE, Vec::new(), now);
        assert_eq!(session.title(), "X");
        awake(&mut session, now);
        session.set_contents("<p>no title</p>", now).expect("set contents");
        assert_eq!(session.title(), "Webpage");
    }

    #[test]
    fn dirty_flag_follows_edits_and_saves() {
        let now = Instant::now();
        let (mut session, _rx) = open(BALANCED_PAGE, Vec::new(), now);
        assert!(!session.has_unsaved_changes());
        awake(&mut session, now);
        session.set_contents("<p>edit</p>", now).expect("set contents");
        assert!(session.has_unsaved_changes());
        session.mark_saved();
        assert!(!session.has_unsaved_changes());
    }

    /// A completed arriving while a dispatch is merely pending re-scores
    /// but leaves the pending dispatch in place.
    #[test]
    fn completed_while_pending_keeps_the_dispatch() {
        let now = Instant::now();
        let (mut session, rx) = open("<script>var x=5;</script>", Vec::new(), now);
        awake(&mut session, now);
        session.execute(now).expect("execute");
        while rx.try_recv().is_ok() {}

        let origin = SandboxConfig::default().origin;
        let events = session
            .receive(&origin, &json!(["completed"]), ms(now, 100))
            .expect("receive");
        assert!(events.iter().any(|e| matches!(e, SessionEvent::RunCompleted { .. })));

        let events = session.poll(ms(now, 1000)).expect("poll");
        assert!(events.contains(&SessionEvent::ExecutionDispatched));
        assert!(rx.try_recv().is_ok());
    }
}
