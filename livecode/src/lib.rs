//! Live validation and sandboxed execution for a learn-to-code editor.
//!
//! A learner types markup and script; this crate parses it, strips the
//! script for cheap preview renders, scores a configurable list of
//! correctness rules, rewrites the script into a self-reporting program,
//! and speaks the message protocol with the isolated host that actually
//! executes it. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, rule
//!   evaluation, call-site scanning, runtime matching). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting seams (config files, rule files, the
//!   message transport). Isolated to enable scripting in tests.
//!
//! [`markup`] holds the document tree and its tolerant parser;
//! [`instrument`] and [`session`] coordinate core logic with io to
//! implement the render/execute cycle.

pub mod core;
pub mod exit_codes;
pub mod instrument;
pub mod io;
pub mod logging;
pub mod markup;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
