//! Claude family heuristics (spec §4.B).

use super::ProgramFamily;
use std::time::Duration;

pub const FAMILY: ProgramFamily = ProgramFamily {
    name: "claude",
    startup_sentinel: Some("Do you trust the files in this folder?"),
    startup_reply: b"\r",
    startup_poll_attempts: 5,
    startup_poll_interval: Duration::from_millis(200),
    auto_yes_sentinel: Some("No, and tell Claude what to do differently"),
};
