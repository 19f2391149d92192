//! Aider family heuristics (spec §4.B).

use super::ProgramFamily;
use std::time::Duration;

pub const FAMILY: ProgramFamily = ProgramFamily {
    name: "aider",
    startup_sentinel: Some("Open documentation url for more info"),
    startup_reply: b"D\r",
    startup_poll_attempts: 10,
    startup_poll_interval: Duration::from_millis(200),
    auto_yes_sentinel: Some("(Y)es/(N)o/(D)on't ask again"),
};
