//! Program-family startup/prompt heuristics (spec §4.B, §9 "Prompt
//! heuristics" design note).
//!
//! Family-specific screen-sentinel matching is a heuristic, not a contract,
//! so it is modeled as additive data — a registry of `{startup_sentinel,
//! startup_reply, auto_yes_sentinel}` per family — rather than `if program
//! == "claude"` branches scattered through the terminal-session code.
//! Grounded on `amux-daemon/src/providers/mod.rs`'s `AiProvider` trait +
//! registry pattern, simplified: this crate never builds a provider's CLI
//! invocation (`program` already arrives as a caller-supplied shell command
//! string), so only the startup/prompt data survives from that pattern.

mod aider;
mod claude;

use std::time::Duration;

/// Startup and auto-yes heuristics for one agent program family.
#[derive(Debug, Clone, Copy)]
pub struct ProgramFamily {
    pub name: &'static str,
    /// Screen text that indicates a first-run trust/consent prompt.
    pub startup_sentinel: Option<&'static str>,
    /// Bytes to send once `startup_sentinel` is observed.
    pub startup_reply: &'static [u8],
    pub startup_poll_attempts: u32,
    pub startup_poll_interval: Duration,
    /// Screen text that, combined with `auto_yes`, triggers an automatic
    /// `TapEnter` (spec §4.C).
    pub auto_yes_sentinel: Option<&'static str>,
}

/// A family with no known heuristics: startup/auto-yes are both no-ops.
const GENERIC: ProgramFamily = ProgramFamily {
    name: "generic",
    startup_sentinel: None,
    startup_reply: &[],
    startup_poll_attempts: 0,
    startup_poll_interval: Duration::from_millis(200),
    auto_yes_sentinel: None,
};

/// Resolve a family from a `program` command string by matching its first
/// path component against known families. Additive: new families are added
/// as new match arms plus a new data module, never by touching callers.
pub fn resolve(program: &str) -> ProgramFamily {
    let first_token = program.split_whitespace().next().unwrap_or(program);
    let basename = first_token.rsplit('/').next().unwrap_or(first_token);

    if basename.contains("claude") {
        claude::FAMILY
    } else if basename.contains("aider") {
        aider::FAMILY
    } else {
        GENERIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_claude_family_by_basename() {
        assert_eq!(resolve("claude").name, "claude");
        assert_eq!(resolve("/usr/local/bin/claude --resume").name, "claude");
    }

    #[test]
    fn resolves_aider_family_by_basename() {
        assert_eq!(resolve("aider --model sonnet").name, "aider");
    }

    #[test]
    fn unknown_program_gets_generic_family() {
        let family = resolve("/bin/sh");
        assert_eq!(family.name, "generic");
        assert!(family.startup_sentinel.is_none());
        assert!(family.auto_yes_sentinel.is_none());
    }
}
