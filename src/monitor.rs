//! Status Monitor (spec §4.C): derives Running/Ready/prompt-detected from
//! screen captures. Holds only the last-capture hash; `TerminalSession`
//! owns one instance and feeds it captures through `HasUpdated()`.

use sha2::{Digest, Sha256};

#[derive(Debug, Default)]
pub struct StatusMonitor {
    last_capture_hash: Option<[u8; 32]>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `capture`, compare with the last-seen hash, and report whether
    /// the family-specific auto-yes sentinel is present. `has_prompt` is
    /// only meaningful when `auto_yes` is set.
    pub fn observe(&mut self, capture: &str, auto_yes: bool, sentinel: Option<&str>) -> (bool, bool) {
        let mut hasher = Sha256::new();
        hasher.update(capture.as_bytes());
        let hash: [u8; 32] = hasher.finalize().into();

        let updated = self.last_capture_hash != Some(hash);
        self.last_capture_hash = Some(hash);

        let has_prompt = auto_yes && sentinel.is_some_and(|s| capture.contains(s));
        (updated, has_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_always_an_update() {
        let mut monitor = StatusMonitor::new();
        let (updated, has_prompt) = monitor.observe("hello", false, None);
        assert!(updated);
        assert!(!has_prompt);
    }

    #[test]
    fn unchanged_capture_is_not_an_update() {
        let mut monitor = StatusMonitor::new();
        monitor.observe("hello", false, None);
        let (updated, _) = monitor.observe("hello", false, None);
        assert!(!updated);
    }

    #[test]
    fn prompt_only_reported_with_auto_yes() {
        let mut monitor = StatusMonitor::new();
        let (_, has_prompt) = monitor.observe("please confirm", false, Some("please confirm"));
        assert!(!has_prompt);
        let (_, has_prompt) = monitor.observe("please confirm!", true, Some("please confirm"));
        assert!(has_prompt);
    }
}
