//! Title → branch-name / session-name sanitization (spec §4.A, §8 property 7).

/// Lowercase, replace whitespace runs with `-`, strip everything outside
/// `[a-z0-9_./-]`, collapse consecutive dashes, trim edge dashes/slashes.
pub fn sanitize_branch_slug(title: &str) -> String {
    let lower = title.to_lowercase();

    // Replace whitespace runs with a single dash first, so "new feature
    // branch" becomes "new-feature-branch" rather than losing the
    // word boundaries when stray characters are stripped next.
    let mut whitespace_collapsed = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for ch in lower.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                whitespace_collapsed.push('-');
            }
            last_was_space = true;
        } else {
            whitespace_collapsed.push(ch);
            last_was_space = false;
        }
    }

    let stripped: String = whitespace_collapsed
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '/' | '-'))
        .collect();

    let mut collapsed = String::with_capacity(stripped.len());
    let mut last_was_dash = false;
    for ch in stripped.chars() {
        if ch == '-' {
            if !last_was_dash {
                collapsed.push('-');
            }
            last_was_dash = true;
        } else {
            collapsed.push(ch);
            last_was_dash = false;
        }
    }

    collapsed.trim_matches(|c| c == '-' || c == '/').to_string()
}

/// `session/<slug>` branch name for an Instance (spec §3 Worktree).
pub fn branch_name(title: &str) -> String {
    format!("session/{}", sanitize_branch_slug(title))
}

/// Terminal-multiplexer session name: a sanitized slug prefixed with a fixed
/// namespace tag, `.` replaced by `_`, whitespace stripped (spec §3, §6).
pub fn tmux_session_name(title: &str) -> String {
    let slug = sanitize_branch_slug(title);
    let no_dots = slug.replace('.', "_");
    let no_whitespace: String = no_dots.chars().filter(|c| !c.is_whitespace()).collect();
    format!("claudesquad_{no_whitespace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_points() {
        let cases: &[(&str, &str)] = &[
            ("feature", "feature"),
            ("new feature branch", "new-feature-branch"),
            ("FeAtUrE BrAnCh", "feature-branch"),
            ("feature!@#$%^&*()", "feature"),
            ("feature/sub_branch.v1", "feature/sub_branch.v1"),
            ("feature---branch", "feature-branch"),
            ("-feature-branch-", "feature-branch"),
            ("/feature/branch/", "feature/branch"),
            ("", ""),
            (
                "USER/Feature Branch!@#$%^&*()/v1.0",
                "user/feature-branch/v1.0",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(
                sanitize_branch_slug(input),
                *expected,
                "sanitizing {input:?}"
            );
        }
    }

    #[test]
    fn branch_name_prefixes_session() {
        assert_eq!(branch_name("demo"), "session/demo");
    }

    #[test]
    fn tmux_name_is_namespaced_and_dotless() {
        assert_eq!(tmux_session_name("demo"), "claudesquad_demo");
        assert_eq!(tmux_session_name("v1.0 demo"), "claudesquad_v1_0-demo");
    }
}
