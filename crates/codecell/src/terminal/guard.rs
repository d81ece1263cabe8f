//! Command validation for terminal sessions
//!
//! Three checks in order: blocked-command set, dangerous shell patterns,
//! allow-list membership. A line failing any of them is reported back to
//! the caller and never forwarded to the shell.

use regex::Regex;

use crate::terminal::{TerminalError, TerminalPolicy};

/// Shell constructs rejected anywhere in a command line, regardless of the
/// base command. Chaining and substitution would let an allowed command
/// smuggle in a blocked one.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"&&",
    r"\|\|",
    r";",
    r"&\s*$",
    r"`",
    r"\$\(",
    r">\s*/dev/",
    r"\bsudo\b",
    r"\brm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\b",
    r"\b(mount|umount|mkfs|fdisk)\b",
];

/// Outcome of checking one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Forward the line to the shell
    Allowed,

    /// Do not forward; the reason is reported to the caller verbatim
    Blocked { reason: String },
}

impl CommandVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CommandVerdict::Allowed)
    }
}

/// Validates command lines against a terminal policy
#[derive(Debug)]
pub struct CommandGuard {
    allowed: Vec<String>,
    blocked: Vec<String>,
    dangerous: Vec<Regex>,
}

impl CommandGuard {
    /// Build a guard from the given policy
    pub fn new(policy: &TerminalPolicy) -> Result<Self, TerminalError> {
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed: policy.allowed_commands.clone(),
            blocked: policy.blocked_commands.clone(),
            dangerous,
        })
    }

    /// Check a command line.
    ///
    /// Empty lines are allowed through (the shell just prints a prompt).
    pub fn check(&self, line: &str) -> CommandVerdict {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return CommandVerdict::Allowed;
        }

        let base = base_command(trimmed);

        if self.blocked.iter().any(|b| b == base) {
            return CommandVerdict::Blocked {
                reason: format!("Command blocked: '{base}' is not permitted"),
            };
        }

        for pattern in &self.dangerous {
            if pattern.is_match(trimmed) {
                return CommandVerdict::Blocked {
                    reason: format!(
                        "Command blocked: disallowed shell construct ({})",
                        pattern.as_str()
                    ),
                };
            }
        }

        if !self.allowed.iter().any(|a| a == base) {
            return CommandVerdict::Blocked {
                reason: format!("Command blocked: '{base}' is not in the allowed command list"),
            };
        }

        CommandVerdict::Allowed
    }
}

/// Extract the base command from a command line.
///
/// `/usr/bin/ls -la` and `ls -la` both resolve to `ls`; path prefixes must
/// not bypass the lists.
fn base_command(line: &str) -> &str {
    let token = line.split_whitespace().next().unwrap_or("");
    token.rsplit('/').next().unwrap_or(token)
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn check_never_panics(line in ".*") {
            let policy = TerminalPolicy::default();
            let guard = CommandGuard::new(&policy).unwrap();
            let _ = guard.check(&line);
        }

        #[test]
        fn sudo_always_blocked(args in "[a-z ]*") {
            let policy = TerminalPolicy {
                allowed_commands: vec!["ls".into()],
                blocked_commands: vec!["sudo".into()],
                ..TerminalPolicy::default()
            };
            let guard = CommandGuard::new(&policy).unwrap();
            let line = format!("sudo {args}");
            prop_assert!(!guard.check(&line).is_allowed());
        }
    }
}
