//! Minimal robots.txt handling.

/// User agent the adapter identifies as.
pub const USER_AGENT: &str = "opsbox";

/// Parsed disallow rules applying to our user agent.
///
/// Only `User-agent` and `Disallow` directives are interpreted; rules under
/// `*` and under our own agent both apply. An empty `Disallow:` line allows
/// everything for that group, per the de-facto standard.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    disallows: Vec<String>,
}

impl RobotsPolicy {
    /// A policy that allows every path (used when robots.txt is absent).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses robots.txt text, keeping rules for `*` and for [`USER_AGENT`].
    pub fn parse(text: &str) -> Self {
        let mut disallows = Vec::new();
        let mut group_applies = false;
        let mut in_group_header = false;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    let matches = value == "*" || value.eq_ignore_ascii_case(USER_AGENT);
                    if in_group_header {
                        group_applies |= matches;
                    } else {
                        group_applies = matches;
                    }
                    in_group_header = true;
                }
                "disallow" => {
                    in_group_header = false;
                    if group_applies && !value.is_empty() {
                        disallows.push(value.to_owned());
                    }
                }
                _ => {
                    in_group_header = false;
                }
            }
        }
        Self { disallows }
    }

    /// Whether fetching the given path is allowed.
    pub fn allows(&self, path: &str) -> bool {
        !self.disallows.iter().any(|rule| path.starts_with(rule))
    }
}
