//! Robots.txt rules evaluation
//!
//! Path matching is delegated to the robotstxt crate. Crawl-delay is not part
//! of that crate's model and is parsed here.

use chrono::Duration;
use robotstxt::DefaultMatcher;

/// Robots.txt rules for one host
///
/// An empty body allows everything; so does a missing robots.txt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules that allow every URL
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// `url` may be a full URL or a path.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, product_token(user_agent), url)
    }

    /// Crawl-delay that applies to `user_agent`
    ///
    /// A group naming the agent wins over the `*` group. Fractional seconds
    /// are honoured; negative or unparsable values are ignored.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let agent = product_token(user_agent).to_lowercase();

        let mut group_agents: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut specific: Option<f64> = None;
        let mut wildcard: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                // Consecutive user-agent lines share one group
                if !in_agent_lines {
                    group_agents.clear();
                }
                group_agents.push(value.to_lowercase());
                in_agent_lines = true;
                continue;
            }
            in_agent_lines = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(seconds) = value.parse::<f64>() else {
                continue;
            };
            if !seconds.is_finite() || seconds < 0.0 {
                continue;
            }

            if group_agents.iter().any(|ua| !ua.is_empty() && ua != "*" && agent == *ua) {
                specific.get_or_insert(seconds);
            } else if group_agents.iter().any(|ua| ua == "*") {
                wildcard.get_or_insert(seconds);
            }
        }

        specific
            .or(wildcard)
            .map(|secs| Duration::milliseconds((secs * 1000.0).round() as i64))
    }
}

/// The product token of a user agent string (`Name/1.0 (+url)` → `Name`)
fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}
