use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The action a rule prescribes for a matching invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Ask,
    Deny,
}

/// A single permission rule: a tool matcher plus an optional
/// input-dependent pattern.
///
/// Rules are written as `"Tool(pattern)"` or a bare `"Tool"`, e.g.
/// `Bash(npm:*)`, `Read(.env*)`, `Edit`, `WebFetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub tool: String,
    pub pattern: String,
    pub action: Action,
}

impl Rule {
    /// Parse a rule string. A missing pattern matches every invocation of
    /// the tool.
    pub fn parse(rule: &str, action: Action) -> Self {
        if let Some(open) = rule.find('(') {
            let tool = rule[..open].to_string();
            let pattern = match rule.rfind(')') {
                Some(close) if close > open => rule[open + 1..close].to_string(),
                _ => String::new(),
            };
            Rule {
                tool,
                pattern,
                action,
            }
        } else {
            Rule {
                tool: rule.to_string(),
                pattern: String::new(),
                action,
            }
        }
    }

    /// Check whether this rule matches a tool invocation. Pattern
    /// semantics are tool-category-specific: command prefixes for shell
    /// execution, globs or substrings for file paths, anchored wildcards
    /// for URLs.
    pub fn matches(&self, tool: &str, input: &Map<String, Value>) -> bool {
        if self.tool != tool && self.tool != "*" {
            return false;
        }

        if self.pattern.is_empty() {
            return true;
        }

        match tool {
            "Bash" => self.matches_command(input),
            "Read" | "Write" | "Edit" => self.matches_file_path(input),
            "WebFetch" | "WebSearch" => self.matches_url(input),
            _ => true,
        }
    }

    fn matches_command(&self, input: &Map<String, Value>) -> bool {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return false;
        };

        // "npm:*" and "npm*" both mean "starts with npm"
        if let Some(prefix) = self.pattern.strip_suffix(":*") {
            return command.starts_with(prefix);
        }
        if let Some(prefix) = self.pattern.strip_suffix('*') {
            return command.starts_with(prefix);
        }

        command == self.pattern || command.starts_with(&format!("{} ", self.pattern))
    }

    fn matches_file_path(&self, input: &Map<String, Value>) -> bool {
        let Some(file_path) = input.get("file_path").and_then(Value::as_str) else {
            return false;
        };

        if self.pattern.contains('*') || self.pattern.contains('?') {
            let Ok(pattern) = glob::Pattern::new(&self.pattern) else {
                return false;
            };
            let base_name = Path::new(file_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return pattern.matches(&base_name) || pattern.matches(file_path);
        }

        file_path.contains(&self.pattern)
    }

    fn matches_url(&self, input: &Map<String, Value>) -> bool {
        let Some(url) = input.get("url").and_then(Value::as_str) else {
            return false;
        };

        if self.pattern.contains('*') {
            let escaped = self
                .pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let Ok(re) = regex::Regex::new(&format!("^{escaped}$")) else {
                return false;
            };
            return re.is_match(url);
        }

        url.contains(&self.pattern)
    }
}

/// Three ordered rule lists. Evaluation order is an invariant: deny rules
/// are always consulted first, so a deny-matched invocation can never be
/// let through by a later allow.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    deny: Vec<Rule>,
    ask: Vec<Rule>,
    allow: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: Rule) {
        match rule.action {
            Action::Deny => self.deny.push(rule),
            Action::Ask => self.ask.push(rule),
            Action::Allow => self.allow.push(rule),
        }
    }

    /// Parse rule strings from configuration into the three lists.
    pub fn parse_rules(&mut self, allow: &[String], ask: &[String], deny: &[String]) {
        for r in allow {
            self.add(Rule::parse(r, Action::Allow));
        }
        for r in ask {
            self.add(Rule::parse(r, Action::Ask));
        }
        for r in deny {
            self.add(Rule::parse(r, Action::Deny));
        }
    }

    /// Resolve a tool invocation. Priority: deny > ask > allow, with
    /// `Ask` as the default when nothing matches.
    pub fn check(&self, tool: &str, input: &Map<String, Value>) -> Action {
        for rule in &self.deny {
            if rule.matches(tool, input) {
                return Action::Deny;
            }
        }
        for rule in &self.ask {
            if rule.matches(tool, input) {
                return Action::Ask;
            }
        }
        for rule in &self.allow {
            if rule.matches(tool, input) {
                return Action::Allow;
            }
        }
        Action::Ask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(pairs: Value) -> Map<String, Value> {
        pairs.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_with_and_without_pattern() {
        let rule = Rule::parse("Bash(npm:*)", Action::Allow);
        assert_eq!(rule.tool, "Bash");
        assert_eq!(rule.pattern, "npm:*");

        let bare = Rule::parse("Edit", Action::Deny);
        assert_eq!(bare.tool, "Edit");
        assert!(bare.pattern.is_empty());
    }

    #[test]
    fn test_command_prefix_patterns() {
        let rule = Rule::parse("Bash(git *)", Action::Allow);
        assert!(rule.matches("Bash", &input(json!({"command": "git status"}))));
        assert!(!rule.matches("Bash", &input(json!({"command": "rm -rf /"}))));

        let colon = Rule::parse("Bash(npm:*)", Action::Allow);
        assert!(colon.matches("Bash", &input(json!({"command": "npm install"}))));
    }

    #[test]
    fn test_command_exact_and_word_prefix() {
        let rule = Rule::parse("Bash(ls)", Action::Allow);
        assert!(rule.matches("Bash", &input(json!({"command": "ls"}))));
        assert!(rule.matches("Bash", &input(json!({"command": "ls -la"}))));
        assert!(!rule.matches("Bash", &input(json!({"command": "lsof"}))));
    }

    #[test]
    fn test_file_glob_matches_base_name_and_full_path() {
        let rule = Rule::parse("Read(.env*)", Action::Deny);
        assert!(rule.matches("Read", &input(json!({"file_path": "/srv/app/.env.local"}))));
        assert!(!rule.matches("Read", &input(json!({"file_path": "/srv/app/config.toml"}))));

        let path_glob = Rule::parse("Edit(/etc/*)", Action::Deny);
        assert!(path_glob.matches("Edit", &input(json!({"file_path": "/etc/hosts"}))));
    }

    #[test]
    fn test_file_substring_containment() {
        let rule = Rule::parse("Write(secrets)", Action::Deny);
        assert!(rule.matches("Write", &input(json!({"file_path": "/app/secrets/key.pem"}))));
        assert!(!rule.matches("Write", &input(json!({"file_path": "/app/src/main.rs"}))));
    }

    #[test]
    fn test_url_wildcard_is_anchored() {
        let rule = Rule::parse("WebFetch(https://docs.rs/*)", Action::Allow);
        assert!(rule.matches("WebFetch", &input(json!({"url": "https://docs.rs/tokio"}))));
        assert!(!rule.matches(
            "WebFetch",
            &input(json!({"url": "https://evil.example/https://docs.rs/x"}))
        ));
    }

    #[test]
    fn test_wildcard_tool_matcher() {
        let rule = Rule::parse("*", Action::Deny);
        assert!(rule.matches("Bash", &input(json!({"command": "anything"}))));
        assert!(rule.matches("Edit", &input(json!({"file_path": "x"}))));
    }

    #[test]
    fn test_deny_wins_regardless_of_configuration_order() {
        let mut rules = RuleSet::new();
        rules.add(Rule::parse("Bash(git *)", Action::Allow));
        rules.add(Rule::parse("Bash", Action::Deny));

        let action = rules.check("Bash", &input(json!({"command": "git status"})));
        assert_eq!(action, Action::Deny);

        // same rules added the other way round
        let mut flipped = RuleSet::new();
        flipped.add(Rule::parse("Bash", Action::Deny));
        flipped.add(Rule::parse("Bash(git *)", Action::Allow));
        assert_eq!(
            flipped.check("Bash", &input(json!({"command": "git status"}))),
            Action::Deny
        );
    }

    #[test]
    fn test_default_is_ask() {
        let rules = RuleSet::new();
        assert_eq!(
            rules.check("Bash", &input(json!({"command": "make"}))),
            Action::Ask
        );
    }

    #[test]
    fn test_ask_outranks_allow() {
        let mut rules = RuleSet::new();
        rules.add(Rule::parse("Bash(git *)", Action::Allow));
        rules.add(Rule::parse("Bash(git push*)", Action::Ask));

        assert_eq!(
            rules.check("Bash", &input(json!({"command": "git push origin"}))),
            Action::Ask
        );
        assert_eq!(
            rules.check("Bash", &input(json!({"command": "git status"}))),
            Action::Allow
        );
    }
}
