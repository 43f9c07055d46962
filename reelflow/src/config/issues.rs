//! Configuration checks behind `validate --config`.

use super::ReelflowConfig;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// One problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    /// Where the problem is, e.g. `stages[2]` or `dependencies.tts`.
    pub location: String,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

pub(super) fn collect(config: &ReelflowConfig, env_present: &dyn Fn(&str) -> bool) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    if config.enabled_stages().next().is_none() {
        issues.push(ConfigIssue::new("stages", "no enabled stages"));
    }

    let mut names = HashSet::new();
    let mut used_dependencies = BTreeSet::new();
    for (index, stage) in config.stages.iter().enumerate() {
        let location = format!("stages[{index}]");
        if stage.name.trim().is_empty() {
            issues.push(ConfigIssue::new(&location, "name is empty"));
        } else if !names.insert(stage.name.as_str()) {
            issues.push(ConfigIssue::new(&location, format!("duplicate stage name '{}'", stage.name)));
        }
        if !stage.command.first().is_some_and(|program| !program.trim().is_empty()) {
            issues.push(ConfigIssue::new(&location, "command is empty"));
        }
        if stage.timeout_secs == Some(0) {
            issues.push(ConfigIssue::new(&location, "timeout_secs must be positive"));
        }
        if let Some(dependency) = &stage.dependency {
            if !config.dependencies.contains_key(dependency) {
                issues.push(ConfigIssue::new(
                    &location,
                    format!("unknown dependency '{dependency}'"),
                ));
            } else if stage.enabled {
                used_dependencies.insert(dependency.as_str());
            }
        }
    }

    check_policy(&mut issues, "default_retry", &config.default_retry.problems());
    if config.default_breaker.failure_threshold == 0 {
        issues.push(ConfigIssue::new("default_breaker", "failure_threshold must be at least 1"));
    }

    for (name, dependency) in &config.dependencies {
        let location = format!("dependencies.{name}");
        if let Some(retry) = &dependency.retry {
            check_policy(&mut issues, &format!("{location}.retry"), &retry.problems());
        }
        if dependency.breaker.as_ref().is_some_and(|b| b.failure_threshold == 0) {
            issues.push(ConfigIssue::new(
                format!("{location}.breaker"),
                "failure_threshold must be at least 1",
            ));
        }
        if used_dependencies.contains(name.as_str()) {
            for key in &dependency.required_env {
                if !env_present(key) {
                    issues.push(ConfigIssue::new(
                        &location,
                        format!("credential variable {key} is not set"),
                    ));
                }
            }
        }
    }

    issues
}

fn check_policy(issues: &mut Vec<ConfigIssue>, location: &str, problems: &[String]) {
    issues.extend(problems.iter().map(|p| ConfigIssue::new(location, p.clone())));
}
