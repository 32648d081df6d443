//! Goal classification
//!
//! Turns free-form goal text into an ordered list of task drafts. The
//! bundled classifier is a keyword rule table; anything smarter plugs in
//! behind the same trait.

/// A task before it is bound to a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
}

pub trait Classifier: Send + Sync {
    /// Ordered drafts for `goal`; may be empty
    fn classify(&self, goal: &str) -> Vec<TaskDraft>;
}

struct Rule {
    stems: &'static [&'static str],
    title: &'static str,
    instruction: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        stems: &["bug", "fix", "broken", "crash", "error"],
        title: "Fix bugs",
        instruction: "Find and fix the bugs described in the goal. Keep changes minimal and add a regression test where practical.",
    },
    Rule {
        stems: &["test", "coverage", "verif"],
        title: "Add tests",
        instruction: "Add or extend automated tests covering the behavior described in the goal.",
    },
    Rule {
        stems: &["doc", "readme", "comment"],
        title: "Update documentation",
        instruction: "Update documentation, READMEs and code comments to reflect the goal.",
    },
    Rule {
        stems: &["refactor", "clean", "restructure", "simplif"],
        title: "Refactor code",
        instruction: "Refactor the relevant code without changing behavior.",
    },
    Rule {
        stems: &["perf", "optimi", "speed", "fast", "slow"],
        title: "Improve performance",
        instruction: "Profile and improve the performance of the code paths named in the goal.",
    },
    Rule {
        stems: &["secur", "vulnerab", "auth", "sanitiz"],
        title: "Harden security",
        instruction: "Address the security concerns described in the goal.",
    },
    Rule {
        stems: &["feature", "implement", "add", "build", "support"],
        title: "Implement feature",
        instruction: "Implement the functionality described in the goal.",
    },
];

/// Keyword rule table matched case-insensitively on word stems
///
/// Drafts come out in table order, one per matching rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    fn matches(words: &[String], rule: &Rule) -> bool {
        words
            .iter()
            .any(|w| rule.stems.iter().any(|stem| w.starts_with(stem)))
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, goal: &str) -> Vec<TaskDraft> {
        let words: Vec<String> = goal
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        RULES
            .iter()
            .filter(|rule| Self::matches(&words, rule))
            .map(|rule| TaskDraft {
                title: rule.title.to_string(),
                description: format!("{}\n\nGoal: {}", rule.instruction, goal.trim()),
            })
            .collect()
    }
}

/// Single draft used when a classifier yields nothing
pub fn catch_all(goal: &str) -> TaskDraft {
    TaskDraft {
        title: "Implement goal".to_string(),
        description: format!("Accomplish the following goal.\n\nGoal: {}", goal.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(goal: &str) -> Vec<String> {
        KeywordClassifier
            .classify(goal)
            .into_iter()
            .map(|d| d.title)
            .collect()
    }

    #[test]
    fn test_bugs_and_tests_in_table_order() {
        assert_eq!(titles("Add tests and fix bugs"), vec![
            "Fix bugs",
            "Add tests",
            "Implement feature"
        ]);
        assert_eq!(titles("fix bugs and add tests")[..2], ["Fix bugs", "Add tests"]);
    }

    #[test]
    fn test_stems_match_word_prefixes_only() {
        assert_eq!(titles("Optimize the slow parser"), vec!["Improve performance"]);
        assert_eq!(titles("Sanitize inputs"), vec!["Harden security"]);
        // "prefix" contains "fix" but does not start with it
        assert!(titles("prefix").is_empty());
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(titles("REFACTOR the README"), vec![
            "Update documentation",
            "Refactor code"
        ]);
    }

    #[test]
    fn test_unmatched_goal_yields_nothing() {
        assert!(titles("make it nicer").is_empty());
        assert_eq!(catch_all(" make it nicer ").title, "Implement goal");
        assert!(catch_all("make it nicer").description.ends_with("Goal: make it nicer"));
    }

    #[test]
    fn test_description_carries_goal() {
        let drafts = KeywordClassifier.classify("Fix the crash on startup");
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].description.ends_with("Goal: Fix the crash on startup"));
    }
}
