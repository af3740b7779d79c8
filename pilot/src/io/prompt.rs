//! Prompt rendering for agent invocations.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::checks::CheckFailure;
use crate::core::types::{Feedback, Issue};

const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const CI_FIX_TEMPLATE: &str = include_str!("prompts/ci_fix.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("implement", IMPLEMENT_TEMPLATE)
            .expect("implement template should be valid");
        env.add_template("ci_fix", CI_FIX_TEMPLATE)
            .expect("ci_fix template should be valid");
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        Self { env }
    }

    /// Prompt for the initial implementation of an issue.
    pub fn implement(&self, issue: &Issue, branch: &str) -> Result<String> {
        let template = self.env.get_template("implement")?;
        let rendered = template.render(context! {
            issue => issue,
            branch => branch,
        })?;
        Ok(rendered)
    }

    /// Remediation prompt carrying the failing checks and detail links.
    pub fn ci_fix(&self, issue_number: u64, branch: &str, failures: &[CheckFailure]) -> Result<String> {
        let template = self.env.get_template("ci_fix")?;
        let rendered = template.render(context! {
            issue_number => issue_number,
            branch => branch,
            failures => failures,
        })?;
        Ok(rendered)
    }

    /// Triage prompt carrying the raw review feedback.
    pub fn review(&self, issue_number: u64, branch: &str, feedback: &[Feedback]) -> Result<String> {
        let template = self.env.get_template("review")?;
        let rendered = template.render(context! {
            issue_number => issue_number,
            branch => branch,
            feedback => feedback,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn issue() -> Issue {
        Issue {
            number: 12,
            title: "Fix crash on empty input".to_string(),
            body: "Steps to reproduce: run with no arguments.".to_string(),
            labels: vec!["bug".to_string()],
            url: "https://tracker.example/issues/12".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn implement_prompt_embeds_issue_and_branch() {
        let engine = PromptEngine::new();
        let prompt = engine.implement(&issue(), "issue-12").expect("render");
        assert!(prompt.contains("Issue #12: Fix crash on empty input"));
        assert!(prompt.contains("Steps to reproduce"));
        assert!(prompt.contains("`issue-12`"));
        assert!(prompt.contains("references issue #12"));
    }

    #[test]
    fn ci_fix_prompt_lists_failures_with_links() {
        let engine = PromptEngine::new();
        let failures = vec![
            CheckFailure {
                name: "build".to_string(),
                url: Some("https://ci.example/build/9".to_string()),
            },
            CheckFailure {
                name: "lint".to_string(),
                url: None,
            },
        ];
        let prompt = engine.ci_fix(12, "issue-12", &failures).expect("render");
        assert!(prompt.contains("- build (details: https://ci.example/build/9)"));
        assert!(prompt.contains("- lint\n"));
    }

    #[test]
    fn review_prompt_carries_raw_feedback() {
        let engine = PromptEngine::new();
        let feedback = vec![Feedback {
            author: "alice".to_string(),
            body: "Please rename `foo` to `bar`.".to_string(),
        }];
        let prompt = engine.review(12, "issue-12", &feedback).expect("render");
        assert!(prompt.contains("## alice"));
        assert!(prompt.contains("rename `foo` to `bar`"));
    }
}
