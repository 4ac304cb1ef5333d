//! Workflow orchestrators.

mod daily_digest;
#[cfg(test)]
mod daily_digest_tests;
mod welcome;

pub use daily_digest::{DailyDigestWorkflow, DailyDigestWorkflowBuilder, DAILY_DIGEST_WORKFLOW};
pub use welcome::{SignUpEvent, WelcomeWorkflow, WELCOME_SENT_MESSAGE, WELCOME_WORKFLOW};
