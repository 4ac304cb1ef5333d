//! Prompt templates for the generative-text service.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::core::Article;
use crate::workflows::SignUpEvent;

/// Placeholder in [`NEWS_SUMMARY_EMAIL_PROMPT`] replaced by the articles.
pub const NEWS_DATA: &str = "newsData";
/// Placeholder in [`PERSONALIZED_WELCOME_EMAIL_PROMPT`] replaced by the profile.
pub const USER_PROFILE: &str = "userProfile";

/// Prompt for the daily market digest.
pub const NEWS_SUMMARY_EMAIL_PROMPT: &str = r#"Generate an HTML market news summary for a daily email newsletter, based on the articles below.

Articles (JSON):
{{newsData}}

Formatting requirements:
- Group the news into sections such as "Market Highlights", "Top Movers" and "Earnings & Company News".
- Open each section with an <h3> heading.
- For each story write a short headline, two or three plain-language bullet points, and a one-line "Bottom line" for an everyday investor.
- Link to the original article with an <a> tag when a URL is available.
- Use simple inline-styled HTML only: no scripts, no external CSS, no images.
- Do not invent facts that are not present in the articles.
- If the article list is empty, write a brief note that no significant market news was found today.

Return only the HTML content, without any surrounding markdown or code fences."#;

/// Prompt for the onboarding email introduction.
pub const PERSONALIZED_WELCOME_EMAIL_PROMPT: &str = r#"Write a personalized introduction paragraph for a welcome email to a new user of Signalist, a stock market tracking app.

User profile:
{{userProfile}}

Requirements:
- One or two sentences, at most 40 words.
- Reference the user's investment goals, risk tolerance or preferred industry where it reads naturally.
- Warm, confident and encouraging; no financial advice and no promises about returns.
- Wrap key phrases in <strong> tags where helpful.
- Return a single <p class="mobile-text"> element with inline styles and nothing else."#;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("constant regex pattern is valid")
});

/// Replaces `{{name}}` placeholders with values from `vars`.
///
/// Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Builds the digest prompt for one subscriber's articles.
///
/// An empty article list still produces a prompt.
pub fn news_summary_prompt(articles: &[Article]) -> String {
    let news_data = serde_json::to_string_pretty(articles).unwrap_or_else(|_| "[]".to_string());
    render(
        NEWS_SUMMARY_EMAIL_PROMPT,
        &HashMap::from([(NEWS_DATA, news_data)]),
    )
}

/// Formats the profile block embedded in the welcome prompt.
pub fn user_profile(event: &SignUpEvent) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "Not specified".into());
    format!(
        "- Country: {}\n- Investment goals: {}\n- Risk tolerance: {}\n- Preferred industry: {}",
        field(&event.country),
        field(&event.investment_goals),
        field(&event.risk_tolerance),
        field(&event.preferred_industry),
    )
}

/// Builds the welcome prompt for a sign-up event.
pub fn welcome_prompt(event: &SignUpEvent) -> String {
    render(
        PERSONALIZED_WELCOME_EMAIL_PROMPT,
        &HashMap::from([(USER_PROFILE, user_profile(event))]),
    )
}
