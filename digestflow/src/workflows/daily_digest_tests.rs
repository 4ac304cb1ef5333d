//! End-to-end tests for the daily digest workflow.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use super::DailyDigestWorkflow;
use crate::cancellation::CancellationToken;
use crate::config::WorkflowConfig;
use crate::core::{RunIdentity, Subscriber};
use crate::errors::{DigestflowError, ProviderError};
use crate::events::{self, CollectingEventSink};
use crate::providers::{MockMailer, ProviderResponse, TextGenerator};
use crate::steps::{
    FileStepJournal, InMemoryStepJournal, JitterStrategy, RetryConfig, StepJournal,
};
use crate::testing::{
    article, RecordingMailer, ScriptedNewsSource, ScriptedReply, ScriptedTextGenerator,
    StaticSubscriberSource,
};

const EMPTY_ARTICLES: &str = "Articles (JSON):\n[]";

fn config() -> WorkflowConfig {
    WorkflowConfig::new()
        .with_api_key("test-key")
        .with_max_concurrency(4)
        .with_retry(
            RetryConfig::new()
                .with_max_attempts(2)
                .with_base_delay_ms(1)
                .with_jitter(JitterStrategy::None),
        )
}

fn subscriber(email: &str, name: &str) -> Subscriber {
    Subscriber::new(email).with_name(name)
}

/// Three subscribers, each tracking one symbol with two headlines.
fn three_subscribers() -> (StaticSubscriberSource, ScriptedNewsSource) {
    let source = StaticSubscriberSource::new(vec![
        subscriber("ann@example.com", "Ann"),
        subscriber("bo@example.com", "Bo"),
        subscriber("cy@example.com", "Cy"),
    ])
    .with_watchlist("ann@example.com", &["AAPL"])
    .with_watchlist("bo@example.com", &["MSFT"])
    .with_watchlist("cy@example.com", &["NVDA"]);

    let news = ScriptedNewsSource::new()
        .with_symbol_news("AAPL", vec![article("AAPL beats"), article("AAPL guidance")])
        .with_symbol_news("MSFT", vec![article("MSFT cloud"), article("MSFT buyback")])
        .with_symbol_news("NVDA", vec![article("NVDA chips"), article("NVDA supply")]);

    (source, news)
}

struct Harness {
    source: StaticSubscriberSource,
    news: ScriptedNewsSource,
    generator: ScriptedTextGenerator,
    mailer: RecordingMailer,
    events: Arc<CollectingEventSink>,
    journal: Arc<InMemoryStepJournal>,
}

impl Harness {
    fn new(source: StaticSubscriberSource, news: ScriptedNewsSource) -> Self {
        Self {
            source,
            news,
            generator: ScriptedTextGenerator::new(),
            mailer: RecordingMailer::new(),
            events: Arc::new(CollectingEventSink::new()),
            journal: Arc::new(InMemoryStepJournal::new()),
        }
    }

    fn generator(mut self, generator: ScriptedTextGenerator) -> Self {
        self.generator = generator;
        self
    }

    fn workflow(&self, config: WorkflowConfig) -> DailyDigestWorkflow {
        DailyDigestWorkflow::builder()
            .config(config)
            .subscribers(Arc::new(self.source.clone()))
            .news(Arc::new(self.news.clone()))
            .generator(Arc::new(self.generator.clone()))
            .mailer(Arc::new(self.mailer.clone()))
            .journal(self.journal.clone())
            .events(self.events.clone())
            .build()
            .unwrap()
    }
}

#[tokio::test]
async fn test_all_subscribers_emailed() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);

    let report = tokio_test::assert_ok!(harness.workflow(config()).run().await);

    assert!(report.success);
    assert_eq!(report.subscribers, 3);
    assert_eq!(report.news_fetched, 3);
    assert_eq!(report.summarized, 3);
    assert_eq!(report.emails_attempted, 3);
    assert_eq!(report.emails_sent, 3);
    assert!(!report.has_failures());
    assert!(report.message.contains("3 of 3 subscribers emailed"));
    assert_eq!(
        harness.mailer.news_recipients(),
        vec!["ann@example.com", "bo@example.com", "cy@example.com"]
    );
    assert!(harness
        .mailer
        .news_emails()
        .iter()
        .all(|email| !email.date.is_empty() && email.news_content.contains("Markets")));
}

#[tokio::test]
async fn test_subscriber_without_news_is_prompted_then_skipped() {
    let (source, news) = three_subscribers();
    let source = source.with_watchlist("cy@example.com", &[]);
    let harness = Harness::new(source, news).generator(
        ScriptedTextGenerator::new()
            .with_rule(EMPTY_ARTICLES, ScriptedReply::Respond(ProviderResponse::Empty)),
    );

    let report = harness.workflow(config()).run().await.unwrap();

    // Every subscriber still gets a prompt, including the one with no news.
    assert_eq!(harness.generator.calls(), 3);
    assert!(harness
        .generator
        .prompts()
        .iter()
        .any(|prompt| prompt.contains(EMPTY_ARTICLES)));

    assert!(report.success);
    assert_eq!(report.emails_attempted, 2);
    assert_eq!(report.emails_sent, 2);
    assert_eq!(report.skipped, 1);
    let failures = report.failures_in("summarize-news");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subscriber, "cy@example.com");
    assert_eq!(
        harness.mailer.news_recipients(),
        vec!["ann@example.com", "bo@example.com"]
    );
}

#[tokio::test]
async fn test_http_error_skips_only_that_subscriber() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news).generator(ScriptedTextGenerator::new().with_rule(
        "NVDA",
        ScriptedReply::Respond(ProviderResponse::HttpError {
            status: 500,
            body: "internal".into(),
        }),
    ));

    let report = harness.workflow(config()).run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.summarized, 2);
    assert_eq!(report.emails_attempted, 2);
    assert_eq!(report.skipped, 1);
    let failures = report.failures_in("summarize-news");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subscriber, "cy@example.com");
    assert!(failures[0].reason.contains("HTTP 500"));
    assert_eq!(
        harness.mailer.news_recipients(),
        vec!["ann@example.com", "bo@example.com"]
    );
}

#[tokio::test]
async fn test_no_subscribers_exits_early() {
    let harness = Harness::new(
        StaticSubscriberSource::new(Vec::new()),
        ScriptedNewsSource::new().with_general_news(vec![article("General 0")]),
    );

    let report = harness
        .workflow(config().with_retain_journal(true))
        .run()
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.message, "No users found for news email");
    assert_eq!(harness.source.enumeration_calls(), 1);
    assert_eq!(harness.source.watchlist_calls(), 0);
    assert!(harness.news.calls().is_empty());
    assert_eq!(harness.generator.calls(), 0);
    assert_eq!(harness.mailer.attempts(), 0);
    assert_eq!(harness.journal.step_names(), vec!["get-all-users"]);
}

#[tokio::test]
async fn test_one_failing_summary_out_of_ten() {
    let subscribers: Vec<_> = (0..10)
        .map(|i| Subscriber::new(format!("user{i}@example.com")))
        .collect();
    let mut source = StaticSubscriberSource::new(subscribers);
    let mut news = ScriptedNewsSource::new();
    for i in 0..10 {
        let symbol = format!("SYM{i}");
        source = source.with_watchlist(&format!("user{i}@example.com"), &[symbol.as_str()]);
        news = news.with_symbol_news(&symbol, vec![article(&format!("{symbol} headline"))]);
    }
    let harness = Harness::new(source, news).generator(
        ScriptedTextGenerator::new()
            .with_rule("SYM7 headline", ScriptedReply::Fail("connection reset".into())),
    );

    let report = harness.workflow(config()).run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.summarized, 9);
    assert_eq!(report.emails_sent, 9);
    let failures = report.failures_in("summarize-news");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subscriber, "user7@example.com");
    assert!(failures[0].reason.contains("connection reset"));
    // Initial attempt plus one retry for the failing subscriber.
    assert_eq!(harness.generator.calls(), 11);
    assert_eq!(harness.events.events_of_type(events::ITEM_FAILED).len(), 1);
}

#[tokio::test]
async fn test_empty_personalized_news_uses_truncated_generic() {
    let source = StaticSubscriberSource::new(vec![subscriber("ann@example.com", "Ann")])
        .with_watchlist("ann@example.com", &["ZZZZ"]);
    let news = ScriptedNewsSource::new()
        .with_general_news((0..9).map(|i| article(&format!("General {i}"))).collect());
    let harness = Harness::new(source, news);

    let report = harness.workflow(config()).run().await.unwrap();

    assert!(report.success);
    let prompt = &harness.generator.prompts()[0];
    assert!(prompt.contains("General 5"));
    assert!(!prompt.contains("General 6"));
}

#[tokio::test]
async fn test_watchlist_failure_is_isolated() {
    let (source, news) = three_subscribers();
    let source = source.failing_watchlist("bo@example.com");
    let harness = Harness::new(source, news);

    let report = harness.workflow(config()).run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.news_fetched, 2);
    let failures = report.failures_in("fetch-user-news");
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.contains("watchlist lookup failed"));
    // The failed fetch still reaches the summarize stage with no articles.
    assert_eq!(harness.generator.calls(), 3);
    assert_eq!(report.emails_sent, 3);
}

#[tokio::test]
async fn test_missing_credential_is_fatal() {
    let (source, news) = three_subscribers();
    let harness =
        Harness::new(source, news).generator(ScriptedTextGenerator::new().without_credentials());

    let err = harness.workflow(config()).run().await.unwrap_err();

    assert!(matches!(err, DigestflowError::MissingCredential(ref key) if key == "GEMINI_API_KEY"));
    assert_eq!(harness.generator.calls(), 0);
    assert_eq!(harness.mailer.attempts(), 0);
}

#[tokio::test]
async fn test_config_without_api_key_is_fatal() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);
    let mut config = config();
    config.api_key = None;

    let err = harness.workflow(config).run().await.unwrap_err();

    assert!(matches!(err, DigestflowError::MissingCredential(ref key) if key == "GEMINI_API_KEY"));
    assert_eq!(harness.generator.calls(), 0);
    assert_eq!(harness.mailer.attempts(), 0);
    // The recorded fetches are kept for a rerun once the key is configured.
    assert_eq!(harness.journal.step_names().len(), 4);
}

#[tokio::test]
async fn test_enumeration_failure_is_fatal() {
    let harness = Harness::new(
        StaticSubscriberSource::new(Vec::new()).failing_enumeration(),
        ScriptedNewsSource::new(),
    );

    let err = harness.workflow(config()).run().await.unwrap_err();

    match err {
        DigestflowError::StepFailure { name, cause } => {
            assert_eq!(name, "get-all-users");
            assert!(cause.contains("user store unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.source.enumeration_calls(), 2);
    // The recorded failure would replay on resume, so the journal is dropped.
    assert!(harness.journal.is_empty().await);
}

#[tokio::test]
async fn test_send_failure_is_reported_not_fatal() {
    let (source, news) = three_subscribers();
    let mut mailer = MockMailer::new();
    mailer
        .expect_send_news_summary_email()
        .times(3)
        .returning(|email| {
            if email.email == "bo@example.com" {
                Err(anyhow::anyhow!("mailbox full"))
            } else {
                Ok(())
            }
        });

    let workflow = DailyDigestWorkflow::builder()
        .config(config())
        .subscribers(Arc::new(source))
        .news(Arc::new(news))
        .generator(Arc::new(ScriptedTextGenerator::new()))
        .mailer(Arc::new(mailer))
        .build()
        .unwrap();

    let report = workflow.run().await.unwrap();

    assert!(report.success);
    assert_eq!(report.emails_attempted, 3);
    assert_eq!(report.emails_sent, 2);
    let failures = report.failures_in("send-news-emails");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subscriber, "bo@example.com");
    assert!(report.message.contains("1 send failures"));
}

#[tokio::test]
async fn test_resumed_run_replays_every_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("digest.jsonl");
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);
    let config = config().with_retain_journal(true);

    let build = |journal: Arc<dyn StepJournal>| {
        DailyDigestWorkflow::builder()
            .config(config.clone())
            .subscribers(Arc::new(harness.source.clone()))
            .news(Arc::new(harness.news.clone()))
            .generator(Arc::new(harness.generator.clone()))
            .mailer(Arc::new(harness.mailer.clone()))
            .journal(journal)
            .events(harness.events.clone())
            .build()
            .unwrap()
    };

    let first = build(Arc::new(FileStepJournal::open(&path).unwrap()))
        .run()
        .await
        .unwrap();
    // Simulates a process restart: a new journal handle over the same file.
    let second = build(Arc::new(FileStepJournal::open(&path).unwrap()))
        .run()
        .await
        .unwrap();

    assert_eq!(first.emails_sent, 3);
    assert_eq!(second.emails_sent, 3);
    assert_eq!(second.summarized, first.summarized);
    assert_eq!(harness.source.enumeration_calls(), 1);
    assert_eq!(harness.generator.calls(), 3);
    assert_eq!(harness.mailer.attempts(), 3);
    // get-all-users, three fetches, three summaries and the send step.
    assert_eq!(harness.events.events_of_type(events::STEP_REPLAYED).len(), 8);
}

#[tokio::test]
async fn test_journal_discarded_after_completion() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);

    tokio_test::assert_ok!(harness.workflow(config()).run().await);

    assert!(harness.journal.is_empty().await);
    assert_eq!(harness.events.events_of_type(events::RUN_COMPLETED).len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);
    let token = Arc::new(CancellationToken::new());
    token.cancel("shutdown requested");

    let report = harness
        .workflow(config())
        .run_with_cancellation(RunIdentity::new(), token)
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report.message.contains("shutdown requested"));
    assert_eq!(harness.source.enumeration_calls(), 0);
}

/// A generator that never answers in time.
struct StalledGenerator;

#[async_trait]
impl TextGenerator for StalledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ProviderResponse::Empty)
    }
}

#[tokio::test]
async fn test_run_timeout_cancels_outstanding_items() {
    let (source, news) = three_subscribers();
    let harness = Harness::new(source, news);
    let workflow = DailyDigestWorkflow::builder()
        .config(config().with_run_timeout(0.1))
        .subscribers(Arc::new(harness.source.clone()))
        .news(Arc::new(harness.news.clone()))
        .generator(Arc::new(StalledGenerator))
        .mailer(Arc::new(harness.mailer.clone()))
        .journal(harness.journal.clone())
        .build()
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), workflow.run())
        .await
        .expect("run should stop at the run timeout")
        .unwrap();

    assert!(!report.success);
    assert!(report.message.contains("timed out"));
    let cancelled = report.failures_in("summarize-news");
    assert_eq!(cancelled.len(), 3);
    assert!(cancelled.iter().all(|f| f.reason == "cancelled"));
    assert_eq!(harness.mailer.attempts(), 0);

    // Fetch results stay recorded for a resumed run; no summary was recorded.
    let steps = harness.journal.step_names();
    assert_eq!(steps.len(), 4);
    assert!(steps.iter().all(|s| !s.starts_with("summarize-news")));
}

#[test]
fn test_builder_requires_collaborators() {
    let err = DailyDigestWorkflow::builder()
        .config(config())
        .build()
        .unwrap_err();
    assert!(matches!(err, DigestflowError::Config(_)));

    let err = DailyDigestWorkflow::builder()
        .config(config().with_max_articles(0))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("max_articles"));
}

#[cfg(feature = "gemini")]
#[tokio::test]
async fn test_unreachable_provider_does_not_leak_api_key() {
    use crate::providers::gemini::GeminiClient;

    const KEY: &str = "SUPERSECRETKEY";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("digest.jsonl");
    let (source, news) = three_subscribers();
    // Nothing listens on port 1, so every summarize call fails at the transport.
    let config = config()
        .with_api_key(KEY)
        .with_api_base_url("http://127.0.0.1:1")
        .with_retain_journal(true);

    let workflow = DailyDigestWorkflow::builder()
        .subscribers(Arc::new(source))
        .news(Arc::new(news))
        .generator(Arc::new(GeminiClient::from_workflow_config(&config).unwrap()))
        .mailer(Arc::new(RecordingMailer::new()))
        .journal(Arc::new(FileStepJournal::open(&path).unwrap()))
        .config(config)
        .build()
        .unwrap();

    let report = workflow.run().await.unwrap();

    let failures = report.failures_in("summarize-news");
    assert_eq!(failures.len(), 3);
    assert!(report.failures.iter().all(|f| !f.reason.contains(KEY)));
    assert!(!std::fs::read_to_string(&path).unwrap().contains(KEY));
}
