//! The daily news digest workflow.
//!
//! A run moves through four stages, strictly in order:
//!
//! 1. `get-all-users`: enumerate subscribers (fatal on failure).
//! 2. `fetch-user-news-{email}`: watchlist lookup and news fallback chain.
//! 3. `summarize-news-{email}`: one generative call per subscriber.
//! 4. `send-news-emails`: deliver every non-empty summary.
//!
//! Stages 2 and 3 fan out across subscribers; a failure there only
//! affects that subscriber.

use anyhow::Context;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cancellation::{spawn_timeout, CancellationToken};
use crate::config::{WorkflowConfig, API_KEY_ENV};
use crate::core::{
    Article, DeliveryReport, ErrorInfo, FailureRecord, Outcome, ReportBuilder, RunIdentity,
    RunReport, Subscriber, WorkItem,
};
use crate::errors::DigestflowError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::pipeline::{FallbackResolver, FanOut};
use crate::providers::{
    prompts, Mailer, NewsSource, NewsSummaryEmail, ProviderResponse, SubscriberSource,
    TextGenerator,
};
use crate::steps::{
    InMemoryStepJournal, StepExecutor, StepJournal, FETCH_USER_NEWS, GET_ALL_USERS,
    SEND_NEWS_EMAILS, SUMMARIZE_NEWS,
};
use crate::utils::formatted_today_date;

/// Workflow name attached to run identities and spans.
pub const DAILY_DIGEST_WORKFLOW: &str = "daily-news-summary";

/// How a run ended.
enum Finish {
    /// Terminal: the journal may be discarded.
    Done(RunReport),
    /// Cancelled: the journal is kept so the run can resume.
    Interrupted(RunReport),
}

/// Sends each subscriber a generated summary of their market news.
pub struct DailyDigestWorkflow {
    config: WorkflowConfig,
    subscribers: Arc<dyn SubscriberSource>,
    news: Arc<dyn NewsSource>,
    generator: Arc<dyn TextGenerator>,
    mailer: Arc<dyn Mailer>,
    journal: Arc<dyn StepJournal>,
    events: Arc<dyn EventSink>,
}

impl DailyDigestWorkflow {
    /// Starts building a workflow.
    #[must_use]
    pub fn builder() -> DailyDigestWorkflowBuilder {
        DailyDigestWorkflowBuilder::default()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Returns the step journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<dyn StepJournal> {
        &self.journal
    }

    /// Executes one run with a fresh identity.
    pub async fn run(&self) -> Result<RunReport, DigestflowError> {
        self.run_with_cancellation(RunIdentity::new(), Arc::new(CancellationToken::new()))
            .await
    }

    /// Executes one run that stops early when `token` is cancelled.
    ///
    /// Cancellation (including the configured run timeout) is not an
    /// error: unfinished subscribers are reported as `"cancelled"` and the
    /// report has `success == false`. `Err` is reserved for fatal
    /// conditions: enumeration failure, a missing credential, or a journal
    /// that cannot be written.
    ///
    /// The journal is kept after a missing credential so the recorded
    /// fetches are reused once the key is configured. It is discarded
    /// after a step failure, unless `retain_journal` is set.
    pub async fn run_with_cancellation(
        &self,
        identity: RunIdentity,
        token: Arc<CancellationToken>,
    ) -> Result<RunReport, DigestflowError> {
        let identity = identity.with_workflow(DAILY_DIGEST_WORKFLOW);
        let span = info_span!("daily_digest", run_id = %identity.run_id_string());

        async move {
            info!("Running daily news summary");
            let timeout = self
                .config
                .run_timeout()
                .map(|limit| spawn_timeout(token.clone(), limit));

            let result = self.execute(identity, &token).await;
            if let Some(handle) = timeout {
                handle.abort();
            }

            let finish = match result {
                Ok(finish) => finish,
                Err(err) => {
                    // A recorded step failure replays as the same failure on resume.
                    if matches!(err, DigestflowError::StepFailure { .. })
                        && !self.config.retain_journal
                    {
                        self.journal.discard().await?;
                    }
                    warn!(error = %err, "Daily news summary failed");
                    return Err(err);
                }
            };

            let report = match finish {
                Finish::Done(report) => {
                    if !self.config.retain_journal {
                        self.journal.discard().await?;
                    }
                    report
                }
                Finish::Interrupted(report) => report,
            };

            info!(
                success = report.success,
                subscribers = report.subscribers,
                emails_sent = report.emails_sent,
                failures = report.failures.len(),
                "{}",
                report.message
            );
            self.events
                .emit(events::RUN_COMPLETED, serde_json::to_value(&report).ok())
                .await;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        identity: RunIdentity,
        token: &Arc<CancellationToken>,
    ) -> Result<Finish, DigestflowError> {
        let executor = Arc::new(
            StepExecutor::new(self.journal.clone(), self.config.retry.clone())
                .with_events(self.events.clone()),
        );
        let fan_out = FanOut::new(executor.clone(), self.config.max_concurrency)
            .with_events(self.events.clone())
            .with_cancellation(token.clone());
        let mut report = ReportBuilder::new(identity);

        let Some(subscribers) = unless_cancelled(
            token,
            executor.run_step(GET_ALL_USERS, || self.subscribers.all_users_for_news_email()),
        )
        .await
        .transpose()?
        else {
            return Ok(Finish::Interrupted(report.cancelled(&cancel_reason(token))));
        };

        info!(count = subscribers.len(), "Users fetched");
        if subscribers.is_empty() {
            warn!("No users found for news email");
            return Ok(Finish::Done(report.no_subscribers()));
        }
        report.record_subscribers(subscribers.len());

        let fetched = self.fetch_stage(&fan_out, subscribers, &mut report).await;
        if token.is_cancelled() {
            return Ok(Finish::Interrupted(report.cancelled(&cancel_reason(token))));
        }

        if !self.config.has_api_key() || !self.generator.credentials_present() {
            return Err(DigestflowError::MissingCredential(API_KEY_ENV.to_string()));
        }
        let summaries = self.summarize_stage(&fan_out, fetched, &mut report).await;
        if token.is_cancelled() {
            return Ok(Finish::Interrupted(report.cancelled(&cancel_reason(token))));
        }

        let date = formatted_today_date();
        let mailer = self.mailer.clone();
        let max_concurrency = self.config.max_concurrency;
        let delivery: DeliveryReport = executor
            .run_step(SEND_NEWS_EMAILS, || {
                deliver_all(
                    mailer.clone(),
                    summaries.clone(),
                    date.clone(),
                    max_concurrency,
                    token.clone(),
                )
            })
            .await?;
        report.record_delivery(delivery);

        if token.is_cancelled() {
            return Ok(Finish::Interrupted(report.cancelled(&cancel_reason(token))));
        }
        Ok(Finish::Done(report.completed()))
    }

    async fn fetch_stage(
        &self,
        fan_out: &FanOut,
        subscribers: Vec<Subscriber>,
        report: &mut ReportBuilder,
    ) -> Vec<WorkItem<Vec<Article>>> {
        let source = self.subscribers.clone();
        let resolver =
            FallbackResolver::new(self.news.clone()).with_max_articles(self.config.max_articles);

        let results = fan_out
            .run_stage(FETCH_USER_NEWS, subscribers, move |subscriber| {
                fetch_articles(source.clone(), resolver.clone(), subscriber)
            })
            .await;

        results
            .into_iter()
            .map(|(subscriber, outcome)| {
                let articles = match outcome {
                    Outcome::Success(articles) => {
                        report.record_fetched();
                        articles
                    }
                    Outcome::Failure(info) => {
                        report.record_failure(info.into());
                        Vec::new()
                    }
                };
                WorkItem::new(subscriber, articles)
            })
            .collect()
    }

    async fn summarize_stage(
        &self,
        fan_out: &FanOut,
        items: Vec<WorkItem<Vec<Article>>>,
        report: &mut ReportBuilder,
    ) -> Vec<WorkItem<Option<String>>> {
        let generator = self.generator.clone();

        let results = fan_out
            .run_stage(SUMMARIZE_NEWS, items, move |item| {
                summarize(generator.clone(), item)
            })
            .await;

        results
            .into_iter()
            .map(|(item, outcome)| {
                let email = item.subscriber.email.clone();
                let summary = match outcome {
                    Outcome::Success(response) => {
                        if let Some(reason) = response.failure_reason() {
                            warn!(subscriber = %email, %reason, "No summary generated");
                            report.record_failure(FailureRecord::new(&email, SUMMARIZE_NEWS, reason));
                        } else {
                            report.record_summarized();
                        }
                        response.into_summary()
                    }
                    Outcome::Failure(info) => {
                        report.record_failure(info.into());
                        None
                    }
                };
                WorkItem::new(item.subscriber, summary)
            })
            .collect()
    }
}

impl std::fmt::Debug for DailyDigestWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyDigestWorkflow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DailyDigestWorkflow`].
#[derive(Default)]
pub struct DailyDigestWorkflowBuilder {
    config: Option<WorkflowConfig>,
    subscribers: Option<Arc<dyn SubscriberSource>>,
    news: Option<Arc<dyn NewsSource>>,
    generator: Option<Arc<dyn TextGenerator>>,
    mailer: Option<Arc<dyn Mailer>>,
    journal: Option<Arc<dyn StepJournal>>,
    events: Option<Arc<dyn EventSink>>,
}

impl DailyDigestWorkflowBuilder {
    /// Sets the configuration. Defaults to [`WorkflowConfig::default`].
    #[must_use]
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the subscriber source.
    #[must_use]
    pub fn subscribers(mut self, source: Arc<dyn SubscriberSource>) -> Self {
        self.subscribers = Some(source);
        self
    }

    /// Sets the news source.
    #[must_use]
    pub fn news(mut self, source: Arc<dyn NewsSource>) -> Self {
        self.news = Some(source);
        self
    }

    /// Sets the text generator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the mailer.
    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Sets the step journal. Defaults to an in-memory journal.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Sets the event sink. Defaults to [`NoOpEventSink`].
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validates the configuration and builds the workflow.
    pub fn build(self) -> Result<DailyDigestWorkflow, DigestflowError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(DailyDigestWorkflow {
            config,
            subscribers: self.subscribers.ok_or_else(|| missing("subscribers"))?,
            news: self.news.ok_or_else(|| missing("news"))?,
            generator: self.generator.ok_or_else(|| missing("generator"))?,
            mailer: self.mailer.ok_or_else(|| missing("mailer"))?,
            journal: self
                .journal
                .unwrap_or_else(|| Arc::new(InMemoryStepJournal::new())),
            events: self.events.unwrap_or_else(|| Arc::new(NoOpEventSink)),
        })
    }
}

fn missing(collaborator: &str) -> DigestflowError {
    DigestflowError::Config(format!("daily digest workflow requires a {collaborator}"))
}

fn cancel_reason(token: &CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "cancelled".to_string())
}

async fn unless_cancelled<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        output = future => Some(output),
    }
}

/// Looks up the watchlist, then resolves news through the fallback chain.
async fn fetch_articles(
    source: Arc<dyn SubscriberSource>,
    resolver: FallbackResolver,
    subscriber: Subscriber,
) -> anyhow::Result<Vec<Article>> {
    let symbols = source
        .watchlist_symbols_by_email(&subscriber.email)
        .await
        .with_context(|| format!("watchlist lookup failed for {}", subscriber.email))?;
    let subscriber = subscriber.with_symbols(symbols);
    let articles = resolver.resolve_news(&subscriber).await;
    debug!(subscriber = %subscriber.email, articles = articles.len(), "News resolved");
    Ok(articles)
}

/// Builds the prompt (even for an empty article list) and calls the generator.
async fn summarize(
    generator: Arc<dyn TextGenerator>,
    item: WorkItem<Vec<Article>>,
) -> anyhow::Result<ProviderResponse> {
    let prompt = prompts::news_summary_prompt(&item.payload);
    generator
        .generate(&prompt)
        .await
        .map_err(anyhow::Error::from)
}

enum SendResult {
    Sent,
    Failed(ErrorInfo),
    NotAttempted(ErrorInfo),
}

/// Sends every non-empty summary and tallies the results. Never fails.
async fn deliver_all(
    mailer: Arc<dyn Mailer>,
    items: Vec<WorkItem<Option<String>>>,
    date: String,
    max_concurrency: usize,
    token: Arc<CancellationToken>,
) -> anyhow::Result<DeliveryReport> {
    let mut report = DeliveryReport::default();
    let mut emails = Vec::new();
    for item in items {
        match item.payload {
            Some(news_content) => emails.push(NewsSummaryEmail {
                email: item.subscriber.email,
                date: date.clone(),
                news_content,
            }),
            None => {
                warn!(subscriber = %item.subscriber.email, "No news content, skipping");
                report.skipped += 1;
            }
        }
    }

    let results: Vec<SendResult> = stream::iter(emails)
        .map(|email| {
            let mailer = mailer.clone();
            let token = token.clone();
            async move {
                if token.is_cancelled() {
                    return SendResult::NotAttempted(ErrorInfo::cancelled(
                        &email.email,
                        SEND_NEWS_EMAILS,
                    ));
                }
                debug!(subscriber = %email.email, "Sending news summary email");
                match mailer.send_news_summary_email(&email).await {
                    Ok(()) => SendResult::Sent,
                    Err(err) => {
                        warn!(subscriber = %email.email, error = %format!("{err:#}"), "Failed to send email");
                        SendResult::Failed(ErrorInfo::new(
                            &email.email,
                            SEND_NEWS_EMAILS,
                            format!("{err:#}"),
                        ))
                    }
                }
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    for result in results {
        match result {
            SendResult::Sent => {
                report.attempted += 1;
                report.sent += 1;
            }
            SendResult::Failed(info) => {
                report.attempted += 1;
                report.failures.push(info);
            }
            SendResult::NotAttempted(info) => report.failures.push(info),
        }
    }
    report
        .failures
        .sort_by(|a, b| a.subscriber.cmp(&b.subscriber));
    Ok(report)
}
