//! Onboarding email workflow.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use crate::config::WorkflowConfig;
use crate::core::{DeliveryReport, ReportBuilder, RunIdentity, RunReport, Subscriber};
use crate::errors::DigestflowError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::providers::{prompts, Mailer, ProviderResponse, TextGenerator, WelcomeEmail};
use crate::steps::{
    InMemoryStepJournal, StepExecutor, StepJournal, CALL_GEMINI_API, SEND_WELCOME_EMAIL,
};

/// Workflow name attached to run identities and spans.
pub const WELCOME_WORKFLOW: &str = "sign-up-email";
/// Message of a successful onboarding run.
pub const WELCOME_SENT_MESSAGE: &str = "Welcome email sent successfully";

/// Trigger payload for a new sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpEvent {
    /// New user's email address.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Country of residence.
    #[serde(default)]
    pub country: Option<String>,
    /// Stated investment goals.
    #[serde(default)]
    pub investment_goals: Option<String>,
    /// Stated risk tolerance.
    #[serde(default)]
    pub risk_tolerance: Option<String>,
    /// Preferred industry.
    #[serde(default)]
    pub preferred_industry: Option<String>,
}

impl SignUpEvent {
    /// Creates an event with only an email address.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            country: None,
            investment_goals: None,
            risk_tolerance: None,
            preferred_industry: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the country.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Sets the investment goals.
    #[must_use]
    pub fn with_investment_goals(mut self, goals: impl Into<String>) -> Self {
        self.investment_goals = Some(goals.into());
        self
    }

    /// Sets the risk tolerance.
    #[must_use]
    pub fn with_risk_tolerance(mut self, tolerance: impl Into<String>) -> Self {
        self.risk_tolerance = Some(tolerance.into());
        self
    }

    /// Sets the preferred industry.
    #[must_use]
    pub fn with_preferred_industry(mut self, industry: impl Into<String>) -> Self {
        self.preferred_industry = Some(industry.into());
        self
    }

    fn subscriber(&self) -> Subscriber {
        let subscriber = Subscriber::new(&self.email);
        match &self.name {
            Some(name) => subscriber.with_name(name),
            None => subscriber,
        }
    }
}

/// Generates a personalized intro and sends the welcome email.
pub struct WelcomeWorkflow {
    config: WorkflowConfig,
    generator: Arc<dyn TextGenerator>,
    mailer: Arc<dyn Mailer>,
    journal: Arc<dyn StepJournal>,
    events: Arc<dyn EventSink>,
}

impl WelcomeWorkflow {
    /// Creates the workflow with an in-memory journal.
    pub fn new(
        config: WorkflowConfig,
        generator: Arc<dyn TextGenerator>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, DigestflowError> {
        config.validate()?;
        Ok(Self {
            config,
            generator,
            mailer,
            journal: Arc::new(InMemoryStepJournal::new()),
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the step journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Runs onboarding for one sign-up.
    ///
    /// Intro generation never fails the run; the configured fallback intro
    /// is used instead. A send that still fails after retries is fatal.
    pub async fn run(&self, event: &SignUpEvent) -> Result<RunReport, DigestflowError> {
        let identity = RunIdentity::new().with_workflow(WELCOME_WORKFLOW);
        let span = info_span!("welcome", run_id = %identity.run_id_string());

        async move {
            let executor = StepExecutor::new(self.journal.clone(), self.config.retry.clone())
                .with_events(self.events.clone());

            let prompt = prompts::welcome_prompt(event);
            let intro: String = executor
                .run_step(CALL_GEMINI_API, || {
                    generate_intro(
                        self.generator.clone(),
                        prompt.clone(),
                        self.config.welcome_fallback_intro.clone(),
                    )
                })
                .await?;

            let subscriber = event.subscriber();
            let email = WelcomeEmail {
                email: event.email.clone(),
                name: subscriber.display_name().to_string(),
                intro,
            };
            executor
                .run_step(SEND_WELCOME_EMAIL, || self.mailer.send_welcome_email(&email))
                .await?;
            info!(subscriber = %event.email, "Welcome email sent");

            let mut report = ReportBuilder::new(identity);
            report.record_subscribers(1);
            report.record_delivery(DeliveryReport {
                attempted: 1,
                sent: 1,
                ..DeliveryReport::default()
            });
            let report = report.finish(true, WELCOME_SENT_MESSAGE.to_string());

            if !self.config.retain_journal {
                self.journal.discard().await?;
            }
            self.events
                .emit(events::RUN_COMPLETED, serde_json::to_value(&report).ok())
                .await;
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for WelcomeWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WelcomeWorkflow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn generate_intro(
    generator: Arc<dyn TextGenerator>,
    prompt: String,
    fallback: String,
) -> anyhow::Result<String> {
    let intro = match generator.generate(&prompt).await {
        Ok(ProviderResponse::Ok(text)) => text,
        Ok(response) => {
            let reason = response.failure_reason().unwrap_or_default();
            warn!(%reason, "Using fallback welcome intro");
            fallback
        }
        Err(err) => {
            warn!(error = %err, "Using fallback welcome intro");
            fallback
        }
    };
    Ok(intro)
}
