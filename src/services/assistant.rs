//! Email triage orchestration.
//!
//! The [`EmailAssistant`] pairs one [`AiModel`] with one [`EmailProvider`],
//! checks both are reachable, then walks a folder one email at a time:
//! categorize, apply (or simulate) the decision, record the outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ConfigError, ResolvedConfig};
use crate::domain::{Action, CategoryDecision, Email};
use crate::providers::ai::{self, AiModel};
use crate::providers::email::{self, EmailProvider, ProviderError};

/// Destination used for [`Action::Archive`].
pub const ARCHIVE_FOLDER: &str = "archive";

/// Reason recorded for actions no provider call exists for.
pub const UNSUPPORTED_ACTION: &str = "action not supported by the pipeline";

/// Reason recorded for `move_folder` without a destination.
pub const MISSING_FOLDER: &str = "move_folder decision has no destination folder";

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{component} connection test failed")]
    ConnectionTest { component: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: AssistantState,
    },
}

/// Whether decisions are sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Decide and report only. No provider mutations.
    DryRun,
    /// Apply every decision.
    Execute,
}

impl RunMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

/// Lifecycle of one invocation. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    Initializing,
    ConnectionsTested,
    Processing,
    Summarizing,
    Done,
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssistantState::Initializing => "initializing",
            AssistantState::ConnectionsTested => "connections tested",
            AssistantState::Processing => "processing",
            AssistantState::Summarizing => "summarizing",
            AssistantState::Done => "done",
        };
        f.write_str(name)
    }
}

/// What happened to one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The provider accepted the change, or none was needed.
    Applied,
    /// Dry run: the change would have been sent.
    Simulated,
    /// The change was not applied.
    Failed { reason: String },
}

impl ActionOutcome {
    /// Whether the decision counts as applied (or would-apply in a dry run).
    pub fn applied(&self) -> bool {
        !matches!(self, ActionOutcome::Failed { .. })
    }
}

/// One processed email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub email: Email,
    pub decision: CategoryDecision,
    pub outcome: ActionOutcome,
}

impl BatchEntry {
    pub fn applied(&self) -> bool {
        self.outcome.applied()
    }
}

/// Everything one `process` call did, in fetch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Identifier shared by every log line of the run.
    pub run_id: Uuid,
    /// When processing started.
    pub started_at: DateTime<Utc>,
    /// Folder that was processed.
    pub folder: String,
    /// Mode the batch ran in.
    pub mode: RunMode,
    /// One entry per fetched email.
    pub entries: Vec<BatchEntry>,
    /// Set when listing the folder failed; `entries` is then empty.
    pub fetch_error: Option<String>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applied flags in fetch order.
    pub fn applied_flags(&self) -> Vec<bool> {
        self.entries.iter().map(BatchEntry::applied).collect()
    }

    /// Tallies decisions per action, in the order actions were first seen.
    pub fn summary(&self) -> Summary {
        let mut counts: Vec<(Action, usize)> = Vec::new();
        let mut applied = 0;
        let mut simulated = 0;
        let mut failed = 0;

        for entry in &self.entries {
            match counts.iter_mut().find(|(action, _)| *action == entry.decision.action) {
                Some((_, count)) => *count += 1,
                None => counts.push((entry.decision.action, 1)),
            }
            match entry.outcome {
                ActionOutcome::Applied => applied += 1,
                ActionOutcome::Simulated => simulated += 1,
                ActionOutcome::Failed { .. } => failed += 1,
            }
        }

        Summary {
            run_id: self.run_id,
            mode: self.mode,
            counts,
            total: self.entries.len(),
            applied,
            simulated,
            failed,
            fetch_error: self.fetch_error.clone(),
        }
    }
}

/// Final report of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// Decisions per action in first-seen order.
    pub counts: Vec<(Action, usize)>,
    pub total: usize,
    pub applied: usize,
    pub simulated: usize,
    pub failed: usize,
    pub fetch_error: Option<String>,
}

impl Summary {
    /// Number of decisions for `action`.
    pub fn count(&self, action: Action) -> usize {
        self.counts
            .iter()
            .find(|(a, _)| *a == action)
            .map_or(0, |(_, n)| *n)
    }

    /// True unless listing the folder failed.
    pub fn is_success(&self) -> bool {
        self.fetch_error.is_none()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary ({} emails processed):", self.total)?;
        for (action, count) in &self.counts {
            writeln!(f, "  {}: {}", action, count)?;
        }
        if self.mode.is_dry_run() {
            write!(f, "  [DRY RUN] {} actions simulated", self.simulated)?;
        } else {
            write!(f, "  applied: {}, failed: {}", self.applied, self.failed)?;
        }
        if let Some(error) = &self.fetch_error {
            write!(f, "\n  fetch failed: {}", error)?;
        }
        Ok(())
    }
}

/// The triage pipeline.
///
/// # Example
///
/// ```ignore
/// let mut assistant = EmailAssistant::initialize(&config, RunMode::DryRun).await?;
/// assistant.test_connections().await?;
/// let batch = assistant.process("inbox", 50).await?;
/// println!("{}", assistant.summarize(&batch)?);
/// ```
pub struct EmailAssistant {
    model: Box<dyn AiModel>,
    provider: Box<dyn EmailProvider>,
    prompt: String,
    mode: RunMode,
    state: AssistantState,
}

impl EmailAssistant {
    /// Assembles an assistant from already-built capabilities.
    pub fn new(
        model: Box<dyn AiModel>,
        provider: Box<dyn EmailProvider>,
        prompt: impl Into<String>,
        mode: RunMode,
    ) -> Self {
        Self {
            model,
            provider,
            prompt: prompt.into(),
            mode,
            state: AssistantState::Initializing,
        }
    }

    /// Builds the model and provider named in `config`.
    ///
    /// # Errors
    ///
    /// Unknown variants and missing credentials are [`AssistantError::Config`];
    /// provider authentication failures are [`AssistantError::Provider`].
    pub async fn initialize(
        config: &ResolvedConfig,
        mode: RunMode,
    ) -> Result<Self, AssistantError> {
        let model = ai::from_config(config)?;
        let provider = email::connect(config).await.map_err(|e| match e {
            ProviderError::Config(e) => AssistantError::Config(e),
            other => AssistantError::Provider(other),
        })?;

        tracing::info!(
            model = model.name(),
            provider = %provider.provider_type(),
            dry_run = mode.is_dry_run(),
            "Email assistant initialized"
        );

        Ok(Self::new(model, provider, config.categorization_prompt(), mode))
    }

    pub fn state(&self) -> AssistantState {
        self.state
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    fn expect_state(
        &self,
        expected: AssistantState,
        operation: &'static str,
    ) -> Result<(), AssistantError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AssistantError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Probes both capabilities. Either failing is fatal.
    pub async fn test_connections(&mut self) -> Result<(), AssistantError> {
        self.expect_state(AssistantState::Initializing, "test connections")?;

        tracing::info!("Testing AI model connection...");
        if !self.model.test_connection().await {
            return Err(AssistantError::ConnectionTest {
                component: "AI model".to_string(),
            });
        }

        tracing::info!("Testing email provider connection...");
        if !self.provider.test_connection().await {
            return Err(AssistantError::ConnectionTest {
                component: format!("email provider ({})", self.provider.provider_type()),
            });
        }

        tracing::info!("All connections OK");
        self.state = AssistantState::ConnectionsTested;
        Ok(())
    }

    /// Categorizes up to `limit` emails from `folder` and applies (or, in a
    /// dry run, reports) each decision.
    ///
    /// One email's failure never stops the batch. A failed listing yields an
    /// empty batch with [`BatchResult::fetch_error`] set.
    pub async fn process(
        &mut self,
        folder: &str,
        limit: usize,
    ) -> Result<BatchResult, AssistantError> {
        self.expect_state(AssistantState::ConnectionsTested, "process emails")?;
        self.state = AssistantState::Processing;

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", run_id = %run_id, folder = %folder);
        let batch = self.run_batch(run_id, folder, limit).instrument(span).await;

        self.state = AssistantState::Summarizing;
        Ok(batch)
    }

    async fn run_batch(&self, run_id: Uuid, folder: &str, limit: usize) -> BatchResult {
        let mut batch = BatchResult {
            run_id,
            started_at: Utc::now(),
            folder: folder.to_string(),
            mode: self.mode,
            entries: Vec::new(),
            fetch_error: None,
        };

        if self.mode.is_dry_run() {
            tracing::info!("DRY RUN MODE - No changes will be made");
        }

        tracing::info!(limit, "Fetching emails from {}...", folder);
        let emails = match self.provider.get_emails(folder, limit).await {
            Ok(emails) => emails,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch emails");
                batch.fetch_error = Some(e.to_string());
                return batch;
            }
        };

        if emails.is_empty() {
            tracing::info!("No emails to process");
            return batch;
        }

        let total = emails.len();
        tracing::info!(count = total, "Found emails to process");

        for (i, email) in emails.into_iter().enumerate() {
            tracing::info!("[{}/{}] Processing: {}", i + 1, total, email.subject);
            tracing::info!("  From: {}", email.from.display());

            let decision = self.model.categorize(&email, &self.prompt).await;
            tracing::info!("  Decision: {}", decision.action);
            tracing::info!("  Reason: {}", decision.reason);

            let outcome = self.apply(&email, &decision).await;
            batch.entries.push(BatchEntry {
                email,
                decision,
                outcome,
            });
        }

        batch
    }

    /// Translates a decision into at most one provider call.
    async fn apply(&self, email: &Email, decision: &CategoryDecision) -> ActionOutcome {
        // Decisions that can never be applied fail the same way in both modes
        let destination = match decision.action {
            Action::MoveFolder => match decision.folder.as_deref() {
                Some(folder) => Some(folder),
                None => {
                    tracing::warn!(id = %email.id, "{}", MISSING_FOLDER);
                    return ActionOutcome::Failed {
                        reason: MISSING_FOLDER.to_string(),
                    };
                }
            },
            Action::MarkUnread | Action::Flag => {
                tracing::warn!(id = %email.id, action = %decision.action, "{}", UNSUPPORTED_ACTION);
                return ActionOutcome::Failed {
                    reason: UNSUPPORTED_ACTION.to_string(),
                };
            }
            _ => None,
        };

        if self.mode.is_dry_run() {
            tracing::info!("  [DRY RUN] Would apply action: {}", decision.action);
            return ActionOutcome::Simulated;
        }

        let result = match (decision.action, destination) {
            (Action::KeepInbox, _) => return ActionOutcome::Applied,
            (Action::Archive, _) => self.provider.move_email(&email.id, ARCHIVE_FOLDER).await,
            (Action::Delete, _) => self.provider.delete_email(&email.id).await,
            (Action::MarkRead, _) => self.provider.mark_read(&email.id).await,
            (Action::MoveFolder, Some(folder)) => self.provider.move_email(&email.id, folder).await,
            (Action::MoveFolder, None) | (Action::MarkUnread, _) | (Action::Flag, _) => {
                return ActionOutcome::Failed {
                    reason: UNSUPPORTED_ACTION.to_string(),
                }
            }
        };

        match result {
            Ok(()) => {
                tracing::info!("  Applied: {}", decision.action);
                ActionOutcome::Applied
            }
            Err(e) => {
                tracing::error!(id = %email.id, action = %decision.action, error = %e, "  Failed to apply action");
                ActionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Produces the final report and finishes the run.
    pub fn summarize(&mut self, batch: &BatchResult) -> Result<Summary, AssistantError> {
        self.expect_state(AssistantState::Summarizing, "summarize")?;

        let summary = batch.summary();
        for (action, count) in &summary.counts {
            tracing::info!(run_id = %summary.run_id, "  {}: {}", action, count);
        }
        tracing::info!(
            run_id = %summary.run_id,
            total = summary.total,
            applied = summary.applied,
            simulated = summary.simulated,
            failed = summary.failed,
            "Batch complete"
        );

        self.state = AssistantState::Done;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::domain::{EmailId, Sender};
    use crate::providers::ai::MockAiModel;
    use crate::providers::email::MockEmailProvider;
    use pretty_assertions::assert_eq;

    fn email(id: &str, subject: &str) -> Email {
        Email {
            id: EmailId::from(id),
            subject: subject.to_string(),
            from: Sender::new("sender@example.com"),
            preview: "preview".to_string(),
            received: "2024-05-06T08:00:00Z".to_string(),
            is_read: false,
            folder: Some("inbox".to_string()),
        }
    }

    fn healthy_model() -> MockAiModel {
        let mut model = MockAiModel::new();
        model.expect_test_connection().returning(|| true);
        model
    }

    fn healthy_provider(emails: Vec<Email>) -> MockEmailProvider {
        let mut provider = MockEmailProvider::new();
        provider.expect_test_connection().returning(|| true);
        provider
            .expect_get_emails()
            .times(1)
            .returning(move |_, _| Ok(emails.clone()));
        provider
    }

    async fn ready(
        model: MockAiModel,
        provider: MockEmailProvider,
        mode: RunMode,
    ) -> EmailAssistant {
        let mut assistant =
            EmailAssistant::new(Box::new(model), Box::new(provider), "policy", mode);
        assistant.test_connections().await.unwrap();
        assistant
    }

    #[tokio::test]
    async fn execute_maps_each_action_to_one_call() {
        let mut model = healthy_model();
        model.expect_categorize().returning(|email, _| match email.id.as_str() {
            "1" => CategoryDecision::new(Action::Archive, "newsletter"),
            "2" => CategoryDecision::new(Action::Delete, "spam"),
            "3" => CategoryDecision::new(Action::MarkRead, "fyi"),
            "4" => CategoryDecision::new(Action::MoveFolder, "receipt").with_folder("Receipts"),
            _ => CategoryDecision::keep_inbox("important"),
        });

        let mut provider = healthy_provider(vec![
            email("1", "a"),
            email("2", "b"),
            email("3", "c"),
            email("4", "d"),
            email("5", "e"),
        ]);
        provider
            .expect_move_email()
            .withf(|id, dest| id.as_str() == "1" && dest == ARCHIVE_FOLDER)
            .times(1)
            .returning(|_, _| Ok(()));
        provider
            .expect_delete_email()
            .withf(|id| id.as_str() == "2")
            .times(1)
            .returning(|_| Ok(()));
        provider
            .expect_mark_read()
            .withf(|id| id.as_str() == "3")
            .times(1)
            .returning(|_| Ok(()));
        provider
            .expect_move_email()
            .withf(|id, dest| id.as_str() == "4" && dest == "Receipts")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut assistant = ready(model, provider, RunMode::Execute).await;
        let batch = assistant.process("inbox", 10).await.unwrap();

        assert_eq!(batch.applied_flags(), vec![true; 5]);
        let summary = assistant.summarize(&batch).unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.applied, 5);
        assert_eq!(
            summary.counts,
            vec![
                (Action::Archive, 1),
                (Action::Delete, 1),
                (Action::MarkRead, 1),
                (Action::MoveFolder, 1),
                (Action::KeepInbox, 1),
            ]
        );
        assert_eq!(assistant.state(), AssistantState::Done);
    }

    #[tokio::test]
    async fn provider_error_is_per_item_failure() {
        let mut model = healthy_model();
        model
            .expect_categorize()
            .returning(|_, _| CategoryDecision::new(Action::Delete, "spam"));

        let mut provider = healthy_provider(vec![email("1", "a"), email("2", "b")]);
        provider.expect_delete_email().times(2).returning(|id| {
            if id.as_str() == "1" {
                Err(ProviderError::NotFound("message 1".to_string()))
            } else {
                Ok(())
            }
        });

        let mut assistant = ready(model, provider, RunMode::Execute).await;
        let batch = assistant.process("inbox", 10).await.unwrap();

        assert_eq!(batch.applied_flags(), vec![false, true]);
        assert_eq!(
            batch.entries[0].outcome,
            ActionOutcome::Failed {
                reason: "not found: message 1".to_string()
            }
        );
    }

    fn unappliable_model() -> MockAiModel {
        let mut model = healthy_model();
        model.expect_categorize().returning(|email, _| match email.id.as_str() {
            "1" => CategoryDecision::new(Action::MarkUnread, "?"),
            "2" => CategoryDecision::new(Action::Flag, "?"),
            _ => CategoryDecision::new(Action::MoveFolder, "no folder"),
        });
        model
    }

    #[tokio::test]
    async fn unsupported_and_folderless_actions_never_call_provider() {
        for mode in [RunMode::Execute, RunMode::DryRun] {
            // No mutation expectations: any call panics
            let provider =
                healthy_provider(vec![email("1", "a"), email("2", "b"), email("3", "c")]);

            let mut assistant = ready(unappliable_model(), provider, mode).await;
            let batch = assistant.process("inbox", 10).await.unwrap();

            assert_eq!(batch.applied_flags(), vec![false, false, false]);
            assert_eq!(
                batch.entries[1].outcome,
                ActionOutcome::Failed {
                    reason: UNSUPPORTED_ACTION.to_string()
                }
            );
            assert_eq!(
                batch.entries[2].outcome,
                ActionOutcome::Failed {
                    reason: MISSING_FOLDER.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn dry_run_simulates_without_mutations() {
        let mut model = healthy_model();
        model
            .expect_categorize()
            .returning(|_, _| CategoryDecision::new(Action::Archive, "newsletter"));

        let provider = healthy_provider(vec![email("1", "a"), email("2", "b")]);

        let mut assistant = ready(model, provider, RunMode::DryRun).await;
        let batch = assistant.process("inbox", 10).await.unwrap();

        assert!(batch
            .entries
            .iter()
            .all(|e| e.outcome == ActionOutcome::Simulated));
        let summary = assistant.summarize(&batch).unwrap();
        assert_eq!(summary.count(Action::Archive), 2);
        assert_eq!(summary.simulated, 2);
        assert_eq!(summary.applied, 0);
    }

    #[tokio::test]
    async fn failed_model_probe_stops_before_fetch() {
        let mut model = MockAiModel::new();
        model.expect_test_connection().returning(|| false);
        let mut provider = MockEmailProvider::new();
        provider.expect_get_emails().never();
        provider.expect_test_connection().never();

        let mut assistant =
            EmailAssistant::new(Box::new(model), Box::new(provider), "p", RunMode::Execute);

        let err = assistant.test_connections().await.unwrap_err();
        assert_eq!(err.to_string(), "AI model connection test failed");

        let err = assistant.process("inbox", 10).await.unwrap_err();
        assert!(matches!(
            err,
            AssistantError::InvalidState {
                state: AssistantState::Initializing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_provider_probe_names_provider() {
        let model = healthy_model();
        let mut provider = MockEmailProvider::new();
        provider.expect_test_connection().returning(|| false);
        provider
            .expect_provider_type()
            .return_const(ProviderKind::Office365);

        let mut assistant =
            EmailAssistant::new(Box::new(model), Box::new(provider), "p", RunMode::DryRun);
        let err = assistant.test_connections().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "email provider (office365) connection test failed"
        );
    }

    #[tokio::test]
    async fn fetch_error_is_recorded_not_raised() {
        let model = healthy_model();
        let mut provider = MockEmailProvider::new();
        provider.expect_test_connection().returning(|| true);
        provider
            .expect_get_emails()
            .returning(|_, _| Err(ProviderError::Connection("reset by peer".to_string())));

        let mut assistant = ready(model, provider, RunMode::Execute).await;
        let batch = assistant.process("inbox", 10).await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(
            batch.fetch_error.as_deref(),
            Some("connection error: reset by peer")
        );
        assert!(!batch.summary().is_success());
    }

    #[tokio::test]
    async fn steps_cannot_be_repeated() {
        let model = healthy_model();
        let provider = healthy_provider(Vec::new());

        let mut assistant = ready(model, provider, RunMode::DryRun).await;
        assert!(matches!(
            assistant.test_connections().await,
            Err(AssistantError::InvalidState { .. })
        ));

        let batch = assistant.process("inbox", 10).await.unwrap();
        assert!(batch.is_empty());
        assert!(batch.fetch_error.is_none());
        assert!(assistant.process("inbox", 10).await.is_err());

        assistant.summarize(&batch).unwrap();
        assert!(assistant.summarize(&batch).is_err());
    }

    #[test]
    fn summary_display() {
        let summary = Summary {
            run_id: Uuid::nil(),
            mode: RunMode::Execute,
            counts: vec![(Action::Archive, 2), (Action::KeepInbox, 1)],
            total: 3,
            applied: 2,
            simulated: 0,
            failed: 1,
            fetch_error: None,
        };

        assert_eq!(
            summary.to_string(),
            "Summary (3 emails processed):\n  archive: 2\n  keep_inbox: 1\n  applied: 2, failed: 1"
        );
        assert_eq!(summary.count(Action::Delete), 0);
    }

    #[test]
    fn outcome_serialization() {
        let json = serde_json::to_string(&ActionOutcome::Failed {
            reason: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"boom"}"#);
        assert!(ActionOutcome::Simulated.applied());
    }
}
