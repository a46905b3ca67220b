//! End-to-end assembly: conversations in, deployed workflows out.
//!
//! The pipeline wires one completion provider, one capability gateway per
//! platform, the conversation store, and the deployment adapter into a
//! single entry point. Embedding applications construct it once and share
//! it; everything inside is either immutable or internally synchronized.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::AppError;
use crate::synth::deploy::{DeploymentAdapter, EngineApi, EngineClient};
use crate::synth::gateway::{CapabilityGateway, ToolExecutor};
use crate::synth::orchestrator::{TurnEvent, TurnOrchestrator};
use crate::synth::platform::Platform;
use crate::synth::provider::{AnthropicProvider, CompletionProvider};
use crate::synth::store::{ConversationStore, MemoryStore};
use crate::synth::types::{
    Conversation, DeploymentRecord, Message, ValidationReport, WorkflowDraft,
};
use crate::synth::validator;

pub struct SynthPipeline {
    store: Arc<dyn ConversationStore>,
    orchestrators: HashMap<Platform, TurnOrchestrator>,
    adapter: DeploymentAdapter,
}

impl SynthPipeline {
    /// Production assembly: Anthropic provider, per-platform gateways, the
    /// in-memory store, and the engine REST client, all from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let provider: Arc<dyn CompletionProvider> =
            Arc::new(AnthropicProvider::from_settings(settings)?);
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let engine: Arc<dyn EngineApi> = Arc::new(EngineClient::from_settings(settings)?);

        let mut orchestrators = HashMap::new();
        for platform in Platform::ALL {
            let gateway: Arc<dyn ToolExecutor> =
                Arc::new(CapabilityGateway::from_settings(settings, platform)?);
            orchestrators.insert(
                platform,
                TurnOrchestrator::new(
                    provider.clone(),
                    gateway,
                    store.clone(),
                    settings.max_turn_iterations,
                ),
            );
        }

        Ok(Self {
            store,
            orchestrators,
            adapter: DeploymentAdapter::new(engine),
        })
    }

    /// Custom assembly for embedding and tests: one executor serves every
    /// platform.
    pub fn assemble(
        provider: Arc<dyn CompletionProvider>,
        executor: Arc<dyn ToolExecutor>,
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn EngineApi>,
        max_iterations: u32,
    ) -> Self {
        let mut orchestrators = HashMap::new();
        for platform in Platform::ALL {
            orchestrators.insert(
                platform,
                TurnOrchestrator::new(
                    provider.clone(),
                    executor.clone(),
                    store.clone(),
                    max_iterations,
                ),
            );
        }
        Self {
            store,
            orchestrators,
            adapter: DeploymentAdapter::new(engine),
        }
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn start_conversation(&self, platform: Platform) -> Result<Conversation, AppError> {
        self.store.create(platform).await
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, AppError> {
        self.store.get(id).await
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, AppError> {
        self.store.list().await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), AppError> {
        self.store.delete(id).await
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Run one turn. Events stream to `events` as the turn progresses; the
    /// finalized assistant message is returned when the turn ends.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        user_text: &str,
        events: &UnboundedSender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<Message, AppError> {
        let conversation = self.store.get(conversation_id).await?;
        let orchestrator = self
            .orchestrators
            .get(&conversation.platform)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "no orchestrator for platform {}",
                    conversation.platform
                ))
            })?;
        orchestrator
            .run_turn(conversation_id, user_text, events, cancel)
            .await
    }

    // ------------------------------------------------------------------
    // Drafts
    // ------------------------------------------------------------------

    /// The conversation's active draft, if its latest turn produced one.
    pub async fn active_draft(&self, conversation_id: &str) -> Result<WorkflowDraft, AppError> {
        let conversation = self.store.get(conversation_id).await?;
        let message_id = conversation
            .active_draft_id
            .as_deref()
            .ok_or_else(|| AppError::NotFound("no active workflow draft".into()))?;
        conversation
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .and_then(|m| m.extracted_workflow.clone())
            .ok_or_else(|| AppError::NotFound("no active workflow draft".into()))
    }

    /// Validate the active draft without deploying it.
    pub async fn validate_active_draft(
        &self,
        conversation_id: &str,
    ) -> Result<(WorkflowDraft, ValidationReport), AppError> {
        let draft = self.active_draft(conversation_id).await?;
        let report = validator::validate(&draft);
        Ok((draft, report))
    }

    /// Deploy the active draft. Validation runs first; drafts with error
    /// findings never reach the engine. One call, one engine attempt.
    pub async fn deploy_active_draft(
        &self,
        conversation_id: &str,
    ) -> Result<DeploymentRecord, AppError> {
        let draft = self.active_draft(conversation_id).await?;
        let report = validator::validate(&draft);
        if !report.deployable() {
            let detail: Vec<String> = report.errors().map(|f| f.message.clone()).collect();
            return Err(AppError::Validation(format!(
                "draft is not deployable: {}",
                detail.join("; ")
            )));
        }
        Ok(self.adapter.deploy(&draft).await)
    }
}
