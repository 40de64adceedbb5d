use std::sync::Arc;

use sleuth_core::config::AppConfig;
use sleuth_core::event::EventBus;
use sleuth_llm::ChatModel;
use sleuth_tools::ToolCatalog;

/// Everything the workflow nodes share for one deployment: the config,
/// one chat model per role, the tool catalog and the event bus.
#[derive(Clone)]
pub struct ResearchContext {
    pub config: AppConfig,
    /// Drives scoping, supervision and researcher steps.
    pub research_model: ChatModel,
    pub compression_model: ChatModel,
    pub report_model: ChatModel,
    pub tools: ToolCatalog,
    pub events: Arc<EventBus>,
}

impl ResearchContext {
    /// Build the models from the config. Credentials must already be resolved.
    pub fn from_config(config: AppConfig, tools: ToolCatalog, events: Arc<EventBus>) -> Self {
        let fallbacks = &config.fallback_models;
        let research_model = sleuth_llm::build_model(&config.model, fallbacks);
        let compression_model = sleuth_llm::build_model(config.compression_model(), fallbacks);
        let report_model = sleuth_llm::build_model(config.report_model(), fallbacks);
        Self {
            config,
            research_model,
            compression_model,
            report_model,
            tools,
            events,
        }
    }

    /// Use one model for every role.
    pub fn with_model(config: AppConfig, model: ChatModel, tools: ToolCatalog) -> Self {
        Self {
            config,
            research_model: model.clone(),
            compression_model: model.clone(),
            report_model: model,
            tools,
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }
}
