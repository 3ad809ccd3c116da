use std::sync::Arc;

use anyhow::{bail, Context, Result};
use companyresearch_core::{
    payload, Config, DynModel, DynSearch, DynSink, HandoffMessage, MarkdownFileSink, NextAgent,
    OpenAiChatModel, Status, TaskName, TavilyClient,
};
use serde_json::Value;

use crate::agent::HandoffAgent;
use crate::document_creator::DocumentCreatorAgent;
use crate::researcher::ResearcherAgent;
use crate::supervisor::SupervisorAgent;

/// Fully wired Supervisor with its two delegates.
pub struct Pipeline {
    supervisor: SupervisorAgent,
}

impl Pipeline {
    /// Wire all agents around explicitly provided capabilities. The same model
    /// handle is shared by every agent.
    pub fn new(search: DynSearch, model: DynModel, sink: DynSink, max_results: usize) -> Self {
        let researcher =
            Arc::new(ResearcherAgent::new(search, model.clone()).with_max_results(max_results));
        let document_creator = Arc::new(DocumentCreatorAgent::new(model.clone(), sink));
        Self {
            supervisor: SupervisorAgent::new(model, researcher, document_creator),
        }
    }

    /// Build production clients (OpenAI + Tavily + markdown files) from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.llm.provider != "openai" {
            bail!("unsupported llm.provider '{}'", config.llm.provider);
        }

        let llm_key = config
            .llm_api_key()
            .context("LLM API key is required to run the pipeline")?;
        let search_key = config
            .search_api_key()
            .context("search API key is required to run the pipeline")?;

        let model: DynModel = Arc::new(
            OpenAiChatModel::new(llm_key, config.llm.model.clone(), config.llm.temperature)
                .with_base_url(config.llm.base_url.clone()),
        );
        let search: DynSearch = Arc::new(TavilyClient::with_base_url(
            search_key,
            config.search.base_url.clone(),
        ));
        let sink: DynSink = Arc::new(MarkdownFileSink::new(config.output.dir.clone()));

        Ok(Self::new(search, model, sink, config.search.max_results))
    }

    /// Run the whole workflow for one company and return the terminal message.
    pub async fn run(&self, company_name: &str) -> Result<HandoffMessage> {
        let company_name = company_name.trim();
        if company_name.is_empty() {
            bail!("company name must be a non-empty string");
        }

        let initial = HandoffMessage::new(
            TaskName::ResearchCompany,
            NextAgent::Supervisor,
            Status::Pending,
            payload([("company_name", Value::from(company_name))]),
        );
        Ok(self.supervisor.run(initial).await)
    }
}
