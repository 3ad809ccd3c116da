//! Supervisor agent: drives the fixed handoff order
//! caller → Supervisor → Researcher → Supervisor → Document Creator → Supervisor → caller.

use std::sync::Arc;

use companyresearch_core::{
    payload, AgentError, CompletionRequest, DynModel, HandoffMessage, NextAgent, Payload, Status,
    TaskName, TraceCollector,
};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::agent::{HandoffAgent, StepTimer};

const SYSTEM_PROMPT: &str = "You are a supervisor agent coordinating a company research workflow. \
Understand the user request and restate it as clear, concise instructions for a researcher agent. \
Do NOT perform the research yourself.";

pub struct SupervisorAgent {
    model: DynModel,
    researcher: Arc<dyn HandoffAgent>,
    document_creator: Arc<dyn HandoffAgent>,
}

impl SupervisorAgent {
    pub fn new(
        model: DynModel,
        researcher: Arc<dyn HandoffAgent>,
        document_creator: Arc<dyn HandoffAgent>,
    ) -> Self {
        Self {
            model,
            researcher,
            document_creator,
        }
    }

    fn validate<'m>(&self, message: &'m HandoffMessage) -> Result<&'m str, AgentError> {
        if message.next_agent != NextAgent::Supervisor {
            return Err(AgentError::validation(format!(
                "Supervisor must be entered with next_agent=supervisor, got {}",
                message.next_agent
            )));
        }
        if message.task_name != TaskName::ResearchCompany {
            return Err(AgentError::validation(format!(
                "Unsupported task_name for supervisor: {}",
                message.task_name
            )));
        }
        if message.status.is_terminal() {
            return Err(AgentError::validation(format!(
                "Supervisor cannot start from a settled message (status={})",
                message.status
            )));
        }
        message.payload_str("company_name").ok_or_else(|| {
            AgentError::validation("Supervisor requires 'company_name' in payload to start workflow")
        })
    }

    /// Advisory restatement of the request; never copied into a payload.
    async fn interpret_request(&self, company: &str) -> Result<String, AgentError> {
        let request = CompletionRequest::new(
            SYSTEM_PROMPT,
            format!(
                "User request: Research the company {company}\n\n\
Summarize the request as a short research instruction for a researcher agent."
            ),
        );
        Ok(self.model.complete(&request).await?.trim().to_string())
    }

    /// Send `outbound` to `delegate` and check the reply came back addressed to us.
    async fn delegate(
        &self,
        delegate: &dyn HandoffAgent,
        outbound: HandoffMessage,
        trace: &mut TraceCollector,
    ) -> Result<HandoffMessage, Delegation> {
        let target = delegate.name();
        let sent_status = outbound.status;
        trace.record(
            NextAgent::Supervisor.as_str(),
            format!("dispatched {} to {target}", outbound.task_name),
        );

        let reply = delegate.run(outbound).await;
        trace.record(target.as_str(), reply.status.as_str());

        if reply.next_agent != NextAgent::Supervisor {
            let err = AgentError::validation(format!(
                "{target} replied to {} instead of supervisor",
                reply.next_agent
            ));
            return Err(Delegation::Rejected { agent: target, err });
        }
        if !sent_status.can_transition_to(reply.status) {
            let err = AgentError::validation(format!(
                "{target} moved {} from {sent_status} to {}; expected completed or failed",
                reply.task_name, reply.status
            ));
            return Err(Delegation::Rejected { agent: target, err });
        }
        if reply.status != Status::Completed {
            return Err(Delegation::Failed {
                agent: target,
                reply,
            });
        }
        Ok(reply)
    }

    async fn orchestrate(
        &self,
        company: &str,
        trace: &mut TraceCollector,
    ) -> Result<HandoffMessage, Delegation> {
        let instruction = self
            .interpret_request(company)
            .await
            .map_err(|err| Delegation::Rejected {
                agent: NextAgent::Supervisor,
                err,
            })?;
        debug!(%instruction, "interpreted request");

        let to_researcher = HandoffMessage::new(
            TaskName::CompanyResearch,
            NextAgent::Researcher,
            Status::InProgress,
            payload([("company_name", Value::from(company))]),
        )
        .with_meta("instruction", Value::from(instruction));
        let research = self
            .delegate(self.researcher.as_ref(), to_researcher, trace)
            .await?
            .payload;

        let to_document_creator = HandoffMessage::new(
            TaskName::CreateReport,
            NextAgent::DocumentCreator,
            Status::InProgress,
            payload([
                ("company_name", Value::from(company)),
                ("research", Value::Object(research.clone())),
            ]),
        );
        let report = self
            .delegate(self.document_creator.as_ref(), to_document_creator, trace)
            .await?;

        let Some(file_path) = report.file_path else {
            return Err(Delegation::Rejected {
                agent: NextAgent::DocumentCreator,
                err: AgentError::validation("Document creator did not produce a file"),
            });
        };

        trace.record(NextAgent::Supervisor.as_str(), "returned report to caller");
        Ok(HandoffMessage::completed(
            TaskName::ResearchCompany,
            NextAgent::None,
            payload([
                (
                    "message",
                    Value::from(format!("Research report for {company} created successfully.")),
                ),
                ("research", Value::Object(research)),
            ]),
        )
        .with_file_path(file_path))
    }
}

/// Why a delegated step did not complete.
enum Delegation {
    /// The delegate returned `failed`; its error is passed on verbatim.
    Failed {
        agent: NextAgent,
        reply: HandoffMessage,
    },
    /// The Supervisor itself refused to continue.
    Rejected { agent: NextAgent, err: AgentError },
}

impl Delegation {
    fn into_message(self, company: &Payload) -> HandoffMessage {
        match self {
            Delegation::Failed { agent, reply } => {
                let error = reply
                    .error
                    .clone()
                    .filter(|error| !error.trim().is_empty())
                    .unwrap_or_else(|| format!("{agent} did not complete successfully"));
                let kind = reply
                    .meta
                    .get("error_kind")
                    .cloned()
                    .unwrap_or_else(|| Value::from("external_call"));

                let mut message = HandoffMessage::new(
                    TaskName::ResearchCompany,
                    NextAgent::None,
                    Status::Failed,
                    company.clone(),
                );
                message.error = Some(error);
                message
                    .with_meta("error_kind", kind)
                    .with_meta("failed_agent", Value::from(agent.as_str()))
                    .with_meta(
                        "delegate_reply",
                        serde_json::to_value(&reply).unwrap_or_default(),
                    )
            }
            Delegation::Rejected { agent, err } => HandoffMessage::failed(
                TaskName::ResearchCompany,
                NextAgent::None,
                company.clone(),
                &err,
            )
            .with_meta("failed_agent", Value::from(agent.as_str())),
        }
    }
}

#[async_trait::async_trait]
impl HandoffAgent for SupervisorAgent {
    fn name(&self) -> NextAgent {
        NextAgent::Supervisor
    }

    #[instrument(name = "agent.supervisor", skip(self, message), fields(task = %message.task_name))]
    async fn run(&self, message: HandoffMessage) -> HandoffMessage {
        let timer = StepTimer::start(self.name());
        let mut trace = TraceCollector::new();
        trace.record(NextAgent::Supervisor.as_str(), "received research_company request");

        let reply = match self.validate(&message) {
            Ok(company) => {
                info!(%company, "starting research workflow");
                let company_payload = payload([("company_name", Value::from(company))]);
                match self.orchestrate(company, &mut trace).await {
                    Ok(done) => done,
                    Err(stop) => stop.into_message(&company_payload),
                }
            }
            Err(err) => HandoffMessage::failed(
                TaskName::ResearchCompany,
                NextAgent::None,
                message.payload.clone(),
                &err,
            )
            .with_meta("failed_agent", Value::from(NextAgent::Supervisor.as_str())),
        };

        if reply.status == Status::Failed {
            trace.record(NextAgent::Supervisor.as_str(), "workflow aborted");
        }
        let reply = reply.with_meta("trace", trace.to_value());
        timer.finish(&reply);
        reply
    }
}
