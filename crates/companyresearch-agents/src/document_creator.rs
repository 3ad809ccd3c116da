//! Document Creator agent: renders research JSON into a markdown report and
//! hands it to the report sink.

use companyresearch_core::{
    AgentError, CompletionRequest, DynModel, DynSink, HandoffMessage, NextAgent, Payload,
    TaskName,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::agent::{HandoffAgent, StepTimer};

/// Body of the Sources section when research carries no URLs.
pub const NO_SOURCES_SENTENCE: &str = "No sources were provided.";

/// Boilerplate that must never reach a report.
pub const FORBIDDEN_PHRASE: &str = "Details were limited in the research results.";

const SOURCES_HEADING: &str = "## Sources";

const SYSTEM_PROMPT: &str = "You are a document creation assistant. \
Given structured research data about a company, write a clear, well-organized markdown report \
using headings, bullet points and short paragraphs. \
Use ONLY the information present in the JSON; never invent products, figures or boilerplate text \
such as 'Not available' or 'No products listed'. \
If a field is an empty string or an empty list, omit that section entirely instead of writing placeholder prose. \
If the JSON has a non-empty 'sources' list, add a '## Sources' section rendering each URL as a bullet '- URL'. \
If 'sources' is empty or missing, still add a '## Sources' section containing exactly the sentence \
'No sources were provided.' and nothing else. \
Never write the phrase 'Details were limited in the research results.' anywhere.";

/// Research fields that back an optional report section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionField {
    Summary,
    Products,
    Financials,
    Competitors,
    Sources,
}

/// Heading keywords per field. Specific fields come before the generic
/// summary/overview match, so "Financial Overview" maps to financials.
const HEADING_KEYWORDS: [(SectionField, &[&str]); 5] = [
    (SectionField::Sources, &["source", "reference"]),
    (SectionField::Products, &["product"]),
    (SectionField::Financials, &["financ"]),
    (SectionField::Competitors, &["competit"]),
    (SectionField::Summary, &["summary", "overview"]),
];

impl SectionField {
    fn from_heading(heading: &str) -> Option<Self> {
        let title = heading.trim_start().trim_start_matches('#').trim().to_lowercase();
        HEADING_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| title.contains(keyword)))
            .map(|(field, _)| *field)
    }

    fn key(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Products => "products",
            Self::Financials => "financials",
            Self::Competitors => "competitors",
            Self::Sources => "sources",
        }
    }
}

fn field_is_empty(research: &Payload, key: &str) -> bool {
    match research.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Source URLs listed in the research record.
pub fn research_sources(research: &Payload) -> Vec<String> {
    research
        .get("sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Canonical `## Sources` section for a list of URLs.
pub fn sources_section(sources: &[String]) -> String {
    if sources.is_empty() {
        format!("{SOURCES_HEADING}\n\n{NO_SOURCES_SENTENCE}\n")
    } else {
        let bullets: Vec<String> = sources.iter().map(|url| format!("- {url}")).collect();
        format!("{SOURCES_HEADING}\n\n{}\n", bullets.join("\n"))
    }
}

/// ATX heading level (1-6) of a markdown line.
fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|byte| *byte == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    (rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')).then_some(hashes)
}

/// A heading of the draft and the lines up to the next heading.
struct DraftSection<'a> {
    level: usize,
    heading: &'a str,
    body: Vec<&'a str>,
}

/// Markdown after rule enforcement plus a note for every repair applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcedReport {
    pub markdown: String,
    pub fixes: Vec<String>,
}

/// Apply the rendering rules the model was asked to follow.
///
/// Sections at any heading level below the title are checked: those backed
/// by an empty research field are dropped along with their subsections, any
/// Sources section is replaced by one generated from `research.sources`, and
/// the forbidden phrase is stripped.
pub fn enforce_rendering_rules(markdown: &str, research: &Payload) -> EnforcedReport {
    let mut fixes = Vec::new();

    let mut text = markdown.replace("\r\n", "\n");
    if text.contains(FORBIDDEN_PHRASE) {
        text = text.replace(FORBIDDEN_PHRASE, "");
        fixes.push("removed_forbidden_phrase".to_string());
    }

    let mut preamble: Vec<&str> = Vec::new();
    let mut sections: Vec<DraftSection<'_>> = Vec::new();
    let mut in_fence = false;
    let mut title_seen = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        let level = if in_fence { None } else { heading_level(line) };
        match level {
            // The first H1 before any section is the report title.
            Some(1) if !title_seen && sections.is_empty() => {
                title_seen = true;
                preamble.push(line);
            }
            Some(level) => sections.push(DraftSection {
                level,
                heading: line,
                body: Vec::new(),
            }),
            None => match sections.last_mut() {
                Some(section) => section.body.push(line),
                None => preamble.push(line),
            },
        }
    }

    let canonical_sources = sources_section(&research_sources(research));
    let mut saw_sources = false;
    let mut kept: Vec<String> = Vec::new();
    // Sections nested below a removed heading go with it.
    let mut removing: Option<(usize, SectionField)> = None;
    for section in sections {
        let field = SectionField::from_heading(section.heading);
        if let Some((level, parent)) = removing {
            if section.level > level && field != Some(SectionField::Sources) {
                let fix = match parent {
                    SectionField::Sources => "rewrote_sources_section".to_string(),
                    other => format!("dropped_empty_section:{}", other.key()),
                };
                if !fixes.contains(&fix) {
                    fixes.push(fix);
                }
                continue;
            }
            removing = None;
        }

        match field {
            Some(SectionField::Sources) => {
                let written = format!(
                    "{}\n\n{}\n",
                    section.heading.trim(),
                    section.body.join("\n").trim()
                );
                if saw_sources || written != canonical_sources {
                    fixes.push("rewrote_sources_section".to_string());
                }
                saw_sources = true;
                removing = Some((section.level, SectionField::Sources));
            }
            Some(field) if field_is_empty(research, field.key()) => {
                fixes.push(format!("dropped_empty_section:{}", field.key()));
                removing = Some((section.level, field));
            }
            _ => {
                let body = section.body.join("\n");
                kept.push(format!("{}\n{body}", section.heading).trim_end().to_string());
            }
        }
    }
    if !saw_sources {
        fixes.push("added_sources_section".to_string());
    }

    let mut blocks: Vec<String> = Vec::new();
    let preamble = preamble.join("\n");
    if !preamble.trim().is_empty() {
        blocks.push(preamble.trim().to_string());
    }
    blocks.extend(kept);
    blocks.push(canonical_sources.trim_end().to_string());

    let mut rendered = blocks.join("\n\n");
    while rendered.contains("\n\n\n") {
        rendered = rendered.replace("\n\n\n", "\n\n");
    }
    rendered.push('\n');

    EnforcedReport {
        markdown: rendered,
        fixes,
    }
}

/// Turns research JSON into a report file.
pub struct DocumentCreatorAgent {
    model: DynModel,
    sink: DynSink,
}

impl DocumentCreatorAgent {
    pub fn new(model: DynModel, sink: DynSink) -> Self {
        Self { model, sink }
    }

    fn validate<'m>(
        &self,
        message: &'m HandoffMessage,
    ) -> Result<(&'m str, &'m Payload), AgentError> {
        if message.next_agent != NextAgent::DocumentCreator {
            return Err(AgentError::validation(format!(
                "DocumentCreator received message addressed to {}",
                message.next_agent
            )));
        }
        if message.task_name != TaskName::CreateReport {
            return Err(AgentError::validation(format!(
                "DocumentCreator cannot handle task_name={}",
                message.task_name
            )));
        }
        match (
            message.payload_str("company_name"),
            message.payload_object("research"),
        ) {
            (Some(company), Some(research)) => Ok((company, research)),
            _ => Err(AgentError::validation(
                "DocumentCreator requires 'company_name' and 'research' in payload",
            )),
        }
    }

    async fn create(
        &self,
        company: &str,
        research: &Payload,
    ) -> Result<(std::path::PathBuf, Vec<String>), AgentError> {
        let research_json = serde_json::to_string_pretty(research)
            .map_err(|err| AgentError::validation(format!("research is not serialisable: {err}")))?;

        let request = CompletionRequest::new(
            SYSTEM_PROMPT,
            format!(
                "Company name: {company}\n\nStructured research JSON:\n{research_json}\n\nWrite the full markdown report now."
            ),
        );
        let draft = self.model.complete(&request).await?;

        let report = enforce_rendering_rules(&draft, research);
        if !report.fixes.is_empty() {
            warn!(fixes = ?report.fixes, "report draft violated rendering rules");
        }

        let path = self.sink.write(company, &report.markdown)?;
        Ok((path, report.fixes))
    }
}

#[async_trait::async_trait]
impl HandoffAgent for DocumentCreatorAgent {
    fn name(&self) -> NextAgent {
        NextAgent::DocumentCreator
    }

    #[instrument(name = "agent.document_creator", skip(self, message), fields(task = %message.task_name))]
    async fn run(&self, message: HandoffMessage) -> HandoffMessage {
        let timer = StepTimer::start(self.name());

        let outcome = match self.validate(&message) {
            Ok((company, research)) => self
                .create(company, research)
                .await
                .map(|created| (company.to_string(), created)),
            Err(err) => Err(err),
        };

        let reply = match outcome {
            Ok((company, (path, fixes))) => {
                info!(%company, path = %path.display(), "report created");
                let mut payload = message.payload.clone();
                payload.insert(
                    "message".to_string(),
                    Value::from(format!("Report created for {company}.")),
                );
                HandoffMessage::completed(TaskName::CreateReport, NextAgent::Supervisor, payload)
                    .with_file_path(path)
                    .with_meta("render_fixes", Value::from(fixes))
            }
            Err(err) => HandoffMessage::failed(
                message.task_name,
                NextAgent::Supervisor,
                message.payload.clone(),
                &err,
            ),
        };

        timer.finish(&reply);
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companyresearch_core::{payload, MarkdownFileSink, ScriptedModel, Status};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn research(sources: Value) -> Payload {
        payload([
            ("company", json!("Acme Co")),
            ("summary", json!("Acme builds anvils.")),
            ("products", json!(["Anvil"])),
            ("financials", json!("")),
            ("competitors", json!([])),
            ("sources", sources),
        ])
    }

    fn sources_body(markdown: &str) -> String {
        let start = markdown.find(SOURCES_HEADING).expect("sources heading") + SOURCES_HEADING.len();
        let rest = &markdown[start..];
        let end = rest.find("\n## ").unwrap_or(rest.len());
        rest[..end].trim().to_string()
    }

    fn request(payload: Payload) -> HandoffMessage {
        HandoffMessage::new(
            TaskName::CreateReport,
            NextAgent::DocumentCreator,
            Status::InProgress,
            payload,
        )
    }

    #[test]
    fn empty_sources_render_exact_sentence() {
        let draft = "# Acme Co\n\n## Summary\nAcme builds anvils.\n\n## Sources\nNone found.\n";
        let report = enforce_rendering_rules(draft, &research(json!([])));
        assert_eq!(sources_body(&report.markdown), NO_SOURCES_SENTENCE);
        assert_eq!(report.fixes, vec!["rewrote_sources_section"]);
    }

    #[test]
    fn missing_sources_field_still_gets_section() {
        let mut research = research(json!([]));
        research.remove("sources");
        let report = enforce_rendering_rules("# Acme Co\n", &research);
        assert_eq!(sources_body(&report.markdown), NO_SOURCES_SENTENCE);
        assert_eq!(report.fixes, vec!["added_sources_section"]);
    }

    #[test]
    fn sources_render_as_exact_bullets() {
        let draft = "# Acme Co\n\n## Sources\n- https://a\n- https://b\n- https://invented\n";
        let report =
            enforce_rendering_rules(draft, &research(json!(["https://a", "https://b"])));
        let body = sources_body(&report.markdown);
        let bullets: Vec<&str> = body.lines().collect();
        assert_eq!(bullets, vec!["- https://a", "- https://b"]);
    }

    #[test]
    fn canonical_draft_needs_no_fixes() {
        let draft = "# Acme Co\n\n## Summary\n\nAcme builds anvils.\n\n## Products\n\n- Anvil\n\n## Sources\n\n- https://a\n";
        let report = enforce_rendering_rules(draft, &research(json!(["https://a"])));
        assert!(report.fixes.is_empty(), "unexpected fixes: {:?}", report.fixes);
        assert_eq!(report.markdown, draft);
    }

    #[test]
    fn empty_fields_drop_their_sections_and_forbidden_phrase() {
        let draft = "# Acme Co\n\n## Summary\nAcme builds anvils. Details were limited in the research results.\n\n\
## Financials\nNot available.\n\n## Key Competitors\n- Nobody\n\n## Products\n- Anvil\n";
        let report = enforce_rendering_rules(draft, &research(json!([])));

        assert!(!report.markdown.contains(FORBIDDEN_PHRASE));
        assert!(!report.markdown.contains("## Financials"));
        assert!(!report.markdown.contains("## Key Competitors"));
        assert!(report.markdown.contains("## Products\n- Anvil"));
        assert!(report.markdown.contains("## Summary\nAcme builds anvils."));
        assert!(report.fixes.contains(&"removed_forbidden_phrase".to_string()));
        assert!(report
            .fixes
            .contains(&"dropped_empty_section:financials".to_string()));
        assert!(report
            .fixes
            .contains(&"dropped_empty_section:competitors".to_string()));
    }

    #[test]
    fn field_specific_headings_win_over_overview() {
        let mut research = research(json!([]));
        research.insert("products".to_string(), json!([]));
        let draft = "# Acme Co\n\n## Summary\nAcme builds anvils.\n\n\
## Financial Overview\nNot available.\n\n## Product Overview\nNo products listed.\n";

        let report = enforce_rendering_rules(draft, &research);

        assert!(!report.markdown.contains("Financial Overview"));
        assert!(!report.markdown.contains("Product Overview"));
        assert!(!report.markdown.contains("Not available."));
        assert!(report.markdown.contains("## Summary\nAcme builds anvils."));
        assert_eq!(
            report.fixes,
            vec![
                "dropped_empty_section:financials",
                "dropped_empty_section:products",
                "added_sources_section",
            ]
        );
    }

    #[test]
    fn rules_apply_at_every_heading_level() {
        let mut research = research(json!([]));
        research.insert("products".to_string(), json!([]));
        let draft = "# Acme Co\n\n# Products\nNo products listed.\n\n\
### Sources\n- https://invented.example\n";

        let report = enforce_rendering_rules(draft, &research);

        assert_eq!(
            report.markdown,
            format!("# Acme Co\n\n## Sources\n\n{NO_SOURCES_SENTENCE}\n")
        );
        assert!(!report.markdown.contains("invented.example"));
        assert!(report
            .fixes
            .contains(&"dropped_empty_section:products".to_string()));
        assert!(report.fixes.contains(&"rewrote_sources_section".to_string()));
    }

    #[test]
    fn subsections_follow_their_parent() {
        let draft = "# Acme Co\n\n## Summary\nAcme builds anvils.\n\n### History\nFounded in 1949.\n\n\
## Financials\n### Revenue\nNot available.\n\n## Sources\n- https://a\n### More\n- https://invented\n";

        let report = enforce_rendering_rules(draft, &research(json!(["https://a"])));

        assert!(report.markdown.contains("### History\nFounded in 1949."));
        assert!(!report.markdown.contains("### Revenue"));
        assert!(!report.markdown.contains("### More"));
        assert!(!report.markdown.contains("https://invented"));
        assert_eq!(sources_body(&report.markdown), "- https://a");
        assert!(report.fixes.contains(&"rewrote_sources_section".to_string()));
    }

    #[test]
    fn headings_inside_code_fences_are_not_sections() {
        let draft = "# Acme Co\n\n## Summary\n```\n## Financials\n```\n";
        let report = enforce_rendering_rules(draft, &research(json!([])));
        assert!(report.markdown.contains("```\n## Financials\n```"));
        assert!(!report
            .fixes
            .contains(&"dropped_empty_section:financials".to_string()));
    }

    #[tokio::test]
    async fn report_is_written_and_path_returned() {
        let temp = TempDir::new().expect("temp dir");
        let model = Arc::new(ScriptedModel::new().otherwise(
            "# Acme Co\n\n## Summary\nAcme builds anvils.\n\n## Products\n- Anvil\n",
        ));
        let sink = Arc::new(MarkdownFileSink::new(temp.path()));
        let agent = DocumentCreatorAgent::new(model.clone(), sink);

        let reply = agent
            .run(request(payload([
                ("company_name", json!("Acme Co")),
                ("research", Value::Object(research(json!(["https://a"])))),
            ])))
            .await;

        assert_eq!(reply.status, Status::Completed);
        assert_eq!(reply.next_agent, NextAgent::Supervisor);
        assert_eq!(reply.payload["message"], "Report created for Acme Co.");
        let path = reply.file_path.expect("file path");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("## Sources\n\n- https://a"));

        let requests = model.requests();
        assert!(requests[0].user.contains("\"company\": \"Acme Co\""));
    }

    #[tokio::test]
    async fn missing_research_or_company_fails() {
        let temp = TempDir::new().expect("temp dir");
        let model = Arc::new(ScriptedModel::new().otherwise("# Report"));
        let agent =
            DocumentCreatorAgent::new(model.clone(), Arc::new(MarkdownFileSink::new(temp.path())));

        let cases = [
            payload([("company_name", json!("Acme Co"))]),
            payload([("research", Value::Object(research(json!([]))))]),
            payload([
                ("company_name", json!("Acme Co")),
                ("research", json!("not a mapping")),
            ]),
        ];
        for case in cases {
            let reply = agent.run(request(case)).await;
            assert_eq!(reply.status, Status::Failed);
            assert!(reply.file_path.is_none());
            assert!(!reply.error.unwrap_or_default().is_empty());
        }
        assert!(model.requests().is_empty());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn sink_failure_reports_io_error() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let agent = DocumentCreatorAgent::new(
            Arc::new(ScriptedModel::new().otherwise("# Acme Co")),
            Arc::new(MarkdownFileSink::new(blocker.join("outputs"))),
        );
        let reply = agent
            .run(request(payload([
                ("company_name", json!("Acme Co")),
                ("research", Value::Object(research(json!([])))),
            ])))
            .await;

        assert_eq!(reply.status, Status::Failed);
        assert_eq!(reply.meta["error_kind"], "io");
        assert!(reply.file_path.is_none());
    }
}
