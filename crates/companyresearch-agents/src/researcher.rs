//! Researcher agent: web search per section, then LLM extraction into a
//! fixed research schema.

use std::collections::HashSet;
use std::fmt::Write as _;

use companyresearch_core::{
    metrics, AgentError, CompletionRequest, DynModel, DynSearch, HandoffMessage, NextAgent,
    Payload, SearchResponse, TaskName,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::agent::{HandoffAgent, StepTimer};

pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Keys of the research object, in schema order.
pub const SCHEMA_KEYS: [&str; 6] = [
    "company",
    "summary",
    "products",
    "financials",
    "competitors",
    "sources",
];

const SYSTEM_PROMPT: &str = "You are a company research extraction engine. \
You receive pre-fetched web search texts about one company, grouped by section, plus a list of candidate source URLs. \
Using ONLY the provided texts, return strict JSON with exactly these keys: company, summary, products, financials, competitors, sources.\n\
- 'company': the company name.\n\
- 'summary': one to three short paragraphs on what the company is and its main business.\n\
- 'products': list of key product or solution names (strings).\n\
- 'financials': short prose on revenue, profit or other financial highlights.\n\
- 'competitors': list of competitor company names (strings). First infer the company's industry from the provided texts, then name competitors in that industry that the texts support.\n\
- 'sources': list of URLs; it is replaced programmatically, so an empty list is fine.\n\
Never fabricate facts that are not in the texts. When information is missing, use '' for strings and [] for lists; \
never write placeholders such as 'No information found' or 'Data not available'. \
Return ONLY the JSON object and nothing else.";

/// One of the five research topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Overview,
    Products,
    Financials,
    Competitors,
    News,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Overview,
        Section::Products,
        Section::Financials,
        Section::Competitors,
        Section::News,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Section::Overview => "overview",
            Section::Products => "products",
            Section::Financials => "financials",
            Section::Competitors => "competitors",
            Section::News => "news",
        }
    }

    /// Fixed query template; only the company name is interpolated.
    pub fn query(&self, company: &str) -> String {
        match self {
            Section::Overview => format!("{company} company overview background"),
            Section::Products => format!("{company} products services offerings list"),
            Section::Financials => format!("{company} financial results revenue profit growth"),
            Section::Competitors => {
                format!("{company} main competitors market analysis alternatives")
            }
            Section::News => format!("Latest news about {company}"),
        }
    }
}

/// Queries for every section, in section order.
pub fn build_queries(company: &str) -> Vec<(Section, String)> {
    Section::ALL
        .iter()
        .map(|section| (*section, section.query(company)))
        .collect()
}

/// Answer first, then every non-empty result content, separated by blank lines.
pub fn section_text(response: &SearchResponse) -> String {
    let answer = response
        .answer
        .as_deref()
        .map(str::trim)
        .filter(|answer| !answer.is_empty());
    let contents = response
        .results
        .iter()
        .filter_map(|hit| hit.content.as_deref())
        .filter(|content| !content.is_empty());

    answer.into_iter().chain(contents).collect::<Vec<_>>().join("\n\n")
}

/// Distinct result URLs across all responses, in first-seen order.
///
/// Deduplication is by exact string equality after trimming.
pub fn collect_sources<'a, I>(responses: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a SearchResponse>,
{
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for response in responses {
        for url in response.results.iter().filter_map(|hit| hit.resolved_url()) {
            if seen.insert(url.to_string()) {
                sources.push(url.to_string());
            }
        }
    }
    sources
}

/// Parse LLM output as a JSON object, falling back to the text between the
/// first `{` and the last `}`.
pub fn parse_llm_json(raw: &str) -> Result<Map<String, Value>, AgentError> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(direct) => {
            let sliced = match (raw.find('{'), raw.rfind('}')) {
                (Some(start), Some(end)) if end > start => &raw[start..=end],
                _ => {
                    metrics::record_parse_fallback(false);
                    return Err(AgentError::parse(format!(
                        "LLM output is not valid JSON: {direct}"
                    )));
                }
            };
            match serde_json::from_str::<Value>(sliced) {
                Ok(value) => {
                    metrics::record_parse_fallback(true);
                    warn!(error = %direct, "recovered research JSON by brace slicing");
                    value
                }
                Err(err) => {
                    metrics::record_parse_fallback(false);
                    return Err(AgentError::parse(format!(
                        "LLM output is not valid JSON: {err}"
                    )));
                }
            }
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(AgentError::parse(format!(
            "LLM output must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalised research record handed to the Document Creator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyResearch {
    pub company: String,
    pub summary: String,
    pub products: Vec<String>,
    pub financials: String,
    pub competitors: Vec<String>,
    pub sources: Vec<String>,
}

impl CompanyResearch {
    /// Apply schema defaults to parsed LLM output.
    ///
    /// Keys outside the schema are dropped and values of the wrong type count
    /// as absent. `sources` is always left empty here; the caller owns it.
    pub fn from_extracted(extracted: &Map<String, Value>, company_name: &str) -> Self {
        let company = string_field(extracted, "company")
            .filter(|company| !company.is_empty())
            .unwrap_or_else(|| company_name.to_string());

        Self {
            company,
            summary: string_field(extracted, "summary").unwrap_or_default(),
            products: list_field(extracted, "products"),
            financials: string_field(extracted, "financials").unwrap_or_default(),
            competitors: list_field(extracted, "competitors"),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn into_payload(self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
}

fn list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn render_user_prompt(company: &str, sections: &[(Section, String)], sources: &[String]) -> String {
    let mut prompt = format!("Company name: {company}\n\n");
    for (section, text) in sections {
        let mut label = section.label().to_string();
        if let Some(first) = label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let _ = write!(prompt, "{label} texts:\n{text}\n\n");
    }
    let _ = write!(
        prompt,
        "Candidate source URLs (one per line):\n{}\n\nProduce the strict JSON now.",
        sources.join("\n")
    );
    prompt
}

/// Researches one company per message addressed to it.
pub struct ResearcherAgent {
    search: DynSearch,
    model: DynModel,
    max_results: usize,
}

impl ResearcherAgent {
    pub fn new(search: DynSearch, model: DynModel) -> Self {
        Self {
            search,
            model,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn validate<'m>(&self, message: &'m HandoffMessage) -> Result<&'m str, AgentError> {
        if message.next_agent != NextAgent::Researcher {
            return Err(AgentError::validation(format!(
                "Researcher received message addressed to {}",
                message.next_agent
            )));
        }
        if message.task_name != TaskName::CompanyResearch {
            return Err(AgentError::validation(format!(
                "Researcher cannot handle task_name={}",
                message.task_name
            )));
        }
        message.payload_str("company_name").ok_or_else(|| {
            AgentError::validation("Researcher requires 'company_name' in payload")
        })
    }

    async fn research(&self, company: &str) -> Result<CompanyResearch, AgentError> {
        let mut responses = Vec::with_capacity(Section::ALL.len());
        for (section, query) in build_queries(company) {
            let response = self
                .search
                .search(&query, self.max_results)
                .await
                .map_err(|err| {
                    AgentError::ExternalCall(format!(
                        "search failed for {} section: {err}",
                        section.label()
                    ))
                })?;
            debug!(
                section = section.label(),
                results = response.results.len(),
                "section search complete"
            );
            responses.push((section, response));
        }

        let texts: Vec<(Section, String)> = responses
            .iter()
            .map(|(section, response)| (*section, section_text(response)))
            .collect();
        let sources = collect_sources(responses.iter().map(|(_, response)| response));

        let request = CompletionRequest::new(
            SYSTEM_PROMPT,
            render_user_prompt(company, &texts, &sources),
        );
        let raw = self.model.complete(&request).await?;
        let extracted = parse_llm_json(&raw)?;

        Ok(CompanyResearch::from_extracted(&extracted, company).with_sources(sources))
    }
}

#[async_trait::async_trait]
impl HandoffAgent for ResearcherAgent {
    fn name(&self) -> NextAgent {
        NextAgent::Researcher
    }

    #[instrument(name = "agent.researcher", skip(self, message), fields(task = %message.task_name))]
    async fn run(&self, message: HandoffMessage) -> HandoffMessage {
        let timer = StepTimer::start(self.name());

        let outcome = match self.validate(&message) {
            Ok(company) => {
                info!(%company, "researching company");
                self.research(company).await
            }
            Err(err) => Err(err),
        };

        let reply = match outcome {
            Ok(research) => {
                info!(
                    company = %research.company,
                    products = research.products.len(),
                    competitors = research.competitors.len(),
                    sources = research.sources.len(),
                    "research normalised"
                );
                HandoffMessage::completed(
                    TaskName::CompanyResearch,
                    NextAgent::Supervisor,
                    research.into_payload(),
                )
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
    use companyresearch_core::{
        payload, HitSource, ScriptedModel, SearchHit, StaticSearch, Status,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn request(company: &str) -> HandoffMessage {
        HandoffMessage::new(
            TaskName::CompanyResearch,
            NextAgent::Researcher,
            Status::InProgress,
            payload([("company_name", json!(company))]),
        )
    }

    fn fixture_search() -> StaticSearch {
        StaticSearch::new(SearchResponse::default())
            .with_route(
                "overview",
                SearchResponse {
                    answer: Some(" Acme Co builds anvils. ".to_string()),
                    results: vec![
                        SearchHit::with_url("https://acme.example/about", "Founded in 1949."),
                        SearchHit {
                            link: Some("https://wiki.example/acme".to_string()),
                            content: Some("Acme is a holding company.".to_string()),
                            ..SearchHit::default()
                        },
                    ],
                },
            )
            .with_route(
                "products",
                SearchResponse {
                    answer: None,
                    results: vec![
                        SearchHit::with_url("https://acme.example/about", "Anvils, rockets."),
                        SearchHit {
                            source: Some(HitSource {
                                url: None,
                                id: Some("https://catalog.example/acme".to_string()),
                            }),
                            content: Some("Portable holes.".to_string()),
                            ..SearchHit::default()
                        },
                    ],
                },
            )
    }

    #[test]
    fn queries_interpolate_company_only() {
        let rendered = build_queries("Acme Co")
            .into_iter()
            .map(|(section, query)| format!("{}: {}", section.label(), query))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(rendered, @r###"
        overview: Acme Co company overview background
        products: Acme Co products services offerings list
        financials: Acme Co financial results revenue profit growth
        competitors: Acme Co main competitors market analysis alternatives
        news: Latest news about Acme Co
        "###);
    }

    #[test]
    fn section_text_puts_answer_before_contents() {
        let response = SearchResponse {
            answer: Some("  Short answer. ".to_string()),
            results: vec![
                SearchHit::with_url("https://a.example", "First snippet."),
                SearchHit::with_url("https://b.example", ""),
                SearchHit::with_url("https://c.example", "Second snippet."),
            ],
        };
        assert_eq!(
            section_text(&response),
            "Short answer.\n\nFirst snippet.\n\nSecond snippet."
        );
        assert_eq!(section_text(&SearchResponse::default()), "");
    }

    #[test]
    fn sources_are_deduplicated_in_first_seen_order() {
        let first = SearchResponse {
            answer: None,
            results: vec![
                SearchHit::with_url("https://b.example", "b"),
                SearchHit::with_url("https://a.example", "a"),
            ],
        };
        let second = SearchResponse {
            answer: None,
            results: vec![
                SearchHit {
                    link: Some("https://a.example".to_string()),
                    ..SearchHit::default()
                },
                SearchHit {
                    source: Some(HitSource {
                        url: Some(" https://c.example ".to_string()),
                        id: Some("ignored".to_string()),
                    }),
                    ..SearchHit::default()
                },
                SearchHit::default(),
            ],
        };
        assert_eq!(
            collect_sources([&first, &second]),
            vec!["https://b.example", "https://a.example", "https://c.example"]
        );
    }

    #[test]
    fn parse_recovers_json_wrapped_in_prose() {
        let raw = "Here you go:\n```json\n{\"company\": \"Acme Co\", \"summary\": \"Anvils.\"}\n```";
        let parsed = parse_llm_json(raw).unwrap();
        assert_eq!(parsed["summary"], "Anvils.");
    }

    #[test]
    fn parse_rejects_unrecoverable_output() {
        let err = parse_llm_json("I could not find anything").unwrap_err();
        assert_eq!(err.kind(), "parse");

        let err = parse_llm_json("{ broken } and }").unwrap_err();
        assert_eq!(err.kind(), "parse");

        let err = parse_llm_json("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn schema_defaults_fill_missing_and_mistyped_fields() {
        let extracted = json!({
            "summary": "Acme builds anvils.",
            "products": ["Anvil", 42, " ", "Rocket"],
            "financials": null,
            "competitors": "Wile E. Industries",
            "ceo": "Road Runner"
        });
        let research =
            CompanyResearch::from_extracted(extracted.as_object().unwrap(), "Acme Co");

        assert_eq!(research.company, "Acme Co");
        assert_eq!(research.summary, "Acme builds anvils.");
        assert_eq!(research.products, vec!["Anvil", "Rocket"]);
        assert_eq!(research.financials, "");
        assert!(research.competitors.is_empty());
        assert!(research.sources.is_empty());

        let payload = research.into_payload();
        let mut keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        let mut expected = SCHEMA_KEYS.to_vec();
        keys.sort_unstable();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn llm_sources_are_replaced_by_search_urls() {
        let search = Arc::new(fixture_search());
        let model = Arc::new(ScriptedModel::new().otherwise(
            r#"{"company":"Acme Co","summary":"Anvils.","products":["Anvil"],"financials":"","competitors":[],"sources":["https://invented.example"]}"#,
        ));
        let agent = ResearcherAgent::new(search.clone(), model.clone());

        let reply = agent.run(request("Acme Co")).await;

        assert_eq!(reply.status, Status::Completed);
        assert_eq!(reply.next_agent, NextAgent::Supervisor);
        assert_eq!(reply.task_name, TaskName::CompanyResearch);
        assert_eq!(
            reply.payload["sources"],
            json!([
                "https://acme.example/about",
                "https://wiki.example/acme",
                "https://catalog.example/acme"
            ])
        );
        assert_eq!(search.queries().len(), 5);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.contains("Overview texts:\nAcme Co builds anvils."));
        assert!(requests[0].user.contains("https://catalog.example/acme"));
        assert!(requests[0].system.contains("infer the company's industry"));
    }

    #[tokio::test]
    async fn missing_company_name_fails_validation() {
        let agent = ResearcherAgent::new(
            Arc::new(StaticSearch::new(SearchResponse::default())),
            Arc::new(ScriptedModel::new()),
        );

        for payload in [Payload::new(), payload([("company_name", json!("  "))])] {
            let message = HandoffMessage::new(
                TaskName::CompanyResearch,
                NextAgent::Researcher,
                Status::InProgress,
                payload,
            );
            let reply = agent.run(message).await;
            assert_eq!(reply.status, Status::Failed);
            assert!(!reply.error.unwrap_or_default().is_empty());
            assert_eq!(reply.meta["error_kind"], "validation");
        }
    }

    #[tokio::test]
    async fn misaddressed_messages_are_rejected() {
        let agent = ResearcherAgent::new(
            Arc::new(StaticSearch::new(SearchResponse::default())),
            Arc::new(ScriptedModel::new()),
        );

        let mut wrong_agent = request("Acme Co");
        wrong_agent.next_agent = NextAgent::DocumentCreator;
        let reply = agent.run(wrong_agent).await;
        assert_eq!(reply.status, Status::Failed);
        assert!(reply.error.unwrap_or_default().contains("addressed to document_creator"));

        let mut wrong_task = request("Acme Co");
        wrong_task.task_name = TaskName::CreateReport;
        let reply = agent.run(wrong_task).await;
        assert_eq!(reply.status, Status::Failed);
        assert!(reply.error.unwrap_or_default().contains("task_name=create_report"));
    }

    #[tokio::test]
    async fn search_failure_aborts_without_retry() {
        let search = Arc::new(StaticSearch::failing("quota exhausted"));
        let model = Arc::new(ScriptedModel::new().otherwise("{}"));
        let agent = ResearcherAgent::new(search.clone(), model.clone());

        let reply = agent.run(request("Acme Co")).await;

        assert_eq!(reply.status, Status::Failed);
        assert_eq!(
            reply.error.as_deref(),
            Some("search failed for overview section: quota exhausted")
        );
        assert_eq!(reply.meta["error_kind"], "external_call");
        assert_eq!(search.queries().len(), 1);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn unparseable_llm_output_fails_with_parse_error() {
        let agent = ResearcherAgent::new(
            Arc::new(fixture_search()),
            Arc::new(ScriptedModel::new().otherwise("Sorry, no JSON today.")),
        );

        let reply = agent.run(request("Acme Co")).await;
        assert_eq!(reply.status, Status::Failed);
        assert_eq!(reply.meta["error_kind"], "parse");
        assert_eq!(reply.payload["company_name"], "Acme Co");
    }
}
