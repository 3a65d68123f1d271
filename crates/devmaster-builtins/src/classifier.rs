//! Intent classification.
//!
//! The classifier reads the user request and decides a [`TaskKind`]. With a
//! model attached it asks the model for a JSON verdict; without one, or when
//! the reply cannot be used, it falls back to ordered keyword rules where the
//! first match wins and anything unmatched is conversational chat.
//!
//! Either way the full [`Classification`] lands in `context["classification"]`
//! and in the metadata of the message the agent posts.

use crate::keywords::KeywordSet;
use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput, LlmClient};
use devmaster_core::{
    DevMasterError, DevMasterResult, Message, StateContainer, StateDelta, TaskKind,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are an intent classification agent for a software \
development platform. Classify the user's request into exactly one of these categories:
- fullstack_development: complete applications with frontend and backend
- backend_only: APIs, database design, server-side logic
- frontend_only: user interfaces and components
- code_review: reviewing and improving existing code
- debugging: finding and fixing bugs or errors
- documentation: documentation, READMEs or guides
- testing: unit, integration or end-to-end tests
- deployment: deployment, CI/CD, hosting
- conversational_chat: general questions, help or casual conversation

Respond with only a JSON object:
{\"primary_intent\": \"<category>\", \"confidence\": 0.0-1.0, \
\"keywords\": [\"...\"], \"complexity\": \"simple|medium|complex\", \
\"requires_context\": true|false, \"sub_intents\": [\"<category>\"], \
\"reasoning\": \"<one sentence>\"}";

/// Confidence assumed when the model omits it.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.8;
/// Confidence of a request no rule matched.
const UNMATCHED_CONFIDENCE: f64 = 0.5;
/// Below this a warning asks for clarification.
const LOW_CONFIDENCE: f64 = 0.7;
/// Below this the request is assumed to need more context.
const CONTEXT_CONFIDENCE: f64 = 0.6;
/// Requests this long are complex when nothing else says otherwise.
const LONG_REQUEST_CHARS: usize = 200;

/// Rough size of the work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Everything the classifier concluded about one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub task_kind: TaskKind,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub complexity: Complexity,
    pub requires_context: bool,
    /// Other kinds the request also touches, most relevant first.
    #[serde(default)]
    pub sub_intents: Vec<TaskKind>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Whether the verdict came from the model rather than keyword rules.
    #[serde(default)]
    pub llm_used: bool,
}

impl Classification {
    /// Fill in the warnings implied by confidence and context.
    fn with_warnings(mut self) -> Self {
        if self.confidence < LOW_CONFIDENCE {
            self.warnings.push(format!(
                "Low confidence ({:.2}) in intent classification. Consider clarifying the request.",
                self.confidence
            ));
        }
        if self.requires_context {
            self.warnings.push(
                "The request may need additional context. Consider asking for clarification."
                    .to_string(),
            );
        }
        self
    }

    /// One-paragraph summary posted as the classifier's message.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Classified request as: {} (confidence {:.2}, complexity {}).",
            self.task_kind, self.confidence, self.complexity
        );
        for warning in &self.warnings {
            summary.push(' ');
            summary.push_str(warning);
        }
        summary
    }
}

/// The JSON object the model is asked for.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    primary_intent: String,
    confidence: Option<f64>,
    #[serde(default)]
    keywords: Vec<String>,
    complexity: Option<Complexity>,
    #[serde(default)]
    requires_context: bool,
    #[serde(default)]
    sub_intents: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

fn parse_task_kind(raw: &str) -> Option<TaskKind> {
    serde_json::from_value(json!(raw.trim().to_lowercase())).ok()
}

/// Pull the outermost JSON object out of a model reply, fences and prose
/// included.
fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}

struct Rule {
    kind: TaskKind,
    keywords: KeywordSet,
}

pub struct IntentClassifierAgent {
    descriptor: AgentDescriptor,
    rules: Vec<Rule>,
    routes: HashMap<TaskKind, String>,
    simple: KeywordSet,
    complex: KeywordSet,
    vague: KeywordSet,
    llm: Option<Arc<LlmClient>>,
}

impl IntentClassifierAgent {
    pub const NAME: &'static str = "IntentClassifier";

    /// Classifier with the standard keyword rules and no handoff table, so the
    /// routing graph picks the next agent.
    pub fn new() -> DevMasterResult<Self> {
        let mut classifier = Self {
            descriptor: AgentDescriptor::new(
                Self::NAME,
                "Classifies user intent and determines the task type",
            ),
            rules: Vec::new(),
            routes: HashMap::new(),
            simple: KeywordSet::new(&["simple", "basic", "quick", "small", "demo", "example"])?,
            complex: KeywordSet::new(&[
                "complex", "advanced", "full", "complete", "production", "scalable",
            ])?,
            vague: KeywordSet::new(&["it", "this", "that", "the thing", "stuff", "something"])?,
            llm: None,
        };
        // Narrow kinds go first so "deploy my app" is not read as development.
        classifier = classifier
            .with_rule(
                TaskKind::Deployment,
                &["deploy", "deployment", "docker", "kubernetes", "ci/cd", "release", "hosting"],
            )?
            .with_rule(
                TaskKind::Testing,
                &["test", "tests", "unit test", "test suite", "coverage", "e2e"],
            )?
            .with_rule(
                TaskKind::Documentation,
                &["document", "documentation", "docs", "readme", "docstring"],
            )?
            .with_rule(
                TaskKind::FullstackDevelopment,
                &[
                    "build", "create", "develop", "make", "implement", "app", "application",
                    "website", "api", "backend", "frontend", "database", "full-stack",
                    "fullstack",
                ],
            )?
            .with_rule(
                TaskKind::CodeReview,
                &["review", "check", "analyze", "audit", "improve", "optimize", "refactor"],
            )?
            .with_rule(
                TaskKind::Debugging,
                &[
                    "debug", "fix", "error", "bug", "issue", "problem", "not working", "broken",
                    "crash",
                ],
            )?;
        Ok(classifier)
    }

    /// Ask `llm` first and keep the keyword rules as the fallback.
    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn with_rule<S: AsRef<str>>(mut self, kind: TaskKind, keywords: &[S]) -> DevMasterResult<Self> {
        self.rules.push(Rule {
            kind,
            keywords: KeywordSet::new(keywords)?,
        });
        Ok(self)
    }

    pub fn with_route(mut self, kind: TaskKind, agent: impl Into<String>) -> Self {
        self.routes.insert(kind, agent.into());
        self
    }

    pub fn route_for(&self, kind: TaskKind) -> Option<&str> {
        self.routes.get(&kind).map(String::as_str)
    }

    /// Keyword-rule classification. Confidence grows with the number of
    /// distinct keywords of the winning rule found in the request.
    pub fn classify(&self, request: &str) -> Classification {
        let hits: Vec<(TaskKind, Vec<String>)> = self
            .rules
            .iter()
            .map(|rule| (rule.kind, rule.keywords.find_all(request)))
            .filter(|(_, found)| !found.is_empty())
            .collect();

        let (task_kind, confidence, keywords, sub_intents) = match hits.split_first() {
            Some(((kind, found), rest)) => {
                let confidence = (0.4 + 0.15 * found.len() as f64).min(0.9);
                let mut others: Vec<TaskKind> = rest
                    .iter()
                    .map(|(k, _)| *k)
                    .filter(|k| k != kind)
                    .collect();
                others.dedup();
                (*kind, confidence, found.clone(), others)
            }
            None => (TaskKind::ConversationalChat, UNMATCHED_CONFIDENCE, Vec::new(), Vec::new()),
        };
        let reasoning = if keywords.is_empty() {
            "No task keywords matched; treating the request as conversation.".to_string()
        } else {
            format!("Matched {task_kind} keywords: {}.", keywords.join(", "))
        };

        Classification {
            task_kind,
            confidence,
            complexity: self.estimate_complexity(request, task_kind),
            requires_context: self.needs_context(request, confidence),
            sub_intents,
            keywords,
            reasoning,
            warnings: Vec::new(),
            llm_used: false,
        }
        .with_warnings()
    }

    /// Classify with the model when one is attached, else by keywords. A model
    /// error or an unusable reply falls back to keywords with a warning.
    pub async fn analyze(&self, request: &str) -> Classification {
        let Some(llm) = &self.llm else {
            return self.classify(request);
        };
        match self.classify_with_llm(llm, request).await {
            Ok(classification) => classification,
            Err(err) => {
                warn!(error = %err, "Model classification failed, falling back to keyword rules");
                let mut classification = self.classify(request);
                classification
                    .warnings
                    .push(format!("Model classification unavailable ({err}); used keyword rules."));
                classification
            }
        }
    }

    async fn classify_with_llm(
        &self,
        llm: &LlmClient,
        request: &str,
    ) -> DevMasterResult<Classification> {
        let prompt = format!(
            "Analyze this user request and classify the intent:\n\nUser Request: \"{request}\"\n\n\
             Provide your classification as a JSON object."
        );
        let reply = llm.complete(Some(SYSTEM_PROMPT), &[Message::user(prompt)]).await?;
        let raw = extract_json(&reply.content)
            .ok_or_else(|| DevMasterError::execution(Self::NAME, "no JSON object in model reply"))?;
        let verdict: ModelVerdict = serde_json::from_str(raw)?;
        let task_kind = parse_task_kind(&verdict.primary_intent).ok_or_else(|| {
            DevMasterError::execution(
                Self::NAME,
                format!("unknown intent '{}'", verdict.primary_intent),
            )
        })?;

        let confidence = verdict
            .confidence
            .unwrap_or(DEFAULT_MODEL_CONFIDENCE)
            .clamp(0.0, 1.0);
        let mut sub_intents: Vec<TaskKind> = verdict
            .sub_intents
            .iter()
            .filter_map(|raw| parse_task_kind(raw))
            .filter(|kind| *kind != task_kind)
            .collect();
        sub_intents.dedup();

        Ok(Classification {
            task_kind,
            confidence,
            complexity: verdict
                .complexity
                .unwrap_or_else(|| self.estimate_complexity(request, task_kind)),
            requires_context: verdict.requires_context || self.needs_context(request, confidence),
            sub_intents,
            keywords: verdict.keywords,
            reasoning: verdict.reasoning,
            warnings: Vec::new(),
            llm_used: true,
        }
        .with_warnings())
    }

    fn estimate_complexity(&self, request: &str, kind: TaskKind) -> Complexity {
        if self.simple.matches(request) {
            return Complexity::Simple;
        }
        if self.complex.matches(request) {
            return Complexity::Complex;
        }
        match kind {
            TaskKind::ConversationalChat | TaskKind::Documentation => Complexity::Simple,
            TaskKind::FullstackDevelopment if request.chars().count() > LONG_REQUEST_CHARS => {
                Complexity::Complex
            }
            _ => Complexity::Medium,
        }
    }

    fn needs_context(&self, request: &str, confidence: f64) -> bool {
        confidence < CONTEXT_CONFIDENCE || self.vague.matches(request)
    }
}

#[async_trait]
impl Agent for IntentClassifierAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let classification = self.analyze(&state.user_request).await;
        let kind = classification.task_kind;
        let next = self.route_for(kind);
        info!(
            task_kind = %kind,
            confidence = classification.confidence,
            complexity = %classification.complexity,
            llm_used = classification.llm_used,
            "Intent classified"
        );
        debug!(next = ?next, warnings = classification.warnings.len(), "Classification detail");

        let mut note = classification.summary();
        if let Some(next) = next {
            note.push_str(&format!(" Routing to {next}."));
        }
        let record = serde_json::to_value(&classification)?;
        let delta = StateDelta::new()
            .with_task_kind(kind)
            .with_context("classification", record.clone())
            .with_message(Message::agent(Self::NAME, note).with_metadata("classification", record));
        let output = AgentOutput::new(delta);
        Ok(match next {
            Some(next) => output.hand_off_to(next),
            None => output,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use devmaster_agent::MockBackend;
    use uuid::Uuid;

    fn state(request: &str) -> StateContainer {
        let mut state = StateContainer::new(Uuid::new_v4(), IntentClassifierAgent::NAME);
        state.user_request = request.into();
        state
    }

    fn scripted(reply: &str) -> Arc<LlmClient> {
        Arc::new(LlmClient::from_backend(Box::new(MockBackend::scripted([reply]))))
    }

    #[test]
    fn test_classify_standard_requests() {
        let classifier = IntentClassifierAgent::new().unwrap();
        let cases = [
            ("Build a todo list application", TaskKind::FullstackDevelopment),
            ("Please review my Python code", TaskKind::CodeReview),
            ("my login page is not working", TaskKind::Debugging),
            ("deploy my app to kubernetes", TaskKind::Deployment),
            ("write unit tests for the parser", TaskKind::Testing),
            ("update the README", TaskKind::Documentation),
            ("hello there", TaskKind::ConversationalChat),
            ("", TaskKind::ConversationalChat),
        ];
        for (request, expected) in cases {
            assert_eq!(classifier.classify(request).task_kind, expected, "request: {request:?}");
        }
    }

    #[test]
    fn test_custom_rule_runs_after_defaults() {
        let classifier = IntentClassifierAgent::new()
            .unwrap()
            .with_rule(TaskKind::FrontendOnly, &["landing page", "css"])
            .unwrap();
        assert_eq!(classifier.classify("tweak the css").task_kind, TaskKind::FrontendOnly);
        // "design" is not a development keyword, "landing page" is ours.
        assert_eq!(
            classifier.classify("design a landing page").task_kind,
            TaskKind::FrontendOnly
        );
    }

    #[test]
    fn test_keyword_confidence_and_sub_intents() {
        let classifier = IntentClassifierAgent::new().unwrap();

        let strong = classifier.classify("Build a database backed application");
        assert_eq!(strong.task_kind, TaskKind::FullstackDevelopment);
        assert_eq!(strong.keywords, vec!["build", "database", "application"]);
        assert!((strong.confidence - 0.85).abs() < 1e-9);
        assert!(!strong.requires_context);
        assert!(strong.warnings.is_empty());
        assert!(!strong.llm_used);

        let mixed = classifier.classify("deploy my app to kubernetes");
        assert_eq!(mixed.task_kind, TaskKind::Deployment);
        assert_eq!(mixed.sub_intents, vec![TaskKind::FullstackDevelopment]);
    }

    #[test]
    fn test_weak_match_asks_for_context() {
        let classifier = IntentClassifierAgent::new().unwrap();
        let weak = classifier.classify("fix it");
        assert_eq!(weak.task_kind, TaskKind::Debugging);
        assert!((weak.confidence - 0.55).abs() < 1e-9);
        assert!(weak.requires_context);
        assert_eq!(weak.warnings.len(), 2);
        assert!(weak.warnings[0].starts_with("Low confidence (0.55)"));
    }

    #[test]
    fn test_complexity_estimate() {
        let classifier = IntentClassifierAgent::new().unwrap();
        assert_eq!(
            classifier.classify("build a simple todo app").complexity,
            Complexity::Simple
        );
        assert_eq!(
            classifier.classify("build a scalable todo app").complexity,
            Complexity::Complex
        );
        assert_eq!(classifier.classify("build a todo app").complexity, Complexity::Medium);
        assert_eq!(classifier.classify("hello").complexity, Complexity::Simple);

        let long = format!("build a todo app {}", "with more detail ".repeat(15));
        assert_eq!(classifier.classify(&long).complexity, Complexity::Complex);
    }

    #[tokio::test]
    async fn test_execute_records_classification() {
        let classifier = IntentClassifierAgent::new().unwrap();
        let output = classifier.execute(&state("hi!")).await.unwrap();
        assert_eq!(output.delta.task_kind, Some(TaskKind::ConversationalChat));
        assert!(output.next_agent.is_none());

        let message = &output.delta.messages[0];
        assert!(message.content.starts_with(
            "Classified request as: conversational_chat (confidence 0.50, complexity simple)."
        ));
        assert!(message.content.contains("Low confidence (0.50)"));

        let record = &output.delta.context["classification"];
        assert_eq!(record["task_kind"], json!("conversational_chat"));
        assert_eq!(record["complexity"], json!("simple"));
        assert_eq!(record["requires_context"], json!(true));
        assert_eq!(record["llm_used"], json!(false));
        assert_eq!(record["warnings"].as_array().unwrap().len(), 2);
        assert_eq!(&message.metadata["classification"], record);
    }

    #[tokio::test]
    async fn test_execute_hands_off_through_route_table() {
        let classifier = IntentClassifierAgent::new()
            .unwrap()
            .with_route(TaskKind::Debugging, "DebuggingAgent");
        let output = classifier.execute(&state("fix this crash")).await.unwrap();
        assert_eq!(output.delta.task_kind, Some(TaskKind::Debugging));
        assert_eq!(output.next_agent.as_deref(), Some("DebuggingAgent"));
        assert!(output.delta.messages[0].content.ends_with("Routing to DebuggingAgent."));
    }

    #[tokio::test]
    async fn test_model_verdict_is_used() {
        let reply = r#"Here you go:
```json
{"primary_intent": "BACKEND_ONLY", "confidence": 0.92, "keywords": ["rest", "users"],
 "complexity": "medium", "requires_context": false,
 "sub_intents": ["testing", "not_a_kind", "backend_only"],
 "reasoning": "Asks for a REST API only."}
```"#;
        let classifier = IntentClassifierAgent::new().unwrap().with_llm(scripted(reply));

        let classification = classifier.analyze("Create a REST API for user management").await;
        assert!(classification.llm_used);
        assert_eq!(classification.task_kind, TaskKind::BackendOnly);
        assert!((classification.confidence - 0.92).abs() < 1e-9);
        assert_eq!(classification.complexity, Complexity::Medium);
        assert_eq!(classification.sub_intents, vec![TaskKind::Testing]);
        assert_eq!(classification.keywords, vec!["rest", "users"]);
        assert_eq!(classification.reasoning, "Asks for a REST API only.");
        assert!(classification.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_model_reply_falls_back_to_keywords() {
        for reply in ["I think it's a backend task.", r#"{"primary_intent": "astrology"}"#] {
            let classifier = IntentClassifierAgent::new().unwrap().with_llm(scripted(reply));
            let classification = classifier.analyze("Build a todo list application").await;
            assert!(!classification.llm_used, "reply: {reply}");
            assert_eq!(classification.task_kind, TaskKind::FullstackDevelopment);
            assert!(classification
                .warnings
                .last()
                .unwrap()
                .starts_with("Model classification unavailable"));
        }
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("x {\"a\": {}} y"), Some("{\"a\": {}}"));
        assert_eq!(extract_json("no object"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
