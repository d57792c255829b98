use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Output format for CLI results
#[derive(Clone, Copy, Debug, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format for programmatic consumption
    Json,
    /// Human-readable simple format
    Simple,
}

/// Semantic purpose of a UI element, independent of its markup
///
/// Well-known chat UI roles have named variants; anything else is carried as
/// [`Role::Custom`] so new roles need no schema change. Serialized as a plain
/// string tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    ChatInput,
    SubmitButton,
    ResponseArea,
    NewChatButton,
    ModelSelector,
    StopButton,
    LoginButton,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::ChatInput => "chat_input",
            Role::SubmitButton => "submit_button",
            Role::ResponseArea => "response_area",
            Role::NewChatButton => "new_chat_button",
            Role::ModelSelector => "model_selector",
            Role::StopButton => "stop_button",
            Role::LoginButton => "login_button",
            Role::Custom(tag) => tag,
        }
    }

    /// Same role with its tag in canonical form (trimmed, lowercase, `_` separated)
    ///
    /// Keys are always built from the canonical role, so a directly built
    /// `Role::Custom("Chat-Input")` and `Role::ChatInput` address one record.
    pub fn canonical(&self) -> Role {
        match self {
            Role::Custom(tag) => Role::from(tag.as_str()),
            known => known.clone(),
        }
    }

    /// Whether a resolved element must also be enabled (inputs and buttons)
    pub fn requires_interaction(&self) -> bool {
        !matches!(self, Role::ResponseArea)
    }

    /// Plain-language description used when asking the vision model for this role
    pub fn describe(&self) -> String {
        match self {
            Role::ChatInput => "the text input or textarea where the user types a chat message".to_string(),
            Role::SubmitButton => "the button that sends the typed chat message".to_string(),
            Role::ResponseArea => {
                "the container that holds the assistant's most recent response".to_string()
            }
            Role::NewChatButton => "the button that starts a new, empty conversation".to_string(),
            Role::ModelSelector => "the control used to pick the AI model".to_string(),
            Role::StopButton => "the button that stops a response while it is generating".to_string(),
            Role::LoginButton => "the button or link that opens the sign-in flow".to_string(),
            Role::Custom(tag) => format!("the element acting as '{}'", tag.replace('_', " ")),
        }
    }
}

impl From<String> for Role {
    fn from(tag: String) -> Self {
        let tag = tag.trim().to_lowercase().replace('-', "_");
        match tag.as_str() {
            "chat_input" | "chatinput" => Role::ChatInput,
            "submit_button" | "submitbutton" => Role::SubmitButton,
            "response_area" | "responsearea" => Role::ResponseArea,
            "new_chat_button" | "newchatbutton" => Role::NewChatButton,
            "model_selector" | "modelselector" => Role::ModelSelector,
            "stop_button" | "stopbutton" => Role::StopButton,
            "login_button" | "loginbutton" => Role::LoginButton,
            _ => Role::Custom(tag),
        }
    }
}

impl From<&str> for Role {
    fn from(tag: &str) -> Self {
        Role::from(tag.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::str::FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a selector expression is evaluated against the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// CSS selector
    Css,
    /// XPath expression
    #[value(name = "xpath")]
    #[serde(rename = "xpath")]
    XPath,
    /// Visible text content
    TextMatch,
    /// Attribute selector such as `[data-testid="send"]`
    AttributeMatch,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Css => "css",
            Strategy::XPath => "xpath",
            Strategy::TextMatch => "text_match",
            Strategy::AttributeMatch => "attribute_match",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structural shape of a selector, which fixes its base stability weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StructuralClass {
    IdBased,
    DataAttributeBased,
    StableClassBased,
    PositionalOrBasicTag,
}

impl StructuralClass {
    pub fn weight(&self) -> f64 {
        match self {
            StructuralClass::IdBased => 0.95,
            StructuralClass::DataAttributeBased => 0.90,
            StructuralClass::StableClassBased => 0.75,
            StructuralClass::PositionalOrBasicTag => 0.35,
        }
    }
}

/// How a single validation attempt is credited to a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptCredit {
    Success,
    Failure,
    /// Counts as half an attempt in the running average (not-interactable refinement)
    HalfFailure,
}

impl AttemptCredit {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptCredit::Success)
    }
}

/// One concrete locator strategy for a role, with its own track record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub strategy: Strategy,
    pub expression: String,
    pub structural_class: StructuralClass,
    pub success_count: u32,
    pub attempt_count: u32,
    /// Attempt-equivalents forgiven by half-weight failures; zero under the default policy
    #[serde(default, skip_serializing_if = "is_zero")]
    pub discounted_attempts: f64,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

impl SelectorCandidate {
    /// Create an untested candidate
    pub fn new(
        strategy: Strategy,
        expression: impl Into<String>,
        structural_class: StructuralClass,
    ) -> Self {
        Self {
            strategy,
            expression: expression.into(),
            structural_class,
            success_count: 0,
            attempt_count: 0,
            discounted_attempts: 0.0,
        }
    }

    /// Mark a freshly discovered candidate as having passed its first validation
    pub fn verified(mut self) -> Self {
        self.success_count = 1;
        self.attempt_count = 1;
        self.discounted_attempts = 0.0;
        self
    }

    /// Attempts as used by the running average
    pub fn effective_attempts(&self) -> f64 {
        (self.attempt_count as f64 - self.discounted_attempts).max(self.success_count as f64)
    }

    /// Current stability score, always recomputed from the counters
    pub fn stability_score(&self) -> f64 {
        crate::scorer::score(self)
    }

    pub fn apply(&mut self, credit: AttemptCredit) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        match credit {
            AttemptCredit::Success => self.success_count = self.success_count.saturating_add(1),
            AttemptCredit::Failure => {}
            AttemptCredit::HalfFailure => self.discounted_attempts += 0.5,
        }
    }
}

/// Key a record is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub domain: String,
    pub role: Role,
}

impl RecordKey {
    /// Build a key, normalizing the domain and the role tag
    pub fn new(domain: &str, role: &Role) -> Self {
        Self {
            domain: normalize_domain(domain),
            role: role.canonical(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.role)
    }
}

/// Cached selector knowledge for one (domain, role) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorRecord {
    pub domain: String,
    pub role: Role,
    /// Most preferred first
    pub candidates: Vec<SelectorCandidate>,
    pub discovered_at: DateTime<Utc>,
    /// Last time any candidate passed validation
    pub last_validated_at: DateTime<Utc>,
    pub validation_count: u64,
    pub failure_count: u64,
    /// Failures since the last success on this key
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl SelectorRecord {
    pub fn new(domain: &str, role: &Role, candidates: Vec<SelectorCandidate>) -> Self {
        let now = Utc::now();
        Self {
            domain: normalize_domain(domain),
            role: role.canonical(),
            candidates,
            discovered_at: now,
            last_validated_at: now,
            validation_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            domain: self.domain.clone(),
            role: self.role.clone(),
        }
    }

    /// Check the invariants every stored record must hold
    pub fn check(&self) -> Result<(), String> {
        if self.domain.is_empty() {
            return Err("domain must not be empty".to_string());
        }
        if self.candidates.is_empty() {
            return Err(format!("{} has no candidates", self.key()));
        }
        if self.failure_count > self.validation_count {
            return Err(format!(
                "{} has failure_count {} > validation_count {}",
                self.key(),
                self.failure_count,
                self.validation_count
            ));
        }
        for candidate in &self.candidates {
            if candidate.expression.trim().is_empty() {
                return Err(format!("{} has an empty selector expression", self.key()));
            }
            if candidate.success_count > candidate.attempt_count {
                return Err(format!(
                    "candidate '{}' has success_count {} > attempt_count {}",
                    candidate.expression, candidate.success_count, candidate.attempt_count
                ));
            }
        }
        Ok(())
    }
}

/// Element hints returned by a vision model; untrusted until validated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    /// `data-*` attributes, keyed by full attribute name (`data-testid`)
    #[serde(default)]
    pub data_attributes: BTreeMap<String, String>,
    /// Other attributes worth anchoring on (`aria-label`, `name`, `placeholder`, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Normalize a hostname or URL into the domain records are keyed by
///
/// Accepts `https://Chat.Example.com:443/c/123` as well as `chat.example.com`.
/// The result is lowercase, without scheme, port, path or trailing dot.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let host = if trimmed.contains("://") {
        match url::Url::parse(trimmed) {
            Ok(url) => url.host_str().map(str::to_string),
            Err(_) => None,
        }
    } else {
        None
    };

    let host = host.unwrap_or_else(|| {
        let without_scheme = trimmed.split("://").last().unwrap_or(trimmed);
        let authority = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or(without_scheme);
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => authority.to_string(),
        }
    });

    host.trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
