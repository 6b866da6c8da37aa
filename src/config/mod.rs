use std::fs;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::core::{GatewayError, GatewayResult};

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("invalid id pattern"));

/// Gateway-level settings, read once at reactor construction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Overall request budget in milliseconds. Zero or negative disables the
    /// timeout entirely.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout: i64,

    /// Minimum budget left to post phases once the request timeout is close
    /// to expiring, in milliseconds.
    #[serde(default = "GatewayConfig::default_request_timeout_grace_delay")]
    pub request_timeout_grace_delay: i64,

    /// How long `stop()` waits for in-flight requests to drain, in
    /// milliseconds.
    #[serde(default = "GatewayConfig::default_pending_requests_timeout")]
    pub pending_requests_timeout: u64,

    #[serde(default)]
    pub tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Self::default_request_timeout(),
            request_timeout_grace_delay: Self::default_request_timeout_grace_delay(),
            pending_requests_timeout: Self::default_pending_requests_timeout(),
            tracing: false,
        }
    }
}

impl GatewayConfig {
    fn default_request_timeout() -> i64 {
        30_000
    }

    fn default_request_timeout_grace_delay() -> i64 {
        30
    }

    fn default_pending_requests_timeout() -> u64 {
        10_000
    }

    pub fn load_from_yaml<P>(path: P) -> GatewayResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).map_err(|e| {
            GatewayError::Configuration(format!("Unable to read conf file from {path}: {e}"))
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> GatewayResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: GatewayConfig = serde_yaml::from_str(conf_str)?;
        conf.validate()?;
        Ok(conf)
    }
}

/// Kind of API an api definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    /// Plain request/response proxying.
    #[default]
    Proxy,
    /// Event/message-native APIs with per-message phases.
    Message,
}

impl ApiType {
    pub fn label(&self) -> &'static str {
        match self {
            ApiType::Proxy => "proxy",
            ApiType::Message => "message",
        }
    }
}

/// How flows are selected when several match the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// Execute all matching flows, in declaration order.
    #[default]
    Default,
    /// Execute only the single most path-specific matching flow.
    BestMatch,
}

/// Deployed API definition: everything a reactor serves is derived from this
/// and treated as immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Api {
    #[validate(custom(function = "validate_id"))]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type", default)]
    pub api_type: ApiType,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub environment_id: Option<String>,
    /// Deployment timestamp, milliseconds since the epoch.
    #[serde(default)]
    pub deployed_at: Option<i64>,
    #[serde(default)]
    pub flow_mode: FlowMode,
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub listeners: Vec<Listener>,
    #[validate(nested)]
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[validate(nested)]
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[validate(nested)]
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

impl Api {
    pub fn from_yaml(definition: &str) -> GatewayResult<Self> {
        let api: Api = serde_yaml::from_str(definition)?;
        api.validate()?;
        Ok(api)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListenerType {
    #[default]
    Http,
    Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Listener {
    #[serde(rename = "type", default)]
    pub listener_type: ListenerType,
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub paths: Vec<ListenerPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ListenerPath {
    #[serde(default)]
    pub host: Option<String>,
    #[validate(custom(function = "validate_path"))]
    pub path: String,
}

/// A named security configuration with its plan-scoped flows.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Plan {
    #[validate(custom(function = "validate_id"))]
    pub id: String,
    pub name: String,
    #[validate(nested)]
    pub security: PlanSecurity,
    #[validate(nested)]
    #[serde(default)]
    pub flows: Vec<Flow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlanSecurity {
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub security_type: String,
    #[serde(default)]
    pub configuration: YamlValue,
}

/// An ordered, conditionally-matched list of policy steps.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Flow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[validate(nested)]
    #[serde(default)]
    pub selector: FlowSelector,
    #[validate(nested)]
    #[serde(default)]
    pub request: Vec<Step>,
    #[validate(nested)]
    #[serde(default)]
    pub response: Vec<Step>,
    #[validate(nested)]
    #[serde(default)]
    pub message_request: Vec<Step>,
    #[validate(nested)]
    #[serde(default)]
    pub message_response: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathOperator {
    #[default]
    StartsWith,
    Equals,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FlowSelector {
    /// Path pattern relative to the context path. Segments like `{id}` match
    /// any single segment.
    #[validate(custom(function = "validate_path"))]
    #[serde(default = "default_root_path")]
    pub path: String,
    #[serde(default)]
    pub path_operator: PathOperator,
    /// Uppercase method names; empty matches every method.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl Default for FlowSelector {
    fn default() -> Self {
        Self {
            path: default_root_path(),
            path_operator: PathOperator::default(),
            methods: Vec::new(),
        }
    }
}

/// One policy reference inside a flow.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Step {
    #[serde(default)]
    pub name: Option<String>,
    #[validate(length(min = 1))]
    pub policy: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Structured runtime predicate; a step whose condition evaluates false is
    /// skipped without error.
    #[serde(default)]
    pub condition: Option<StepCondition>,
    #[serde(default)]
    pub configuration: YamlValue,
}

/// Structured step predicates. The definition format deliberately carries
/// predicates instead of expression-language strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    HeaderEquals { name: String, value: String },
    AttributeEquals { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Endpoint {
    #[validate(custom(function = "validate_id"))]
    pub name: String,
    #[validate(length(min = 1))]
    pub target: String,
}

/// Cross-origin configuration; drives the pre-flight processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "CorsConfig::default_allow_origins")]
    pub allow_origins: Vec<String>,
    #[serde(default = "CorsConfig::default_allow_methods")]
    pub allow_methods: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub max_age: Option<u32>,
}

impl CorsConfig {
    fn default_allow_origins() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn default_allow_methods() -> Vec<String> {
        ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_root_path() -> String {
    "/".to_string()
}

fn validate_id(id: &str) -> Result<(), ValidationError> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_id"))
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ValidationError::new("path_must_be_absolute"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_defaults() {
        let conf = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(conf.request_timeout, 30_000);
        assert_eq!(conf.request_timeout_grace_delay, 30);
        assert_eq!(conf.pending_requests_timeout, 10_000);
        assert!(!conf.tracing);
    }

    #[test]
    fn test_api_definition_from_yaml() {
        let yaml = r#"
id: store-api
name: Store API
version: "1.0"
organization_id: acme
environment_id: prod
deployed_at: 1733000000000
flow_mode: best_match
listeners:
  - paths:
      - path: /store
plans:
  - id: gold
    name: Gold
    security:
      type: key-auth
      configuration:
        keys: ["s3cr3t"]
flows:
  - selector:
      path: /orders
      methods: [GET]
    request:
      - policy: header-rewrite
        configuration:
          set_request_headers:
            X-Store: "1"
endpoints:
  - name: default
    target: http://backend.local
"#;
        let api = Api::from_yaml(yaml).unwrap();
        assert_eq!(api.id, "store-api");
        assert_eq!(api.api_type, ApiType::Proxy);
        assert_eq!(api.flow_mode, FlowMode::BestMatch);
        assert_eq!(api.plans.len(), 1);
        assert_eq!(api.plans[0].security.security_type, "key-auth");
        assert_eq!(api.flows[0].selector.methods, vec!["GET"]);
        assert!(api.flows[0].enabled);
    }

    #[test]
    fn test_api_definition_requires_listener() {
        let yaml = r#"
id: empty
name: Empty
listeners: []
"#;
        assert!(Api::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_api_definition_rejects_bad_ids_and_paths() {
        let yaml = r#"
id: "bad id"
name: Bad
listeners:
  - paths:
      - path: /ok
"#;
        assert!(Api::from_yaml(yaml).is_err());

        let yaml = r#"
id: ok
name: Ok
listeners:
  - paths:
      - path: relative
"#;
        assert!(Api::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_step_condition_parsing() {
        let yaml = r#"
name: conditional
policy: mock
condition:
  header_equals:
    name: X-Debug
    value: "true"
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        match step.condition {
            Some(StepCondition::HeaderEquals { ref name, ref value }) => {
                assert_eq!(name, "X-Debug");
                assert_eq!(value, "true");
            }
            other => panic!("unexpected condition: {other:?}"),
        }
    }
}
