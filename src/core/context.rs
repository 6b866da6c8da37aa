//! Request execution context.
//!
//! One [`ExecutionContext`] is created per inbound request, handed to the
//! reactor by the transport layer and destroyed once the response has been
//! fully written. It is never shared across requests and never retained after
//! completion. Everything mutable about a request lives here: the opaque
//! request/response surfaces, the visible and internal attribute maps, the
//! metrics record and the interruption signal.

use std::{
    any::Any,
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use uuid::Uuid;

use crate::endpoint::Invoker;
use crate::entrypoint::EntrypointConnector;

use super::interruption::{ExecutionFailure, Interruption};
use super::metrics::Metrics;

/// Resolves shared components (caches, clients, ...) bound by the reactor at
/// the beginning of request handling. Components are type-erased; policies
/// downcast to the concrete type they expect.
pub trait ComponentProvider: Send + Sync {
    fn component(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Contributes template variables for policies that render templated values.
pub trait TemplateVariableProvider: Send + Sync {
    fn variables(&self, ctx: &ExecutionContext) -> Vec<(String, String)>;
}

/// Opaque inbound request surface.
///
/// The core does not know anything about the wire protocol; this is the fixed
/// capability surface the transport layer fills in before calling the reactor.
#[derive(Debug)]
pub struct Request {
    pub id: String,
    pub transaction_id: String,
    pub context_path: String,
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Option<String>,
    pub remote_addr: Option<SocketAddr>,
    pub timestamp: Instant,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            transaction_id: id.clone(),
            id,
            context_path: "/".to_string(),
            path: path.into(),
            method,
            headers: HeaderMap::new(),
            query: None,
            remote_addr: None,
            timestamp: Instant::now(),
        }
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Path relative to the context path the API is deployed on.
    pub fn path_info(&self) -> &str {
        match self.path.strip_prefix(self.context_path.trim_end_matches('/')) {
            Some("") => "/",
            Some(info) => info,
            None => &self.path,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.query.as_deref()?;
        for item in query.split('&') {
            if let Some((k, v)) = item.split_once('=') {
                if k == name {
                    return Some(v.trim());
                }
            }
        }
        None
    }
}

/// Opaque outbound response surface.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    ended: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            body: None,
            ended: false,
        }
    }
}

impl Response {
    /// Marks the response as complete. The transport layer flushes it once the
    /// reactor returns; nothing may be written afterwards.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn ended(&self) -> bool {
        self.ended
    }
}

/// Attributes visible to user-authored policies.
///
/// Well-known business attributes get typed fields; anything policies define
/// themselves goes through the type-erased custom map. No validation anywhere,
/// last write wins.
#[derive(Default)]
pub struct Attributes {
    pub context_path: Option<String>,
    pub api: Option<String>,
    pub organization: Option<String>,
    pub environment: Option<String>,
    pub deployed_at: Option<i64>,
    pub plan: Option<String>,
    pub application: Option<String>,
    custom: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.custom.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.custom.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.custom.remove(key)
    }
}

/// Attributes reserved for orchestration state, invisible to user policies.
#[derive(Default)]
pub struct InternalAttributes {
    pub invoker: Option<Arc<dyn Invoker>>,
    pub invoker_skip: bool,
    pub entrypoint_connector: Option<Arc<dyn EntrypointConnector>>,
    pub execution_failure: Option<ExecutionFailure>,
    custom: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl InternalAttributes {
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.custom.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.custom.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

/// Context that holds per-request state across all phases of the pipeline.
pub struct ExecutionContext {
    request: Request,
    response: Response,
    pub attributes: Attributes,
    pub internal: InternalAttributes,
    metrics: Metrics,
    interrupted: bool,
    component_provider: Option<Arc<dyn ComponentProvider>>,
    template_variable_providers: Vec<Arc<dyn TemplateVariableProvider>>,
}

impl ExecutionContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: Response::default(),
            attributes: Attributes::default(),
            internal: InternalAttributes::default(),
            metrics: Metrics::default(),
            interrupted: false,
            component_provider: None,
            template_variable_providers: Vec::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }

    pub fn bind_component_provider(&mut self, provider: Arc<dyn ComponentProvider>) {
        self.component_provider = Some(provider);
    }

    pub fn component(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.component_provider
            .as_ref()
            .and_then(|p| p.component(name))
    }

    pub fn bind_template_variable_providers(
        &mut self,
        providers: Vec<Arc<dyn TemplateVariableProvider>>,
    ) {
        self.template_variable_providers = providers;
    }

    /// Collects template variables from every bound provider.
    pub fn template_variables(&self) -> Vec<(String, String)> {
        self.template_variable_providers
            .iter()
            .flat_map(|p| p.variables(self))
            .collect()
    }

    /// Marks the context as interrupted without failure. Downstream phases in
    /// the current chain are skipped; recovery resumes through the
    /// post-execution processors.
    pub fn interrupt(&mut self) -> Interruption {
        self.interrupted = true;
        Interruption::Stop
    }

    /// Marks the context as interrupted with the given failure.
    ///
    /// Idempotent in the last-write-wins sense: a second call replaces the
    /// recorded failure, and the replacement is traced rather than silently
    /// dropped.
    pub fn interrupt_with(&mut self, failure: ExecutionFailure) -> Interruption {
        self.interrupted = true;
        if let Some(previous) = self.internal.execution_failure.replace(failure.clone()) {
            log::debug!(
                "Execution failure replaced: {} -> {}",
                previous.status(),
                failure.status()
            );
        }
        Interruption::Failure(failure)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}
