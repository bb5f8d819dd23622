// Hook dispatcher: ordered callbacks around every CRUD operation

use crate::config::HookFailurePolicy;
use crate::driver::Document;
use crate::error::{MongoliteError, Result};
use crate::query::FindOptions;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

/// Extension points fired around database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreQuery,
    PostQuery,
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl HookEvent {
    pub const ALL: [HookEvent; 8] = [
        HookEvent::PreQuery,
        HookEvent::PostQuery,
        HookEvent::PreInsert,
        HookEvent::PostInsert,
        HookEvent::PreUpdate,
        HookEvent::PostUpdate,
        HookEvent::PreDelete,
        HookEvent::PostDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreQuery => "pre_query",
            HookEvent::PostQuery => "post_query",
            HookEvent::PreInsert => "pre_insert",
            HookEvent::PostInsert => "post_insert",
            HookEvent::PreUpdate => "pre_update",
            HookEvent::PostUpdate => "post_update",
            HookEvent::PreDelete => "pre_delete",
            HookEvent::PostDelete => "post_delete",
        }
    }

    pub fn is_pre(&self) -> bool {
        matches!(
            self,
            HookEvent::PreQuery | HookEvent::PreInsert | HookEvent::PreUpdate | HookEvent::PreDelete
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = MongoliteError;

    fn from_str(s: &str) -> Result<Self> {
        HookEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| MongoliteError::UnknownHookEvent(s.to_string()))
    }
}

/// Result of the operation, handed to `post_*` hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Documents(Vec<Document>),
    Count(u64),
    Values(Vec<Value>),
    Response(Response),
}

/// What a hook sees. `pre_*` hooks may rewrite `filter`, `options` and
/// `payload`; the operation continues with whatever they leave behind.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    pub event: HookEvent,
    pub collection: String,
    /// Compiled native filter (reads, updates, deletes).
    pub filter: Option<Document>,
    pub options: Option<FindOptions>,
    /// Validated record(s) for inserts, the update document for updates.
    pub payload: Option<Value>,
    pub outcome: Option<HookOutcome>,
}

impl HookContext {
    pub fn new(event: HookEvent, collection: impl Into<String>) -> Self {
        HookContext {
            event,
            collection: collection.into(),
            filter: None,
            options: None,
            payload: None,
            outcome: None,
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_outcome(mut self, outcome: HookOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

/// A captured hook failure, reported next to the operation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookWarning {
    pub event: HookEvent,
    /// Position of the failing callback in registration order.
    pub hook_index: usize,
    pub message: String,
}

impl fmt::Display for HookWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hook #{} failed: {}", self.event, self.hook_index, self.message)
    }
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
pub type HookResult = std::result::Result<(), HookError>;
pub type HookFn = Arc<dyn Fn(&mut HookContext) -> HookResult + Send + Sync>;

/// Append-only registry of callbacks per event.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: HashMap<HookEvent, Vec<HookFn>>,
    policy: HookFailurePolicy,
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(event, hooks)| (event.as_str(), hooks.len()))
            .collect();
        f.debug_struct("HookDispatcher")
            .field("hooks", &counts)
            .field("policy", &self.policy)
            .finish()
    }
}

impl HookDispatcher {
    pub fn new(policy: HookFailurePolicy) -> Self {
        HookDispatcher {
            hooks: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> HookFailurePolicy {
        self.policy
    }

    pub fn register<F>(&mut self, event: HookEvent, callback: F)
    where
        F: Fn(&mut HookContext) -> HookResult + Send + Sync + 'static,
    {
        let hooks = self.hooks.entry(event).or_default();
        hooks.push(Arc::new(callback));
        log::debug!("Registered {} hook #{}", event, hooks.len() - 1);
    }

    /// Whether any callback listens to `event`.
    pub fn has(&self, event: HookEvent) -> bool {
        self.hooks.get(&event).map(|h| !h.is_empty()).unwrap_or(false)
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.hooks.get(&event).map(Vec::len).unwrap_or(0)
    }

    /// Run every callback for `context.event` in registration order.
    ///
    /// A failing callback (error or panic) leaves the context as it was
    /// before that callback ran. Under `Warn` its failure becomes a warning
    /// and the remaining callbacks still run; under `Abort` the first failure
    /// is returned as `MongoliteError::Hook`.
    pub fn dispatch(&self, context: HookContext) -> Result<(HookContext, Vec<HookWarning>)> {
        let event = context.event;
        let hooks = match self.hooks.get(&event) {
            Some(hooks) if !hooks.is_empty() => hooks,
            _ => return Ok((context, Vec::new())),
        };

        let mut context = context;
        let mut warnings = Vec::new();

        for (index, hook) in hooks.iter().enumerate() {
            let mut attempt = context.clone();
            let message = match catch_unwind(AssertUnwindSafe(|| hook(&mut attempt))) {
                Ok(Ok(())) => {
                    context = attempt;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            log::warn!(
                "{} hook #{} failed on '{}': {}",
                event,
                index,
                context.collection,
                message
            );

            if self.policy == HookFailurePolicy::Abort {
                return Err(MongoliteError::Hook { event, message });
            }
            warnings.push(HookWarning {
                event,
                hook_index: index,
                message,
            });
        }

        Ok((context, warnings))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
