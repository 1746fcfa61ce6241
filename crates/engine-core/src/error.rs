//! The closed `EngineError` taxonomy (spec §7): one variant per numbered
//! error class, expressed as a `thiserror` enum instead of the source's
//! scattered exception types. `engine-server` owns the single `IntoResponse`
//! mapping site from this enum to HTTP status codes.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 1. Client-side errors: bad enum, missing field, lineage violation.
    #[error("validation error: {0}")]
    Validation(String),

    /// 2. Provider transport errors (timeouts, connection failures) that
    /// survived the worker executor's own retry budget.
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    /// 3. A worker's own execution failure, captured rather than propagated.
    /// Surfaced here only when it needs to bubble past the worker executor
    /// (the normal path captures it into a `WorkerOutput` instead).
    #[error("worker execution error: {0}")]
    WorkerExecution(String),

    /// 4. Supervisor response failed to parse into a valid verdict.
    #[error("supervisor parse failure: {0}")]
    SupervisorParse(String),

    /// 5. The FSM exceeded its global deadline.
    #[error("task timed out after {0}s")]
    TaskTimeout(u64),

    /// 6. Any uncaught failure outside the worker fan-out.
    #[error("fatal engine error: {0}")]
    Fatal(String),

    /// 7. A lineage/spawn-governance rule tripped; the string names the rule.
    #[error("auto-task policy violation: {0}")]
    AutoTask(String),

    /// Not a numbered taxonomy item in §7, but needed to distinguish a
    /// missing entity (404) from a malformed request (400) at the HTTP
    /// boundary.
    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn auto_task(rule: impl Into<String>) -> Self {
        EngineError::AutoTask(rule.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}
