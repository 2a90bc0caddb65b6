//! Mapping of database failures onto the domain's collaborator errors.

use domain::ports::ServiceError;

use crate::metrics::record_query_error;

const SERVICE: &str = "database";

/// Classifies a sqlx error. Connection-level failures are temporary and
/// retried upstream; everything else is final.
pub fn to_service_error(query_name: &'static str, err: sqlx::Error) -> ServiceError {
    let mapped = match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => ServiceError::unavailable(SERVICE, err.to_string()),
        sqlx::Error::Database(db) if db.code().is_some_and(|c| is_transient_sqlstate(&c)) => {
            ServiceError::unavailable(SERVICE, err.to_string())
        }
        sqlx::Error::RowNotFound => ServiceError::NotFound(query_name.to_string()),
        _ => ServiceError::Internal(format!("{query_name}: {err}")),
    };

    let class = match mapped {
        ServiceError::Unavailable { .. } => "unavailable",
        ServiceError::NotFound(_) => "not_found",
        ServiceError::Internal(_) => "internal",
    };
    record_query_error(query_name, class);
    tracing::warn!(query = query_name, class = class, error = %err, "Database query failed");
    mapped
}

/// Connection exceptions, admin shutdown and serialization failures.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code == "57P01" || code == "40001" || code == "40P01"
}
