//! Driver-error mapping into the domain taxonomy.
//!
//! Constraint violations and data that cannot be decoded are integrity
//! errors; everything else coming out of a driver is treated as transient and
//! left to the reprocessor's retry schedule.

use docflow_domain::PipelineError;
use rusqlite::ffi::ErrorCode;
use tokio::task::JoinError;

pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> PipelineError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            PipelineError::Integrity(format!("constraint violation: {err}"))
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..) => {
            PipelineError::Integrity(format!("undecodable row: {err}"))
        }
        _ => PipelineError::Transient(format!("database error: {err}")),
    }
}

pub(crate) fn map_pool_error(err: r2d2::Error) -> PipelineError {
    PipelineError::Transient(format!("connection pool error: {err}"))
}

pub(crate) fn map_join_error(err: JoinError) -> PipelineError {
    if err.is_cancelled() {
        PipelineError::Transient("blocking task cancelled".into())
    } else {
        PipelineError::Transient(format!("blocking task failed: {err}"))
    }
}

pub(crate) fn map_broker_error(err: lapin::Error) -> PipelineError {
    PipelineError::Transient(format!("broker error: {err}"))
}

pub(crate) fn map_io_error(err: std::io::Error) -> PipelineError {
    PipelineError::Transient(format!("blob store I/O error: {err}"))
}
