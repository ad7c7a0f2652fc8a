//! Request scope and unit of work.
//!
//! Every accessor call receives a [`Scope`]: the tenant the call is bound to,
//! the correlation ID to propagate to outgoing webhooks, and the transaction
//! the call participates in. Top-level operations acquire a transaction with
//! [`Transactioner::begin`] and release it with [`finish`], which commits on
//! success and rolls back on error.

use crate::errors::{Error, Result};
use async_trait::async_trait;

/// Caller-supplied request data, threaded explicitly through every operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant: Option<String>,
    correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        RequestContext {
            tenant: Some(tenant.into()),
            correlation_id: None,
        }
    }

    /// A context without a resolved tenant. Every operation rejects it.
    pub fn anonymous() -> Self {
        RequestContext::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn tenant(&self) -> Result<&str> {
        self.tenant.as_deref().ok_or(Error::MissingTenant)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Transactioner: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Borrowed view of one unit of work.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    tenant: &'a str,
    correlation_id: Option<&'a str>,
    tx: &'a dyn Transaction,
}

impl<'a> Scope<'a> {
    pub fn new(tenant: &'a str, correlation_id: Option<&'a str>, tx: &'a dyn Transaction) -> Self {
        Scope {
            tenant,
            correlation_id,
            tx,
        }
    }

    pub fn tenant(&self) -> &'a str {
        self.tenant
    }

    pub fn correlation_id(&self) -> Option<&'a str> {
        self.correlation_id
    }

    pub fn tx(&self) -> &'a dyn Transaction {
        self.tx
    }
}

/// Releases a transaction according to the outcome of the work done in it.
///
/// Errors flagged as [`Error::mutation_committed`] keep the transaction's
/// changes: the transaction is committed and the error is still returned.
pub async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) if err.mutation_committed() => {
            tx.commit().await?;
            Err(err)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(err)
        }
    }
}
