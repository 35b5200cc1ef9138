//! PostgreSQL client utilities
//!
//! This module provides utilities for creating and managing PostgreSQL client connections.

use log::error;
use std::sync::Arc;
use sync_storage::StorageError;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

/// Create a new PostgreSQL client with connection handling.
///
/// Any failure to establish the session is reported as
/// `StorageError::Connection`.
pub async fn new_postgresql_client(
    connection_string: &str,
) -> Result<Arc<Mutex<Client>>, StorageError> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| StorageError::Connection(format!("failed to connect to PostgreSQL: {e}")))?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(Arc::new(Mutex::new(client)))
}

/// Map a driver error to a storage error, classifying a dropped session as
/// a connection failure.
pub(crate) fn map_pg_error(
    client: &Client,
    operation: &'static str,
    err: tokio_postgres::Error,
) -> StorageError {
    if client.is_closed() || err.is_closed() {
        StorageError::Connection(format!("{operation}: {err}"))
    } else {
        StorageError::backend(operation, err)
    }
}
