//! Stub handler used when no real provider is registered.
//!
//! Every verb succeeds without touching the database. Results carry
//! `handler_kind = fallback` so callers can tell a no-op from real work.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::MigrationHandler;
use crate::model::{HandlerKind, MigrationRequest, MigrationResult, MigrationStatus};
use crate::provider::Provider;

/// No-op handler. Logs a warning on first use.
pub struct FallbackHandler {
    provider: Provider,
    warned: AtomicBool,
}

impl FallbackHandler {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Using fallback {} handler: operations report success but do nothing. \
                 Register a real provider or set plugins.strict to fail instead.",
                self.provider
            );
        }
    }

    fn result(&self, verb: &str) -> MigrationResult {
        self.warn_once();
        let mut result = MigrationResult::succeeded();
        result.handler_kind = HandlerKind::Fallback;
        result
            .additional_info
            .insert("fallback".into(), "true".into());
        result.additional_info.insert("verb".into(), verb.into());
        result
    }
}

#[async_trait]
impl MigrationHandler for FallbackHandler {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Fallback
    }

    async fn create_migration(
        &self,
        _request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationResult {
        self.result("create")
    }

    async fn apply_migrations(
        &self,
        _request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationResult {
        self.result("apply")
    }

    async fn get_status(
        &self,
        request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationStatus {
        self.warn_once();
        let mut status =
            MigrationStatus::from_migrations(self.provider.name(), Vec::new(), Vec::new());
        status.database_name = request.connection.fields().database;
        status.handler_kind = HandlerKind::Fallback;
        status
    }

    async fn generate_script(
        &self,
        _request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationResult {
        self.result("script")
    }

    async fn create_backup(
        &self,
        _request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationResult {
        self.result("backup")
    }

    async fn test_connection(
        &self,
        _request: &MigrationRequest,
        _cancel: &CancellationToken,
    ) -> MigrationResult {
        self.result("test-connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;

    fn request() -> MigrationRequest {
        MigrationRequest::new(ConnectionConfig::new(
            "Host=pg;Database=app",
            "PostgreSql",
        ))
    }

    #[tokio::test]
    async fn test_every_verb_is_marked_fallback() {
        let handler = FallbackHandler::new(Provider::PostgreSql);
        let cancel = CancellationToken::new();
        let request = request().with_name("AddUsers");

        for result in [
            handler.create_migration(&request, &cancel).await,
            handler.apply_migrations(&request, &cancel).await,
            handler.generate_script(&request, &cancel).await,
            handler.create_backup(&request, &cancel).await,
            handler.test_connection(&request, &cancel).await,
        ] {
            assert!(result.success);
            assert_eq!(result.handler_kind, HandlerKind::Fallback);
            assert_eq!(result.additional_info.get("fallback").map(String::as_str), Some("true"));
            assert!(result.applied_migrations.is_empty());
        }
    }

    #[tokio::test]
    async fn test_status_is_empty() {
        let handler = FallbackHandler::new(Provider::PostgreSql);
        let status = handler.get_status(&request(), &CancellationToken::new()).await;

        assert!(status.is_ok());
        assert!(!status.has_pending_migrations);
        assert_eq!(status.provider_name, "PostgreSql");
        assert_eq!(status.database_name.as_deref(), Some("app"));
        assert_eq!(status.handler_kind, HandlerKind::Fallback);
        assert_eq!(handler.kind(), HandlerKind::Fallback);
    }
}
