pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;
pub mod schema;
pub mod store;

pub use auth::{bearer_token, AuthError, Authenticator, RemoteAuthenticator};
pub use config::InsightConfig;
pub use error::InsightError;
pub use providers::{
    Attempt, AttemptOutcome, ChatCompletionsConfig, ChatCompletionsProvider, GatewayError,
    Generation, ProviderError, ProviderGateway, TextProvider,
};
pub use schema::{SchemaDescriptor, SALES_SCHEMA};
pub use store::{AuditStore, PgStore, ProcessRecord, QueryStore, StoreError, FALLBACK_SQL};
