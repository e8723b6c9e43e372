use runtime::kv::KvError;

use crate::{
    coercion::InputValueError,
    fingerprint::FingerprintError,
    registry::RegistryError,
    response::{Location, ServerError},
};

/// Error of a single field. It nulls the field in the response and is reported with the
/// field's path, the rest of the response is unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct FieldError {
    pub message: String,
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        FieldError {
            message: message.into(),
            extensions: None,
        }
    }

    pub fn internal() -> Self {
        FieldError::new("Internal server error")
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extensions
            .get_or_insert_with(Default::default)
            .insert(name.into(), value.into());
        self
    }
}

impl From<FieldError> for ServerError {
    fn from(error: FieldError) -> Self {
        ServerError {
            extensions: error.extensions,
            ..ServerError::new(error.message)
        }
    }
}

impl From<KvError> for ServerError {
    fn from(error: KvError) -> Self {
        FieldError::from(error).into()
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        FieldError::new(message)
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        FieldError::new(message)
    }
}

impl From<InputValueError> for FieldError {
    fn from(error: InputValueError) -> Self {
        FieldError::new(error.to_string())
    }
}

impl From<serde_json::Error> for FieldError {
    fn from(error: serde_json::Error) -> Self {
        FieldError::new(error.to_string())
    }
}

impl From<KvError> for FieldError {
    fn from(error: KvError) -> Self {
        FieldError::new(error.to_string()).with_extension("code", "CACHE_STORE_ERROR")
    }
}

impl From<FingerprintError> for FieldError {
    fn from(error: FingerprintError) -> Self {
        // Only reachable with a document that bypassed validation.
        tracing::error!("Could not compute the selection fingerprint: {error}");
        FieldError::internal()
    }
}

/// Error preventing the execution of a whole request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{message}")]
    Parse { message: String, locations: Vec<Location> },
    #[error("{message}")]
    Validation { message: String, locations: Vec<Location> },
    #[error("Unknown operation named '{0}'")]
    UnknownOperation(String),
    #[error("Operation name required in request")]
    OperationNameRequired,
    #[error("The document does not contain any operation")]
    NoOperation,
    #[error("Subscriptions are not supported")]
    SubscriptionsNotSupported,
    #[error("The schema does not define a mutation root type")]
    MutationsNotSupported,
    #[error("PersistedQueryNotFound")]
    PersistedQueryNotFound,
    #[error("Persisted query version {0} is not supported")]
    PersistedQueryVersion(u32),
    #[error("Invalid persisted query sha256Hash")]
    InvalidPersistedQueryHash,
    #[error("Persisted queries are not enabled")]
    PersistedQueriesDisabled,
    #[error(transparent)]
    Variables(#[from] InputValueError),
    #[error(transparent)]
    Store(#[from] KvError),
}

impl From<async_graphql_parser::Error> for RequestError {
    fn from(error: async_graphql_parser::Error) -> Self {
        RequestError::Parse {
            message: error.to_string(),
            locations: error.positions().map(Location::from).collect(),
        }
    }
}

impl From<RequestError> for ServerError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::Parse { message, locations } | RequestError::Validation { message, locations } => {
                ServerError {
                    locations,
                    ..ServerError::new(message)
                }
            }
            RequestError::PersistedQueryNotFound => FieldError::new(error.to_string())
                .with_extension("code", "PERSISTED_QUERY_NOT_FOUND")
                .into(),
            RequestError::PersistedQueriesDisabled => FieldError::new(error.to_string())
                .with_extension("code", "PERSISTED_QUERY_NOT_SUPPORTED")
                .into(),
            other => ServerError::new(other.to_string()),
        }
    }
}

/// Error building a [`crate::Schema`].
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("A resolver is registered for {type_name}.{field_name}, which does not exist")]
    UnknownResolverField { type_name: String, field_name: String },
    #[error("A cache policy is registered for {type_name}.{field_name}, which does not exist")]
    UnknownPolicyField { type_name: String, field_name: String },
    #[error("A type resolver is registered for {0}, which is not an interface or a union")]
    UnknownAbstractType(String),
    #[error("Cache policies are registered but no store was provided")]
    MissingStore,
}
