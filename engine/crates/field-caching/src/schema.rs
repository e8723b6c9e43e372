use std::{borrow::Cow, collections::HashMap, sync::Arc, time::Duration};

use async_graphql_parser::{
    types::{ExecutableDocument, OperationDefinition, OperationType},
    Positioned,
};
use async_graphql_value::{ConstValue, Value};
use mini_moka::sync::Cache;
use runtime::kv::KvStore;
use tracing::Instrument;

use crate::{
    cache::{cached, CacheMiddleware, Key},
    coercion::coerce_variables,
    config::FieldCachingConfig,
    context::Data,
    error::{RequestError, SchemaError},
    execution::ExecutionContext,
    middleware::{FieldChain, Middleware},
    persisted::{PersistedQueries, PersistedQueryRequestExtension, RequestExtensions},
    policy::CachePolicies,
    registry::Registry,
    resolver::{PropertyResolver, Resolver, Resolvers, TypeResolverFn},
    response::{Response, ServerError},
    validation::validate,
    Variables,
};

/// A GraphQL request.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Empty when the request only refers to a persisted query.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub extensions: RequestExtensions,
    /// Parent value of the root fields.
    #[serde(skip)]
    pub root_value: serde_json::Value,
    /// Application data, available to resolvers, policies and middlewares.
    #[serde(skip)]
    pub data: Data,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn persisted_query(mut self, ext: PersistedQueryRequestExtension) -> Self {
        self.extensions.persisted_query = Some(ext);
        self
    }

    #[must_use]
    pub fn root_value(mut self, root_value: serde_json::Value) -> Self {
        self.root_value = root_value;
        self
    }

    #[must_use]
    pub fn data<T: std::any::Any + Send + Sync>(mut self, value: T) -> Self {
        self.data.insert(value);
        self
    }
}

impl From<&str> for Request {
    fn from(query: &str) -> Self {
        Request::new(query)
    }
}

impl From<String> for Request {
    fn from(query: String) -> Self {
        Request::new(query)
    }
}

/// An executable schema: the type registry with a composed dispatch chain for every field.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

pub(crate) struct SchemaInner {
    pub(crate) registry: Registry,
    chains: HashMap<String, HashMap<String, FieldChain>>,
    pub(crate) type_resolvers: HashMap<String, Arc<TypeResolverFn>>,
    store: Option<KvStore>,
    pub(crate) config: FieldCachingConfig,
    documents: Option<Cache<String, Arc<ExecutableDocument>>>,
    persisted_queries: PersistedQueries,
}

impl Schema {
    pub fn build(sdl: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(sdl)
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn config(&self) -> &FieldCachingConfig {
        &self.0.config
    }

    pub async fn execute(&self, request: impl Into<Request>) -> Response {
        let request = request.into();
        let span = tracing::info_span!(
            "execute",
            graphql.operation_name = request.operation_name.as_deref()
        );
        self.0.execute(request).instrument(span).await
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("query_type", &self.0.registry.query_type())
            .field("config", &self.0.config)
            .finish_non_exhaustive()
    }
}

impl SchemaInner {
    pub(crate) fn chain(&self, type_name: &str, field_name: &str) -> Option<&FieldChain> {
        self.chains.get(type_name)?.get(field_name)
    }

    async fn execute(&self, request: Request) -> Response {
        let persisted_query = request.extensions.persisted_query.as_ref();
        let query = match persisted_query {
            None => Cow::Borrowed(request.query.as_str()),
            Some(_) if !self.persisted_queries.enabled() => {
                return Response::from_errors([RequestError::PersistedQueriesDisabled.into()])
            }
            Some(ext) => match self.persisted_queries.query(&request.query, ext).await {
                Ok(query) => query,
                Err(error) => return Response::from_errors([error.into()]),
            },
        };

        let document = match self.prepare(&query) {
            Ok(document) => document,
            Err(errors) => return Response::from_errors(errors.into_iter().map(ServerError::from)),
        };

        if let Some(ext) = persisted_query.filter(|_| !request.query.is_empty()) {
            self.persisted_queries.register(ext, &query).await;
        }

        match self.execute_document(&request, &query, &document).await {
            Ok(response) => response,
            Err(error) => Response::from_errors([error.into()]),
        }
    }

    /// Parsed and validated document, from the document cache when enabled.
    fn prepare(&self, query: &str) -> Result<Arc<ExecutableDocument>, Vec<RequestError>> {
        let Some(documents) = &self.documents else {
            return self.parse(query).map(Arc::new);
        };

        let key = blake3::hash(query.as_bytes()).to_hex().to_string();
        if let Some(document) = documents.get(&key) {
            tracing::trace!("Document cache HIT - {key}");
            return Ok(document);
        }

        let document = Arc::new(self.parse(query)?);
        documents.insert(key, Arc::clone(&document));
        Ok(document)
    }

    fn parse(&self, query: &str) -> Result<ExecutableDocument, Vec<RequestError>> {
        let document = async_graphql_parser::parse_query(query).map_err(|error| vec![error.into()])?;

        let errors = validate(&self.registry, &document);
        if errors.is_empty() {
            Ok(document)
        } else {
            Err(errors)
        }
    }

    async fn execute_document(
        &self,
        request: &Request,
        query: &str,
        document: &ExecutableDocument,
    ) -> Result<Response, RequestError> {
        let operation = &select_operation(document, request.operation_name.as_deref())?.node;

        match operation.ty {
            OperationType::Subscription => return Err(RequestError::SubscriptionsNotSupported),
            OperationType::Mutation if self.registry.root_type(OperationType::Mutation).is_none() => {
                return Err(RequestError::MutationsNotSupported)
            }
            _ => {}
        }

        let variables = coerce_variables(&self.registry, operation, request.variables.clone())?;

        let operation_cache = self
            .store
            .as_ref()
            .and_then(|store| Some((store, self.operation_cache_ttl(operation, &variables)?)));

        let Some((store, ttl)) = operation_cache else {
            let execution = ExecutionContext::new(self, document, operation, variables, &request.data);
            return Ok(execution.execute(&request.root_value).await);
        };

        let key = Key::Operation {
            prefix: &self.config.key_prefix,
            query,
            operation_name: request.operation_name.as_deref(),
            variables: &variables,
        }
        .to_string();

        let execution = ExecutionContext::new(self, document, operation, variables, &request.data);
        cached(store, self.config.store_errors, &key, ttl, Response::is_ok, async {
            Ok(execution.execute(&request.root_value).await)
        })
        .await
    }

    /// `Some` with the entry TTL when the whole response of the operation is cached, as
    /// requested with `@cacheQuery(ttl: Int)`, the TTL being in seconds.
    fn operation_cache_ttl(&self, operation: &OperationDefinition, variables: &Variables) -> Option<Option<Duration>> {
        if !self.config.enabled || !self.config.operation_caching.enabled {
            return None;
        }

        let directive = operation
            .directives
            .iter()
            .find(|directive| directive.node.name.node.as_str() == "cacheQuery")?;

        let seconds = directive
            .node
            .get_argument("ttl")
            .and_then(|ttl| match &ttl.node {
                Value::Number(seconds) => seconds.as_u64(),
                Value::Variable(name) => match variables.get(name) {
                    Some(ConstValue::Number(seconds)) => seconds.as_u64(),
                    _ => None,
                },
                _ => None,
            });

        Some(seconds.map(Duration::from_secs).or(self.config.default_ttl))
    }
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Positioned<OperationDefinition>, RequestError> {
    let mut operations = document.operations.iter();

    match operation_name {
        Some(operation_name) => operations
            .find(|(name, _)| name.is_some_and(|name| name.as_str() == operation_name))
            .map(|(_, operation)| operation)
            .ok_or_else(|| RequestError::UnknownOperation(operation_name.to_string())),
        None => match (operations.next(), operations.next()) {
            (Some((_, operation)), None) => Ok(operation),
            (None, _) => Err(RequestError::NoOperation),
            (Some(_), Some(_)) => Err(RequestError::OperationNameRequired),
        },
    }
}

enum Link {
    Middleware(Arc<dyn Middleware>),
    FieldCache,
}

/// Assembles a [`Schema`] from its SDL and everything the application plugs into it.
pub struct SchemaBuilder {
    sdl: String,
    resolvers: Resolvers,
    policies: CachePolicies,
    links: Vec<Link>,
    store: Option<KvStore>,
    config: FieldCachingConfig,
}

impl SchemaBuilder {
    pub fn new(sdl: impl Into<String>) -> Self {
        SchemaBuilder {
            sdl: sdl.into(),
            resolvers: Resolvers::default(),
            policies: CachePolicies::default(),
            links: Vec::new(),
            store: None,
            config: FieldCachingConfig::default(),
        }
    }

    #[must_use]
    pub fn resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = resolvers;
        self
    }

    #[must_use]
    pub fn cache_policies(mut self, policies: CachePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Appends a link to the dispatch chain. Links run in the order they were added, the
    /// first one being the outermost.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.links.push(Link::Middleware(Arc::new(middleware)));
        self
    }

    /// Places the resolution cache at this position of the chain. Links added before it
    /// run on every resolution, links added after it only on cache misses.
    ///
    /// Without it the cache is the innermost link, right before the resolver.
    #[must_use]
    pub fn field_cache(mut self) -> Self {
        if !self.links.iter().any(|link| matches!(link, Link::FieldCache)) {
            self.links.push(Link::FieldCache);
        }
        self
    }

    #[must_use]
    pub fn store(mut self, store: KvStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn config(mut self, config: FieldCachingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let registry = Registry::from_sdl(&self.sdl)?;
        self.check_registrations(&registry)?;

        let cache = match &self.store {
            _ if !self.config.enabled || self.policies.is_empty() => None,
            None => return Err(SchemaError::MissingStore),
            Some(store) => Some(Arc::new(CacheMiddleware {
                policies: self.policies.clone(),
                store: store.clone(),
                key_prefix: self.config.key_prefix.clone(),
                default_ttl: self.config.default_ttl,
                store_errors: self.config.store_errors,
            }) as Arc<dyn Middleware>),
        };

        let mut cache_placed = false;
        let mut links = Vec::with_capacity(self.links.len() + 1);
        for link in self.links {
            match link {
                Link::Middleware(middleware) => links.push(middleware),
                Link::FieldCache => {
                    cache_placed = true;
                    links.extend(cache.clone());
                }
            }
        }
        if !cache_placed {
            links.extend(cache);
        }

        let property_resolver: Arc<dyn Resolver> = Arc::new(PropertyResolver);
        let mut chains = HashMap::new();
        for object_type in registry.types().filter(|ty| ty.is_object()) {
            let Some(fields) = object_type.fields() else {
                continue;
            };

            let type_chains = fields
                .keys()
                .map(|field_name| {
                    let resolver = self
                        .resolvers
                        .fields
                        .get(&(object_type.name.clone(), field_name.clone()))
                        .cloned()
                        .unwrap_or_else(|| Arc::clone(&property_resolver));
                    let chain = FieldChain::compose(&links, &object_type.name, field_name, resolver);
                    (field_name.clone(), chain)
                })
                .collect::<HashMap<_, _>>();

            chains.insert(object_type.name.clone(), type_chains);
        }

        let link_count = chains
            .values()
            .flat_map(HashMap::values)
            .map(FieldChain::len)
            .sum::<usize>();
        tracing::debug!(
            "Composed the dispatch chains of {} object types with {link_count} middleware links in total",
            chains.len()
        );

        let documents = self
            .config
            .document_cache
            .enabled
            .then(|| Cache::new(self.config.document_cache.limit));

        let persisted_queries = PersistedQueries::new(
            self.store.clone(),
            self.config.key_prefix.clone(),
            self.config.persisted_queries.clone(),
            self.config.store_errors,
        );

        Ok(Schema(Arc::new(SchemaInner {
            registry,
            chains,
            type_resolvers: self.resolvers.types,
            store: self.store,
            config: self.config,
            documents,
            persisted_queries,
        })))
    }

    /// Resolvers and policies must target existing fields, type resolvers abstract types.
    fn check_registrations(&self, registry: &Registry) -> Result<(), SchemaError> {
        let object_field_exists = |type_name: &str, field_name: &str| {
            registry
                .lookup_type(type_name)
                .filter(|ty| ty.is_object())
                .and_then(|ty| ty.field(field_name))
                .is_some()
        };

        for (type_name, field_name) in self.resolvers.fields.keys() {
            if !object_field_exists(type_name, field_name) {
                return Err(SchemaError::UnknownResolverField {
                    type_name: type_name.clone(),
                    field_name: field_name.clone(),
                });
            }
        }

        for (type_name, field_name) in self.policies.fields() {
            if !object_field_exists(type_name, field_name) {
                return Err(SchemaError::UnknownPolicyField {
                    type_name: type_name.to_string(),
                    field_name: field_name.to_string(),
                });
            }
        }

        for type_name in self.resolvers.types.keys() {
            if !registry.lookup_type(type_name).is_some_and(|ty| ty.is_abstract()) {
                return Err(SchemaError::UnknownAbstractType(type_name.clone()));
            }
        }

        Ok(())
    }
}
