//! Keyword definitions and the registry they are resolved from.
//!
//! Modules hand their [`KeywordDefinition`]s to [`KeywordRegistry::register`],
//! which adds a whole module or nothing. Lookups read an immutable snapshot
//! without locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use keyword_core::{DescriptorExport, KeywordDescriptor, Value};
use parking_lot::Mutex;
use tracing::info;

use crate::config::EngineConfig;
use crate::keyword::{FnKeyword, Keyword, KeywordContext};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration errors detected while registering a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("keyword name '{name}' is declared more than once in module '{module}'")]
    DuplicateInModule { module: String, name: String },
    #[error("keyword name '{name}' from module '{module}' is already registered by module '{existing}'")]
    AlreadyRegistered {
        module: String,
        name: String,
        existing: String,
    },
    #[error("keyword '{identifier}' in module '{module}' resolves to an empty name")]
    EmptyName { module: String, identifier: String },
}

/// Lookup failures. Never raised as a panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no keywords are registered")]
    Empty,
    #[error("Could not find keyword named '{name}'")]
    NotFound { name: String },
}

// ---------------------------------------------------------------------------
// KeywordDefinition
// ---------------------------------------------------------------------------

/// Creates a fresh keyword instance per invocation.
pub type KeywordFactory = Arc<dyn Fn() -> Box<dyn Keyword> + Send + Sync>;

/// Declaration of one keyword as exported by a [`KeywordModule`].
#[derive(Clone)]
pub struct KeywordDefinition {
    identifier: String,
    name: Option<String>,
    description: Option<String>,
    schema: Option<Value>,
    required: Vec<String>,
    optional: Vec<String>,
    timeout_ms: Option<u64>,
    routing: Vec<String>,
    factory: KeywordFactory,
}

impl KeywordDefinition {
    /// Declares a keyword whose instances are built by `factory`.
    pub fn new<K, F>(identifier: impl Into<String>, factory: F) -> Self
    where
        K: Keyword,
        F: Fn() -> K + Send + Sync + 'static,
    {
        Self {
            identifier: identifier.into(),
            name: None,
            description: None,
            schema: None,
            required: Vec::new(),
            optional: Vec::new(),
            timeout_ms: None,
            routing: Vec::new(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Keyword>),
        }
    }

    /// Declares a hook-less keyword backed by a synchronous function.
    ///
    /// The function runs on tokio's blocking pool and may block; once the
    /// deadline passes it keeps running detached.
    pub fn from_fn<F>(identifier: impl Into<String>, f: F) -> Self
    where
        F: Fn(&KeywordContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(identifier, move || FnKeyword::new(Arc::clone(&f)))
    }

    /// Explicit name; overrides the identifier as the registered name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Adds a required property template.
    #[must_use]
    pub fn require(mut self, template: impl Into<String>) -> Self {
        self.required.push(template.into());
        self
    }

    /// Adds an optional property template.
    #[must_use]
    pub fn optional(mut self, template: impl Into<String>) -> Self {
        self.optional.push(template.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Adds a routing tag.
    #[must_use]
    pub fn route(mut self, tag: impl Into<String>) -> Self {
        self.routing.push(tag.into());
        self
    }

    /// Registered name: the explicit name if declared, else the identifier.
    #[must_use]
    pub fn resolved_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    fn into_entry(self, module: &str, default_timeout_ms: u64) -> KeywordEntry {
        let descriptor = KeywordDescriptor {
            name: self.resolved_name().to_string(),
            identifier: self.identifier,
            module: module.to_string(),
            description: self.description,
            schema: self.schema,
            required_properties: self.required,
            optional_properties: self.optional,
            timeout_ms: self.timeout_ms.unwrap_or(default_timeout_ms),
            routing: self.routing,
        };
        KeywordEntry {
            descriptor: Arc::new(descriptor),
            factory: self.factory,
        }
    }
}

impl std::fmt::Debug for KeywordDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordDefinition")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// KeywordModule
// ---------------------------------------------------------------------------

/// A unit of keyword registration.
pub trait KeywordModule: Send + Sync {
    /// Module name, recorded on every descriptor it contributes.
    fn name(&self) -> &str;

    /// The keywords this module exports.
    fn keywords(&self) -> Vec<KeywordDefinition>;
}

/// A [`KeywordModule`] assembled from a fixed list of definitions.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    name: String,
    definitions: Vec<KeywordDefinition>,
}

impl KeywordSet {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, definition: KeywordDefinition) -> Self {
        self.definitions.push(definition);
        self
    }
}

impl KeywordModule for KeywordSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn keywords(&self) -> Vec<KeywordDefinition> {
        self.definitions.clone()
    }
}

// ---------------------------------------------------------------------------
// KeywordEntry
// ---------------------------------------------------------------------------

/// A registered keyword: its descriptor and the factory for fresh instances.
#[derive(Clone)]
pub struct KeywordEntry {
    descriptor: Arc<KeywordDescriptor>,
    factory: KeywordFactory,
}

impl KeywordEntry {
    #[must_use]
    pub fn descriptor(&self) -> &Arc<KeywordDescriptor> {
        &self.descriptor
    }

    /// Creates a fresh instance for one invocation.
    #[must_use]
    pub fn instantiate(&self) -> Box<dyn Keyword> {
        (self.factory)()
    }
}

impl std::fmt::Debug for KeywordEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// KeywordRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct RegistrySnapshot {
    by_name: HashMap<String, KeywordEntry>,
    /// Registration order of keyword names.
    order: Vec<String>,
    modules: Vec<String>,
}

/// Name-indexed set of registered keywords.
///
/// Readers load the current snapshot without locking. Registrations are
/// serialized on a writer mutex, validated against the snapshot they were
/// computed from, and published as a new snapshot only if the whole module
/// is valid.
pub struct KeywordRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
    default_timeout_ms: u64,
}

impl KeywordRegistry {
    /// Creates an empty registry; keywords declaring no timeout get
    /// `default_timeout_ms`.
    #[must_use]
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
            default_timeout_ms,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_timeout_ms)
    }

    /// Registers every keyword exported by `module` and returns how many
    /// were added. Either all of them are added or none is.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if a name is empty, declared twice in the
    /// module, or already registered.
    pub fn register(&self, module: &dyn KeywordModule) -> Result<usize, RegistryError> {
        let _writer = self.writer.lock();
        let current = self.snapshot.load_full();
        let module_name = module.name();

        let mut seen = HashSet::new();
        let mut staged = Vec::new();
        for definition in module.keywords() {
            let name = definition.resolved_name().to_string();
            if name.trim().is_empty() {
                return Err(RegistryError::EmptyName {
                    module: module_name.to_string(),
                    identifier: definition.identifier.clone(),
                });
            }
            if !seen.insert(name.clone()) {
                return Err(RegistryError::DuplicateInModule {
                    module: module_name.to_string(),
                    name,
                });
            }
            if let Some(existing) = current.by_name.get(&name) {
                return Err(RegistryError::AlreadyRegistered {
                    module: module_name.to_string(),
                    name,
                    existing: existing.descriptor.module.clone(),
                });
            }
            staged.push(definition.into_entry(module_name, self.default_timeout_ms));
        }

        let added = staged.len();
        let mut next = RegistrySnapshot::clone(&current);
        for entry in staged {
            next.order.push(entry.descriptor.name.clone());
            next.by_name.insert(entry.descriptor.name.clone(), entry);
        }
        next.modules.push(module_name.to_string());
        self.snapshot.store(Arc::new(next));

        info!(module = module_name, keywords = added, "registered keyword module");
        Ok(added)
    }

    /// Finds a keyword by its registered name.
    ///
    /// # Errors
    ///
    /// [`LookupError::Empty`] if nothing is registered,
    /// [`LookupError::NotFound`] if `name` is unknown.
    pub fn lookup(&self, name: &str) -> Result<KeywordEntry, LookupError> {
        let snapshot = self.snapshot.load();
        if snapshot.by_name.is_empty() {
            return Err(LookupError::Empty);
        }
        snapshot
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                name: name.to_string(),
            })
    }

    /// Exported descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<DescriptorExport> {
        let snapshot = self.snapshot.load();
        snapshot
            .order
            .iter()
            .filter_map(|name| snapshot.by_name.get(name))
            .map(|entry| entry.descriptor.export())
            .collect()
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.snapshot.load().order.clone()
    }

    /// Names of the modules registered so far.
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        self.snapshot.load().modules.clone()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot.load().by_name.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.load().by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }
}

impl Default for KeywordRegistry {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
