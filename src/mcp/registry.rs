//! Catalogs of resources, tools and prompts.
//!
//! A [`Registry`] is built explicitly at startup, then shared read-only
//! (`Arc<Registry>`) by every session. Each catalog keeps entries in
//! registration order and rejects duplicate keys.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::mcp::error::RegistryError;
use crate::mcp::handler::{PromptHandler, ResourceHandler, ToolHandler};
use crate::mcp::template::UriTemplate;
use crate::mcp::types::{Arguments, Descriptor, ParamType, ParameterSpec};

/// Which catalog an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Resource,
    Tool,
    Prompt,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resource => "resource",
            Self::Tool => "tool",
            Self::Prompt => "prompt",
        })
    }
}

struct Entry<H: ?Sized> {
    descriptor: Descriptor,
    handler: Arc<H>,
}

/// A resolved catalog entry.
pub struct Resolved<'a, H: ?Sized> {
    pub descriptor: &'a Descriptor,
    pub handler: &'a Arc<H>,
}

/// One keyed catalog.
pub struct Catalog<H: ?Sized> {
    kind: CatalogKind,
    entries: IndexMap<String, Entry<H>>,
}

impl<H: ?Sized> Catalog<H> {
    #[must_use]
    pub fn new(kind: CatalogKind) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateKey` if the key is already taken.
    pub fn register(&mut self, descriptor: Descriptor, handler: Arc<H>) -> Result<(), RegistryError> {
        if self.entries.contains_key(&descriptor.key) {
            return Err(RegistryError::DuplicateKey {
                catalog: self.kind,
                key: descriptor.key,
            });
        }
        tracing::debug!(catalog = %self.kind, key = %descriptor.key, "Registered entry");
        self.entries
            .insert(descriptor.key.clone(), Entry { descriptor, handler });
        Ok(())
    }

    /// Lists descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Looks up an entry by exact key.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if no entry has this key.
    pub fn resolve(&self, key: &str) -> Result<Resolved<'_, H>, RegistryError> {
        self.entries
            .get(key)
            .map(|e| Resolved {
                descriptor: &e.descriptor,
                handler: &e.handler,
            })
            .ok_or_else(|| RegistryError::NotFound {
                catalog: self.kind,
                key: key.to_string(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved resource, with the placeholder bindings of a template match.
pub struct ResolvedResource<'a> {
    pub descriptor: &'a Descriptor,
    pub handler: &'a Arc<dyn ResourceHandler>,
    pub bindings: Arguments,
}

/// The resource catalog: static URIs and URI templates side by side.
pub struct ResourceCatalog {
    entries: Catalog<dyn ResourceHandler>,
    templates: Vec<UriTemplate>,
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        Self {
            entries: Catalog::new(CatalogKind::Resource),
            templates: Vec::new(),
        }
    }
}

impl ResourceCatalog {
    /// Adds a resource. Keys containing `{…}` are compiled as templates; a
    /// template registered without parameters gets one required string
    /// parameter per placeholder.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` or `InvalidTemplate`.
    pub fn register(
        &mut self,
        mut descriptor: Descriptor,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<(), RegistryError> {
        let template = if UriTemplate::is_template(&descriptor.key) {
            let template = UriTemplate::parse(&descriptor.key)?;
            if descriptor.parameters.is_empty() {
                descriptor.parameters = template
                    .placeholders()
                    .iter()
                    .map(|name| ParameterSpec::required(name.clone(), ParamType::String))
                    .collect();
            }
            Some(template)
        } else {
            None
        };

        self.entries.register(descriptor, handler)?;
        if let Some(template) = template {
            self.templates.push(template);
        }
        Ok(())
    }

    /// Lists every resource descriptor, static and templated, in
    /// registration order.
    pub fn list(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.list()
    }

    /// Lists only the templated descriptors.
    pub fn templates(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries
            .list()
            .filter(|d| UriTemplate::is_template(&d.key))
    }

    /// Resolves a concrete URI: exact static match first, then templates in
    /// registration order; first match wins.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if nothing matches.
    pub fn resolve(&self, uri: &str) -> Result<ResolvedResource<'_>, RegistryError> {
        if !UriTemplate::is_template(uri) {
            if let Ok(resolved) = self.entries.resolve(uri) {
                return Ok(ResolvedResource {
                    descriptor: resolved.descriptor,
                    handler: resolved.handler,
                    bindings: Arguments::new(),
                });
            }
        }

        for template in &self.templates {
            if let Some(bindings) = template.matches(uri) {
                let resolved = self.entries.resolve(template.as_str())?;
                return Ok(ResolvedResource {
                    descriptor: resolved.descriptor,
                    handler: resolved.handler,
                    bindings,
                });
            }
        }

        Err(RegistryError::NotFound {
            catalog: CatalogKind::Resource,
            key: uri.to_string(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three catalogs served by one process.
pub struct Registry {
    resources: ResourceCatalog,
    tools: Catalog<dyn ToolHandler>,
    prompts: Catalog<dyn PromptHandler>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            resources: ResourceCatalog::default(),
            tools: Catalog::new(CatalogKind::Tool),
            prompts: Catalog::new(CatalogKind::Prompt),
        }
    }

    /// Registers a resource (static URI or URI template).
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` or `InvalidTemplate`.
    pub fn register_resource<H>(&mut self, descriptor: Descriptor, handler: H) -> Result<(), RegistryError>
    where
        H: ResourceHandler + 'static,
    {
        self.resources.register(descriptor, Arc::new(handler))
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if a tool with this name exists.
    pub fn register_tool<H>(&mut self, descriptor: Descriptor, handler: H) -> Result<(), RegistryError>
    where
        H: ToolHandler + 'static,
    {
        self.tools.register(descriptor, Arc::new(handler))
    }

    /// Registers a prompt.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if a prompt with this name exists.
    pub fn register_prompt<H>(&mut self, descriptor: Descriptor, handler: H) -> Result<(), RegistryError>
    where
        H: PromptHandler + 'static,
    {
        self.prompts.register(descriptor, Arc::new(handler))
    }

    #[must_use]
    pub const fn resources(&self) -> &ResourceCatalog {
        &self.resources
    }

    #[must_use]
    pub const fn tools(&self) -> &Catalog<dyn ToolHandler> {
        &self.tools
    }

    #[must_use]
    pub const fn prompts(&self) -> &Catalog<dyn PromptHandler> {
        &self.prompts
    }
}
