//! Secret routing.
//!
//! A [`Router`] maps a logical key to one backend with an ordered list of
//! pattern rules and a default. Rules are checked in registration order and
//! the first match wins. All configuration errors surface when the router is
//! built, never on individual lookups.

use std::collections::HashMap;

use strongbox_policy::Pattern;
use tracing::debug;

use crate::backend::SharedBackend;
use crate::error::RoutingError;
use crate::types::SecretKey;

/// A routing rule: keys matching `pattern` go to `backend`.
#[derive(Debug, Clone)]
pub struct Route {
    /// Key predicate.
    pub pattern: Pattern,
    /// Target backend id.
    pub backend: String,
}

/// A backend registered with the router.
#[derive(Clone)]
pub struct RoutedBackend {
    id: String,
    backend: SharedBackend,
}

impl RoutedBackend {
    /// Returns the backend id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }
}

impl std::fmt::Debug for RoutedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedBackend")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Resolves keys to backends.
#[derive(Debug)]
pub struct Router {
    backends: Vec<RoutedBackend>,
    rules: Vec<(Pattern, usize)>,
    default: usize,
}

impl Router {
    /// Starts building a router.
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Creates a router with a single backend serving every key.
    #[must_use]
    pub fn single(id: impl Into<String>, backend: SharedBackend) -> Self {
        Self {
            backends: vec![RoutedBackend {
                id: id.into(),
                backend,
            }],
            rules: Vec::new(),
            default: 0,
        }
    }

    /// Returns the backend for `key`.
    #[must_use]
    pub fn resolve(&self, key: &SecretKey) -> &RoutedBackend {
        let index = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.matches(key.as_str()))
            .map_or(self.default, |(_, index)| *index);
        &self.backends[index]
    }

    /// Returns true if `backend` is the one `key` resolves to.
    #[must_use]
    pub fn routes_to(&self, key: &SecretKey, backend: &RoutedBackend) -> bool {
        self.resolve(key).id == backend.id
    }

    /// Returns all registered backends in registration order.
    #[must_use]
    pub fn backends(&self) -> &[RoutedBackend] {
        &self.backends
    }

    /// Returns the default backend.
    #[must_use]
    pub fn default_backend(&self) -> &RoutedBackend {
        &self.backends[self.default]
    }
}

/// Builder for [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    backends: Vec<RoutedBackend>,
    routes: Vec<Route>,
    default: Option<String>,
}

impl RouterBuilder {
    /// Registers a backend under `id`.
    #[must_use]
    pub fn backend(mut self, id: impl Into<String>, backend: SharedBackend) -> Self {
        self.backends.push(RoutedBackend {
            id: id.into(),
            backend,
        });
        self
    }

    /// Appends a routing rule.
    #[must_use]
    pub fn route(mut self, pattern: Pattern, backend: impl Into<String>) -> Self {
        self.routes.push(Route {
            pattern,
            backend: backend.into(),
        });
        self
    }

    /// Sets the default backend.
    #[must_use]
    pub fn default_backend(mut self, id: impl Into<String>) -> Self {
        self.default = Some(id.into());
        self
    }

    /// Validates and builds the router.
    ///
    /// # Errors
    ///
    /// Returns a [`RoutingError`] if no default backend is configured, a
    /// backend id is duplicated, or a route or the default names an unknown
    /// backend.
    pub fn build(self) -> Result<Router, RoutingError> {
        let mut index = HashMap::with_capacity(self.backends.len());
        for (i, backend) in self.backends.iter().enumerate() {
            if index.insert(backend.id.clone(), i).is_some() {
                return Err(RoutingError::new(format!(
                    "duplicate backend id '{}'",
                    backend.id
                )));
            }
        }

        let default_id = self
            .default
            .ok_or_else(|| RoutingError::new("no default backend configured"))?;
        let default = *index.get(&default_id).ok_or_else(|| {
            RoutingError::new(format!("default backend '{default_id}' is not registered"))
        })?;

        let rules = self
            .routes
            .into_iter()
            .map(|route| {
                index
                    .get(&route.backend)
                    .map(|i| (route.pattern.clone(), *i))
                    .ok_or_else(|| {
                        RoutingError::new(format!(
                            "route {} targets unknown backend '{}'",
                            route.pattern, route.backend
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            backends = self.backends.len(),
            rules = rules.len(),
            default = %default_id,
            "router built"
        );
        Ok(Router {
            backends: self.backends,
            rules,
            default,
        })
    }
}
