//! Session factory: the explicit, caller-owned source of sessions.

use std::fmt;
use std::rc::Rc;

use persistctx_core::{Entity, EntityRegistry, Error, Result, StoreConnector};

use crate::Session;
use crate::config::SessionConfig;

/// Builds sessions over one store connector and one validated entity registry.
pub struct SessionFactory<C> {
    connector: C,
    registry: Rc<EntityRegistry>,
    config: SessionConfig,
}

impl SessionFactory<()> {
    /// Start building a factory.
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::default()
    }
}

impl<C: StoreConnector> SessionFactory<C> {
    /// Open a new session with its own store connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn open_session(&self) -> Result<Session<C::Store>> {
        let store = self.connector.connect()?;
        Ok(Session::new(
            store,
            Rc::clone(&self.registry),
            self.config.clone(),
        ))
    }

    /// The entity registry shared by every session.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Configuration handed to new sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The store connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("connector", &self.connector)
            .field("entities", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`SessionFactory`]. Registration errors surface from [`build`](Self::build).
#[derive(Debug, Default)]
pub struct SessionFactoryBuilder {
    registry: EntityRegistry,
    config: SessionConfig,
    error: Option<Error>,
}

impl SessionFactoryBuilder {
    /// Use `config` for every session.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an entity type.
    #[must_use]
    pub fn register<E: Entity>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.registry.register::<E>() {
                self.error = Some(e);
            }
        }
        self
    }

    /// Validate the registry and build the factory.
    pub fn build<C: StoreConnector>(self, connector: C) -> Result<SessionFactory<C>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.registry.validate()?;
        tracing::info!(
            entities = self.registry.len(),
            auto_begin = self.config.auto_begin,
            flush_mode = ?self.config.flush_mode,
            "Built session factory"
        );
        Ok(SessionFactory {
            connector,
            registry: Rc::new(self.registry),
            config: self.config,
        })
    }
}
