//! The async session.
//!
//! An [`AsyncSession`] wraps a [`Session`] and runs every operation that
//! touches the database on tokio's blocking pool, inside the
//! [hand-off](crate::handoff). Its instances refuse to lazy-load anywhere
//! else: reading an unloaded relationship or an expired attribute from async
//! code fails with [`Error::MissingHandoff`]. Load what you need with
//! [`AsyncSession::load_related`], [`AsyncSession::refresh`], a `selectin`
//! relationship, or inside [`AsyncSession::run_sync`].
//!
//! ```ignore
//! let session = AsyncSession::new(&engine)?;
//! session.add(&hero)?;
//! session.commit().await?;
//! session.refresh(&hero).await?;
//! let team = session.load_related(&hero, "team").await?;
//! ```

use std::sync::Arc;

use sqlmodel_core::{Error, Instance, ModelDescriptor, Related, Result, Value};

use crate::engine::Engine;
use crate::handoff;
use crate::result::Executable;
use crate::session::{Mode, Session, SessionConfig};

/// Async façade over a session whose database work runs off the runtime.
#[derive(Debug)]
pub struct AsyncSession {
    session: Session,
}

impl AsyncSession {
    pub fn new(engine: &Engine) -> Result<Self> {
        Self::with_config(engine, SessionConfig::default())
    }

    pub fn with_config(engine: &Engine, config: SessionConfig) -> Result<Self> {
        Ok(Self {
            session: Session::with_mode(engine, config, Mode::Async)?,
        })
    }

    /// Run `op` against the wrapped session on the blocking pool, inside the
    /// hand-off.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(self.session.inner());
        tokio::task::spawn_blocking(move || {
            let _handoff = handoff::enter();
            op(&Session::from_inner(inner))
        })
        .await
        .map_err(|e| Error::Runtime(format!("blocking task failed: {e}")))?
    }

    // ========================================================================
    // Tracking (no I/O)
    // ========================================================================

    pub fn add(&self, instance: &Instance) -> Result<()> {
        self.session.add(instance)
    }

    pub fn add_all<'a, I>(&self, instances: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Instance>,
    {
        self.session.add_all(instances)
    }

    pub fn delete(&self, instance: &Instance) -> Result<()> {
        self.session.delete(instance)
    }

    pub fn expunge(&self, instance: &Instance) {
        self.session.expunge(instance);
    }

    #[must_use]
    pub fn contains(&self, instance: &Instance) -> bool {
        self.session.contains(instance)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        self.session.config()
    }

    // ========================================================================
    // Database work
    // ========================================================================

    /// Execute a statement; every row is read before this returns.
    pub async fn exec<S>(&self, statement: &S) -> Result<S::Output>
    where
        S: Executable + Clone + Send + 'static,
        S::Output: Send + 'static,
    {
        let statement = statement.clone();
        self.blocking(move |session| session.exec(&statement)).await
    }

    pub async fn get(&self, model: &Arc<ModelDescriptor>, pk: impl Into<Value>) -> Result<Option<Instance>> {
        let model = Arc::clone(model);
        let pk = pk.into();
        self.blocking(move |session| session.get(&model, pk)).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.blocking(|session| session.flush()).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.blocking(|session| session.commit()).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.blocking(|session| session.rollback()).await
    }

    pub async fn refresh(&self, instance: &Instance) -> Result<()> {
        let instance = instance.clone();
        self.blocking(move |session| session.refresh(&instance)).await
    }

    /// Load a relationship; afterwards it reads without I/O.
    pub async fn load_related(&self, instance: &Instance, name: &str) -> Result<Related> {
        let instance = instance.clone();
        let name = name.to_string();
        self.blocking(move |session| session.load_related(&instance, &name)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.blocking(|session| session.close()).await
    }

    /// Run synchronous code against the session, lazy loads allowed.
    pub async fn run_sync<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(op).await
    }
}
