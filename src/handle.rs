//! Generation-tagged connection handles

use crate::redialer::Shared;
use std::fmt;
use std::sync::Arc;

/// Accessor for one delivered connection
///
/// Issued by `Redialer::subscribe`. Consumers read the live connection with
/// `get` and call `report_closed` once they observe it is unusable, which
/// clears the slot and re-arms the dial loop. Handles are cheap to clone;
/// clones share the connection object and its generation tag.
pub struct ConnHandle<C> {
    shared: Arc<Shared<C>>,
    conn: Arc<C>,
    generation: u64,
}

impl<C> ConnHandle<C> {
    pub(crate) fn new(shared: Arc<Shared<C>>, conn: Arc<C>, generation: u64) -> Self {
        Self {
            shared,
            conn,
            generation,
        }
    }

    /// The wrapped connection
    pub fn get(&self) -> &C {
        &self.conn
    }

    /// Generation this connection was installed under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report that this connection is dead
    ///
    /// Only acts while the slot still holds this handle's generation:
    /// reports through superseded handles, and repeat reports through the
    /// same handle, are safe no-ops. The core does no liveness polling of
    /// its own, so a dead connection stays tracked until some consumer
    /// reports it.
    pub fn report_closed(&self) {
        self.shared.report_closed(self.generation);
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<C>> {
        &self.shared
    }
}

impl<C> Clone for ConnHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            conn: Arc::clone(&self.conn),
            generation: self.generation,
        }
    }
}

impl<C> fmt::Debug for ConnHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
