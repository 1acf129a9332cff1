//! The persisted-record seam used by the scheduler.

use tracing::debug;

use swarmgrid_state::{ContainerRecord, StateError, StateResult, StateStore};

/// Where committed placements are recorded.
pub trait ContainerStore: Send + Sync {
    fn commit(&self, record: &ContainerRecord) -> StateResult<()>;

    /// Drop a record. Without `force`, a missing record is an error.
    fn remove(&self, id: &str, force: bool) -> StateResult<()>;
}

impl ContainerStore for StateStore {
    fn commit(&self, record: &ContainerRecord) -> StateResult<()> {
        self.put_container(record)
    }

    fn remove(&self, id: &str, force: bool) -> StateResult<()> {
        let existed = self.delete_container(id)?;
        if !existed {
            if !force {
                return Err(StateError::NotFound(id.to_string()));
            }
            debug!(container = %id, "forced removal of unrecorded container");
        }
        Ok(())
    }
}
