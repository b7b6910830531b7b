use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Groups currently held by a started client in this process.
///
/// Two clients of one group cannot run side by side; the second start is
/// refused with [`Error::GroupAlreadyStarted`].
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, group: &str) -> Result<()> {
        if self.inner.lock().insert(group.to_string()) {
            Ok(())
        } else {
            Err(Error::GroupAlreadyStarted(group.to_string()))
        }
    }

    pub fn release(&self, group: &str) {
        self.inner.lock().remove(group);
    }

    pub fn contains(&self, group: &str) -> bool {
        self.inner.lock().contains(group)
    }
}
