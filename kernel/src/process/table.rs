//! Global process table: every live [`Application`], keyed by [`AppId`].
//!
//! Mirrors the shape of `fs::Vfs` -- a single `RwLock`-guarded map behind a
//! `'static` accessor function -- rather than returning borrowed references
//! out of a lock guard. Lookups clone the `Arc<Application>` out instead.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::RwLock;

use super::pcb::{AppId, Application};

pub struct ProcessTable {
    apps: RwLock<BTreeMap<AppId, Arc<Application>>>,
}

impl ProcessTable {
    const fn new() -> Self {
        Self {
            apps: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, app: Arc<Application>) {
        self.apps.write().insert(app.id, app);
    }

    pub fn get(&self, id: AppId) -> Option<Arc<Application>> {
        self.apps.read().get(&id).cloned()
    }

    pub fn remove(&self, id: AppId) -> Option<Arc<Application>> {
        self.apps.write().remove(&id)
    }

    pub fn contains(&self, id: AppId) -> bool {
        self.apps.read().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.apps.read().len()
    }
}

static PROCESS_TABLE: ProcessTable = ProcessTable::new();

pub fn process_table() -> &'static ProcessTable {
    &PROCESS_TABLE
}
