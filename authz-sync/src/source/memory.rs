use super::{Member, OffDay, SourceDatabase};
use crate::error::SourceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct State {
    members: BTreeMap<String, Member>,
    off_days: BTreeMap<String, OffDay>,
    /// Bumped by every change to a tracked table
    revision: u64,
    /// Revision covered by the last completed sync
    synced_revision: u64,
    /// Revision seen by the last `should_sync`
    observed: Option<u64>,
}

/// In-process source for tests and local runs. Rows enumerate in id order.
#[derive(Default)]
pub struct MemorySource {
    state: RwLock<State>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_member(&self, member: Member) {
        let mut state = self.state.write();
        state.members.insert(member.id.clone(), member);
        state.revision += 1;
    }

    pub fn remove_member(&self, id: &str) {
        let mut state = self.state.write();
        if state.members.remove(id).is_some() {
            state.revision += 1;
        }
    }

    pub fn upsert_off_day(&self, off_day: OffDay) {
        let mut state = self.state.write();
        state.off_days.insert(off_day.id.clone(), off_day);
        state.revision += 1;
    }

    pub fn remove_off_day(&self, id: &str) {
        let mut state = self.state.write();
        if state.off_days.remove(id).is_some() {
            state.revision += 1;
        }
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    pub fn synced_revision(&self) -> u64 {
        self.state.read().synced_revision
    }
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn should_sync(&self) -> Result<bool, SourceError> {
        let mut state = self.state.write();
        state.observed = Some(state.revision);
        Ok(state.revision > state.synced_revision)
    }

    async fn sync_completed(&self) -> Result<(), SourceError> {
        let mut state = self.state.write();
        if let Some(observed) = state.observed.take() {
            state.synced_revision = state.synced_revision.max(observed);
        }
        Ok(())
    }

    async fn members(&self) -> Result<Vec<Member>, SourceError> {
        Ok(self.state.read().members.values().cloned().collect())
    }

    async fn off_days(&self) -> Result<Vec<OffDay>, SourceError> {
        Ok(self.state.read().off_days.values().cloned().collect())
    }
}
