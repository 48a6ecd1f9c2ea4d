use std::collections::BTreeMap;

use crate::{ids::*, model::AppendType, types::*};

/// One consistent read of a workspace's logs, taken by the storage shell and
/// handed to the projector. Nothing derived is cached here.
#[derive(Clone, Debug, Default)]
pub struct LogSnapshot {
    pub now_unix: i64,
    pub workspace_id: WorkspaceId,
    pub files: Vec<FileRecord>,
    pub appends: Vec<Append>,
    pub heartbeats: Vec<Heartbeat>,
}

impl LogSnapshot {
    /// Keep only files matching `keep`, dropping their appends with them.
    pub fn retain_files<F>(&mut self, keep: F)
    where
        F: Fn(&FileRecord) -> bool,
    {
        self.files.retain(|f| keep(f));
        let kept: Vec<FileId> = self.files.iter().map(|f| f.id.clone()).collect();
        self.appends.retain(|a| kept.contains(&a.file_id));
    }

    /// Keep heartbeats only for agents that have claimed work in the
    /// remaining files, without their free-form current task. Call after
    /// `retain_files` when the reader is scoped.
    pub fn retain_claimant_heartbeats(&mut self) {
        let appends = &self.appends;
        self.heartbeats
            .retain(|hb| appends.iter().any(|a| a.ty == AppendType::Claim && a.author == hb.author));
        for hb in &mut self.heartbeats {
            hb.current_task = None;
        }
    }

    /// Appends grouped per file, each group in log order.
    pub fn logs_by_file(&self) -> BTreeMap<FileId, Vec<Append>> {
        let mut logs: BTreeMap<FileId, Vec<Append>> = BTreeMap::new();
        for append in &self.appends {
            logs.entry(append.file_id.clone()).or_default().push(append.clone());
        }
        for log in logs.values_mut() {
            log.sort_by_key(|a| a.append_id);
        }
        logs
    }

    pub fn file(&self, id: &FileId) -> Option<&FileRecord> {
        self.files.iter().find(|f| &f.id == id)
    }
}
