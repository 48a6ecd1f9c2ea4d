use serde::{Deserialize, Serialize};

/// Kind of an append record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppendType {
    Task,
    Claim,
    Response,
    Cancel,
    Block,
    Renew,
    Comment,
    Vote,
}

impl AppendType {
    pub const ALL: [AppendType; 8] = [
        AppendType::Task,
        AppendType::Claim,
        AppendType::Response,
        AppendType::Cancel,
        AppendType::Block,
        AppendType::Renew,
        AppendType::Comment,
        AppendType::Vote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppendType::Task => "task",
            AppendType::Claim => "claim",
            AppendType::Response => "response",
            AppendType::Cancel => "cancel",
            AppendType::Block => "block",
            AppendType::Renew => "renew",
            AppendType::Comment => "comment",
            AppendType::Vote => "vote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Response and cancel close a claim for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppendType::Response | AppendType::Cancel)
    }
}

/// Ordered permission levels: read < append < write.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read = 1,
    Append = 2,
    Write = 3,
}

impl Permission {
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Append => "append",
            Permission::Write => "write",
        }
    }

    /// Accepts the legacy `admin` spelling as an alias of `write`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "append" => Some(Permission::Append),
            "write" | "admin" => Some(Permission::Write),
            _ => None,
        }
    }

    /// Label shown to humans. Display only; never parsed back into a fourth level.
    pub fn display_alias(&self) -> &'static str {
        match self {
            Permission::Write => "admin",
            other => other.as_str(),
        }
    }
}

/// What a key's `scope_path` refers to. Later variants are narrower.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Workspace,
    Folder,
    File,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Workspace => "workspace",
            ScopeType::Folder => "folder",
            ScopeType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workspace" => Some(ScopeType::Workspace),
            "folder" => Some(ScopeType::Folder),
            "file" => Some(ScopeType::File),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" | "normal" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Derived task status, never stored.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Blocked,
    Stalled,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Claimed,
        TaskStatus::Blocked,
        TaskStatus::Stalled,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Stalled => "stalled",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s.trim())
    }
}

/// Derived claim state at a point in time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Active,
    Expired,
    Blocked,
    Completed,
    Cancelled,
}

impl ClaimState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimState::Active => "active",
            ClaimState::Expired => "expired",
            ClaimState::Blocked => "blocked",
            ClaimState::Completed => "completed",
            ClaimState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimState::Completed | ClaimState::Cancelled)
    }
}

/// Status an agent reports about itself in a heartbeat.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Busy,
    Idle,
}

impl HeartbeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatStatus::Busy => "busy",
            HeartbeatStatus::Idle => "idle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "busy" => Some(HeartbeatStatus::Busy),
            "idle" => Some(HeartbeatStatus::Idle),
            _ => None,
        }
    }
}

/// Liveness classification shown on the board.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Busy,
    Idle,
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_ordered() {
        assert!(Permission::Read < Permission::Append);
        assert!(Permission::Append < Permission::Write);
        assert_eq!(Permission::Write.level(), 3);
    }

    #[test]
    fn admin_is_an_alias_of_write() {
        assert_eq!(Permission::parse("admin"), Some(Permission::Write));
        assert_eq!(Permission::parse("ADMIN"), Some(Permission::Write));
        assert_eq!(Permission::Write.display_alias(), "admin");
        assert_eq!(Permission::parse("owner"), None);
    }

    #[test]
    fn scope_types_order_by_narrowness() {
        assert!(ScopeType::Workspace < ScopeType::Folder);
        assert!(ScopeType::Folder < ScopeType::File);
    }

    #[test]
    fn append_type_names_round_trip() {
        for ty in AppendType::ALL {
            assert_eq!(AppendType::parse(ty.as_str()), Some(ty));
        }
        assert!(AppendType::Response.is_terminal());
        assert!(!AppendType::Block.is_terminal());
        assert!(!AppendType::Renew.is_terminal());
    }
}
