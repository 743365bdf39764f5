use std::fmt;

/// Per-folder sync state, persisted as a string so a restarted worker
/// resumes where the last one stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Initial,
    InitialUidInvalid,
    Poll,
    PollUidInvalid,
    Finish,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Initial => "initial",
            SyncState::InitialUidInvalid => "initial_uidinvalid",
            SyncState::Poll => "poll",
            SyncState::PollUidInvalid => "poll_uidinvalid",
            SyncState::Finish => "finish",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initial" => Some(SyncState::Initial),
            "initial_uidinvalid" => Some(SyncState::InitialUidInvalid),
            "poll" => Some(SyncState::Poll),
            "poll_uidinvalid" => Some(SyncState::PollUidInvalid),
            "finish" => Some(SyncState::Finish),
            _ => None,
        }
    }

    /// Where a UIDVALIDITY mismatch sends this state. Recovery states and
    /// `finish` stay put.
    pub fn invalidated(self) -> Self {
        match self {
            SyncState::Initial => SyncState::InitialUidInvalid,
            SyncState::Poll => SyncState::PollUidInvalid,
            other => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Finish)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_round_trip() {
        for state in [
            SyncState::Initial,
            SyncState::InitialUidInvalid,
            SyncState::Poll,
            SyncState::PollUidInvalid,
            SyncState::Finish,
        ] {
            assert_eq!(SyncState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SyncState::parse("unknown"), None);
    }

    #[test]
    fn invalidation_maps_each_phase_to_its_recovery_state() {
        assert_eq!(SyncState::Initial.invalidated(), SyncState::InitialUidInvalid);
        assert_eq!(SyncState::Poll.invalidated(), SyncState::PollUidInvalid);
        assert_eq!(
            SyncState::PollUidInvalid.invalidated(),
            SyncState::PollUidInvalid
        );
        assert_eq!(SyncState::Finish.invalidated(), SyncState::Finish);
    }
}
