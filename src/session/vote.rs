use serenity::model::id::UserId;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Actions a non-privileged member can only trigger by vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteAction {
    Pause,
    Resume,
    Skip,
    Shuffle,
    Stop,
}

impl VoteAction {
    pub const ALL: [VoteAction; 5] = [
        Self::Pause,
        Self::Resume,
        Self::Skip,
        Self::Shuffle,
        Self::Stop,
    ];

    pub fn verb(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Skip => "skip",
            Self::Shuffle => "shuffle",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for VoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Votes needed for `action` with `non_bot_members` humans in the voice channel.
///
/// `ceil((members - 1) / 2.5)`, except that stopping with exactly two members
/// always needs both.
pub fn required_votes(action: VoteAction, non_bot_members: usize) -> usize {
    if action == VoteAction::Stop && non_bot_members == 2 {
        return 2;
    }
    let others = non_bot_members.saturating_sub(1);
    // ceil(others / 2.5) == ceil(2 * others / 5)
    (others * 2).div_ceil(5)
}

/// Per-action voter sets for the track currently playing.
#[derive(Debug, Default)]
pub struct VoteGate {
    voters: HashMap<VoteAction, HashSet<UserId>>,
}

impl VoteGate {
    /// Records a vote and returns how many distinct members have voted for `action`.
    pub fn cast(&mut self, action: VoteAction, voter: UserId) -> usize {
        let set = self.voters.entry(action).or_default();
        set.insert(voter);
        set.len()
    }

    pub fn count(&self, action: VoteAction) -> usize {
        self.voters.get(&action).map_or(0, HashSet::len)
    }

    pub fn clear(&mut self, action: VoteAction) {
        self.voters.remove(&action);
    }

    pub fn clear_all(&mut self) {
        self.voters.clear();
    }
}
