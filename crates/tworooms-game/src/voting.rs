//! Removal votes and the elections that follow them.
//!
//! ```text
//! start_removal_vote ──→ ACTIVE ──all voted / 30 s──→ resolve
//!                                                      │ PASSED
//!                                                      ▼
//!                    interim leader + LEADERSHIP_CHANGED (VOTE_REMOVAL)
//!                                                      │ 7 s
//!                                                      ▼
//!                 election ──all voted / 30 s──→ plurality winner installed
//! ```
//!
//! Sessions are keyed by room and color, so each color room has at most
//! one vote at a time. A session ends exactly once: whichever of the last
//! ballot or the timeout claims the `ACTIVE → terminal` transition under
//! the table lock resolves it, and the other finds nothing to do.
//!
//! The table lock is never held while the registry lock is taken.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tworooms_hub::Hub;
use tworooms_protocol::{
    CandidateVotes, LeadershipChangeReason, PlayerId, PlayerRef, Room,
    RoomCode, RoomColor, RoundPhase, ServerEvent, VoteChoice, VoteId,
    VoteKind, VoteResult, VoteSession, VoteStatus,
};
use tworooms_registry::RoomRegistry;

use crate::leader::{LeaderService, LeadershipChange, player_ref};
use crate::{GameConfig, GameError};

type VoteKey = (RoomCode, RoomColor);

/// Fewest players a color room needs before a removal vote is allowed.
pub const MIN_VOTERS: usize = 3;

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    AllVoted,
    Timeout,
}

/// A background task tied to one vote key.
enum Pending {
    /// Timeout for the session with this id.
    Timeout(VoteId, AbortHandle),
    /// Delayed election after the removal vote with this id. The handle is
    /// `None` while the removal result is still being applied.
    Election(VoteId, Option<AbortHandle>),
}

impl Pending {
    fn abort(&self) {
        match self {
            Self::Timeout(_, h) | Self::Election(_, Some(h)) => h.abort(),
            Self::Election(_, None) => {}
        }
    }
}

struct Entry {
    session: VoteSession,
    opened: Instant,
}

#[derive(Default)]
struct VoteTable {
    sessions: HashMap<VoteKey, Entry>,
    tasks: HashMap<VoteKey, Pending>,
}

struct Inner {
    registry: Arc<RoomRegistry>,
    hub: Hub,
    leaders: Arc<LeaderService>,
    config: Arc<GameConfig>,
    table: Mutex<VoteTable>,
    sweeper: Mutex<Option<AbortHandle>>,
}

/// Handle to the voting service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct VotingService {
    inner: Arc<Inner>,
}

impl VotingService {
    pub fn new(
        registry: Arc<RoomRegistry>,
        hub: Hub,
        leaders: Arc<LeaderService>,
        config: Arc<GameConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                hub,
                leaders,
                config,
                table: Mutex::new(VoteTable::default()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    // -- Removal ------------------------------------------------------------

    /// Opens a vote to remove `target`, the leader of `color`.
    ///
    /// # Errors
    ///
    /// - `Conflict` during hostage selection, or while another vote or an
    ///   election is pending for this room.
    /// - `NotFound` if the initiator is not in the game.
    /// - `Forbidden` if the initiator stands in the other room or is a
    ///   leader.
    /// - `InvalidInput` if `target` is not that room's leader, or the room
    ///   has fewer than three players.
    pub fn start_removal_vote(
        &self,
        code: &RoomCode,
        initiator: PlayerId,
        color: RoomColor,
        target: PlayerId,
    ) -> Result<VoteSession, GameError> {
        let room = self.inner.registry.get(code)?;
        let round = room
            .round()
            .ok_or_else(|| GameError::conflict("no round in progress"))?;
        if round.phase == RoundPhase::Selecting {
            return Err(GameError::conflict(
                "cannot start a vote while hostages are being selected",
            ));
        }
        let initiator_player = room
            .player(initiator)
            .ok_or_else(|| GameError::not_found(format!("player {initiator} not found")))?;
        if !initiator_player.is_in(color) {
            return Err(GameError::forbidden("you can only vote in your own room"));
        }
        if round.leader_color(initiator).is_some() {
            return Err(GameError::forbidden("leaders cannot start a removal vote"));
        }
        let target_player = room
            .player(target)
            .filter(|p| round.leader(color) == Some(target) && p.is_in(color))
            .ok_or_else(|| GameError::invalid("target is not the leader of this room"))?;
        let voters = room.player_ids_in(color);
        if voters.len() < MIN_VOTERS {
            return Err(GameError::invalid(format!(
                "at least {MIN_VOTERS} players are needed to vote"
            )));
        }

        let now = Utc::now();
        let timeout = self.inner.config.vote_timeout;
        let session = VoteSession {
            id: VoteId::random(),
            kind: VoteKind::Removal,
            room_code: code.clone(),
            room_color: color,
            target_leader: Some(target),
            target_leader_name: Some(target_player.nickname.clone()),
            initiator: Some(initiator),
            initiator_name: Some(initiator_player.nickname.clone()),
            candidates: Vec::new(),
            started_at: now,
            expires_at: now + chrono_duration(timeout),
            timeout_seconds: self.inner.config.vote_timeout_secs(),
            total_voters: voters.len(),
            votes: HashMap::new(),
            status: VoteStatus::Active,
        };

        let key = (code.clone(), color);
        {
            let mut table = self.inner.table.lock();
            check_table(&table, &key)?;
            table.sessions.insert(
                key.clone(),
                Entry {
                    session: session.clone(),
                    opened: Instant::now(),
                },
            );
            let timer = self.spawn_timeout(key.clone(), session.id);
            if let Some(old) = table.tasks.insert(key, Pending::Timeout(session.id, timer)) {
                old.abort();
            }
        }

        tracing::info!(
            room_code = %code,
            room_color = %color,
            vote_id = %session.id,
            %initiator,
            %target,
            voters = session.total_voters,
            "removal vote started"
        );
        self.inner.hub.publish_to_color(
            code,
            &voters,
            &ServerEvent::VoteSessionStarted {
                vote_id: session.id,
                vote_type: VoteKind::Removal,
                room_color: color,
                target_leader: Some(PlayerRef::from(target_player)),
                initiator: Some(PlayerRef::from(initiator_player)),
                candidates: Vec::new(),
                total_voters: session.total_voters,
                timeout_seconds: session.timeout_seconds,
                started_at: session.started_at,
            },
        );
        Ok(session)
    }

    // -- Ballots ------------------------------------------------------------

    /// Records a ballot and broadcasts `VOTE_PROGRESS`. The ballot that
    /// completes participation resolves the session.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such session exists in this room.
    /// - `Conflict` if the session has ended or `voter` already voted.
    /// - `Forbidden` if `voter` is not in the session's room.
    /// - `InvalidInput` for `YES`/`NO` in an election, a candidate in a
    ///   removal vote, or a candidate who is not on the ballot.
    pub fn cast_vote(
        &self,
        code: &RoomCode,
        vote_id: VoteId,
        voter: PlayerId,
        choice: VoteChoice,
    ) -> Result<VoteSession, GameError> {
        let room = self.inner.registry.get(code)?;

        let (session, remaining) = {
            let mut table = self.inner.table.lock();
            let entry = table
                .sessions
                .values_mut()
                .find(|e| e.session.id == vote_id && e.session.room_code == *code)
                .ok_or_else(|| GameError::not_found(format!("vote {vote_id} not found")))?;
            let session = &mut entry.session;
            if !session.is_active() {
                return Err(GameError::conflict("vote is no longer active"));
            }
            if !room.player(voter).is_some_and(|p| p.is_in(session.room_color)) {
                return Err(GameError::forbidden("you can only vote in your own room"));
            }
            if session.has_voted(voter) {
                return Err(GameError::conflict("you have already voted"));
            }
            match (session.kind, choice) {
                (VoteKind::Removal, VoteChoice::Yes | VoteChoice::No) => {}
                (VoteKind::Election, VoteChoice::Candidate(c)) if session.candidates.contains(&c) => {}
                (VoteKind::Election, VoteChoice::Candidate(_)) => {
                    return Err(GameError::invalid("that player is not a candidate"));
                }
                _ => return Err(GameError::invalid("choice does not match the vote type")),
            }
            session.votes.insert(voter, choice);
            let deadline = entry.opened + self.inner.config.vote_timeout;
            let remaining = deadline.saturating_duration_since(Instant::now());
            (entry.session.clone(), remaining)
        };

        tracing::debug!(
            room_code = %code,
            %vote_id,
            %voter,
            voted = session.votes.len(),
            total = session.total_voters,
            "vote cast"
        );
        self.inner.hub.publish_to_color(
            code,
            &room.player_ids_in(session.room_color),
            &ServerEvent::VoteProgress {
                vote_id,
                voted_count: session.votes.len(),
                total_voters: session.total_voters,
                time_remaining: u32::try_from(remaining.as_secs()).unwrap_or(u32::MAX),
            },
        );

        if session.all_voted() {
            self.resolve(code, session.room_color, vote_id, Trigger::AllVoted);
        }
        Ok(session)
    }

    // -- Resolution ---------------------------------------------------------

    /// Ends a session exactly once. Returns `false` if it had already ended
    /// or been replaced.
    fn resolve(&self, code: &RoomCode, color: RoomColor, vote_id: VoteId, trigger: Trigger) -> bool {
        let Some(session) = self.claim(code, color, vote_id, trigger) else {
            return false;
        };
        match session.kind {
            VoteKind::Removal => self.finish_removal(code, session, trigger),
            VoteKind::Election => self.finish_election(code, session),
        }
        true
    }

    /// Moves an active session to its terminal status under the table lock.
    ///
    /// A claimed removal keeps its key reserved with an election
    /// placeholder, so no new vote can open while the result is applied.
    fn claim(
        &self,
        code: &RoomCode,
        color: RoomColor,
        vote_id: VoteId,
        trigger: Trigger,
    ) -> Option<VoteSession> {
        let key = (code.clone(), color);
        let mut table = self.inner.table.lock();
        let entry = table
            .sessions
            .get_mut(&key)
            .filter(|e| e.session.id == vote_id && e.session.is_active())?;
        entry.session.status = match trigger {
            Trigger::AllVoted => VoteStatus::Completed,
            Trigger::Timeout => VoteStatus::Timeout,
        };
        let session = entry.session.clone();
        if matches!(table.tasks.get(&key), Some(Pending::Timeout(id, _)) if *id == vote_id) {
            if let Some(task) = table.tasks.remove(&key) {
                // A timeout task resolving its own session runs to the end.
                if trigger == Trigger::AllVoted {
                    task.abort();
                }
            }
        }
        if session.kind == VoteKind::Removal {
            table.tasks.insert(key, Pending::Election(vote_id, None));
        }
        Some(session)
    }

    /// Drops the election placeholder left by [`claim`](Self::claim).
    fn release(&self, key: &VoteKey, removal_id: VoteId) {
        let mut table = self.inner.table.lock();
        if matches!(table.tasks.get(key), Some(Pending::Election(id, _)) if *id == removal_id) {
            table.tasks.remove(key);
        }
    }

    fn finish_removal(&self, code: &RoomCode, session: VoteSession, trigger: Trigger) {
        let color = session.room_color;
        let (yes, no) = session.yes_no();
        let mut result = match trigger {
            Trigger::AllVoted if yes > session.total_voters / 2 => VoteResult::Passed,
            Trigger::AllVoted => VoteResult::Failed,
            Trigger::Timeout if yes > no => VoteResult::Passed,
            Trigger::Timeout => VoteResult::Timeout,
        };

        let mut reason = None;
        let mut change = None;
        if result == VoteResult::Passed {
            match self
                .inner
                .leaders
                .assign_new_leader(code, color, session.target_leader)
            {
                Ok(c) => change = Some(c),
                Err(e) => {
                    tracing::warn!(room_code = %code, room_color = %color, error = %e, "no replacement after removal");
                    result = VoteResult::Failed;
                    reason = Some(e.to_string());
                }
            }
        }

        tracing::info!(
            room_code = %code,
            room_color = %color,
            vote_id = %session.id,
            ?result,
            yes,
            no,
            "removal vote resolved"
        );
        let recipients = self.recipients(code, color, change.as_ref());
        self.inner.hub.publish_to_color(
            code,
            &recipients,
            &ServerEvent::VoteCompleted {
                vote_id: session.id,
                vote_type: VoteKind::Removal,
                result,
                yes_votes: yes,
                no_votes: no,
                target_leader: removed_ref(&session),
                new_leader: change.as_ref().map(|c| c.new_leader.clone()),
                tally: Vec::new(),
                reason,
            },
        );

        match change {
            Some(change) => {
                self.inner
                    .leaders
                    .announce(code, &change, LeadershipChangeReason::VoteRemoval);
                self.schedule_election(code, color, session.id, session.target_leader);
            }
            None => self.release(&(code.clone(), color), session.id),
        }
    }

    fn finish_election(&self, code: &RoomCode, session: VoteSession) {
        let color = session.room_color;
        let room = self.inner.registry.get(code).ok();
        let tally: Vec<CandidateVotes> = session
            .candidate_tally()
            .into_iter()
            .map(|(id, votes)| CandidateVotes {
                candidate: room
                    .as_ref()
                    .and_then(|r| player_ref(r, id))
                    .unwrap_or(PlayerRef {
                        id,
                        nickname: String::new(),
                    }),
                votes,
            })
            .collect();

        let (result, change, reason) = match session.plurality_winner() {
            None => (VoteResult::Timeout, None, Some("no votes cast".to_owned())),
            Some(winner) => match self.inner.leaders.set_leader(code, color, winner) {
                Ok(c) => (VoteResult::Passed, Some(c), None),
                Err(e) => (VoteResult::Failed, None, Some(e.to_string())),
            },
        };

        tracing::info!(
            room_code = %code,
            room_color = %color,
            vote_id = %session.id,
            ?result,
            winner = ?change.as_ref().map(|c| c.new_leader.id),
            "election resolved"
        );
        let recipients = self.recipients(code, color, change.as_ref());
        self.inner.hub.publish_to_color(
            code,
            &recipients,
            &ServerEvent::VoteCompleted {
                vote_id: session.id,
                vote_type: VoteKind::Election,
                result,
                yes_votes: 0,
                no_votes: 0,
                target_leader: removed_ref(&session),
                new_leader: change.as_ref().map(|c| c.new_leader.clone()),
                tally,
                reason,
            },
        );

        if let Some(change) = change.filter(LeadershipChange::is_change) {
            self.inner
                .leaders
                .announce(code, &change, LeadershipChangeReason::Election);
        }
    }

    // -- Election -----------------------------------------------------------

    fn schedule_election(
        &self,
        code: &RoomCode,
        color: RoomColor,
        removal_id: VoteId,
        removed: Option<PlayerId>,
    ) {
        let key = (code.clone(), color);
        let this = self.clone();
        let delay = self.inner.config.election_delay;
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let (code, color) = &task_key;
            if let Err(e) = this.start_election(code, *color, removal_id, removed) {
                tracing::debug!(room_code = %code, room_color = %color, reason = %e, "election skipped");
                this.release(&task_key, removal_id);
            }
        });

        // Only fill our own placeholder; a reset may have cleared it.
        let mut table = self.inner.table.lock();
        match table.tasks.get_mut(&key) {
            Some(Pending::Election(id, slot)) if *id == removal_id && slot.is_none() => {
                *slot = Some(task.abort_handle());
            }
            _ => {
                task.abort();
                tracing::debug!(room_code = %code, room_color = %color, "election no longer wanted");
            }
        }
    }

    /// Replaces the finished removal vote `removal_id` with an election
    /// among the remaining players of `color`.
    fn start_election(
        &self,
        code: &RoomCode,
        color: RoomColor,
        removal_id: VoteId,
        removed: Option<PlayerId>,
    ) -> Result<VoteSession, GameError> {
        let room = self.inner.registry.get(code)?;
        room.round()
            .ok_or_else(|| GameError::not_found("no round in progress"))?;
        let voters = room.player_ids_in(color);
        let candidates: Vec<PlayerId> = voters
            .iter()
            .copied()
            .filter(|id| Some(*id) != removed)
            .collect();
        if candidates.is_empty() {
            return Err(GameError::not_found("no candidates for election"));
        }

        let now = Utc::now();
        let timeout = self.inner.config.vote_timeout;
        let session = VoteSession {
            id: VoteId::random(),
            kind: VoteKind::Election,
            room_code: code.clone(),
            room_color: color,
            target_leader: removed,
            target_leader_name: removed
                .and_then(|id| room.player(id))
                .map(|p| p.nickname.clone()),
            initiator: None,
            initiator_name: None,
            candidates: candidates.clone(),
            started_at: now,
            expires_at: now + chrono_duration(timeout),
            timeout_seconds: self.inner.config.vote_timeout_secs(),
            total_voters: voters.len(),
            votes: HashMap::new(),
            status: VoteStatus::Active,
        };

        let key = (code.clone(), color);
        {
            let mut table = self.inner.table.lock();
            let current = table.sessions.get(&key).map(|e| e.session.id);
            if current != Some(removal_id) {
                return Err(GameError::conflict("removal vote was replaced"));
            }
            table.sessions.insert(
                key.clone(),
                Entry {
                    session: session.clone(),
                    opened: Instant::now(),
                },
            );
            let timer = self.spawn_timeout(key.clone(), session.id);
            // The pending election entry is this task; replace without aborting.
            table.tasks.insert(key, Pending::Timeout(session.id, timer));
        }

        tracing::info!(
            room_code = %code,
            room_color = %color,
            vote_id = %session.id,
            candidates = candidates.len(),
            "election started"
        );
        self.inner.hub.publish_to_color(
            code,
            &voters,
            &ServerEvent::VoteSessionStarted {
                vote_id: session.id,
                vote_type: VoteKind::Election,
                room_color: color,
                target_leader: removed.and_then(|id| player_ref(&room, id)),
                initiator: None,
                candidates: candidates
                    .iter()
                    .filter_map(|id| player_ref(&room, *id))
                    .collect(),
                total_voters: session.total_voters,
                timeout_seconds: session.timeout_seconds,
                started_at: session.started_at,
            },
        );
        Ok(session)
    }

    fn spawn_timeout(&self, key: VoteKey, vote_id: VoteId) -> AbortHandle {
        let this = self.clone();
        let timeout = self.inner.config.vote_timeout;
        tokio::spawn(async move {
            time::sleep(timeout).await;
            let (code, color) = key;
            if this.resolve(&code, color, vote_id, Trigger::Timeout) {
                tracing::debug!(room_code = %code, room_color = %color, %vote_id, "vote timed out");
            }
        })
        .abort_handle()
    }

    // -- Queries ------------------------------------------------------------

    /// A session by id, in any status.
    pub fn vote_session(&self, code: &RoomCode, vote_id: VoteId) -> Result<VoteSession, GameError> {
        self.inner
            .table
            .lock()
            .sessions
            .values()
            .find(|e| e.session.id == vote_id && e.session.room_code == *code)
            .map(|e| e.session.clone())
            .ok_or_else(|| GameError::not_found(format!("vote {vote_id} not found")))
    }

    /// The open session for `color`, if any.
    pub fn active_vote(&self, code: &RoomCode, color: RoomColor) -> Option<VoteSession> {
        self.inner
            .table
            .lock()
            .sessions
            .get(&(code.clone(), color))
            .filter(|e| e.session.is_active())
            .map(|e| e.session.clone())
    }

    pub fn has_active_vote(&self, code: &RoomCode, color: RoomColor) -> bool {
        self.active_vote(code, color).is_some()
    }

    /// Whether a removal vote could be opened in `color` right now, with
    /// the reason when it cannot.
    pub fn can_start_vote(&self, code: &RoomCode, color: RoomColor) -> (bool, Option<String>) {
        let check = || -> Result<(), GameError> {
            let room = self.inner.registry.get(code)?;
            let round = room
                .round()
                .ok_or_else(|| GameError::conflict("no round in progress"))?;
            if round.phase == RoundPhase::Selecting {
                return Err(GameError::conflict(
                    "cannot start a vote while hostages are being selected",
                ));
            }
            if room.players_in(color).count() < MIN_VOTERS {
                return Err(GameError::invalid(format!(
                    "at least {MIN_VOTERS} players are needed to vote"
                )));
            }
            check_table(&self.inner.table.lock(), &(code.clone(), color))
        };
        match check() {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    // -- Housekeeping -------------------------------------------------------

    /// Drops every session and pending task for a room.
    pub fn clear_room(&self, code: &RoomCode) {
        let mut table = self.inner.table.lock();
        table.sessions.retain(|(c, _), _| c != code);
        table.tasks.retain(|(c, _), task| {
            if c == code {
                task.abort();
                false
            } else {
                true
            }
        });
        tracing::debug!(room_code = %code, "vote sessions cleared");
    }

    /// Removes sessions opened longer ago than the configured maximum age.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let max_age = self.inner.config.vote_max_age;
        let mut table = self.inner.table.lock();
        let before = table.sessions.len();
        table.sessions.retain(|_, e| e.opened.elapsed() < max_age);
        let removed = before - table.sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "stale vote sessions swept");
        }
        removed
    }

    /// Starts the periodic sweep. Calling it again replaces the sweeper.
    pub fn spawn_sweeper(&self) {
        let this = self.clone();
        let period = self.inner.config.vote_sweep_interval;
        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                this.sweep();
            }
        });
        if let Some(old) = self.inner.sweeper.lock().replace(task.abort_handle()) {
            old.abort();
        }
    }

    /// Stops the sweeper and every pending timeout or election.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        let mut table = self.inner.table.lock();
        for (_, task) in table.tasks.drain() {
            task.abort();
        }
    }

    fn recipients(
        &self,
        code: &RoomCode,
        color: RoomColor,
        change: Option<&LeadershipChange>,
    ) -> Vec<PlayerId> {
        match change {
            Some(c) => c.recipients.clone(),
            None => self
                .inner
                .registry
                .get(code)
                .map(|room: Room| room.player_ids_in(color))
                .unwrap_or_default(),
        }
    }
}

/// Rejects a new vote while one is open or an election is pending.
fn check_table(table: &VoteTable, key: &VoteKey) -> Result<(), GameError> {
    if table.sessions.get(key).is_some_and(|e| e.session.is_active()) {
        return Err(GameError::conflict("a vote is already in progress"));
    }
    if matches!(table.tasks.get(key), Some(Pending::Election(..))) {
        return Err(GameError::conflict("an election is about to start"));
    }
    Ok(())
}

fn removed_ref(session: &VoteSession) -> Option<PlayerRef> {
    session.target_leader.map(|id| PlayerRef {
        id,
        nickname: session.target_leader_name.clone().unwrap_or_default(),
    })
}

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
