//! The registry: a locked map from room code to room aggregate.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tworooms_protocol::{Room, RoomCode, RoomStatus};

use crate::RegistryError;

/// Default page size for public listings.
const DEFAULT_PAGE_SIZE: usize = 50;

/// Hard cap on public listing page size.
const MAX_PAGE_SIZE: usize = 100;

/// What to do with a room after an [`RoomRegistry::update_or_delete`]
/// closure succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Store the mutated room.
    Keep,
    /// Remove the room entirely.
    Delete,
}

/// Thread-safe keyed storage for rooms.
///
/// Reads hand out clones; nothing outside the registry ever holds a
/// reference into the map, so no caller can keep a stale copy alive
/// across an await point and write it back later by accident.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomCode, Room>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new room.
    ///
    /// # Errors
    /// [`RegistryError::CodeExists`] if the code is taken.
    pub fn create(&self, room: Room) -> Result<(), RegistryError> {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(&room.code) {
            return Err(RegistryError::CodeExists(room.code));
        }
        tracing::info!(room_code = %room.code, max_players = room.max_players, "room created");
        rooms.insert(room.code.clone(), room);
        Ok(())
    }

    /// Returns a snapshot of a room.
    pub fn get(&self, code: &RoomCode) -> Result<Room, RegistryError> {
        self.rooms
            .read()
            .get(code)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(code.clone()))
    }

    /// Returns `true` if a room with this code exists.
    pub fn exists(&self, code: &RoomCode) -> bool {
        self.rooms.read().contains_key(code)
    }

    /// Replaces a stored room wholesale and stamps `updated_at`.
    pub fn update(&self, mut room: Room) -> Result<(), RegistryError> {
        let mut rooms = self.rooms.write();
        let slot = rooms
            .get_mut(&room.code)
            .ok_or_else(|| RegistryError::NotFound(room.code.clone()))?;
        room.updated_at = Utc::now();
        *slot = room;
        Ok(())
    }

    /// Atomic read-modify-write.
    ///
    /// `f` runs on a copy of the room while the write lock is held. The
    /// copy replaces the stored room only if `f` returns `Ok`, so a
    /// rejected request never leaves a partial change behind.
    pub fn update_with<T, E, F>(&self, code: &RoomCode, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Room) -> Result<T, E>,
        E: From<RegistryError>,
    {
        self.update_or_delete(code, |room| f(room).map(|v| (v, Disposition::Keep)))
    }

    /// Like [`update_with`](Self::update_with), but the closure may also
    /// ask for the room to be removed in the same critical section.
    pub fn update_or_delete<T, E, F>(
        &self,
        code: &RoomCode,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut Room) -> Result<(T, Disposition), E>,
        E: From<RegistryError>,
    {
        let mut rooms = self.rooms.write();
        let stored = rooms
            .get(code)
            .ok_or_else(|| RegistryError::NotFound(code.clone()))?;

        let mut draft = stored.clone();
        let (value, disposition) = f(&mut draft)?;

        match disposition {
            Disposition::Keep => {
                draft.updated_at = Utc::now();
                rooms.insert(code.clone(), draft);
            }
            Disposition::Delete => {
                rooms.remove(code);
                tracing::info!(room_code = %code, "room deleted");
            }
        }
        Ok(value)
    }

    /// Removes a room. Deleting a missing room is not an error.
    pub fn delete(&self, code: &RoomCode) {
        if self.rooms.write().remove(code).is_some() {
            tracing::info!(room_code = %code, "room deleted");
        }
    }

    /// Lists public rooms, newest first, one page at a time.
    ///
    /// `limit <= 0` means the default page size; larger limits are capped
    /// at 100; a negative offset starts from the beginning. Returns the
    /// page and the total number of matches before paging.
    pub fn list_public(
        &self,
        status: Option<RoomStatus>,
        limit: i64,
        offset: i64,
    ) -> (Vec<Room>, usize) {
        let limit = match usize::try_from(limit) {
            Ok(0) | Err(_) => DEFAULT_PAGE_SIZE,
            Ok(n) => n.min(MAX_PAGE_SIZE),
        };
        let offset = usize::try_from(offset).unwrap_or(0);

        let mut matches: Vec<Room> = self
            .rooms
            .read()
            .values()
            .filter(|r| r.is_public)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matches.len();
        let page = matches.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    /// Codes of every stored room.
    pub fn codes(&self) -> Vec<RoomCode> {
        self.rooms.read().keys().cloned().collect()
    }

    /// Number of stored rooms.
    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    /// Returns `true` if no rooms are stored.
    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tworooms_protocol::{Player, PlayerId};

    use super::*;

    fn room(code: &str) -> Room {
        Room::new(RoomCode::from(code), 8, true)
    }

    #[derive(Debug, PartialEq)]
    enum TestError {
        Registry(RegistryError),
        Rejected,
    }

    impl From<RegistryError> for TestError {
        fn from(e: RegistryError) -> Self {
            Self::Registry(e)
        }
    }

    // =====================================================================
    // create / get / update / delete
    // =====================================================================

    #[test]
    fn test_create_and_get() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        let got = registry.get(&RoomCode::from("AAAAAA")).unwrap();
        assert_eq!(got.max_players, 8);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_duplicate_code_fails() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        let result = registry.create(room("AAAAAA"));
        assert!(matches!(result, Err(RegistryError::CodeExists(c)) if c.as_str() == "AAAAAA"));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = RoomRegistry::new();
        let result = registry.get(&RoomCode::from("NOPE00"));
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let registry = RoomRegistry::new();
        let result = registry.update(room("AAAAAA"));
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_update_stamps_updated_at() {
        let registry = RoomRegistry::new();
        let mut r = room("AAAAAA");
        r.updated_at = r.updated_at - Duration::hours(1);
        let before = r.updated_at;
        registry.create(r.clone()).unwrap();

        r.is_public = false;
        registry.update(r).unwrap();

        let got = registry.get(&RoomCode::from("AAAAAA")).unwrap();
        assert!(!got.is_public);
        assert!(got.updated_at > before);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        registry.delete(&RoomCode::from("AAAAAA"));
        registry.delete(&RoomCode::from("AAAAAA"));
        assert!(registry.is_empty());
    }

    // =====================================================================
    // update_with / update_or_delete
    // =====================================================================

    #[test]
    fn test_update_with_commits_on_ok() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        let code = RoomCode::from("AAAAAA");

        let n: Result<usize, TestError> = registry.update_with(&code, |r| {
            r.players.push(Player::new(PlayerId::random(), "Kim"));
            Ok(r.players.len())
        });
        assert_eq!(n, Ok(1));
        assert_eq!(registry.get(&code).unwrap().players.len(), 1);
    }

    #[test]
    fn test_update_with_discards_on_err() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        let code = RoomCode::from("AAAAAA");

        let result: Result<(), TestError> = registry.update_with(&code, |r| {
            r.players.push(Player::new(PlayerId::random(), "Kim"));
            Err(TestError::Rejected)
        });
        assert_eq!(result, Err(TestError::Rejected));
        assert!(registry.get(&code).unwrap().players.is_empty());
    }

    #[test]
    fn test_update_with_missing_room() {
        let registry = RoomRegistry::new();
        let result: Result<(), TestError> =
            registry.update_with(&RoomCode::from("GONE00"), |_| Ok(()));
        assert!(matches!(
            result,
            Err(TestError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[test]
    fn test_update_or_delete_removes_room() {
        let registry = RoomRegistry::new();
        registry.create(room("AAAAAA")).unwrap();
        let code = RoomCode::from("AAAAAA");

        let result: Result<(), TestError> =
            registry.update_or_delete(&code, |_| Ok(((), Disposition::Delete)));
        assert!(result.is_ok());
        assert!(!registry.exists(&code));
    }

    // =====================================================================
    // list_public
    // =====================================================================

    fn seeded() -> RoomRegistry {
        let registry = RoomRegistry::new();
        let base = Utc::now();
        for (i, (code, public, status)) in [
            ("PUB001", true, RoomStatus::Waiting),
            ("PUB002", true, RoomStatus::InProgress),
            ("PUB003", true, RoomStatus::Waiting),
            ("PRIV01", false, RoomStatus::Waiting),
        ]
        .into_iter()
        .enumerate()
        {
            let mut r = Room::new(RoomCode::from(code), 8, public);
            r.status = status;
            r.created_at = base + Duration::seconds(i as i64);
            registry.create(r).unwrap();
        }
        registry
    }

    #[test]
    fn test_list_public_newest_first_excludes_private() {
        let (rooms, total) = seeded().list_public(None, 10, 0);
        assert_eq!(total, 3);
        let codes: Vec<_> = rooms.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["PUB003", "PUB002", "PUB001"]);
    }

    #[test]
    fn test_list_public_filters_status() {
        let (rooms, total) =
            seeded().list_public(Some(RoomStatus::Waiting), 10, 0);
        assert_eq!(total, 2);
        assert!(rooms.iter().all(|r| r.status == RoomStatus::Waiting));
    }

    #[test]
    fn test_list_public_paginates() {
        let registry = seeded();
        let (page1, total) = registry.list_public(None, 2, 0);
        let (page2, _) = registry.list_public(None, 2, 2);
        assert_eq!(total, 3);
        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].code.as_str(), "PUB001");
    }

    #[test]
    fn test_list_public_offset_beyond_total_is_empty() {
        let (rooms, total) = seeded().list_public(None, 10, 50);
        assert!(rooms.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn test_list_public_normalizes_limit_and_offset() {
        let registry = RoomRegistry::new();
        for i in 0..120 {
            registry
                .create(Room::new(RoomCode::new(format!("R{i:05}")), 8, true))
                .unwrap();
        }
        assert_eq!(registry.list_public(None, 0, 0).0.len(), 50);
        assert_eq!(registry.list_public(None, -3, 0).0.len(), 50);
        assert_eq!(registry.list_public(None, 500, 0).0.len(), 100);
        assert_eq!(registry.list_public(None, 10, -5).0.len(), 10);
    }
}
