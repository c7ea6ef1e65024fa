//! Concurrency tests: many tasks hammering one room through the registry.

use std::sync::Arc;

use tworooms_protocol::{Player, PlayerId, Room, RoomCode};
use tworooms_registry::{RegistryError, RoomRegistry};

#[derive(Debug)]
enum JoinError {
    Registry(RegistryError),
    Full,
}

impl From<RegistryError> for JoinError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// =========================================================================
// Read-modify-write
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_update_with_concurrent_writers_lose_nothing() {
    let registry = Arc::new(RoomRegistry::new());
    let code = RoomCode::from("BUSY01");
    registry.create(Room::new(code.clone(), 200, false)).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..150 {
        let registry = Arc::clone(&registry);
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            registry.update_with::<_, RegistryError, _>(&code, |room| {
                room.players.push(Player::new(PlayerId::random(), "x"));
                Ok(())
            })
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    assert_eq!(registry.get(&code).unwrap().players.len(), 150);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_update_with_capacity_check_is_atomic() {
    let registry = Arc::new(RoomRegistry::new());
    let code = RoomCode::from("CAP050");
    registry.create(Room::new(code.clone(), 50, false)).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let registry = Arc::clone(&registry);
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            registry.update_with(&code, |room| {
                if room.is_full() {
                    return Err(JoinError::Full);
                }
                room.players.push(Player::new(PlayerId::random(), "x"));
                Ok(())
            })
        }));
    }

    let mut ok = 0;
    let mut full = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(()) => ok += 1,
            Err(JoinError::Full) => full += 1,
            Err(JoinError::Registry(e)) => panic!("unexpected: {e}"),
        }
    }
    assert_eq!((ok, full), (50, 50));
    assert_eq!(registry.get(&code).unwrap().players.len(), 50);
}
