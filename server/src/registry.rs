//! Process-wide room lookup: the only state shared between connections. A
//! single async mutex guards the map; ownership of a looked-up room's inbox
//! handle is cloned out immediately, so nothing else ever needs locking.

use crate::config::EngineConfig;
use crate::room::{self, Room, RoomMsg, RoomTx};
use log::info;
use shared::{Board, HostToken, RoomCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Cheap handle to a running room: its code plus the inbox sender.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub code: RoomCode,
    pub tx: RoomTx,
}

impl RoomHandle {
    pub fn send(&self, msg: RoomMsg) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Cloneable registry front; all clones share one map.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: Mutex<HashMap<RoomCode, RoomHandle>>,
    config: EngineConfig,
}

impl RoomRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Creates a room for the board, spawns its engine loop, and returns the
    /// code plus the host credential. Code collisions are retried.
    pub async fn create(&self, board: Board) -> (RoomCode, HostToken) {
        let host_token = HostToken::generate();
        let mut rooms = self.inner.rooms.lock().await;

        let code = loop {
            let candidate = RoomCode::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        rooms.insert(
            code.clone(),
            RoomHandle {
                code: code.clone(),
                tx,
            },
        );
        drop(rooms);

        let room = Room::new(
            code.clone(),
            host_token.clone(),
            board,
            self.inner.config.clone(),
        );
        tokio::spawn(room::run(room, rx, self.clone()));

        info!("room {} created", code);
        (code, host_token)
    }

    pub async fn lookup(&self, code: &RoomCode) -> Option<RoomHandle> {
        self.inner.rooms.lock().await.get(code).cloned()
    }

    /// Drops the handle for a room; its engine loop calls this as it exits.
    pub async fn remove(&self, code: &RoomCode) -> bool {
        let removed = self.inner.rooms.lock().await.remove(code).is_some();
        if removed {
            info!("room {} removed from registry", code);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.rooms.lock().await.len()
    }
}
