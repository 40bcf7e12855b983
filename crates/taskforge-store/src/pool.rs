use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

use rusqlite::Connection;

use crate::{Error, Result};

/// Maximum pooled connections per store.
pub const MAX_CONNECTIONS: usize = 10;

struct PoolState {
    idle: Vec<Connection>,
    total: usize,
}

/// Fixed-size connection pool. Connections are acquired per store
/// operation and returned before any external call; an in-memory pool
/// keeps a single shared connection so every operation sees one
/// database.
pub(crate) struct Pool {
    path: Option<PathBuf>,
    max: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl Pool {
    pub fn open_disk(path: PathBuf) -> Result<Self> {
        let pool = Self {
            path: Some(path),
            max: MAX_CONNECTIONS,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
            }),
            available: Condvar::new(),
        };
        // Open one connection eagerly so setup failures surface here.
        let conn = pool.open_connection()?;
        {
            let mut state = pool.state.lock().unwrap();
            state.idle.push(conn);
            state.total = 1;
        }
        Ok(pool)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Transient(format!("open in-memory database: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            path: None,
            max: 1,
            state: Mutex::new(PoolState {
                idle: vec![conn],
                total: 1,
            }),
            available: Condvar::new(),
        })
    }

    fn open_connection(&self) -> Result<Connection> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| Error::Invalid("in-memory pool cannot grow".to_string()))?;
        let conn = Connection::open(path)
            .map_err(|e| Error::Transient(format!("open {}: {}", path.display(), e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.total < self.max {
                state.total += 1;
                drop(state);
                match self.open_connection() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: self,
                            conn: Some(conn),
                        });
                    }
                    Err(err) => {
                        let mut state = self.state.lock().unwrap();
                        state.total -= 1;
                        self.available.notify_one();
                        return Err(err);
                    }
                }
            }
            state = self.available.wait(state).unwrap();
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.state.lock().unwrap();
        state.idle.push(conn);
        self.available.notify_one();
    }
}

pub(crate) struct PooledConnection<'a> {
    pool: &'a Pool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
