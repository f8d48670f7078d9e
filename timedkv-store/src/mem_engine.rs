//! In-process reference `Engine`: an ordered, in-memory B-tree keyspace.
//!
//! A production engine would let different keys proceed in parallel under
//! concurrent writers; this reference implementation coarsens that to a
//! single `RwLock` over the whole map (readers run in parallel with each
//! other, writers are serialized with everyone) — still linearizable per
//! key, just not maximally concurrent across keys. See DESIGN.md.

use crate::engine::{Engine, EngineCursor, EngineErrorCode, RawAction, RawVisitor};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

type Map = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

pub struct MemEngine {
    map: Map,
    header: RwLock<[u8; 2]>,
    path: Option<String>,
    total_bytes: Arc<AtomicU64>,
    last_error: AtomicI64,
}

fn record_bytes(key: &[u8], value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

impl MemEngine {
    pub fn new(path: Option<String>) -> Self {
        Self {
            map: Arc::new(RwLock::new(BTreeMap::new())),
            header: RwLock::new([0, 0]),
            path,
            total_bytes: Arc::new(AtomicU64::new(0)),
            last_error: AtomicI64::new(EngineErrorCode::Success as i64),
        }
    }

    fn set_last_error(&self, code: EngineErrorCode) {
        self.last_error.store(code as i64, Ordering::Relaxed);
    }
}

impl Engine for MemEngine {
    fn accept(&self, key: &[u8], visitor: &mut dyn RawVisitor, writable: bool) {
        if writable {
            let mut map = self.map.write().expect("mem engine lock poisoned");
            let existing = map.get(key).cloned();
            let action = visitor.visit(key, existing.as_deref());
            match action {
                RawAction::Keep => {}
                RawAction::Remove => {
                    if let Some(old) = map.remove(key) {
                        self.total_bytes.fetch_sub(record_bytes(key, &old), Ordering::Relaxed);
                    }
                }
                RawAction::Set(bytes) => {
                    let added = record_bytes(key, &bytes);
                    let removed = existing.as_ref().map(|v| record_bytes(key, v)).unwrap_or(0);
                    map.insert(key.to_vec(), bytes);
                    self.total_bytes.fetch_add(added, Ordering::Relaxed);
                    if removed > 0 {
                        self.total_bytes.fetch_sub(removed, Ordering::Relaxed);
                    }
                }
            }
        } else {
            let map = self.map.read().expect("mem engine lock poisoned");
            let existing = map.get(key).cloned();
            // Read-only accept: the visitor may still request a logical
            // mutation (e.g. transparent expiry reclamation), but a
            // read-only pass can't apply it — it only gets to observe.
            let _ = visitor.visit(key, existing.as_deref());
        }
    }

    fn iterate(&self, visitor: &mut dyn RawVisitor, writable: bool) {
        if writable {
            let mut map = self.map.write().expect("mem engine lock poisoned");
            let keys: Vec<Vec<u8>> = map.keys().cloned().collect();
            for key in keys {
                let existing = match map.get(&key) {
                    Some(v) => v.clone(),
                    None => continue,
                };
                let action = visitor.visit(&key, Some(&existing));
                match action {
                    RawAction::Keep => {}
                    RawAction::Remove => {
                        map.remove(&key);
                        self.total_bytes.fetch_sub(record_bytes(&key, &existing), Ordering::Relaxed);
                    }
                    RawAction::Set(bytes) => {
                        let added = record_bytes(&key, &bytes);
                        let removed = record_bytes(&key, &existing);
                        map.insert(key.clone(), bytes);
                        self.total_bytes.fetch_add(added, Ordering::Relaxed);
                        self.total_bytes.fetch_sub(removed, Ordering::Relaxed);
                    }
                }
            }
        } else {
            let map = self.map.read().expect("mem engine lock poisoned");
            for (key, value) in map.iter() {
                let _ = visitor.visit(key, Some(value));
            }
        }
    }

    fn new_cursor(&self) -> Box<dyn EngineCursor> {
        Box::new(MemCursor { map: self.map.clone(), current: None, direction: Direction::Forward })
    }

    fn count(&self) -> u64 {
        self.map.read().expect("mem engine lock poisoned").len() as u64
    }

    fn size(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn path(&self) -> Option<String> {
        self.path.clone()
    }

    fn clear(&self) {
        self.map.write().expect("mem engine lock poisoned").clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    fn status(&self) -> BTreeMap<String, String> {
        let mut status = BTreeMap::new();
        status.insert("count".to_string(), self.count().to_string());
        status.insert("size".to_string(), self.size().to_string());
        status.insert("path".to_string(), self.path.clone().unwrap_or_else(|| "*".to_string()));
        status.insert("type".to_string(), "mem".to_string());
        status
    }

    fn copy(&self, dest_path: &str) -> Result<(), EngineErrorCode> {
        if dest_path.is_empty() {
            self.set_last_error(EngineErrorCode::Invalid);
            return Err(EngineErrorCode::Invalid);
        }
        // In-memory engine has nothing to flush to disk; copy is a no-op success.
        Ok(())
    }

    fn synchronize(&self, _hard: bool) {}

    fn header(&self) -> [u8; 2] {
        *self.header.read().expect("mem engine lock poisoned")
    }

    fn set_header(&self, bytes: [u8; 2]) {
        *self.header.write().expect("mem engine lock poisoned") = bytes;
    }

    fn last_error(&self) -> EngineErrorCode {
        match self.last_error.load(Ordering::Relaxed) {
            x if x == EngineErrorCode::Success as i64 => EngineErrorCode::Success,
            x if x == EngineErrorCode::NoRecord as i64 => EngineErrorCode::NoRecord,
            x if x == EngineErrorCode::DuplicateRecord as i64 => EngineErrorCode::DuplicateRecord,
            x if x == EngineErrorCode::Logic as i64 => EngineErrorCode::Logic,
            x if x == EngineErrorCode::Invalid as i64 => EngineErrorCode::Invalid,
            _ => EngineErrorCode::System,
        }
    }
}

struct MemCursor {
    map: Map,
    current: Option<Vec<u8>>,
    direction: Direction,
}

impl EngineCursor for MemCursor {
    fn jump(&mut self) -> bool {
        let map = self.map.read().expect("mem engine lock poisoned");
        self.direction = Direction::Forward;
        self.current = map.keys().next().cloned();
        self.current.is_some()
    }

    fn jump_to(&mut self, key: &[u8]) -> bool {
        let map = self.map.read().expect("mem engine lock poisoned");
        self.direction = Direction::Forward;
        self.current = map.range(key.to_vec()..).next().map(|(k, _)| k.clone());
        self.current.is_some()
    }

    fn jump_back(&mut self) -> bool {
        let map = self.map.read().expect("mem engine lock poisoned");
        self.direction = Direction::Backward;
        self.current = map.keys().next_back().cloned();
        self.current.is_some()
    }

    fn step(&mut self) -> bool {
        self.direction = Direction::Forward;
        let map = self.map.read().expect("mem engine lock poisoned");
        let next = match &self.current {
            Some(key) => map.range((Bound::Excluded(key.clone()), Bound::Unbounded)).next(),
            None => None,
        };
        self.current = next.map(|(k, _)| k.clone());
        self.current.is_some()
    }

    fn step_back(&mut self) -> bool {
        self.direction = Direction::Backward;
        let map = self.map.read().expect("mem engine lock poisoned");
        let prev = match &self.current {
            Some(key) => map.range(..key.clone()).next_back(),
            None => None,
        };
        self.current = prev.map(|(k, _)| k.clone());
        self.current.is_some()
    }

    fn accept(&mut self, visitor: &mut dyn RawVisitor, writable: bool, advance: bool) -> bool {
        let key = match &self.current {
            Some(k) => k.clone(),
            None => return false,
        };
        if writable {
            let mut map = self.map.write().expect("mem engine lock poisoned");
            let existing = map.get(&key).cloned();
            match visitor.visit(&key, existing.as_deref()) {
                RawAction::Keep => {}
                RawAction::Remove => {
                    map.remove(&key);
                }
                RawAction::Set(bytes) => {
                    map.insert(key.clone(), bytes);
                }
            }
        } else {
            let map = self.map.read().expect("mem engine lock poisoned");
            let existing = map.get(&key).cloned();
            let _ = visitor.visit(&key, existing.as_deref());
        };
        if advance {
            match self.direction {
                Direction::Forward => self.step(),
                Direction::Backward => self.step_back(),
            };
        }
        true
    }

    fn remove(&mut self) -> bool {
        let key = match &self.current {
            Some(k) => k.clone(),
            None => return false,
        };
        let mut map = self.map.write().expect("mem engine lock poisoned");
        let removed = map.remove(&key).is_some();
        drop(map);
        match self.direction {
            Direction::Forward => {
                self.step();
            }
            Direction::Backward => {
                self.step_back();
            }
        }
        removed
    }

    fn key(&self) -> Option<Vec<u8>> {
        self.current.clone()
    }
}
