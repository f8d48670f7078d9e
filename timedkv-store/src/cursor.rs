//! A user-owned cursor over a [`TimedDb`]. Distinct
//! from the private sweep cursor; users may hold as many of these as they
//! like concurrently.

use crate::db::TimedDb;
use crate::engine::{EngineCursor, RawAction, RawVisitor};
use crate::record::{decode_record, encode_record};
use crate::visitor::{Action, Visitor};
use timedkv_common::{is_expired, DEADLINE_MAX};

pub struct Cursor<'a> {
    db: &'a TimedDb,
    inner: Box<dyn EngineCursor>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(db: &'a TimedDb) -> Self {
        Self { db, inner: db.engine().new_cursor() }
    }

    pub fn jump(&mut self) -> bool {
        self.inner.jump()
    }

    pub fn jump_to(&mut self, key: &[u8]) -> bool {
        self.inner.jump_to(key)
    }

    /// Positions at the last key. Hash-only engines may no-op and return `false`.
    pub fn jump_back(&mut self) -> bool {
        self.inner.jump_back()
    }

    pub fn step(&mut self) -> bool {
        self.inner.step()
    }

    pub fn step_back(&mut self) -> bool {
        self.inner.step_back()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    pub fn key(&self) -> Option<Vec<u8>> {
        self.inner.key()
    }

    /// Applies `visitor` to the record at the current position. If that
    /// record has expired, synthesizes a "no record" state and calls
    /// `visit_empty` instead.
    pub fn accept(&mut self, visitor: &mut dyn Visitor, writable: bool) -> bool {
        let now = self.db.now_pub();
        let persistent = self.db.persistent_pub();
        struct Adapter<'v> {
            visitor: &'v mut dyn Visitor,
            now: u64,
            persistent: bool,
        }
        impl RawVisitor for Adapter<'_> {
            fn visit(&mut self, key: &[u8], raw: Option<&[u8]>) -> RawAction {
                match raw {
                    Some(bytes) => {
                        let (value, deadline) = decode_record(bytes, self.persistent);
                        if !self.persistent && is_expired(deadline, self.now) {
                            let action = self.visitor.visit_empty(key);
                            translate_expired(action, self.persistent)
                        } else {
                            let action = self.visitor.visit_full(key, value, deadline);
                            translate(action, deadline, self.persistent)
                        }
                    }
                    None => {
                        let action = self.visitor.visit_empty(key);
                        translate(action, DEADLINE_MAX, self.persistent)
                    }
                }
            }
        }
        let mut adapter = Adapter { visitor, now, persistent };
        self.inner.accept(&mut adapter, writable, false)
    }

    /// Overwrites the value at the current position, keeping its deadline
    /// unless `deadline` is given.
    pub fn set_value(&mut self, value: &[u8], deadline: Option<u64>) -> bool {
        struct SetV<'v> {
            value: &'v [u8],
            deadline: Option<u64>,
        }
        impl Visitor for SetV<'_> {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                Action::Set { value: self.value.to_vec(), deadline: self.deadline }
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                Action::Set { value: self.value.to_vec(), deadline: self.deadline }
            }
        }
        let mut v = SetV { value, deadline };
        self.accept(&mut v, true)
    }

    pub fn remove(&mut self) -> bool {
        self.inner.remove()
    }

    /// The live value at the current position, or `None` if absent/expired.
    pub fn value(&mut self) -> Option<Vec<u8>> {
        self.get_both().map(|(_, v, _)| v)
    }

    /// Key, value and deadline at the current position, or `None` if
    /// absent/expired.
    pub fn get_both(&mut self) -> Option<(Vec<u8>, Vec<u8>, u64)> {
        let now = self.db.now_pub();
        let persistent = self.db.persistent_pub();
        let mut result = None;
        struct Peek<'r> {
            now: u64,
            persistent: bool,
            result: &'r mut Option<(Vec<u8>, Vec<u8>, u64)>,
        }
        impl RawVisitor for Peek<'_> {
            fn visit(&mut self, key: &[u8], raw: Option<&[u8]>) -> RawAction {
                if let Some(bytes) = raw {
                    let (value, deadline) = decode_record(bytes, self.persistent);
                    if self.persistent || !is_expired(deadline, self.now) {
                        *self.result = Some((key.to_vec(), value.to_vec(), deadline));
                    }
                }
                RawAction::Keep
            }
        }
        let mut peek = Peek { now, persistent, result: &mut result };
        self.inner.accept(&mut peek, false, false);
        result
    }
}

fn translate(action: Action, prev_deadline: u64, persistent: bool) -> RawAction {
    match action {
        Action::Keep => RawAction::Keep,
        Action::Remove => RawAction::Remove,
        Action::Set { value, deadline } => {
            RawAction::Set(encode_record(&value, deadline.unwrap_or(prev_deadline), persistent))
        }
    }
}

fn translate_expired(action: Action, persistent: bool) -> RawAction {
    match action {
        Action::Keep => RawAction::Remove,
        Action::Remove => RawAction::Remove,
        Action::Set { value, deadline } => {
            RawAction::Set(encode_record(&value, deadline.unwrap_or(DEADLINE_MAX), persistent))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::TimedDbConfig;
    use crate::engine::Engine;
    use crate::mem_engine::MemEngine;
    use std::sync::Arc;

    fn open_db() -> TimedDb {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        TimedDb::open(TimedDbConfig::new("t"), engine, clock)
    }

    #[test]
    fn forward_traversal_visits_all_keys_in_order() {
        let db = open_db();
        for k in ["001", "002", "003"] {
            db.set(k.as_bytes(), b"x", 0).unwrap();
        }
        let mut cursor = db.cursor();
        assert!(cursor.jump());
        let mut order = Vec::new();
        loop {
            order.push(cursor.key().unwrap());
            if !cursor.step() {
                break;
            }
        }
        assert_eq!(order, vec![b"001".to_vec(), b"002".to_vec(), b"003".to_vec()]);
    }

    #[test]
    fn backward_traversal_descends() {
        let db = open_db();
        for k in ["001", "002", "003"] {
            db.set(k.as_bytes(), b"x", 0).unwrap();
        }
        let mut cursor = db.cursor();
        assert!(cursor.jump_back());
        let mut order = Vec::new();
        loop {
            order.push(cursor.key().unwrap());
            if !cursor.step_back() {
                break;
            }
        }
        assert_eq!(order, vec![b"003".to_vec(), b"002".to_vec(), b"001".to_vec()]);
    }

    #[test]
    fn get_both_returns_value_and_deadline() {
        let db = open_db();
        db.set(b"k", b"v", 60).unwrap();
        let mut cursor = db.cursor();
        cursor.jump();
        let (key, value, deadline) = cursor.get_both().unwrap();
        assert_eq!(key, b"k");
        assert_eq!(value, b"v");
        assert_eq!(deadline, 1_060);
    }

    #[test]
    fn direct_accept_on_expired_record_synthesizes_empty() {
        let db = open_db();
        // Write directly past the sweep so the raw bytes stay put but are logically expired.
        db.set(b"k", b"v", -1).unwrap();
        let mut cursor = db.cursor();
        cursor.jump();
        struct Probe {
            saw_empty: bool,
        }
        impl Visitor for Probe {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                Action::Keep
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                self.saw_empty = true;
                Action::Keep
            }
        }
        let mut probe = Probe { saw_empty: false };
        cursor.accept(&mut probe, false);
        assert!(probe.saw_empty);
    }
}
