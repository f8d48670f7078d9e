//! `TimedDb`: the expiration-aware wrapper over an [`Engine`]. This is the substantive part of the core: every foreground
//! operation decodes the 5-byte deadline prefix, filters expired records
//! transparently, and feeds an amortized background sweep.

use crate::clock::Clock;
use crate::engine::{Engine, EngineCursor, RawAction, RawVisitor};
use crate::observer::{WriteLogEntry, WriteObserver};
use crate::record::{decode_record, encode_record};
use crate::visitor::{Action, Visitor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use timedkv_common::{is_expired, normalize_xt, TimedKvError};
use timedkv_common::{DEADLINE_MAX, SWEEP_BATCH, SWEEP_ITER_FACTOR, SWEEP_READ_FACTOR, SWEEP_UNIT};

const HEADER_MAGIC: u8 = 0xBB;
const OPT_PERSISTENT: u8 = 0x01;

/// Configuration for opening a [`TimedDb`].
#[derive(Debug, Clone)]
pub struct TimedDbConfig {
    pub name: String,
    pub persistent: bool,
    pub max_count: Option<u64>,
    pub max_size: Option<u64>,
    pub writable: bool,
}

impl TimedDbConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), persistent: false, max_count: None, max_size: None, writable: true }
    }
}

/// The sweep cursor and its private lock. Distinct from any
/// user-facing cursor.
struct SweepState {
    cursor: Box<dyn EngineCursor>,
}

pub struct TimedDb {
    name: String,
    engine: Arc<dyn Engine>,
    clock: Arc<dyn Clock>,
    persistent: bool,
    max_count: Option<u64>,
    max_size: Option<u64>,
    sweep: Option<Mutex<SweepState>>,
    score: AtomicU64,
    last_error: Mutex<Option<TimedKvError>>,
    observer: Mutex<Option<Arc<dyn WriteObserver>>>,
}

fn action_to_raw(action: Action, prev_deadline: u64, persistent: bool) -> RawAction {
    match action {
        Action::Keep => RawAction::Keep,
        Action::Remove => RawAction::Remove,
        Action::Set { value, deadline } => {
            RawAction::Set(encode_record(&value, deadline.unwrap_or(prev_deadline), persistent))
        }
    }
}

/// Same translation, but for a record the caller's side already sees as
/// empty (either truly absent, or present-but-expired): an expired record
/// that the visitor merely `Keep`s is reclaimed rather than left in place.
fn expired_action_to_raw(action: Action, persistent: bool) -> RawAction {
    match action {
        Action::Keep => RawAction::Remove,
        Action::Remove => RawAction::Remove,
        Action::Set { value, deadline } => {
            RawAction::Set(encode_record(&value, deadline.unwrap_or(DEADLINE_MAX), persistent))
        }
    }
}

impl TimedDb {
    /// Opens a database over `engine`. On first open of an empty, writable
    /// database the opaque header is stamped with the magic byte and the
    /// option flags; on later opens the stored flags override the caller's
    /// requested `persistent`.
    pub fn open(config: TimedDbConfig, engine: Arc<dyn Engine>, clock: Arc<dyn Clock>) -> Self {
        let header = engine.header();
        let persistent = if header[0] != HEADER_MAGIC {
            if engine.count() == 0 && config.writable {
                let opts = if config.persistent { OPT_PERSISTENT } else { 0 };
                engine.set_header([HEADER_MAGIC, opts]);
            }
            config.persistent
        } else {
            header[1] & OPT_PERSISTENT != 0
        };

        let sweep = if config.writable && !persistent {
            let mut cursor = engine.new_cursor();
            if engine.count() > 0 {
                cursor.jump();
            }
            Some(Mutex::new(SweepState { cursor }))
        } else {
            None
        };

        Self {
            name: config.name,
            engine,
            clock,
            persistent,
            max_count: config.max_count,
            max_size: config.max_size,
            sweep,
            score: AtomicU64::new(0),
            last_error: Mutex::new(None),
            observer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn count(&self) -> u64 {
        self.engine.count()
    }

    pub fn size(&self) -> u64 {
        self.engine.size()
    }

    pub fn path(&self) -> Option<String> {
        self.engine.path()
    }

    pub fn status(&self) -> std::collections::BTreeMap<String, String> {
        self.engine.status()
    }

    pub fn set_observer(&self, observer: Arc<dyn WriteObserver>) {
        *self.observer.lock().expect("observer lock poisoned") = Some(observer);
    }

    pub fn last_error(&self) -> Option<TimedKvError> {
        self.last_error.lock().expect("last-error lock poisoned").clone()
    }

    fn set_last_error(&self, err: TimedKvError) {
        *self.last_error.lock().expect("last-error lock poisoned") = Some(err);
    }

    fn clear_last_error(&self) {
        *self.last_error.lock().expect("last-error lock poisoned") = None;
    }

    fn now(&self) -> u64 {
        self.clock.unix_now_secs()
    }

    fn notify(&self, key: &[u8], value: Option<Vec<u8>>, deadline: u64) {
        if let Some(observer) = self.observer.lock().expect("observer lock poisoned").as_ref() {
            observer.on_write(&WriteLogEntry {
                db_name: self.name.clone(),
                key: key.to_vec(),
                value,
                deadline,
            });
        }
    }

    /// The per-key, deadline-aware `accept`. Every public
    /// operation is built on top of this.
    fn accept(&self, key: &[u8], visitor: &mut dyn Visitor, writable: bool) {
        let now = self.now();
        let persistent = self.persistent;
        struct Adapter<'a> {
            visitor: &'a mut dyn Visitor,
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
                            expired_action_to_raw(action, self.persistent)
                        } else {
                            let action = self.visitor.visit_full(key, value, deadline);
                            action_to_raw(action, deadline, self.persistent)
                        }
                    }
                    None => {
                        let action = self.visitor.visit_empty(key);
                        action_to_raw(action, DEADLINE_MAX, self.persistent)
                    }
                }
            }
        }
        let mut adapter = Adapter { visitor, now, persistent };
        self.engine.accept(key, &mut adapter, writable);
        self.bump_score(writable);
    }

    fn bump_score(&self, writable: bool) {
        if self.sweep.is_none() {
            return;
        }
        let delta = if writable { SWEEP_UNIT } else { SWEEP_UNIT / SWEEP_READ_FACTOR };
        let score = self.score.fetch_add(delta, Ordering::Relaxed) + delta;
        if score >= SWEEP_UNIT * SWEEP_BATCH {
            self.try_sweep();
        }
    }

    fn bump_score_iterate(&self, records_seen: u64) {
        if self.sweep.is_none() {
            return;
        }
        let delta = SWEEP_UNIT * records_seen / SWEEP_ITER_FACTOR;
        let score = self.score.fetch_add(delta, Ordering::Relaxed) + delta;
        if score >= SWEEP_UNIT * SWEEP_BATCH {
            self.try_sweep();
        }
    }

    /// Attempts the amortized sweep. Never blocks: if the
    /// sweep cursor's lock is held elsewhere, the score is simply retained
    /// for the next foreground operation to try again.
    fn try_sweep(&self) {
        let Some(sweep) = &self.sweep else { return };
        let Ok(mut state) = sweep.try_lock() else { return };
        let score = self.score.load(Ordering::Relaxed);
        if score < SWEEP_UNIT {
            return;
        }
        let step = (score / SWEEP_UNIT).min(SWEEP_BATCH);
        self.score.fetch_sub(step * SWEEP_UNIT, Ordering::Relaxed);
        self.sweep_tick(&mut state.cursor, step);
    }

    fn sweep_tick(&self, cursor: &mut Box<dyn EngineCursor>, step: u64) {
        let now = self.now();
        struct ExpireVisitor {
            now: u64,
        }
        impl RawVisitor for ExpireVisitor {
            fn visit(&mut self, _key: &[u8], raw: Option<&[u8]>) -> RawAction {
                match raw {
                    Some(bytes) => {
                        let (_, deadline) = decode_record(bytes, false);
                        if is_expired(deadline, self.now) {
                            RawAction::Remove
                        } else {
                            RawAction::Keep
                        }
                    }
                    None => RawAction::Keep,
                }
            }
        }
        for _ in 0..step {
            let mut visitor = ExpireVisitor { now };
            if !cursor.accept(&mut visitor, true, true) && !cursor.jump() {
                break;
            }
        }
        if let Some(max_count) = self.max_count {
            let mut count = self.engine.count();
            while count > max_count {
                if !cursor.remove() && !cursor.jump() {
                    break;
                }
                count = self.engine.count();
            }
        }
        if let Some(max_size) = self.max_size {
            if self.engine.size() > max_size {
                for _ in 0..step {
                    if self.engine.size() <= max_size {
                        break;
                    }
                    if !cursor.remove() && !cursor.jump() {
                        break;
                    }
                }
            }
        }
        self.engine.defrag();
    }

    /// Explicit user-triggered sweep. `step <= 0` scans the
    /// whole database once; otherwise performs `step` sweep units under the
    /// (blocking, this time) sweep lock.
    pub fn vacuum(&self, step: i64) {
        let Some(sweep) = &self.sweep else { return };
        let mut state = sweep.lock().expect("sweep lock poisoned");
        if step <= 0 {
            state.cursor.jump();
            let count = self.engine.count();
            self.sweep_tick(&mut state.cursor, count.max(1));
        } else {
            self.sweep_tick(&mut state.cursor, step as u64);
        }
    }

    pub fn clear(&self) {
        self.engine.clear();
        self.clear_last_error();
    }

    pub fn synchronize(&self, hard: bool) {
        self.engine.synchronize(hard);
    }

    pub fn cursor(&self) -> crate::cursor::Cursor<'_> {
        crate::cursor::Cursor::new(self)
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn now_pub(&self) -> u64 {
        self.now()
    }

    pub(crate) fn persistent_pub(&self) -> bool {
        self.persistent
    }

    /// Unconditional write.
    pub fn set(&self, key: &[u8], value: &[u8], xt: i64) -> Result<(), TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct SetV<'a> {
            value: &'a [u8],
            deadline: u64,
        }
        impl Visitor for SetV<'_> {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                Action::set(self.value.to_vec(), self.deadline)
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                Action::set(self.value.to_vec(), self.deadline)
            }
        }
        let mut v = SetV { value, deadline };
        self.accept(key, &mut v, true);
        self.clear_last_error();
        self.notify(key, Some(value.to_vec()), deadline);
        Ok(())
    }

    /// Write only if absent.
    pub fn add(&self, key: &[u8], value: &[u8], xt: i64) -> Result<(), TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct AddV<'a> {
            value: &'a [u8],
            deadline: u64,
            ok: bool,
        }
        impl Visitor for AddV<'_> {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                Action::Keep
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                self.ok = true;
                Action::set(self.value.to_vec(), self.deadline)
            }
        }
        let mut v = AddV { value, deadline, ok: false };
        self.accept(key, &mut v, true);
        if !v.ok {
            let err = TimedKvError::Duplicate(String::from_utf8_lossy(key).into_owned());
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        self.notify(key, Some(value.to_vec()), deadline);
        Ok(())
    }

    /// Write only if present.
    pub fn replace(&self, key: &[u8], value: &[u8], xt: i64) -> Result<(), TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct ReplaceV<'a> {
            value: &'a [u8],
            deadline: u64,
            ok: bool,
        }
        impl Visitor for ReplaceV<'_> {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                self.ok = true;
                Action::set(self.value.to_vec(), self.deadline)
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                Action::Keep
            }
        }
        let mut v = ReplaceV { value, deadline, ok: false };
        self.accept(key, &mut v, true);
        if !v.ok {
            let err = TimedKvError::NoRecord(String::from_utf8_lossy(key).into_owned());
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        self.notify(key, Some(value.to_vec()), deadline);
        Ok(())
    }

    /// Concatenate after the existing value; creates if absent.
    pub fn append(&self, key: &[u8], value: &[u8], xt: i64) -> Result<(), TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct AppendV<'a> {
            value: &'a [u8],
            deadline: u64,
            result: Vec<u8>,
        }
        impl Visitor for AppendV<'_> {
            fn visit_full(&mut self, _k: &[u8], v: &[u8], _d: u64) -> Action {
                let mut new_value = v.to_vec();
                new_value.extend_from_slice(self.value);
                self.result = new_value.clone();
                Action::set(new_value, self.deadline)
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                self.result = self.value.to_vec();
                Action::set(self.value.to_vec(), self.deadline)
            }
        }
        let mut v = AppendV { value, deadline, result: Vec::new() };
        self.accept(key, &mut v, true);
        self.clear_last_error();
        self.notify(key, Some(v.result), deadline);
        Ok(())
    }

    /// Integer counter add. A delta of `0` is a
    /// read that leaves the deadline untouched.
    pub fn increment(&self, key: &[u8], delta: i64, xt: i64) -> Result<i64, TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct IncV {
            delta: i64,
            deadline: u64,
            result: i64,
            failed: bool,
            wrote: bool,
        }
        impl Visitor for IncV {
            fn visit_full(&mut self, _k: &[u8], v: &[u8], _d: u64) -> Action {
                if v.len() != 8 {
                    self.failed = true;
                    return Action::Keep;
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(v);
                let onum = i64::from_be_bytes(buf);
                if self.delta == 0 {
                    self.result = onum;
                    return Action::Keep;
                }
                let newnum = onum.wrapping_add(self.delta);
                self.result = newnum;
                self.wrote = true;
                Action::set(newnum.to_be_bytes().to_vec(), self.deadline)
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                self.result = self.delta;
                self.wrote = true;
                Action::set(self.delta.to_be_bytes().to_vec(), self.deadline)
            }
        }
        let mut v = IncV { delta, deadline, result: 0, failed: false, wrote: false };
        self.accept(key, &mut v, true);
        if v.failed {
            let err = TimedKvError::Logic(format!("{}: value is not an 8-byte integer", String::from_utf8_lossy(key)));
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        if v.wrote {
            self.notify(key, Some(v.result.to_be_bytes().to_vec()), deadline);
        }
        Ok(v.result)
    }

    /// Fixed-point double counter add.
    pub fn increment_double(&self, key: &[u8], delta: f64, xt: i64) -> Result<f64, TimedKvError> {
        const DECUNIT: i64 = 1_000_000_000_000_000;
        let deadline = normalize_xt(xt, self.now());

        fn split(num: f64) -> (i64, i64) {
            if num.is_nan() {
                (i64::MIN, i64::MIN)
            } else if num.is_infinite() {
                if num > 0.0 {
                    (i64::MAX, 0)
                } else {
                    (i64::MIN, 0)
                }
            } else {
                let integ = num.trunc();
                let fract = num.fract();
                (integ as i64, (fract * DECUNIT as f64) as i64)
            }
        }

        fn join(integ: i64, fract: i64) -> f64 {
            if integ == i64::MIN && fract == i64::MIN {
                f64::NAN
            } else if integ == i64::MAX {
                f64::INFINITY
            } else if integ == i64::MIN {
                f64::NEG_INFINITY
            } else {
                integ as f64 + fract as f64 / DECUNIT as f64
            }
        }

        struct IncDV {
            delta: f64,
            deadline: u64,
            result: f64,
            failed: bool,
            wrote: bool,
            bytes: (i64, i64),
        }
        impl Visitor for IncDV {
            fn visit_full(&mut self, _k: &[u8], v: &[u8], _d: u64) -> Action {
                if v.len() != 16 {
                    self.result = f64::NAN;
                    self.failed = true;
                    return Action::Keep;
                }
                let mut ibuf = [0u8; 8];
                let mut fbuf = [0u8; 8];
                ibuf.copy_from_slice(&v[..8]);
                fbuf.copy_from_slice(&v[8..]);
                let (mut linteg, mut lfract) = (i64::from_be_bytes(ibuf), i64::from_be_bytes(fbuf));

                // Sentinels are permanent: once a record has saturated to
                // NaN or +/-infinity, every future increment is a no-op
                // that returns the saturated value, regardless of delta.
                if linteg == i64::MIN && lfract == i64::MIN {
                    self.result = f64::NAN;
                    return Action::Keep;
                } else if linteg == i64::MAX {
                    self.result = f64::INFINITY;
                    return Action::Keep;
                } else if linteg == i64::MIN {
                    self.result = f64::NEG_INFINITY;
                    return Action::Keep;
                }

                if self.delta == 0.0 {
                    self.result = linteg as f64 + lfract as f64 / DECUNIT as f64;
                    return Action::Keep;
                }

                let dinteg = self.delta.trunc();
                let dfract = self.delta.fract();
                if dinteg.is_nan() {
                    linteg = i64::MIN;
                    lfract = i64::MIN;
                    self.result = f64::NAN;
                } else if dinteg.is_infinite() {
                    linteg = if dinteg > 0.0 { i64::MAX } else { i64::MIN };
                    lfract = 0;
                    self.result = dinteg;
                } else {
                    linteg += dinteg as i64;
                    lfract += (dfract * DECUNIT as f64) as i64;
                    if lfract >= DECUNIT {
                        linteg += 1;
                        lfract -= DECUNIT;
                    }
                    self.result = linteg as f64 + lfract as f64 / DECUNIT as f64;
                }
                self.wrote = true;
                self.bytes = (linteg, lfract);
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&linteg.to_be_bytes());
                buf.extend_from_slice(&lfract.to_be_bytes());
                Action::set(buf, self.deadline)
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                let (integ, fract) = split(self.delta);
                self.result = join(integ, fract);
                self.wrote = true;
                self.bytes = (integ, fract);
                let mut buf = Vec::with_capacity(16);
                buf.extend_from_slice(&integ.to_be_bytes());
                buf.extend_from_slice(&fract.to_be_bytes());
                Action::set(buf, self.deadline)
            }
        }
        let mut v = IncDV { delta, deadline, result: 0.0, failed: false, wrote: false, bytes: (0, 0) };
        self.accept(key, &mut v, true);
        if v.failed || v.result.is_nan() {
            let err = TimedKvError::Logic(format!("{}: value is not a double", String::from_utf8_lossy(key)));
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        if v.wrote {
            let (i, f) = v.bytes;
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&i.to_be_bytes());
            buf.extend_from_slice(&f.to_be_bytes());
            self.notify(key, Some(buf), deadline);
        }
        Ok(v.result)
    }

    /// Compare-and-swap. Either `old` or `new` may be
    /// absent. On success with `new` absent, the record is removed.
    pub fn cas(&self, key: &[u8], old: Option<&[u8]>, new: Option<&[u8]>, xt: i64) -> Result<(), TimedKvError> {
        let deadline = normalize_xt(xt, self.now());
        struct CasV<'a> {
            old: Option<&'a [u8]>,
            new: Option<&'a [u8]>,
            deadline: u64,
            ok: bool,
        }
        impl Visitor for CasV<'_> {
            fn visit_full(&mut self, _k: &[u8], v: &[u8], _d: u64) -> Action {
                if self.old != Some(v) {
                    return Action::Keep;
                }
                self.ok = true;
                match self.new {
                    Some(new) => Action::set(new.to_vec(), self.deadline),
                    None => Action::Remove,
                }
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                if self.old.is_some() {
                    return Action::Keep;
                }
                self.ok = true;
                match self.new {
                    Some(new) => Action::set(new.to_vec(), self.deadline),
                    None => Action::Keep,
                }
            }
        }
        let mut v = CasV { old, new, deadline, ok: false };
        self.accept(key, &mut v, true);
        if !v.ok {
            let err = TimedKvError::Logic(format!("{}: cas mismatch", String::from_utf8_lossy(key)));
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        self.notify(key, new.map(|b| b.to_vec()), deadline);
        Ok(())
    }

    /// Removes a record; fails if no live record exists.
    pub fn remove(&self, key: &[u8]) -> Result<(), TimedKvError> {
        struct RemoveV {
            ok: bool,
        }
        impl Visitor for RemoveV {
            fn visit_full(&mut self, _k: &[u8], _v: &[u8], _d: u64) -> Action {
                self.ok = true;
                Action::Remove
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                Action::Keep
            }
        }
        let mut v = RemoveV { ok: false };
        self.accept(key, &mut v, true);
        if !v.ok {
            let err = TimedKvError::NoRecord(String::from_utf8_lossy(key).into_owned());
            self.set_last_error(err.clone());
            return Err(err);
        }
        self.clear_last_error();
        self.notify(key, None, DEADLINE_MAX);
        Ok(())
    }

    /// Reads a live record's value and remaining deadline.
    pub fn get(&self, key: &[u8]) -> Result<(Vec<u8>, u64), TimedKvError> {
        struct GetV {
            result: Option<(Vec<u8>, u64)>,
        }
        impl Visitor for GetV {
            fn visit_full(&mut self, _k: &[u8], v: &[u8], d: u64) -> Action {
                self.result = Some((v.to_vec(), d));
                Action::Keep
            }
            fn visit_empty(&mut self, _k: &[u8]) -> Action {
                Action::Keep
            }
        }
        let mut v = GetV { result: None };
        self.accept(key, &mut v, false);
        match v.result {
            Some(r) => {
                self.clear_last_error();
                Ok(r)
            }
            None => {
                let err = TimedKvError::NoRecord(String::from_utf8_lossy(key).into_owned());
                self.set_last_error(err.clone());
                Err(err)
            }
        }
    }

    /// Applies `visitor` to every live record. Skips (and, if writable,
    /// reclaims) expired records without ever calling the user visitor on
    /// them.
    pub fn iterate(&self, visitor: &mut dyn Visitor, writable: bool) {
        let now = self.now();
        let persistent = self.persistent;
        let seen = std::sync::atomic::AtomicU64::new(0);
        struct Adapter<'a> {
            visitor: &'a mut dyn Visitor,
            now: u64,
            persistent: bool,
            seen: &'a std::sync::atomic::AtomicU64,
        }
        impl RawVisitor for Adapter<'_> {
            fn visit(&mut self, key: &[u8], raw: Option<&[u8]>) -> RawAction {
                self.seen.fetch_add(1, Ordering::Relaxed);
                match raw {
                    Some(bytes) => {
                        let (value, deadline) = decode_record(bytes, self.persistent);
                        if !self.persistent && is_expired(deadline, self.now) {
                            RawAction::Remove
                        } else {
                            let action = self.visitor.visit_full(key, value, deadline);
                            action_to_raw(action, deadline, self.persistent)
                        }
                    }
                    None => RawAction::Keep,
                }
            }
        }
        let mut adapter = Adapter { visitor, now, persistent, seen: &seen };
        self.engine.iterate(&mut adapter, writable);
        self.bump_score_iterate(seen.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::mem_engine::MemEngine;

    fn open_db(config: TimedDbConfig) -> (TimedDb, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        (TimedDb::open(config, engine, clock.clone()), clock)
    }

    #[test]
    fn set_then_get_round_trips() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"k", b"v", 60).unwrap();
        let (value, deadline) = db.get(b"k").unwrap();
        assert_eq!(value, b"v");
        assert_eq!(deadline, 1_060);
    }

    #[test]
    fn get_on_missing_key_is_no_record() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        assert!(matches!(db.get(b"nope"), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn expired_record_is_invisible_on_read() {
        let (db, clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"k", b"v", 1).unwrap();
        clock.advance(2);
        assert!(matches!(db.get(b"k"), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn negative_xt_expires_immediately() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"k", b"v", -500).unwrap(); // absolute epoch 500, now is 1000
        assert!(matches!(db.get(b"k"), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn add_fails_on_duplicate() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.add(b"k", b"v1", 0).unwrap();
        assert!(matches!(db.add(b"k", b"v2", 0), Err(TimedKvError::Duplicate(_))));
    }

    #[test]
    fn replace_fails_on_absent() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        assert!(matches!(db.replace(b"k", b"v", 0), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn append_creates_then_concatenates() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.append(b"k", b"foo", 0).unwrap();
        db.append(b"k", b"bar", 0).unwrap();
        let (value, _) = db.get(b"k").unwrap();
        assert_eq!(value, b"foobar");
    }

    #[test]
    fn increment_accumulates_and_reads_with_zero_delta() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        for _ in 0..100 {
            db.increment(b"c", 1, 0).unwrap();
        }
        assert_eq!(db.increment(b"c", 0, 0).unwrap(), 100);
    }

    #[test]
    fn increment_on_non_integer_value_is_logic_error() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"c", b"abc", 0).unwrap();
        assert!(matches!(db.increment(b"c", 1, 0), Err(TimedKvError::Logic(_))));
    }

    #[test]
    fn increment_double_accumulates_fractions() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.increment_double(b"d", 1.5, 0).unwrap();
        let result = db.increment_double(b"d", 2.25, 0).unwrap();
        assert!((result - 3.75).abs() < 1e-9);
    }

    #[test]
    fn cas_round_trip() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"x", b"1", 0).unwrap();
        db.cas(b"x", Some(b"1"), Some(b"2"), 0).unwrap();
        assert!(matches!(db.cas(b"x", Some(b"1"), Some(b"3"), 0), Err(TimedKvError::Logic(_))));
        db.cas(b"x", Some(b"2"), None, 0).unwrap();
        assert!(matches!(db.get(b"x"), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn remove_twice_fails_second_time() {
        let (db, _clock) = open_db(TimedDbConfig::new("t"));
        db.set(b"k", b"v", 0).unwrap();
        db.remove(b"k").unwrap();
        assert!(matches!(db.remove(b"k"), Err(TimedKvError::NoRecord(_))));
    }

    #[test]
    fn persistent_db_never_expires() {
        let mut config = TimedDbConfig::new("t");
        config.persistent = true;
        let clock = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        let db = TimedDb::open(config, engine, clock.clone());
        db.set(b"k", b"v", 1).unwrap();
        clock.advance(10_000);
        let (value, _) = db.get(b"k").unwrap();
        assert_eq!(value, b"v");
    }

    #[test]
    fn sweep_reclaims_expired_records_after_batch_operations() {
        let mut config = TimedDbConfig::new("t");
        config.max_count = None;
        let clock = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        let db = TimedDb::open(config, engine, clock.clone());
        for i in 0..20 {
            db.set(format!("k{i}").as_bytes(), b"v", 1).unwrap();
        }
        clock.advance(2);
        // Enough foreground writes to cross the sweep threshold.
        for i in 20..40 {
            db.set(format!("k{i}").as_bytes(), b"v", 3600).unwrap();
        }
        assert!(db.count() <= 40);
    }

    #[test]
    fn capacity_eviction_keeps_count_bounded() {
        let mut config = TimedDbConfig::new("t");
        config.max_count = Some(10);
        let clock = Arc::new(FixedClock::new(1_000));
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new(None));
        let db = TimedDb::open(config, engine, clock.clone());
        for i in 0..20 {
            db.set(format!("k{i}").as_bytes(), b"v", 3600).unwrap();
        }
        // One more read to push the sweep past its trigger threshold.
        for _ in 0..200 {
            let _ = db.get(b"k19");
        }
        assert!(db.count() <= 10);
    }
}
