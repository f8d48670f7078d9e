//! Merging N source databases into a destination.

use crate::db::TimedDb;

/// How a merged key is written into the destination when it already exists
/// there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Always overwrite with the source's value.
    Overwrite,
    /// Keep whatever the destination already has.
    KeepExisting,
    /// Only write if the destination already has a live record for the key.
    OnlyIfExists,
    /// Concatenate the source's value after the destination's.
    Append,
}

/// Merges `sources` into `dest`, advancing one cursor per source and always
/// taking the lexicographically smallest front key across them. Source
/// deadlines are preserved, re-encoded as absolute epoch seconds.
///
/// `progress` is called after every record written; returning `false` aborts
/// the merge early.
pub fn merge(dest: &TimedDb, sources: &[&TimedDb], mode: MergeMode, mut progress: impl FnMut() -> bool) {
    let mut cursors: Vec<_> = sources.iter().map(|db| db.cursor()).collect();
    let mut fronts: Vec<Option<(Vec<u8>, Vec<u8>, u64)>> =
        cursors.iter_mut().map(|c| { c.jump(); c.get_both() }).collect();

    loop {
        let winner = fronts
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|(k, _, _)| (i, k.clone())))
            .min_by(|(_, a), (_, b)| a.cmp(b));

        let Some((idx, key)) = winner else { break };
        let (_, value, deadline) = fronts[idx].clone().unwrap();

        write_merged(dest, &key, &value, deadline, mode);

        if !cursors[idx].step() {
            fronts[idx] = None;
        } else {
            fronts[idx] = cursors[idx].get_both();
        }

        if !progress() {
            break;
        }
    }
}

fn write_merged(dest: &TimedDb, key: &[u8], value: &[u8], deadline: u64, mode: MergeMode) {
    // Deadlines from the source are absolute already; re-express as a
    // negative `xt` so `set`/`append` treat it as an absolute epoch rather
    // than "seconds from now".
    let xt = -(deadline as i64);
    match mode {
        MergeMode::Overwrite => {
            let _ = dest.set(key, value, xt);
        }
        MergeMode::KeepExisting => {
            let _ = dest.add(key, value, xt);
        }
        MergeMode::OnlyIfExists => {
            let _ = dest.replace(key, value, xt);
        }
        MergeMode::Append => {
            let _ = dest.append(key, value, xt);
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
    fn overwrite_merges_two_sources_in_key_order() {
        let a = open_db();
        let b = open_db();
        let dest = open_db();
        a.set(b"001", b"from-a", 3600).unwrap();
        b.set(b"002", b"from-b", 3600).unwrap();
        merge(&dest, &[&a, &b], MergeMode::Overwrite, || true);
        assert_eq!(dest.get(b"001").unwrap().0, b"from-a");
        assert_eq!(dest.get(b"002").unwrap().0, b"from-b");
    }

    #[test]
    fn keep_existing_does_not_clobber_destination() {
        let a = open_db();
        let dest = open_db();
        dest.set(b"k", b"dest-value", 3600).unwrap();
        a.set(b"k", b"source-value", 3600).unwrap();
        merge(&dest, &[&a], MergeMode::KeepExisting, || true);
        assert_eq!(dest.get(b"k").unwrap().0, b"dest-value");
    }

    #[test]
    fn only_if_exists_skips_missing_keys() {
        let a = open_db();
        let dest = open_db();
        a.set(b"new-key", b"v", 3600).unwrap();
        merge(&dest, &[&a], MergeMode::OnlyIfExists, || true);
        assert!(dest.get(b"new-key").is_err());
    }
}
