//! Startup data-source resolution.
//!
//! Decides once per collection, at session init, whether the rows loaded
//! into memory come from the remote backend, the local cache, or the seed
//! fixtures. After that decision the in-memory store is authoritative and
//! the other copies are write-targets only.

use serde::Serialize;

/// Which source won the resolution for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Local,
    Seed,
    /// Nothing available anywhere; the collection starts empty.
    Empty,
}

/// Pick the rows a collection starts the session with.
///
/// `remote` is `Some` only when the backend was reachable and the fetch
/// decoded, `local` is `Some` only when the cache key has ever been written
/// (an empty array is a legitimate written state and stays `Some(vec![])`).
///
/// Tie-breaks, in order:
/// 1. A defined remote result wins, even when empty, UNLESS it is empty
///    while the local cache holds rows. That one case prefers local,
///    covering a backend whose data migration has not landed yet without
///    discarding offline edits.
/// 2. Without a remote result, any previously written cache wins,
///    including a written empty array. Seed data must not resurrect rows
///    the operator already deleted.
/// 3. Seed fixtures apply only on true first run.
pub fn resolve<T: Clone>(
    remote: Option<Vec<T>>,
    local: Option<Vec<T>>,
    seed: Vec<T>,
) -> (Vec<T>, DataSource) {
    if let Some(remote_rows) = remote {
        if remote_rows.is_empty() {
            if let Some(local_rows) = &local {
                if !local_rows.is_empty() {
                    return (local_rows.clone(), DataSource::Local);
                }
            }
        }
        return (remote_rows, DataSource::Remote);
    }

    if let Some(local_rows) = local {
        return (local_rows, DataSource::Local);
    }

    if !seed.is_empty() {
        return (seed, DataSource::Seed);
    }

    (Vec::new(), DataSource::Empty)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rows_win_over_everything() {
        let (rows, source) = resolve(Some(vec![1, 2]), Some(vec![9]), vec![7]);
        assert_eq!(rows, vec![1, 2]);
        assert_eq!(source, DataSource::Remote);
    }

    #[test]
    fn empty_remote_with_local_rows_prefers_local() {
        let (rows, source) = resolve(Some(vec![]), Some(vec![5, 6, 7, 8, 9]), vec![7]);
        assert_eq!(rows, vec![5, 6, 7, 8, 9]);
        assert_eq!(source, DataSource::Local);
    }

    #[test]
    fn empty_remote_with_empty_written_cache_stays_remote() {
        // A legitimately emptied remote collection must not resurrect seeds.
        let (rows, source) = resolve(Some(vec![]), Some(vec![]), vec![7]);
        assert!(rows.is_empty());
        assert_eq!(source, DataSource::Remote);
    }

    #[test]
    fn offline_written_empty_cache_beats_seed() {
        let (rows, source) = resolve(None, Some(Vec::<i32>::new()), vec![7]);
        assert!(rows.is_empty());
        assert_eq!(source, DataSource::Local);
    }

    #[test]
    fn seed_only_on_first_run() {
        let (rows, source) = resolve(None, None, vec![7, 8]);
        assert_eq!(rows, vec![7, 8]);
        assert_eq!(source, DataSource::Seed);

        let (rows, source) = resolve::<i32>(None, None, vec![]);
        assert!(rows.is_empty());
        assert_eq!(source, DataSource::Empty);
    }

    #[test]
    fn resolution_is_deterministic() {
        for _ in 0..3 {
            let (rows, source) = resolve(Some(vec![]), Some(vec![1, 2, 3, 4, 5]), vec![0]);
            assert_eq!(rows.len(), 5);
            assert_eq!(source, DataSource::Local);
        }
    }
}
