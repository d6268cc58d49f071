//! Worker selection: which executor receives the next ready job.

/// Outcome of [`select`], in terms of positions in the slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    /// An idle slot. Its idle timer must be cancelled.
    Idle(usize),
    /// No idle slot and room to grow.
    Spawn,
    /// Every slot busy and the pool at capacity.
    LeastLoaded(usize),
    MainThread,
}

/// Pure selection over the current active counts.
///
/// 1. The first slot with nothing in flight.
/// 2. A new slot, while `slots < max_workers`.
/// 3. The least-loaded slot, ties to the lowest position.
///
/// With `use_main_thread`, a chosen slot busier than the main thread loses
/// to the main thread. Idle and fresh slots carry no load, so in practice
/// this only applies to rule 3. An empty pool with no room to grow (max
/// shrunk to zero slots) falls back to the main thread regardless.
pub(crate) fn select(
    active: &[usize],
    max_workers: usize,
    use_main_thread: bool,
    main_active: usize,
) -> Selection {
    if let Some(idx) = active.iter().position(|&a| a == 0) {
        return Selection::Idle(idx);
    }
    if active.len() < max_workers {
        return Selection::Spawn;
    }

    match least_loaded(active).map(|idx| (idx, active[idx])) {
        Some((_, load)) if use_main_thread && load > main_active => Selection::MainThread,
        Some((idx, _)) => Selection::LeastLoaded(idx),
        None => Selection::MainThread,
    }
}

/// Least-loaded slot, used when spawning a new slot failed.
pub(crate) fn least_loaded(active: &[usize]) -> Option<usize> {
    active
        .iter()
        .enumerate()
        .min_by_key(|&(idx, &a)| (a, idx))
        .map(|(idx, _)| idx)
}
