//! Process-wide statistics snapshot.
//!
//! The teacher's `turn-server::statistics` module keeps running totals in
//! `AtomicU64` counters because multiple worker threads update them
//! concurrently and an external exporter reads them on its own schedule.
//! This caster has neither: one reactor thread owns every agent, so a
//! snapshot is just a fold over the three tables taken whenever the caller
//! asks, with no counter to keep in sync between reads.

/// A point-in-time rollup of agent counts and cumulative byte totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pending: usize,
    pub clients: usize,
    pub sources: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}
