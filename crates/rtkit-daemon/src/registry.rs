//! Known-process registry.
//!
//! Every successful grant appends the target process. Entries are
//! duplicates-tolerant and pruned by `garbage_collect()`.

use std::collections::HashSet;

use rtkit_core::process::Process;

#[derive(Debug, Default)]
pub struct KnownProcessRegistry {
    entries: Vec<Process>,
}

impl KnownProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, process: Process) {
        self.entries.push(process);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.entries.iter()
    }

    /// Drop repeated identities and entries that are gone, reused, or back
    /// to default scheduling. Returns the number removed.
    pub fn garbage_collect(&mut self) -> usize {
        let before = self.entries.len();
        let mut seen = HashSet::with_capacity(before);
        self.entries.retain(|p| {
            seen.insert(p.identity()) && p.is_valid() && p.has_non_standard_scheduling_policy()
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "collected known processes");
        }
        removed
    }

    /// Reset every still-valid entry to default scheduling, then collect.
    /// Returns the number of processes reset.
    pub fn reset_known(&mut self) -> usize {
        let mut reset = 0;
        for p in &self.entries {
            if p.is_valid() {
                tracing::info!(process = %p, "resetting known process");
                if p.reset_all_priorities(None) {
                    reset += 1;
                }
            }
        }
        self.garbage_collect();
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtkit_core::process::ProcessTable;
    use rtkit_module::sim::{Sched, SimBackend};

    #[test]
    fn test_garbage_collect() {
        let sim = SimBackend::new();
        let table = ProcessTable::new(sim.clone());
        sim.spawn(10, 1000, &[10]);
        sim.spawn(11, 1000, &[11]);
        sim.spawn(12, 1000, &[12]);
        sim.spawn(13, 1000, &[13]);
        sim.set_sched(10, 10, Sched::Realtime(5));
        sim.set_sched(12, 12, Sched::High(-5));
        sim.set_sched(13, 13, Sched::Realtime(5));

        let mut reg = KnownProcessRegistry::new();
        for pid in [10, 10, 11, 12, 13] {
            reg.push(Process::resolve(&table, pid));
        }

        // 12 exits, 13 is reused by another process with elevated scheduling
        sim.exit(12);
        sim.reuse(13, 1000, &[13]);
        sim.set_sched(13, 13, Sched::Realtime(5));

        assert_eq!(reg.garbage_collect(), 4);
        let pids: Vec<_> = reg.iter().map(|p| p.pid()).collect();
        assert_eq!(pids, vec![10]);
    }

    #[test]
    fn test_repeated_grants_collapse_to_one_entry() {
        let sim = SimBackend::new();
        let table = ProcessTable::new(sim.clone());
        sim.spawn(100, 1000, &[100, 101]);
        sim.spawn(200, 1000, &[200]);
        sim.set_sched(100, 100, Sched::Realtime(5));
        sim.set_sched(200, 200, Sched::High(-2));

        let mut reg = KnownProcessRegistry::new();
        for _ in 0..50 {
            reg.push(Process::resolve(&table, 100));
        }
        reg.push(Process::resolve(&table, 200));
        reg.push(Process::resolve(&table, 100));

        assert_eq!(reg.garbage_collect(), 50);
        let pids: Vec<_> = reg.iter().map(|p| p.pid()).collect();
        assert_eq!(pids, vec![100, 200]);

        // Same pid after reuse is a different identity
        sim.reuse(100, 1000, &[100]);
        sim.set_sched(100, 100, Sched::Realtime(5));
        reg.push(Process::resolve(&table, 100));
        assert_eq!(reg.garbage_collect(), 1);
        let pids: Vec<_> = reg.iter().map(|p| p.pid()).collect();
        assert_eq!(pids, vec![200, 100]);
    }

    #[test]
    fn test_reset_known_skips_invalid() {
        let sim = SimBackend::new();
        let table = ProcessTable::new(sim.clone());
        sim.spawn(20, 1000, &[20, 21]);
        sim.spawn(30, 1000, &[30]);
        sim.set_sched(20, 21, Sched::Realtime(5));
        sim.set_sched(30, 30, Sched::Realtime(5));

        let mut reg = KnownProcessRegistry::new();
        reg.push(Process::resolve(&table, 20));
        reg.push(Process::resolve(&table, 30));
        sim.reuse(30, 2000, &[30]);
        sim.set_sched(30, 30, Sched::Realtime(7));

        assert_eq!(reg.reset_known(), 1);
        assert_eq!(sim.resets(), vec![(20, None)]);
        assert_eq!(sim.sched(20, 21), Some(Sched::Default));
        // The unrelated process now holding pid 30 is untouched
        assert_eq!(sim.sched(30, 30), Some(Sched::Realtime(7)));
        assert!(reg.is_empty());
    }
}
