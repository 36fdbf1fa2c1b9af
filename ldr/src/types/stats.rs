use std::ops::AddAssign;

/// Counters describing the outcome of applying a batch of change events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub rows_applied: u64,
    /// Rows that lost conflict resolution against the local version.
    pub rows_ignored: u64,
    pub bytes_applied: u64,
    /// Inserts written without reading the local row first.
    pub optimistic_inserts: u64,
    pub conditional_puts: u64,
    pub blind_puts: u64,
}

impl AddAssign for BatchStats {
    fn add_assign(&mut self, other: Self) {
        self.rows_applied += other.rows_applied;
        self.rows_ignored += other.rows_ignored;
        self.bytes_applied += other.bytes_applied;
        self.optimistic_inserts += other.optimistic_inserts;
        self.conditional_puts += other.conditional_puts;
        self.blind_puts += other.blind_puts;
    }
}
