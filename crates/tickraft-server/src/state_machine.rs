use tickraft_core::{LogEntry, LogIndex};

/// Receives committed Data entries, in log order, exactly once each.
pub trait StateMachine {
    fn apply(&mut self, index: LogIndex, entry: &LogEntry);
}

impl<F> StateMachine for F
where
    F: FnMut(LogIndex, &LogEntry),
{
    fn apply(&mut self, index: LogIndex, entry: &LogEntry) {
        self(index, entry)
    }
}

/// Discards everything it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStateMachine;

impl StateMachine for NoopStateMachine {
    fn apply(&mut self, _index: LogIndex, _entry: &LogEntry) {}
}
