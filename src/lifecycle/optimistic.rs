/// Optimistic value with an explicit settle step:
/// `Idle -> Pending(previous) -> Committed | RolledBack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimistic<T> {
    Idle(T),
    Pending { previous: T, requested: T },
    Committed(T),
    RolledBack(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("an optimistic update is already pending")]
pub struct AlreadyPending;

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self::Idle(value)
    }

    /// What the UI shows: the requested value while pending.
    pub fn shown(&self) -> &T {
        match self {
            Self::Idle(value) | Self::Committed(value) | Self::RolledBack(value) => value,
            Self::Pending { requested, .. } => requested,
        }
    }

    /// Last value the server agreed with.
    pub fn confirmed(&self) -> &T {
        match self {
            Self::Idle(value) | Self::Committed(value) | Self::RolledBack(value) => value,
            Self::Pending { previous, .. } => previous,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn begin(&mut self, requested: T) -> Result<(), AlreadyPending> {
        if self.is_pending() {
            return Err(AlreadyPending);
        }
        let previous = self.confirmed().clone();
        *self = Self::Pending {
            previous,
            requested,
        };
        Ok(())
    }

    /// Settles with the server's value, which may differ from the request.
    pub fn commit(&mut self, confirmed: T) {
        *self = Self::Committed(confirmed);
    }

    pub fn roll_back(&mut self) {
        let previous = self.confirmed().clone();
        *self = Self::RolledBack(previous);
    }

    /// Replaces the value outright, dropping any pending request.
    pub fn reset(&mut self, value: T) {
        *self = Self::Idle(value);
    }
}
