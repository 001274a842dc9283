#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pending<T> {
    pub value: T,
    pub fire_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    delay_ms: u64,
    pending: Option<Pending<T>>,
}

impl<T: Copy> Debouncer<T> {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now_ms: u64) -> u64 {
        let fire_at_ms = now_ms.saturating_add(self.delay_ms);
        self.pending = Some(Pending { value, fire_at_ms });
        fire_at_ms
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|pending| pending.value)
    }

    pub fn pending(&self) -> Option<Pending<T>> {
        self.pending
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.pending.map(|pending| pending.fire_at_ms)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline_ms()
            .map(|deadline| deadline.saturating_sub(now_ms))
    }

    pub fn take_due(&mut self, now_ms: u64) -> Option<T> {
        match self.pending {
            Some(pending) if now_ms >= pending.fire_at_ms => {
                self.pending = None;
                Some(pending.value)
            }
            _ => None,
        }
    }
}
