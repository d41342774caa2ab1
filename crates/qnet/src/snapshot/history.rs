use super::entity::EntityState;

/// Fixed window of per-frame records, slot chosen by frame number. A slot
/// only answers for the frame that wrote it, so evicted frames read as
/// missing.
#[derive(Debug, Clone)]
pub struct FrameHistory<T> {
    frames: Vec<Option<(i32, T)>>,
    capacity: usize,
}

impl<T> FrameHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, frame: i32) -> usize {
        frame.rem_euclid(self.capacity as i32) as usize
    }

    pub fn push(&mut self, frame: i32, value: T) {
        let index = self.index(frame);
        self.frames[index] = Some((frame, value));
    }

    pub fn get(&self, frame: i32) -> Option<&T> {
        match &self.frames[self.index(frame)] {
            Some((number, value)) if *number == frame => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, frame: i32) -> Option<&mut T> {
        let index = self.index(frame);
        match &mut self.frames[index] {
            Some((number, value)) if *number == frame => Some(value),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.frames {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A run of entity states in an [`EntityRing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntitySpan {
    pub first: u64,
    pub count: usize,
}

/// Circular store of entity states addressed by an ever-growing index.
/// Frames keep spans into it rather than their own copies, and a span is
/// gone once newer states have wrapped over it.
#[derive(Debug, Clone)]
pub struct EntityRing {
    states: Vec<EntityState>,
    next: u64,
}

impl EntityRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            states: vec![EntityState::default(); capacity.max(1)],
            next: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.states.len()
    }

    /// Appends `entities` and returns the span they occupy.
    pub fn push_all<'a>(&mut self, entities: impl IntoIterator<Item = &'a EntityState>) -> EntitySpan {
        let first = self.next;
        for state in entities {
            let slot = (self.next % self.states.len() as u64) as usize;
            self.states[slot] = *state;
            self.next += 1;
        }
        EntitySpan {
            first,
            count: (self.next - first) as usize,
        }
    }

    pub fn is_live(&self, span: EntitySpan) -> bool {
        let oldest = self.next.saturating_sub(self.states.len() as u64);
        span.first >= oldest && span.first + span.count as u64 <= self.next
    }

    /// Copies a span out, or `None` if it has been overwritten.
    pub fn collect(&self, span: EntitySpan) -> Option<Vec<EntityState>> {
        if !self.is_live(span) {
            return None;
        }
        let len = self.states.len() as u64;
        Some(
            (span.first..span.first + span.count as u64)
                .map(|i| self.states[(i % len) as usize])
                .collect(),
        )
    }

    pub fn clear(&mut self) {
        self.next = 0;
    }
}
