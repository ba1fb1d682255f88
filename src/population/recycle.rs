use std::collections::VecDeque;

use ndarray::ArrayView1;

/// Axis-aligned box; walkers ending inside are recycled.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRegion {
    pub label: String,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl SinkRegion {
    pub fn new(label: impl Into<String>, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            lower,
            upper,
        }
    }

    /// Closed on both ends; dimension mismatch never matches.
    pub fn contains(&self, point: ArrayView1<'_, f64>) -> bool {
        point.len() == self.lower.len()
            && point.len() == self.upper.len()
            && point
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(&x, (&lo, &hi))| x >= lo && x <= hi)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub id: u64,
    pub pcoord: Vec<f64>,
}

/// Source of fresh starting points for recycled walkers.
pub trait InitialStatePool {
    fn take(&mut self) -> Option<InitialState>;

    /// Give back a state that was taken but not used.
    fn release(&mut self, state: InitialState);

    fn available(&self) -> usize;
}

/// FIFO pool backed by a deque.
#[derive(Debug, Clone, Default)]
pub struct VecPool {
    states: VecDeque<InitialState>,
}

impl VecPool {
    pub fn new(states: impl IntoIterator<Item = InitialState>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }
}

impl InitialStatePool for VecPool {
    fn take(&mut self) -> Option<InitialState> {
        self.states.pop_front()
    }

    fn release(&mut self, state: InitialState) {
        self.states.push_front(state);
    }

    fn available(&self) -> usize {
        self.states.len()
    }
}

/// Per-sink totals for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RecycleRecord {
    pub label: String,
    pub count: usize,
    pub weight: f64,
}
