use std::collections::VecDeque;

use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 20;

/// Bounded CPU% and memory% series for one session.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    pub cpu: VecDeque<f32>,
    pub memory: VecDeque<f32>,
    capacity: usize,
}

/// Copy of a session's series, oldest sample first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryFrame {
    pub cpu: Vec<f32>,
    pub memory: Vec<f32>,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: VecDeque::with_capacity(capacity + 1),
            memory: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Push both samples, then trim each series from the front to capacity.
    pub fn append(&mut self, cpu_percent: f32, memory_percent: f32) {
        self.cpu.push_back(cpu_percent);
        self.memory.push_back(memory_percent);
        while self.cpu.len() > self.capacity {
            self.cpu.pop_front();
        }
        while self.memory.len() > self.capacity {
            self.memory.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame(&self) -> HistoryFrame {
        HistoryFrame {
            cpu: self.cpu.iter().copied().collect(),
            memory: self.memory.iter().copied().collect(),
        }
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_append_get() {
        let mut history = RollingHistory::default();
        history.append(5.0, 40.0);
        history.append(10.0, 41.0);
        assert_eq!(history.len(), 2);
        assert_eq!(history.cpu[1], 10.0);
        assert_eq!(history.memory[0], 40.0);
    }

    #[test]
    fn ring_buffer_caps_at_capacity() {
        let mut history = RollingHistory::new(5);
        for i in 0..10 {
            history.append(i as f32, (i * 2) as f32);
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.cpu[0], 5.0);
        assert_eq!(history.cpu[4], 9.0);
        assert_eq!(history.memory[0], 10.0);
    }

    #[test]
    fn default_keeps_last_twenty_in_order() {
        let mut history = RollingHistory::default();
        for i in 0..25 {
            history.append(i as f32, 0.0);
        }
        let frame = history.frame();
        let expected: Vec<f32> = (5..25).map(|i| i as f32).collect();
        assert_eq!(frame.cpu, expected);
        assert_eq!(frame.memory.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn zero_capacity_stays_empty() {
        let mut history = RollingHistory::new(0);
        history.append(1.0, 1.0);
        assert!(history.is_empty());
    }
}
