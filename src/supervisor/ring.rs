use std::collections::VecDeque;

/// Bounded buffer of recent pool messages, oldest first.
#[derive(Debug, Clone)]
pub struct LogRing {
    capacity: usize,
    entries: VecDeque<String>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_most_recent() {
        let mut ring = LogRing::new(1);
        ring.push("first");
        ring.push("second");
        assert_eq!(ring.entries(), vec!["second".to_string()]);
    }

    #[test]
    fn test_bounded_order() {
        let mut ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(format!("m{}", i));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.entries(), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = LogRing::new(0);
        assert!(ring.is_empty());
        ring.push("only");
        assert_eq!(ring.len(), 1);
    }
}
