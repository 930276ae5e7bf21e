use std::sync::atomic::{AtomicU64, Ordering};

/// Counts completed remote writes for the report at the end of an experiment.
#[derive(Debug, Default)]
pub struct OperationCounter(AtomicU64);

impl OperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::OperationCounter;
    use std::sync::Arc;

    #[test]
    fn counts_across_threads() {
        let counter = Arc::new(OperationCounter::new());
        let handles = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        counter.record();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 100);
    }
}
