/// Per-intensity observation counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    pub total_samples: usize,
    pub buckets: Vec<usize>,
}

impl Histogram {
    /// An empty histogram with one bucket per 8-bit intensity level.
    pub fn for_u8() -> Self {
        Histogram {
            total_samples: 0,
            buckets: vec![0; 1 << 8],
        }
    }

    #[inline]
    pub fn add(&mut self, value: usize) {
        self.total_samples += 1;
        self.buckets[value] += 1;
    }

    #[inline]
    pub fn count(&self, value: usize) -> usize {
        self.buckets.get(value).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_count() {
        let mut hist = Histogram::for_u8();
        for &v in &[3usize, 3, 0, 255] {
            hist.add(v);
        }
        assert_eq!(hist.total_samples, 4);
        assert_eq!(hist.count(3), 2);
        assert_eq!(hist.count(255), 1);
        assert_eq!(hist.count(1), 0);
        assert_eq!(hist.count(1000), 0);
    }
}
