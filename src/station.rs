/// Running min/max/sum/count for one key.
/// Values are fixed-point, scaled by 10.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Station {
    pub min: i16,
    pub max: i16,
    pub sum: i64,
    pub count: u64,
}

impl Station {
    /// Placeholder for an unclaimed slot; never reported
    pub const EMPTY: Station = Station {
        min: i16::MAX,
        max: i16::MIN,
        sum: 0,
        count: 0,
    };

    pub fn new(measurement: i16) -> Self {
        Self {
            min: measurement,
            max: measurement,
            sum: measurement as i64,
            count: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn record(&mut self, measurement: i16) {
        self.count += 1;
        self.sum += measurement as i64;
        self.min = self.min.min(measurement);
        self.max = self.max.max(measurement);
    }

    pub fn merge(&mut self, other: &Station) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// `sum / count`, scaled by 10 and rounded half away from zero.
    /// Zero for an empty station.
    pub fn mean(&self) -> i64 {
        if self.count == 0 {
            return 0;
        }
        let sum = self.sum as i128;
        let count = self.count as i128;
        let rounded = (2 * sum.abs() + count) / (2 * count);
        (rounded * sum.signum()) as i64
    }
}
