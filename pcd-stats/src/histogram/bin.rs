use std::io::{self, Write};

use crate::{
    error::StatsError,
    histogram::format::{format_general, format_value},
    sparse::{grow_to, join_offset, split_offset, GrowthPolicy, Side},
};

/// A non-empty histogram bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    /// `floor(value / step)` of the values in this bin.
    pub index: i32,
    pub count: u32,
    /// Accumulated weighted values, only for averaging histograms.
    pub sum: Option<f64>,
}

impl HistogramBin {
    pub fn average(&self) -> Option<f64> {
        self.sum.map(|sum| sum / self.count as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct WeightedSums {
    positive: Vec<f64>,
    negative: Vec<f64>,
}

impl WeightedSums {
    fn side(&self, side: Side) -> &Vec<f64> {
        match side {
            Side::Plus => &self.positive,
            Side::Minus => &self.negative,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<f64> {
        match side {
            Side::Plus => &mut self.positive,
            Side::Minus => &mut self.negative,
        }
    }
}

/// Streaming histogram with sparse bins over an unbounded domain.
///
/// The bin of the first value becomes the anchor. Bins at or above it live
/// in one growable counter array, bins below it in another, so neither the
/// value range nor its sign has to be known up front.
///
/// An averaging histogram also accumulates a second value per bin and
/// reports `accumulated / count` for each bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    step: f64,
    clamp_min: f64,
    clamp_max: f64,
    total: f64,
    count: u64,
    anchor: Option<i32>,
    positive: Vec<u32>,
    negative: Vec<u32>,
    sums: Option<WeightedSums>,
    chunk: usize,
}

impl Histogram {
    /// Counting histogram with bin width `step`.
    pub fn new(step: f64) -> Result<Self, StatsError> {
        if !(step.is_finite() && step > 0.0) {
            return Err(StatsError::InvalidStep(step));
        }
        Ok(Self {
            step,
            clamp_min: f64::MIN,
            clamp_max: f64::MAX,
            total: 0.0,
            count: 0,
            anchor: None,
            positive: Vec::new(),
            negative: Vec::new(),
            sums: None,
            chunk: GrowthPolicy::default().bins,
        })
    }

    /// Histogram that reports the average of a second value per bin.
    pub fn averaging(step: f64) -> Result<Self, StatsError> {
        let mut histogram = Self::new(step)?;
        histogram.sums = Some(WeightedSums::default());
        Ok(histogram)
    }

    /// Values outside `[min, max]` are counted as `min` or `max`.
    pub fn with_clamp(mut self, min: f64, max: f64) -> Self {
        self.clamp_min = min;
        self.clamp_max = max;
        self
    }

    pub fn with_growth(mut self, policy: GrowthPolicy) -> Self {
        self.chunk = policy.bins;
        self
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_averaging(&self) -> bool {
        self.sums.is_some()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average of all (clamped) values added so far.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }

    /// Adds one value. NaN is ignored. Values whose bin index does not fit
    /// into an `i32` are rejected.
    pub fn add(&mut self, value: f64) -> Result<(), StatsError> {
        self.insert(value, 0.0)
    }

    /// Adds one value together with the value to average in its bin. On a
    /// counting histogram `weighted` is ignored.
    pub fn add_weighted(&mut self, value: f64, weighted: f64) -> Result<(), StatsError> {
        self.insert(value, weighted)
    }

    fn insert(&mut self, value: f64, weighted: f64) -> Result<(), StatsError> {
        if value.is_nan() {
            return Ok(());
        }
        let value = if value > self.clamp_max {
            self.clamp_max
        } else if value < self.clamp_min {
            self.clamp_min
        } else {
            value
        };
        let bin = (value / self.step).floor();
        if !(i32::MIN as f64..=i32::MAX as f64).contains(&bin) {
            return Err(StatsError::BinOutOfRange {
                value,
                step: self.step,
            });
        }
        self.add_to_bin(bin as i32, 1, weighted)?;
        self.total += value;
        self.count += 1;
        Ok(())
    }

    fn add_to_bin(&mut self, bin: i32, hits: u32, weighted: f64) -> Result<(), StatsError> {
        let anchor = *self.anchor.get_or_insert_with(|| {
            log::debug!("histogram with bin size {} anchored at bin {}", self.step, bin);
            bin
        });
        let (side, index) = split_offset(bin as i64 - anchor as i64);
        let counters = match side {
            Side::Plus => &mut self.positive,
            Side::Minus => &mut self.negative,
        };
        grow_to(counters, index, self.chunk, "histogram bins")?;
        if let Some(sums) = self.sums.as_mut() {
            grow_to(sums.side_mut(side), index, self.chunk, "histogram averages")?;
            sums.side_mut(side)[index] += weighted;
        }
        let counters = match side {
            Side::Plus => &mut self.positive,
            Side::Minus => &mut self.negative,
        };
        counters[index] = counters[index].saturating_add(hits);
        Ok(())
    }

    /// Non-empty bins from the most negative to the most positive.
    pub fn bins(&self) -> impl Iterator<Item = HistogramBin> + '_ {
        let anchor = self.anchor.unwrap_or(0) as i64;
        let below = self
            .negative
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &count)| (Side::Minus, i, count));
        let above = self
            .positive
            .iter()
            .enumerate()
            .map(|(i, &count)| (Side::Plus, i, count));
        below
            .chain(above)
            .filter(|&(_, _, count)| count > 0)
            .map(move |(side, i, count)| HistogramBin {
                index: (anchor + join_offset(side, i)) as i32,
                count,
                sum: self
                    .sums
                    .as_ref()
                    .map(|sums| sums.side(side).get(i).copied().unwrap_or(0.0)),
            })
    }

    /// Number of values in bin `index`.
    pub fn bin_count(&self, index: i32) -> u32 {
        let Some(anchor) = self.anchor else {
            return 0;
        };
        let (side, i) = split_offset(index as i64 - anchor as i64);
        let counters = match side {
            Side::Plus => &self.positive,
            Side::Minus => &self.negative,
        };
        counters.get(i).copied().unwrap_or(0)
    }

    /// Number of counter slots currently allocated on both sides.
    pub fn allocated_bins(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// Writes one line per non-empty bin followed by the overall average.
    ///
    /// With a `name` a title line is written first; `name_avg` names the
    /// averaged quantity of an averaging histogram.
    pub fn report<W: Write>(
        &self,
        w: &mut W,
        name: Option<&str>,
        name_avg: Option<&str>,
    ) -> io::Result<()> {
        if let Some(name) = name {
            match (self.is_averaging(), name_avg) {
                (true, Some(name_avg)) => writeln!(
                    w,
                    "{} histogram of {} averages with bin size {:.6}",
                    name, name_avg, self.step
                )?,
                (true, None) => writeln!(
                    w,
                    "{} histogram of averages with bin size {:.6}",
                    name, self.step
                )?,
                (false, _) => writeln!(w, "{} histogram with bin size {:.6}", name, self.step)?,
            }
        }
        for bin in self.bins() {
            let label = if self.step == 1.0 {
                bin.index.to_string()
            } else {
                format!(
                    "[{},{})",
                    format_value(bin.index as f64 * self.step, self.step),
                    format_value((bin.index as f64 + 1.0) * self.step, self.step)
                )
            };
            match bin.average() {
                Some(average) => writeln!(
                    w,
                    "  bin {} has average {} (of {})",
                    label,
                    format_general(average),
                    bin.count
                )?,
                None => writeln!(w, "  bin {} has {}", label, bin.count)?,
            }
        }
        if let Some(average) = self.average() {
            let average = format_value(average, self.step);
            match name {
                Some(name) => writeln!(
                    w,
                    "  average {} {} for {} element(s)",
                    name, average, self.count
                )?,
                None => writeln!(w, "  average {} for {} element(s)", average, self.count)?,
            }
        }
        Ok(())
    }

    /// Empties all bins but keeps their memory for reuse. The next value
    /// establishes a new anchor.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.total = 0.0;
        self.count = 0;
        self.positive.fill(0);
        self.negative.fill(0);
        if let Some(sums) = self.sums.as_mut() {
            sums.positive.fill(0.0);
            sums.negative.fill(0.0);
        }
    }

    /// Adds the bins of a histogram with the same bin size and kind.
    pub fn merge(&mut self, other: &Histogram) -> Result<(), StatsError> {
        if self.step != other.step || self.is_averaging() != other.is_averaging() {
            return Err(StatsError::IncompatibleMerge(format!(
                "histogram with bin size {} (averaging: {}) into bin size {} (averaging: {})",
                other.step,
                other.is_averaging(),
                self.step,
                self.is_averaging()
            )));
        }
        for bin in other.bins() {
            self.add_to_bin(bin.index, bin.count, bin.sum.unwrap_or(0.0))?;
        }
        self.total += other.total;
        self.count += other.count;
        Ok(())
    }
}
