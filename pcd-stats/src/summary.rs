use std::io::{self, Write};

use pcd_core::pointcloud::{
    header::PointHeader,
    point::{Axis, PointRecord},
};

/// Moduli of the four low-digit fingerprints, finest first.
const FLUFF_MODULI: [i32; 4] = [10, 100, 1000, 10000];

const CLASSIFICATION_NAMES: [&str; 19] = [
    "never classified",
    "unclassified",
    "ground",
    "low vegetation",
    "medium vegetation",
    "high vegetation",
    "building",
    "noise",
    "keypoint",
    "water",
    "rail",
    "road surface",
    "overlap",
    "wire guard",
    "wire conductor",
    "transmission tower",
    "wire connector",
    "bridge deck",
    "high noise",
];

fn fold<T: PartialOrd + Copy>(lo: &mut T, hi: &mut T, value: T) {
    if value < *lo {
        *lo = value;
    } else if value > *hi {
        *hi = value;
    }
}

macro_rules! fold_fields {
    ($min:expr, $max:expr, $point:expr; $($field:ident),+ $(,)?) => {
        $(fold(&mut $min.$field, &mut $max.$field, $point.$field);)+
    };
}

/// Per-axis "trailing digits" detector.
///
/// The low digits of the first point are remembered at four granularities.
/// Every point then counts a match at a granularity only if it also matched
/// at all finer ones.
#[derive(Debug, Clone, Default, PartialEq)]
struct FluffDetector {
    low_digits: [[i32; 4]; 3],
    matches: [[u64; 4]; 3],
}

impl FluffDetector {
    fn seed(&mut self, raw: [i32; 3]) {
        for (axis, value) in raw.into_iter().enumerate() {
            for (level, modulus) in FLUFF_MODULI.into_iter().enumerate() {
                self.low_digits[axis][level] = value % modulus;
            }
        }
    }

    fn add(&mut self, raw: [i32; 3]) {
        for (axis, value) in raw.into_iter().enumerate() {
            for (level, modulus) in FLUFF_MODULI.into_iter().enumerate() {
                if value % modulus != self.low_digits[axis][level] {
                    break;
                }
                self.matches[axis][level] += 1;
            }
        }
    }

    fn merge(&mut self, other: &FluffDetector) {
        for axis in 0..3 {
            for level in 0..4 {
                // disagreeing fingerprints already prove this level is not uniform
                if self.low_digits[axis][level] == other.low_digits[axis][level] {
                    self.matches[axis][level] += other.matches[axis][level];
                }
            }
        }
    }
}

/// Full per-field envelope and tallies of a point stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSummary {
    count: u64,
    points_by_return: [u64; 16],
    number_of_returns: [u64; 16],
    classification: [u64; 32],
    extended_classification: [u64; 256],
    synthetic: u64,
    keypoint: u64,
    withheld: u64,
    overlap: u64,
    min: PointRecord,
    max: PointRecord,
    fluff: FluffDetector,
}

impl Default for PointSummary {
    fn default() -> Self {
        Self {
            count: 0,
            points_by_return: [0; 16],
            number_of_returns: [0; 16],
            classification: [0; 32],
            extended_classification: [0; 256],
            synthetic: 0,
            keypoint: 0,
            withheld: 0,
            overlap: 0,
            min: PointRecord::default(),
            max: PointRecord::default(),
            fluff: FluffDetector::default(),
        }
    }
}

impl PointSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: &PointRecord) {
        self.count += 1;
        match &point.extended {
            Some(ext) => {
                self.points_by_return[usize::from(ext.return_number).min(15)] += 1;
                self.number_of_returns[usize::from(ext.number_of_returns).min(15)] += 1;
                if ext.classification > 31 {
                    self.extended_classification[usize::from(ext.classification)] += 1;
                } else {
                    self.classification[usize::from(ext.classification)] += 1;
                }
                if ext.overlap {
                    self.overlap += 1;
                }
            }
            None => {
                self.points_by_return[usize::from(point.return_number).min(15)] += 1;
                self.number_of_returns[usize::from(point.number_of_returns).min(15)] += 1;
                self.classification[usize::from(point.classification & 31)] += 1;
            }
        }
        if point.synthetic {
            self.synthetic += 1;
        }
        if point.keypoint {
            self.keypoint += 1;
        }
        if point.withheld {
            self.withheld += 1;
        }

        let raw = [point.raw_x, point.raw_y, point.raw_z];
        if self.count == 1 {
            self.min = point.clone();
            self.max = point.clone();
            self.fluff.seed(raw);
        } else {
            self.fold_envelope(point);
        }
        self.fluff.add(raw);
    }

    fn fold_envelope(&mut self, point: &PointRecord) {
        let (min, max) = (&mut self.min, &mut self.max);
        fold_fields!(min, max, point;
            raw_x, raw_y, raw_z, x, y, z,
            intensity, edge_of_flight_line, scan_direction_flag,
            number_of_returns, return_number, classification,
            scan_angle_rank, user_data, point_source_id,
        );
        if let (Some(value), Some(lo), Some(hi)) =
            (point.gps_time, min.gps_time.as_mut(), max.gps_time.as_mut())
        {
            fold(lo, hi, value);
        }
        if let (Some(value), Some(lo), Some(hi)) =
            (point.color, min.color.as_mut(), max.color.as_mut())
        {
            fold_fields!(lo, hi, value; r, g, b);
        }
        if let (Some(value), Some(lo), Some(hi)) = (point.nir, min.nir.as_mut(), max.nir.as_mut())
        {
            fold(lo, hi, value);
        }
        if let (Some(value), Some(lo), Some(hi)) =
            (point.extended, min.extended.as_mut(), max.extended.as_mut())
        {
            fold_fields!(lo, hi, value;
                classification, return_number, number_of_returns, scan_angle, scanner_channel,
            );
        }
        if let (Some(value), Some(lo), Some(hi)) =
            (point.wavepacket, min.wavepacket.as_mut(), max.wavepacket.as_mut())
        {
            fold_fields!(lo, hi, value; index, offset, size, location);
            for i in 0..3 {
                fold(&mut lo.direction[i], &mut hi.direction[i], value.direction[i]);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Smallest value seen for every field, `None` before the first point.
    pub fn min(&self) -> Option<&PointRecord> {
        (self.count > 0).then_some(&self.min)
    }

    pub fn max(&self) -> Option<&PointRecord> {
        (self.count > 0).then_some(&self.max)
    }

    pub fn points_by_return(&self, return_number: usize) -> u64 {
        self.points_by_return.get(return_number).copied().unwrap_or(0)
    }

    pub fn number_of_returns(&self, number_of_returns: usize) -> u64 {
        self.number_of_returns
            .get(number_of_returns)
            .copied()
            .unwrap_or(0)
    }

    /// Points with the given classification code, legacy (0..=31) or
    /// extended (32..=255).
    pub fn classification(&self, code: u8) -> u64 {
        if code > 31 {
            self.extended_classification[usize::from(code)]
        } else {
            self.classification[usize::from(code)]
        }
    }

    pub fn synthetic(&self) -> u64 {
        self.synthetic
    }

    pub fn keypoint(&self) -> u64 {
        self.keypoint
    }

    pub fn withheld(&self) -> u64 {
        self.withheld
    }

    pub fn overlap(&self) -> u64 {
        self.overlap
    }

    fn all_match(&self, axis: Axis, level: usize) -> bool {
        self.count > 0 && self.fluff.matches[axis.index()][level] == self.count
    }

    /// All points share the last decimal digit of the first point on `axis`.
    pub fn has_fluff(&self, axis: Axis) -> bool {
        self.all_match(axis, 0)
    }

    pub fn has_serious_fluff(&self, axis: Axis) -> bool {
        self.all_match(axis, 1)
    }

    pub fn has_very_serious_fluff(&self, axis: Axis) -> bool {
        self.all_match(axis, 2)
    }

    pub fn has_extremely_serious_fluff(&self, axis: Axis) -> bool {
        self.all_match(axis, 3)
    }

    pub fn has_fluff_any(&self) -> bool {
        Axis::ALL.into_iter().any(|axis| self.has_fluff(axis))
    }

    /// The coarsest modulus (10, 100, 1000 or 10000) at which every point
    /// shares the low digits of the first one.
    pub fn fluff_modulus(&self, axis: Axis) -> Option<i32> {
        (0..4)
            .rev()
            .find(|&level| self.all_match(axis, level))
            .map(|level| FLUFF_MODULI[level])
    }

    /// Logs a warning for every axis with coordinate fluff and returns the
    /// affected axes with their modulus.
    pub fn warn_fluff(&self) -> Vec<(Axis, i32)> {
        Axis::ALL
            .into_iter()
            .filter_map(|axis| self.fluff_modulus(axis).map(|modulus| (axis, modulus)))
            .inspect(|(axis, modulus)| {
                log::warn!(
                    "coordinate resolution fluff (x{}) in {:?}, consider rescaling",
                    modulus,
                    axis
                )
            })
            .collect()
    }

    /// Folds a summary over a disjoint part of the same stream into this one.
    pub fn merge(&mut self, other: &PointSummary) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        self.count += other.count;
        add_tallies(&mut self.points_by_return, &other.points_by_return);
        add_tallies(&mut self.number_of_returns, &other.number_of_returns);
        add_tallies(&mut self.classification, &other.classification);
        add_tallies(
            &mut self.extended_classification,
            &other.extended_classification,
        );
        self.synthetic += other.synthetic;
        self.keypoint += other.keypoint;
        self.withheld += other.withheld;
        self.overlap += other.overlap;
        self.fold_envelope(&other.min);
        self.fold_envelope(&other.max);
        self.fluff.merge(&other.fluff);
    }

    /// Writes a human-readable summary. With a header the raw coordinate
    /// bounds are also reported in user units.
    pub fn report<W: Write>(&self, w: &mut W, header: Option<&PointHeader>) -> io::Result<()> {
        if self.count == 0 {
            return writeln!(w, "no points");
        }
        let (min, max) = (&self.min, &self.max);
        writeln!(
            w,
            "reporting minimum and maximum for all {} points",
            self.count
        )?;
        writeln!(w, "  X {:>12} {:>12}", min.raw_x, max.raw_x)?;
        writeln!(w, "  Y {:>12} {:>12}", min.raw_y, max.raw_y)?;
        writeln!(w, "  Z {:>12} {:>12}", min.raw_z, max.raw_z)?;
        if let Some(header) = header {
            for axis in Axis::ALL {
                writeln!(
                    w,
                    "  {} {:>12} {:>12}",
                    ["x", "y", "z"][axis.index()],
                    header.to_coordinate(axis, min.raw(axis)),
                    header.to_coordinate(axis, max.raw(axis)),
                )?;
            }
        }
        writeln!(w, "  intensity {} {}", min.intensity, max.intensity)?;
        writeln!(w, "  return_number {} {}", min.return_number, max.return_number)?;
        writeln!(
            w,
            "  number_of_returns {} {}",
            min.number_of_returns, max.number_of_returns
        )?;
        writeln!(
            w,
            "  edge_of_flight_line {} {}",
            min.edge_of_flight_line, max.edge_of_flight_line
        )?;
        writeln!(
            w,
            "  scan_direction_flag {} {}",
            min.scan_direction_flag, max.scan_direction_flag
        )?;
        writeln!(w, "  classification {} {}", min.classification, max.classification)?;
        writeln!(w, "  scan_angle_rank {} {}", min.scan_angle_rank, max.scan_angle_rank)?;
        writeln!(w, "  user_data {} {}", min.user_data, max.user_data)?;
        writeln!(w, "  point_source_ID {} {}", min.point_source_id, max.point_source_id)?;
        if let (Some(lo), Some(hi)) = (min.gps_time, max.gps_time) {
            writeln!(w, "  gps_time {:.6} {:.6}", lo, hi)?;
        }
        if let (Some(lo), Some(hi)) = (min.color, max.color) {
            writeln!(w, "  Color R {} {}", lo.r, hi.r)?;
            writeln!(w, "        G {} {}", lo.g, hi.g)?;
            writeln!(w, "        B {} {}", lo.b, hi.b)?;
        }
        if let (Some(lo), Some(hi)) = (min.nir, max.nir) {
            writeln!(w, "      NIR {} {}", lo, hi)?;
        }
        if let (Some(lo), Some(hi)) = (min.extended, max.extended) {
            writeln!(
                w,
                "  extended_return_number {} {}",
                lo.return_number, hi.return_number
            )?;
            writeln!(
                w,
                "  extended_number_of_returns {} {}",
                lo.number_of_returns, hi.number_of_returns
            )?;
            writeln!(
                w,
                "  extended_classification {} {}",
                lo.classification, hi.classification
            )?;
            writeln!(w, "  extended_scan_angle {} {}", lo.scan_angle, hi.scan_angle)?;
            writeln!(
                w,
                "  extended_scanner_channel {} {}",
                lo.scanner_channel, hi.scanner_channel
            )?;
        }
        if let (Some(lo), Some(hi)) = (min.wavepacket, max.wavepacket) {
            writeln!(w, "  Wavepacket Index    {} {}", lo.index, hi.index)?;
            writeln!(w, "             Offset   {} {}", lo.offset, hi.offset)?;
            writeln!(w, "             Size     {} {}", lo.size, hi.size)?;
            writeln!(w, "             Location {} {}", lo.location, hi.location)?;
            writeln!(w, "             Xt       {} {}", lo.direction[0], hi.direction[0])?;
            writeln!(w, "             Yt       {} {}", lo.direction[1], hi.direction[1])?;
            writeln!(w, "             Zt       {} {}", lo.direction[2], hi.direction[2])?;
        }

        for axis in Axis::ALL {
            if let Some(modulus) = self.fluff_modulus(axis) {
                writeln!(
                    w,
                    "WARNING: there is coordinate resolution fluff (x{}) in {:?}",
                    modulus, axis
                )?;
            }
        }

        for (return_number, count) in self.points_by_return.iter().enumerate().skip(1) {
            if *count > 0 {
                writeln!(w, "number of returns {}: {}", return_number, count)?;
            }
        }
        if self.points_by_return[0] > 0 {
            writeln!(
                w,
                "WARNING: there are {} points with return number 0",
                self.points_by_return[0]
            )?;
        }
        writeln!(w, "histogram of number of returns per pulse:")?;
        for (n, count) in self.number_of_returns.iter().enumerate() {
            if *count > 0 {
                writeln!(w, "  {}: {}", n, count)?;
            }
        }

        writeln!(w, "histogram of classification of points:")?;
        for (code, count) in self.classification.iter().enumerate() {
            if *count > 0 {
                let name = CLASSIFICATION_NAMES.get(code).unwrap_or(&"reserved");
                writeln!(w, "  {:>12}  {} ({})", count, name, code)?;
            }
        }
        for (code, count) in self.extended_classification.iter().enumerate() {
            if *count > 0 {
                writeln!(w, "  {:>12}  extended classification ({})", count, code)?;
            }
        }
        for (label, count) in [
            ("synthetic", self.synthetic),
            ("keypoint", self.keypoint),
            ("withheld", self.withheld),
            ("overlap", self.overlap),
        ] {
            if count > 0 {
                writeln!(w, "  +-> flagged as {}: {}", label, count)?;
            }
        }
        Ok(())
    }
}

fn add_tallies(mine: &mut [u64], theirs: &[u64]) {
    for (m, t) in mine.iter_mut().zip(theirs) {
        *m += *t;
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::{Color, ExtendedFields, Wavepacket};

    use super::*;

    fn point(raw: [i32; 3]) -> PointRecord {
        PointRecord {
            raw_x: raw[0],
            raw_y: raw[1],
            raw_z: raw[2],
            return_number: 1,
            number_of_returns: 1,
            ..Default::default()
        }
    }

    #[test]
    fn envelope_tracks_each_field_independently() {
        let mut summary = PointSummary::new();
        assert!(summary.min().is_none());
        let mut a = point([10, 20, 30]);
        a.intensity = 500;
        a.user_data = 9;
        let mut b = point([-5, 25, 30]);
        b.intensity = 100;
        b.scan_angle_rank = -20;
        let mut c = point([7, 40, -2]);
        c.intensity = 900;
        c.point_source_id = 3;
        for p in [&a, &b, &c] {
            summary.add(p);
        }
        let (min, max) = (summary.min().unwrap(), summary.max().unwrap());
        assert_eq!((min.raw_x, max.raw_x), (-5, 10));
        assert_eq!((min.raw_y, max.raw_y), (20, 40));
        assert_eq!((min.raw_z, max.raw_z), (-2, 30));
        assert_eq!((min.intensity, max.intensity), (100, 900));
        assert_eq!((min.user_data, max.user_data), (0, 9));
        assert_eq!((min.scan_angle_rank, max.scan_angle_rank), (-20, 0));
        assert_eq!((min.point_source_id, max.point_source_id), (0, 3));
    }

    #[test]
    fn optional_groups_follow_the_first_point() {
        let mut summary = PointSummary::new();
        summary.add(&point([0, 0, 0]));
        let mut timed = point([1, 1, 1]);
        timed.gps_time = Some(5.0);
        timed.color = Some(Color { r: 1, g: 2, b: 3 });
        summary.add(&timed);
        assert_eq!(summary.min().unwrap().gps_time, None);
        assert_eq!(summary.max().unwrap().color, None);

        let mut summary = PointSummary::new();
        let mut first = point([0, 0, 0]);
        first.gps_time = Some(10.0);
        first.wavepacket = Some(Wavepacket {
            index: 1,
            size: 64,
            ..Default::default()
        });
        summary.add(&first);
        let mut second = first.clone();
        second.gps_time = Some(2.5);
        second.wavepacket = Some(Wavepacket {
            index: 4,
            size: 32,
            direction: [0.5, 0.0, -0.5],
            ..Default::default()
        });
        summary.add(&second);
        let mut untimed = point([0, 0, 0]);
        untimed.gps_time = None;
        summary.add(&untimed);
        assert_eq!(summary.min().unwrap().gps_time, Some(2.5));
        assert_eq!(summary.max().unwrap().gps_time, Some(10.0));
        let (lo, hi) = (
            summary.min().unwrap().wavepacket.unwrap(),
            summary.max().unwrap().wavepacket.unwrap(),
        );
        assert_eq!((lo.index, hi.index), (1, 4));
        assert_eq!((lo.size, hi.size), (32, 64));
        assert_eq!((lo.direction[2], hi.direction[0]), (-0.5, 0.5));
    }

    #[test]
    fn classification_tallies_split_on_extended_codes() {
        let mut summary = PointSummary::new();
        let mut ground = point([0, 0, 0]);
        ground.classification = 2;
        ground.synthetic = true;
        summary.add(&ground);

        let mut extended = point([0, 0, 0]);
        extended.extended = Some(ExtendedFields {
            classification: 40,
            return_number: 9,
            number_of_returns: 10,
            overlap: true,
            ..Default::default()
        });
        extended.withheld = true;
        summary.add(&extended);

        let mut extended_low = extended.clone();
        extended_low.extended = Some(ExtendedFields {
            classification: 6,
            return_number: 1,
            number_of_returns: 1,
            ..Default::default()
        });
        extended_low.keypoint = true;
        summary.add(&extended_low);

        assert_eq!(summary.count(), 3);
        assert_eq!(summary.classification(2), 1);
        assert_eq!(summary.classification(40), 1);
        assert_eq!(summary.classification(6), 1);
        assert_eq!(summary.points_by_return(9), 1);
        assert_eq!(summary.points_by_return(1), 2);
        assert_eq!(summary.number_of_returns(10), 1);
        assert_eq!(
            (
                summary.synthetic(),
                summary.keypoint(),
                summary.withheld(),
                summary.overlap()
            ),
            (1, 1, 2, 1)
        );
    }

    #[test]
    fn ties_keep_the_first_writer() {
        let mut summary = PointSummary::new();
        let mut a = point([0, 0, 0]);
        a.x = 0.0;
        summary.add(&a);
        let mut b = point([0, 0, 0]);
        b.x = -0.0;
        summary.add(&b);
        assert!(summary.min().unwrap().x.is_sign_positive());
    }

    #[test]
    fn z_on_thousands_is_very_serious_fluff() {
        let mut summary = PointSummary::new();
        for i in 0..100 {
            summary.add(&point([i * 7 + 3, 1234 + i * 13, 1000 * (i + 1)]));
        }
        assert!(summary.has_fluff(Axis::Z));
        assert!(summary.has_serious_fluff(Axis::Z));
        assert!(summary.has_very_serious_fluff(Axis::Z));
        assert!(!summary.has_extremely_serious_fluff(Axis::Z));
        assert_eq!(summary.fluff_modulus(Axis::Z), Some(1000));
        assert!(!summary.has_fluff(Axis::X));
        assert_eq!(summary.fluff_modulus(Axis::X), None);
        assert_eq!(summary.warn_fluff(), vec![(Axis::Z, 1000)]);
    }

    #[test]
    fn fluff_counters_short_circuit() {
        let mut summary = PointSummary::new();
        summary.add(&point([1234, 0, 0]));
        // same last digit, different tens
        summary.add(&point([1294, 0, 0]));
        // different last digit, same hundreds
        summary.add(&point([1235, 0, 0]));
        let matches = summary.fluff.matches[0];
        assert_eq!(matches, [2, 1, 1, 1]);
        assert!(!summary.has_fluff(Axis::X));
        assert!(summary.has_extremely_serious_fluff(Axis::Y));
    }

    #[test]
    fn merge_matches_a_single_pass() {
        let points: Vec<PointRecord> = (0..20)
            .map(|i| {
                let mut p = point([i * 100, 5 + i * 10, 3000]);
                p.intensity = (i * 37 % 11) as u16;
                p.classification = (i % 4) as u8;
                p
            })
            .collect();
        let mut whole = PointSummary::new();
        let mut left = PointSummary::new();
        let mut right = PointSummary::new();
        for (i, p) in points.iter().enumerate() {
            whole.add(p);
            if i < 7 {
                left.add(p);
            } else {
                right.add(p);
            }
        }
        left.merge(&right);
        assert_eq!(left.count(), whole.count());
        assert_eq!(left.min(), whole.min());
        assert_eq!(left.max(), whole.max());
        for code in 0..4 {
            assert_eq!(left.classification(code), whole.classification(code));
        }
        for axis in Axis::ALL {
            assert_eq!(left.fluff_modulus(axis), whole.fluff_modulus(axis));
        }
        assert_eq!(left.fluff_modulus(Axis::X), Some(100));
        assert_eq!(left.fluff_modulus(Axis::Y), Some(10));
    }

    #[test]
    fn report_lists_envelope_and_warnings() {
        let mut summary = PointSummary::new();
        for i in 0..10 {
            let mut p = point([i * 10, i, 0]);
            p.classification = 2;
            summary.add(&p);
        }
        let header = PointHeader::new([0.01; 3], [0.0; 3]);
        let mut out = Vec::new();
        summary.report(&mut out, Some(&header)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("reporting minimum and maximum for all 10 points"));
        assert!(text.contains("fluff (x10) in X"));
        assert!(text.contains("ground (2)"));
        assert!(text.contains("number of returns 1: 10"));
    }
}
