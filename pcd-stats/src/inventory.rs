use pcd_core::pointcloud::{
    header::PointHeader,
    point::{Axis, PointRecord},
};

use crate::error::StatsError;

/// Running point totals and integer-domain bounding box.
///
/// Index 0 of the per-return table is unused; indices 1..=15 hold return
/// numbers 1..=15, merging the legacy and the extended numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtentTracker {
    point_count: u64,
    points_by_return: [u64; 16],
    min: [i32; 3],
    max: [i32; 3],
    active: bool,
}

impl ExtentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the totals and bounds from a header whose counts are already
    /// trusted.
    pub fn init(&mut self, header: Option<&PointHeader>) -> Result<(), StatsError> {
        let header = header.ok_or(StatsError::MissingHeader)?;
        self.point_count = header.point_count();
        self.points_by_return[0] = 0;
        for return_number in 1..16 {
            self.points_by_return[return_number] = header.points_by_return(return_number);
        }
        let bounds = &header.bounding_volume;
        for axis in Axis::ALL {
            let i = axis.index();
            self.min[i] = header.to_raw(axis, bounds.min[i]);
            self.max[i] = header.to_raw(axis, bounds.max[i]);
        }
        self.active = true;
        log::debug!(
            "extent seeded from header with {} points",
            self.point_count
        );
        Ok(())
    }

    pub fn add(&mut self, point: &PointRecord) {
        self.point_count += 1;
        let return_number = usize::from(point.effective_return_number()).min(15);
        self.points_by_return[return_number] += 1;

        let raw = [point.raw_x, point.raw_y, point.raw_z];
        if !self.active {
            self.min = raw;
            self.max = raw;
            self.active = true;
            return;
        }
        for (i, value) in raw.into_iter().enumerate() {
            if value < self.min[i] {
                self.min[i] = value;
            } else if value > self.max[i] {
                self.max[i] = value;
            }
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    /// Points counted for `return_number` (1..=15); zero outside that range.
    pub fn points_by_return(&self, return_number: usize) -> u64 {
        match return_number {
            1..=15 => self.points_by_return[return_number],
            _ => 0,
        }
    }

    pub fn min(&self, axis: Axis) -> i32 {
        self.min[axis.index()]
    }

    pub fn max(&self, axis: Axis) -> i32 {
        self.max[axis.index()]
    }

    /// Writes the running totals and bounds back into `header`.
    ///
    /// Totals above `u32::MAX` zero the legacy 32-bit fields when the header
    /// version supports extended counts and fail otherwise. On failure the
    /// fields written before the overflowing one keep their new values.
    pub fn merge_into_header(&self, header: &mut PointHeader) -> Result<(), StatsError> {
        header.number_of_point_records =
            legacy_count(header, "number of point records", self.point_count)?;
        for i in 0..5 {
            header.number_of_points_by_return[i] = legacy_count(
                header,
                "number of points by return",
                self.points_by_return[i + 1],
            )?;
        }
        for axis in Axis::ALL {
            let i = axis.index();
            header.bounding_volume.min[i] = header.to_coordinate(axis, self.min[i]);
            header.bounding_volume.max[i] = header.to_coordinate(axis, self.max[i]);
        }
        header.extended_number_of_point_records = self.point_count;
        header
            .extended_number_of_points_by_return
            .copy_from_slice(&self.points_by_return[1..]);
        Ok(())
    }

    /// Folds another tracker over a disjoint part of the same stream into
    /// this one.
    pub fn merge(&mut self, other: &ExtentTracker) {
        if !other.active {
            return;
        }
        if !self.active {
            *self = other.clone();
            return;
        }
        self.point_count += other.point_count;
        for (mine, theirs) in self.points_by_return.iter_mut().zip(other.points_by_return) {
            *mine += theirs;
        }
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }
}

fn legacy_count(header: &PointHeader, field: &'static str, count: u64) -> Result<u32, StatsError> {
    match u32::try_from(count) {
        Ok(count) => Ok(count),
        Err(_) if header.supports_extended_counts() => Ok(0),
        Err(_) => Err(StatsError::CountOverflow {
            field,
            count,
            version_minor: header.version_minor,
        }),
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::ExtendedFields;

    use super::*;

    fn point(raw: [i32; 3], return_number: u8) -> PointRecord {
        PointRecord {
            raw_x: raw[0],
            raw_y: raw[1],
            raw_z: raw[2],
            return_number,
            ..Default::default()
        }
    }

    #[test]
    fn first_point_seeds_bounds() {
        let mut extent = ExtentTracker::new();
        assert!(!extent.active());
        extent.add(&point([5, -3, 7], 1));
        assert!(extent.active());
        for axis in Axis::ALL {
            assert_eq!(extent.min(axis), extent.max(axis));
        }
        assert_eq!(extent.min(Axis::Y), -3);
    }

    #[test]
    fn bounds_and_counts_follow_the_stream() {
        let mut extent = ExtentTracker::new();
        let raws = [[0, 0, 0], [10, -4, 2], [-7, 3, 2], [4, 9, -1]];
        for (i, raw) in raws.iter().enumerate() {
            extent.add(&point(*raw, (i % 2 + 1) as u8));
        }
        assert_eq!(extent.point_count(), 4);
        assert_eq!(extent.points_by_return(1), 2);
        assert_eq!(extent.points_by_return(2), 2);
        assert_eq!((extent.min(Axis::X), extent.max(Axis::X)), (-7, 10));
        assert_eq!((extent.min(Axis::Y), extent.max(Axis::Y)), (-4, 9));
        assert_eq!((extent.min(Axis::Z), extent.max(Axis::Z)), (-1, 2));
        for axis in Axis::ALL {
            assert!(extent.min(axis) <= extent.max(axis));
        }
    }

    #[test]
    fn extended_return_numbers_use_upper_slots() {
        let mut extent = ExtentTracker::new();
        let mut p = point([0, 0, 0], 7);
        p.extended = Some(ExtendedFields {
            return_number: 12,
            number_of_returns: 12,
            ..Default::default()
        });
        extent.add(&p);
        assert_eq!(extent.points_by_return(12), 1);
        assert_eq!(extent.points_by_return(7), 0);
    }

    #[test]
    fn init_requires_a_header() {
        let mut extent = ExtentTracker::new();
        assert!(matches!(extent.init(None), Err(StatsError::MissingHeader)));
        assert!(!extent.active());

        let mut header = PointHeader::new([0.01; 3], [0.0; 3]);
        header.number_of_point_records = 3;
        header.number_of_points_by_return = [2, 1, 0, 0, 0];
        header.bounding_volume.min = [-1.0, 0.0, 0.5];
        header.bounding_volume.max = [1.0, 2.0, 0.5];
        extent.init(Some(&header)).unwrap();
        assert!(extent.active());
        assert_eq!(extent.point_count(), 3);
        assert_eq!(extent.points_by_return(1), 2);
        assert_eq!(extent.min(Axis::X), -100);
        assert_eq!(extent.max(Axis::Y), 200);
        assert_eq!(extent.min(Axis::Z), 50);
    }

    #[test]
    fn header_merge_back_writes_totals_and_bounds() {
        let mut extent = ExtentTracker::new();
        extent.add(&point([100, 200, 300], 1));
        extent.add(&point([-100, 400, 0], 2));

        let mut header = PointHeader::new([0.01; 3], [1000.0, 0.0, 0.0]);
        extent.merge_into_header(&mut header).unwrap();
        assert_eq!(header.number_of_point_records, 2);
        assert_eq!(header.number_of_points_by_return, [1, 1, 0, 0, 0]);
        assert_eq!(header.extended_number_of_point_records, 2);
        assert_eq!(header.extended_number_of_points_by_return[1], 1);
        assert!((header.bounding_volume.min[0] - 999.0).abs() < 1e-9);
        assert!((header.bounding_volume.max[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn oversized_totals_need_extended_header() {
        let mut extent = ExtentTracker::new();
        extent.add(&point([0, 0, 0], 1));
        extent.point_count = u32::MAX as u64 + 1;

        let mut legacy = PointHeader::new([1.0; 3], [0.0; 3]);
        let err = extent.merge_into_header(&mut legacy).unwrap_err();
        assert!(matches!(err, StatsError::CountOverflow { .. }));

        let mut modern = PointHeader::new([1.0; 3], [0.0; 3]);
        modern.version_minor = 4;
        extent.merge_into_header(&mut modern).unwrap();
        assert_eq!(modern.number_of_point_records, 0);
        assert_eq!(modern.extended_number_of_point_records, u32::MAX as u64 + 1);
        assert_eq!(modern.number_of_points_by_return[0], 1);
    }

    #[test]
    fn merge_matches_a_single_pass() {
        let raws = [[3, 1, 4], [1, 5, 9], [-2, 6, 5], [3, -5, 8], [9, 7, -9]];
        let mut whole = ExtentTracker::new();
        let mut left = ExtentTracker::new();
        let mut right = ExtentTracker::new();
        for (i, raw) in raws.iter().enumerate() {
            let p = point(*raw, 1 + (i % 3) as u8);
            whole.add(&p);
            if i < 2 {
                left.add(&p);
            } else {
                right.add(&p);
            }
        }
        let mut empty = ExtentTracker::new();
        empty.merge(&left);
        empty.merge(&right);
        assert_eq!(empty, whole);
    }
}
