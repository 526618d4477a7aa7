use std::{
    collections::BTreeMap,
    fmt::Write as _,
    io::{self, Write},
};

use pcd_core::pointcloud::point::PointRecord;

use crate::{
    error::StatsError,
    histogram::{bin::Histogram, config::HistogramConfig},
    sparse::GrowthPolicy,
};

/// Point fields that can be histogrammed on their own. The variant order is
/// the report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HistogramChannel {
    X,
    Y,
    Z,
    RawX,
    RawY,
    RawZ,
    Intensity,
    Classification,
    ScanAngle,
    ExtendedScanAngle,
    ReturnNumber,
    NumberOfReturns,
    UserData,
    PointSourceId,
    GpsTime,
    ScannerChannel,
    Red,
    Green,
    Blue,
    Nir,
    Attribute(u8),
    WavepacketIndex,
    WavepacketOffset,
    WavepacketSize,
    WavepacketLocation,
}

impl HistogramChannel {
    pub const ATTRIBUTES: u8 = 5;

    /// Resolves a channel name. Most names match exactly; the longer
    /// snake_case ones also match when contained in `name`.
    pub fn from_name(name: &str) -> Option<Self> {
        use HistogramChannel::*;
        let exact = match name {
            "x" => Some(X),
            "y" => Some(Y),
            "z" => Some(Z),
            "X" => Some(RawX),
            "Y" => Some(RawY),
            "Z" => Some(RawZ),
            "intensity" => Some(Intensity),
            "classification" => Some(Classification),
            _ => None,
        };
        if exact.is_some() {
            return exact;
        }
        // "extended_scan_angle" contains "scan_angle", so it has to come first
        const CONTAINED: [(&str, HistogramChannel); 6] = [
            ("extended_scan_angle", ExtendedScanAngle),
            ("scan_angle", ScanAngle),
            ("return_number", ReturnNumber),
            ("number_of_returns", NumberOfReturns),
            ("user_data", UserData),
            ("point_source", PointSourceId),
        ];
        if let Some((_, channel)) = CONTAINED.iter().find(|(key, _)| name.contains(key)) {
            return Some(*channel);
        }
        if name.contains("gps_time") {
            return Some(GpsTime);
        }
        if name.contains("scanner_channel") {
            return Some(ScannerChannel);
        }
        match name {
            "R" => return Some(Red),
            "G" => return Some(Green),
            "B" => return Some(Blue),
            "I" => return Some(Nir),
            _ => {}
        }
        let attribute = name.strip_prefix("attribute").unwrap_or(name);
        if let Ok(index) = attribute.parse::<u8>() {
            if index < Self::ATTRIBUTES && attribute.len() == 1 {
                return Some(Attribute(index));
            }
        }
        [
            ("wavepacket_index", WavepacketIndex),
            ("wavepacket_offset", WavepacketOffset),
            ("wavepacket_size", WavepacketSize),
            ("wavepacket_location", WavepacketLocation),
        ]
        .into_iter()
        .find(|(key, _)| name.contains(key))
        .map(|(_, channel)| channel)
    }

    /// Canonical name accepted by [`from_name`](Self::from_name).
    pub fn name(&self) -> String {
        use HistogramChannel::*;
        let name = match self {
            X => "x",
            Y => "y",
            Z => "z",
            RawX => "X",
            RawY => "Y",
            RawZ => "Z",
            Intensity => "intensity",
            Classification => "classification",
            ScanAngle => "scan_angle",
            ExtendedScanAngle => "extended_scan_angle",
            ReturnNumber => "return_number",
            NumberOfReturns => "number_of_returns",
            UserData => "user_data",
            PointSourceId => "point_source",
            GpsTime => "gps_time",
            ScannerChannel => "scanner_channel",
            Red => "R",
            Green => "G",
            Blue => "B",
            Nir => "I",
            Attribute(index) => return index.to_string(),
            WavepacketIndex => "wavepacket_index",
            WavepacketOffset => "wavepacket_offset",
            WavepacketSize => "wavepacket_size",
            WavepacketLocation => "wavepacket_location",
        };
        name.to_string()
    }

    /// Title used in reports.
    pub fn label(&self) -> String {
        use HistogramChannel::*;
        let label = match self {
            X => "x coordinate",
            Y => "y coordinate",
            Z => "z coordinate",
            RawX => "raw integer X coordinate",
            RawY => "raw integer Y coordinate",
            RawZ => "raw integer Z coordinate",
            Intensity => "intensity",
            Classification => "classification",
            ScanAngle => "scan angle",
            ExtendedScanAngle => "extended scan angle",
            ReturnNumber => "return_number",
            NumberOfReturns => "number_of_returns",
            UserData => "user data",
            PointSourceId => "point source id",
            GpsTime => "gps_time",
            ScannerChannel => "scanner channel",
            Red => "color R channel",
            Green => "color G channel",
            Blue => "color B channel",
            Nir => "color I channel",
            Attribute(index) => return format!("attribute {}", index),
            WavepacketIndex => "wavepacket_index",
            WavepacketOffset => "wavepacket_offset",
            WavepacketSize => "wavepacket_size",
            WavepacketLocation => "wavepacket_location",
        };
        label.to_string()
    }

    pub fn value(&self, point: &PointRecord) -> f64 {
        use HistogramChannel::*;
        let wavepacket = point.wavepacket.unwrap_or_default();
        match self {
            X => point.x,
            Y => point.y,
            Z => point.z,
            RawX => point.raw_x as f64,
            RawY => point.raw_y as f64,
            RawZ => point.raw_z as f64,
            Intensity => point.intensity as f64,
            Classification => point.effective_classification() as f64,
            ScanAngle => point.scan_angle() as f64,
            ExtendedScanAngle => point.extended_scan_angle() as f64,
            ReturnNumber => point.effective_return_number() as f64,
            NumberOfReturns => point.effective_number_of_returns() as f64,
            UserData => point.user_data as f64,
            PointSourceId => point.point_source_id as f64,
            GpsTime => point.gps_time_or_zero(),
            ScannerChannel => point.scanner_channel() as f64,
            Red => point.rgbi()[0] as f64,
            Green => point.rgbi()[1] as f64,
            Blue => point.rgbi()[2] as f64,
            Nir => point.rgbi()[3] as f64,
            Attribute(index) => point.attribute(*index as usize),
            WavepacketIndex => wavepacket.index as f64,
            WavepacketOffset => wavepacket.offset as f64,
            WavepacketSize => wavepacket.size as f64,
            WavepacketLocation => wavepacket.location as f64,
        }
    }
}

/// Cross-tabulations: bins keyed by one field, reporting the average of
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AverageChannel {
    ClassificationIntensity,
    ClassificationScanAngle,
    ScanAngleZ,
    ScanAngleNumberOfReturns,
    ScanAngleIntensity,
    ReturnMapIntensity,
}

impl AverageChannel {
    pub fn from_names(name: &str, average_of: &str) -> Result<Self, StatsError> {
        use AverageChannel::*;
        let channel = match name {
            "classification" => match average_of {
                "intensity" => Some(ClassificationIntensity),
                _ if average_of.contains("scan_angle") => Some(ClassificationScanAngle),
                _ => None,
            },
            "scan_angle" => match average_of {
                "z" => Some(ScanAngleZ),
                "number_of_returns" => Some(ScanAngleNumberOfReturns),
                "intensity" => Some(ScanAngleIntensity),
                _ => None,
            },
            "return_map" => match average_of {
                "intensity" => Some(ReturnMapIntensity),
                _ => None,
            },
            _ => return Err(StatsError::UnknownChannel(name.to_string())),
        };
        channel.ok_or_else(|| StatsError::UnsupportedAverage {
            channel: name.to_string(),
            average_of: average_of.to_string(),
        })
    }

    /// Bin size forced regardless of the requested one.
    pub fn fixed_step(&self) -> Option<f64> {
        match self {
            AverageChannel::ReturnMapIntensity => Some(1.0),
            _ => None,
        }
    }

    /// Names accepted by [`from_names`](Self::from_names).
    pub fn names(&self) -> (&'static str, &'static str) {
        use AverageChannel::*;
        match self {
            ClassificationIntensity => ("classification", "intensity"),
            ClassificationScanAngle => ("classification", "scan_angle"),
            ScanAngleZ => ("scan_angle", "z"),
            ScanAngleNumberOfReturns => ("scan_angle", "number_of_returns"),
            ScanAngleIntensity => ("scan_angle", "intensity"),
            ReturnMapIntensity => ("return_map", "intensity"),
        }
    }

    /// Report titles of the keyed and the averaged quantity.
    pub fn labels(&self) -> (&'static str, &'static str) {
        use AverageChannel::*;
        match self {
            ClassificationIntensity => ("classification", "intensity"),
            ClassificationScanAngle => ("classification", "scan_angle"),
            ScanAngleZ => ("scan angle", "z coordinate"),
            ScanAngleNumberOfReturns => ("scan_angle", "number_of_returns"),
            ScanAngleIntensity => ("scan angle", "intensity"),
            ReturnMapIntensity => ("return map", "intensity"),
        }
    }

    /// Bin key and averaged value of a point.
    pub fn key_and_value(&self, point: &PointRecord) -> (f64, f64) {
        use AverageChannel::*;
        let classification = point.effective_classification() as f64;
        let scan_angle = point.scan_angle() as f64;
        let intensity = point.intensity as f64;
        match self {
            ClassificationIntensity => (classification, intensity),
            ClassificationScanAngle => (classification, scan_angle),
            ScanAngleZ => (scan_angle, point.raw_z as f64),
            ScanAngleNumberOfReturns => (
                scan_angle,
                point.effective_number_of_returns() as f64,
            ),
            ScanAngleIntensity => (scan_angle, intensity),
            ReturnMapIntensity => (
                return_map_slot(point.number_of_returns, point.return_number) as f64,
                intensity,
            ),
        }
    }
}

/// Numbers every (return, number of returns) pair of up to five returns
/// consecutively; single returns are slot 0 and anything else is 15.
fn return_map_slot(number_of_returns: u8, return_number: u8) -> i32 {
    let r = i32::from(return_number);
    match number_of_returns {
        1 => 0,
        2 => r,
        3 => r + 2,
        4 => r + 5,
        5 => r + 9,
        _ => 15,
    }
}

/// The set of enabled per-field histograms and cross-tabulations.
#[derive(Debug, Clone, Default)]
pub struct HistogramCatalog {
    counters: BTreeMap<HistogramChannel, Histogram>,
    averages: BTreeMap<AverageChannel, Histogram>,
    growth: GrowthPolicy,
}

impl HistogramCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    pub fn from_config(config: &HistogramConfig) -> Result<Self, StatsError> {
        let mut catalog = Self::new();
        for spec in &config.histograms {
            catalog.histo(&spec.channel, spec.step)?;
        }
        for spec in &config.averages {
            catalog.histo_avg(&spec.channel, spec.step, &spec.average_of)?;
        }
        Ok(catalog)
    }

    /// Enables a histogram of the named field. Enabling a channel again
    /// replaces its histogram.
    pub fn histo(&mut self, name: &str, step: f64) -> Result<HistogramChannel, StatsError> {
        let channel = HistogramChannel::from_name(name)
            .ok_or_else(|| StatsError::UnknownChannel(name.to_string()))?;
        self.enable(channel, step)?;
        Ok(channel)
    }

    /// Enables a histogram of `name` reporting averages of `average_of`.
    pub fn histo_avg(
        &mut self,
        name: &str,
        step: f64,
        average_of: &str,
    ) -> Result<AverageChannel, StatsError> {
        let channel = AverageChannel::from_names(name, average_of)?;
        self.enable_average(channel, step)?;
        Ok(channel)
    }

    pub fn enable(&mut self, channel: HistogramChannel, step: f64) -> Result<(), StatsError> {
        let histogram = Histogram::new(step)?.with_growth(self.growth);
        log::debug!("enabled {} histogram with bin size {}", channel.name(), step);
        self.counters.insert(channel, histogram);
        Ok(())
    }

    pub fn enable_average(&mut self, channel: AverageChannel, step: f64) -> Result<(), StatsError> {
        let step = channel.fixed_step().unwrap_or(step);
        let histogram = Histogram::averaging(step)?.with_growth(self.growth);
        let (name, average_of) = channel.names();
        log::debug!(
            "enabled {} histogram of {} averages with bin size {}",
            name,
            average_of,
            step
        );
        self.averages.insert(channel, histogram);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.counters.is_empty() || !self.averages.is_empty()
    }

    pub fn histogram(&self, channel: HistogramChannel) -> Option<&Histogram> {
        self.counters.get(&channel)
    }

    pub fn average(&self, channel: AverageChannel) -> Option<&Histogram> {
        self.averages.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = HistogramChannel> + '_ {
        self.counters.keys().copied()
    }

    pub fn average_channels(&self) -> impl Iterator<Item = AverageChannel> + '_ {
        self.averages.keys().copied()
    }

    /// Feeds one point to every enabled histogram.
    pub fn add(&mut self, point: &PointRecord) -> Result<(), StatsError> {
        for (channel, histogram) in self.counters.iter_mut() {
            histogram.add(channel.value(point))?;
        }
        for (channel, histogram) in self.averages.iter_mut() {
            let (key, value) = channel.key_and_value(point);
            histogram.add_weighted(key, value)?;
        }
        Ok(())
    }

    pub fn report<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (channel, histogram) in &self.counters {
            histogram.report(w, Some(&channel.label()), None)?;
        }
        for (channel, histogram) in &self.averages {
            let (name, name_avg) = channel.labels();
            histogram.report(w, Some(name), Some(name_avg))?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.counters.values_mut().for_each(Histogram::reset);
        self.averages.values_mut().for_each(Histogram::reset);
    }

    /// Renders the enabled histograms as `--histo`/`--histo-avg` arguments.
    pub fn unparse(&self) -> String {
        let mut out = String::new();
        for (channel, histogram) in &self.counters {
            let _ = write!(out, "--histo {} {:.6} ", channel.name(), histogram.step());
        }
        for (channel, histogram) in &self.averages {
            let (name, average_of) = channel.names();
            let _ = write!(
                out,
                "--histo-avg {} {:.6} {} ",
                name,
                histogram.step(),
                average_of
            );
        }
        out
    }

    /// Folds the histograms of another catalog into this one. Channels only
    /// the other catalog tracks are copied over.
    pub fn merge(&mut self, other: &HistogramCatalog) -> Result<(), StatsError> {
        for (channel, histogram) in &other.counters {
            match self.counters.get_mut(channel) {
                Some(mine) => mine.merge(histogram)?,
                None => {
                    self.counters.insert(*channel, histogram.clone());
                }
            }
        }
        for (channel, histogram) in &other.averages {
            match self.averages.get_mut(channel) {
                Some(mine) => mine.merge(histogram)?,
                None => {
                    self.averages.insert(*channel, histogram.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::{Color, ExtendedFields};

    use super::*;

    fn report_string(catalog: &HistogramCatalog) -> String {
        let mut out = Vec::new();
        catalog.report(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn channel_names_round_trip() {
        let all = [
            "x", "y", "z", "X", "Y", "Z", "intensity", "classification", "scan_angle",
            "extended_scan_angle", "return_number", "number_of_returns", "user_data",
            "point_source", "gps_time", "scanner_channel", "R", "G", "B", "I", "0", "1", "2",
            "3", "4", "wavepacket_index", "wavepacket_offset", "wavepacket_size",
            "wavepacket_location",
        ];
        for name in all {
            let channel = HistogramChannel::from_name(name).unwrap();
            assert_eq!(channel.name(), name);
        }
        assert_eq!(
            HistogramChannel::from_name("attribute3"),
            Some(HistogramChannel::Attribute(3))
        );
        assert_eq!(HistogramChannel::from_name("5"), None);
        assert_eq!(HistogramChannel::from_name("color"), None);
    }

    #[test]
    fn substring_matching_prefers_the_longer_name() {
        assert_eq!(
            HistogramChannel::from_name("extended_scan_angle"),
            Some(HistogramChannel::ExtendedScanAngle)
        );
        assert_eq!(
            HistogramChannel::from_name("my_scan_angle"),
            Some(HistogramChannel::ScanAngle)
        );
        assert_eq!(
            HistogramChannel::from_name("point_source_id"),
            Some(HistogramChannel::PointSourceId)
        );
    }

    #[test]
    fn unknown_names_leave_the_catalog_untouched() {
        let mut catalog = HistogramCatalog::new();
        assert!(matches!(
            catalog.histo("colour", 1.0),
            Err(StatsError::UnknownChannel(_))
        ));
        assert!(matches!(
            catalog.histo_avg("scan_angle", 1.0, "gps_time"),
            Err(StatsError::UnsupportedAverage { .. })
        ));
        assert!(matches!(
            catalog.histo_avg("foo", 1.0, "intensity"),
            Err(StatsError::UnknownChannel(_))
        ));
        assert!(matches!(
            catalog.histo("z", 0.0),
            Err(StatsError::InvalidStep(_))
        ));
        assert!(!catalog.is_active());
    }

    #[test]
    fn catalog_forwards_point_fields() {
        let mut catalog = HistogramCatalog::new();
        catalog.histo("intensity", 10.0).unwrap();
        catalog.histo("R", 1.0).unwrap();
        catalog.histo("classification", 1.0).unwrap();
        catalog
            .histo_avg("classification", 1.0, "intensity")
            .unwrap();
        assert!(catalog.is_active());

        let points = [(2, 100), (2, 120), (6, 15)];
        for (classification, intensity) in points {
            catalog
                .add(&PointRecord {
                    classification,
                    intensity,
                    color: Some(Color { r: 7, g: 0, b: 0 }),
                    ..Default::default()
                })
                .unwrap();
        }

        let intensity = catalog.histogram(HistogramChannel::Intensity).unwrap();
        let bins: Vec<(i32, u32)> = intensity.bins().map(|b| (b.index, b.count)).collect();
        assert_eq!(bins, vec![(1, 1), (10, 1), (12, 1)]);
        let red = catalog.histogram(HistogramChannel::Red).unwrap();
        assert_eq!(red.bin_count(7), 3);

        let text = report_string(&catalog);
        assert!(text.contains("intensity histogram with bin size 10.000000\n"));
        assert!(text.contains("color R channel histogram with bin size 1.000000\n"));
        assert!(text.contains(
            "classification histogram of intensity averages with bin size 1.000000\n"
        ));
        assert!(text.contains("  bin 2 has average 110 (of 2)\n"));
        assert!(text.contains("  bin 6 has average 15 (of 1)\n"));
        let intensity_at = text.find("intensity histogram with").unwrap();
        let classification_at = text.find("classification histogram with").unwrap();
        assert!(intensity_at < classification_at);
    }

    #[test]
    fn return_map_uses_unit_bins() {
        assert_eq!(return_map_slot(1, 1), 0);
        assert_eq!(return_map_slot(2, 2), 2);
        assert_eq!(return_map_slot(3, 1), 3);
        assert_eq!(return_map_slot(4, 4), 9);
        assert_eq!(return_map_slot(5, 5), 14);
        assert_eq!(return_map_slot(7, 2), 15);
        assert_eq!(return_map_slot(5, 250), 259);
        assert_eq!(return_map_slot(4, 255), 260);

        let mut catalog = HistogramCatalog::new();
        catalog.histo_avg("return_map", 25.0, "intensity").unwrap();
        catalog
            .add(&PointRecord {
                number_of_returns: 5,
                return_number: 250,
                intensity: 40,
                ..Default::default()
            })
            .unwrap();
        let histogram = catalog.average(AverageChannel::ReturnMapIntensity).unwrap();
        assert_eq!(histogram.step(), 1.0);
        assert_eq!(histogram.bin_count(259), 1);
    }

    #[test]
    fn extended_points_use_extended_fields() {
        let mut catalog = HistogramCatalog::new();
        catalog.histo("classification", 1.0).unwrap();
        catalog.histo("scan_angle", 1.0).unwrap();
        catalog.histo("scanner_channel", 1.0).unwrap();
        catalog
            .add(&PointRecord {
                classification: 1,
                scan_angle_rank: 5,
                extended: Some(ExtendedFields {
                    classification: 40,
                    scan_angle: 1000,
                    scanner_channel: 2,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        let classification = catalog.histogram(HistogramChannel::Classification).unwrap();
        assert_eq!(classification.bin_count(40), 1);
        let scan_angle = catalog.histogram(HistogramChannel::ScanAngle).unwrap();
        assert_eq!(scan_angle.bin_count(6), 1);
        let channel = catalog.histogram(HistogramChannel::ScannerChannel).unwrap();
        assert_eq!(channel.bin_count(2), 1);
    }

    #[test]
    fn growth_policy_reaches_every_histogram() {
        let policy = GrowthPolicy {
            bins: 8,
            ..Default::default()
        };
        let mut catalog = HistogramCatalog::new().with_growth(policy);
        catalog.histo("intensity", 1.0).unwrap();
        catalog.histo_avg("classification", 1.0, "intensity").unwrap();
        catalog
            .add(&PointRecord {
                intensity: 20,
                classification: 2,
                ..Default::default()
            })
            .unwrap();
        let intensity = catalog.histogram(HistogramChannel::Intensity).unwrap();
        assert_eq!(intensity.allocated_bins(), 8);
        let average = catalog
            .average(AverageChannel::ClassificationIntensity)
            .unwrap();
        assert_eq!(average.allocated_bins(), 8);
        assert_eq!(average.bins().next().and_then(|b| b.average()), Some(20.0));
    }

    #[test]
    fn unparse_lists_enabled_channels_in_report_order() {
        let mut catalog = HistogramCatalog::new();
        catalog.histo_avg("scan_angle", 2.0, "z").unwrap();
        catalog.histo("point_source", 1.0).unwrap();
        catalog.histo("x", 0.5).unwrap();
        assert_eq!(
            catalog.unparse(),
            "--histo x 0.500000 --histo point_source 1.000000 --histo-avg scan_angle 2.000000 z "
        );
    }

    #[test]
    fn reset_and_merge_keep_channels() {
        let mut left = HistogramCatalog::new();
        left.histo("user_data", 1.0).unwrap();
        let mut right = left.clone();
        right.histo("gps_time", 1.0).unwrap();

        for user_data in [1, 2, 2] {
            left.add(&PointRecord { user_data, ..Default::default() }).unwrap();
        }
        right
            .add(&PointRecord {
                user_data: 2,
                gps_time: Some(3.5),
                ..Default::default()
            })
            .unwrap();

        left.merge(&right).unwrap();
        let user_data = left.histogram(HistogramChannel::UserData).unwrap();
        assert_eq!(user_data.bin_count(2), 3);
        assert_eq!(user_data.count(), 4);
        assert_eq!(
            left.histogram(HistogramChannel::GpsTime).unwrap().bin_count(3),
            1
        );

        left.reset();
        assert_eq!(left.channels().count(), 2);
        assert_eq!(
            report_string(&left),
            "user data histogram with bin size 1.000000\n\
             gps_time histogram with bin size 1.000000\n"
        );
    }
}
