//! Typed parsers for the individual NMEA sentence formatters.
//!
//! Each parser takes the comma-split fields of an already checksum-validated
//! sentence (field 0 is the address, e.g. `GPGGA`) and produces a typed
//! record.  Field conventions follow the receiver wire format: empty fields
//! become `None`, absent integer fields default to 0, HDOP defaults to 0.

use chrono::{NaiveDate, NaiveTime};

use super::{FixQuality, SatelliteInfo};

// ── Sentence records ──────────────────────────────────────────────────────────

/// GGA — Global Positioning System Fix Data.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaData {
    pub time:               Option<NaiveTime>,
    pub latitude:           Option<f64>,
    pub longitude:          Option<f64>,
    pub quality:            FixQuality,
    pub satellites:         u32,
    pub hdop:               f64,
    pub altitude_m:         Option<f64>,
    pub geoid_separation_m: Option<f64>,
    pub dgps_age_secs:      Option<f64>,
    pub dgps_station:       Option<u16>,
}

/// RMC — Recommended Minimum Specific GNSS Data.
#[derive(Debug, Clone, PartialEq)]
pub struct RmcData {
    pub time:          Option<NaiveTime>,
    /// Status field: `A` = data valid, `V` = warning.
    pub valid:         bool,
    pub latitude:      Option<f64>,
    pub longitude:     Option<f64>,
    pub sog_knots:     Option<f64>,
    pub cog_deg:       Option<f64>,
    pub date:          Option<NaiveDate>,
    /// Signed magnetic variation in degrees (west negative).
    pub mag_variation: Option<f64>,
    pub mode:          Option<char>,
}

/// GSA — DOP and active satellites.
#[derive(Debug, Clone, PartialEq)]
pub struct GsaData {
    pub mode:     Option<char>,
    /// 1 = no fix, 2 = 2D, 3 = 3D.
    pub fix_type: u32,
    pub prns:     Vec<u16>,
    pub pdop:     Option<f64>,
    pub hdop:     Option<f64>,
    pub vdop:     Option<f64>,
}

/// GSV — satellites in view (one message out of a set).
#[derive(Debug, Clone, PartialEq)]
pub struct GsvData {
    pub total_messages:     u32,
    /// 1-based index of this message within the set.
    pub message_index:      u32,
    pub satellites_in_view: u32,
    pub satellites:         Vec<SatelliteInfo>,
}

/// GST — position error statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct GstData {
    pub time:                  Option<NaiveTime>,
    pub rms_range_m:           Option<f64>,
    pub semi_major_m:          Option<f64>,
    pub semi_minor_m:          Option<f64>,
    pub semi_major_orient_deg: Option<f64>,
    pub latitude_error_m:      Option<f64>,
    pub longitude_error_m:     Option<f64>,
    pub altitude_error_m:      Option<f64>,
}

/// VTG — course over ground and ground speed.
#[derive(Debug, Clone, PartialEq)]
pub struct VtgData {
    pub course_true_deg: Option<f64>,
    pub course_mag_deg:  Option<f64>,
    pub speed_knots:     Option<f64>,
    pub speed_kmh:       Option<f64>,
    pub mode:            Option<char>,
}

// ── Parsers ───────────────────────────────────────────────────────────────────

pub fn parse_gga(f: &[&str]) -> GgaData {
    GgaData {
        time:               field(f, 1).and_then(parse_hms),
        latitude:           parse_lat(field(f, 2), field(f, 3)),
        longitude:          parse_lon(field(f, 4), field(f, 5)),
        quality:            FixQuality::from_digit(field_u32(f, 6)),
        satellites:         field_u32(f, 7),
        hdop:               field_f64(f, 8).unwrap_or(0.0),
        altitude_m:         field_f64(f, 9),
        geoid_separation_m: field_f64(f, 11),
        dgps_age_secs:      field_f64(f, 13),
        dgps_station:       field(f, 14).and_then(|s| s.parse().ok()),
    }
}

pub fn parse_rmc(f: &[&str]) -> RmcData {
    let mag = field_f64(f, 10).map(|v| if field(f, 11) == Some("W") { -v } else { v });
    RmcData {
        time:          field(f, 1).and_then(parse_hms),
        valid:         field(f, 2) == Some("A"),
        latitude:      parse_lat(field(f, 3), field(f, 4)),
        longitude:     parse_lon(field(f, 5), field(f, 6)),
        sog_knots:     field_f64(f, 7),
        cog_deg:       field_f64(f, 8),
        date:          field(f, 9).and_then(parse_date_ddmmyy),
        mag_variation: mag,
        mode:          field_char(f, 12),
    }
}

pub fn parse_gsa(f: &[&str]) -> GsaData {
    let prns = (3..15)
        .filter_map(|i| field(f, i))
        .filter_map(|s| s.parse().ok())
        .collect();
    GsaData {
        mode:     field_char(f, 1),
        fix_type: field_u32(f, 2),
        prns,
        pdop:     field_f64(f, 15),
        hdop:     field_f64(f, 16),
        vdop:     field_f64(f, 17),
    }
}

/// Satellite records with PRN 0 (empty channel slots) are skipped.
pub fn parse_gsv(f: &[&str]) -> GsvData {
    let mut satellites = Vec::new();
    for group in 0..4 {
        let base = 4 + group * 4;
        let prn: u16 = match field(f, base).and_then(|s| s.parse().ok()) {
            Some(p) if p != 0 => p,
            _ => continue,
        };
        satellites.push(SatelliteInfo {
            prn,
            elevation_deg: field_f64(f, base + 1),
            azimuth_deg:   field_f64(f, base + 2),
            snr_db:        field_f64(f, base + 3),
        });
    }
    GsvData {
        total_messages:     field_u32(f, 1),
        message_index:      field_u32(f, 2),
        satellites_in_view: field_u32(f, 3),
        satellites,
    }
}

pub fn parse_gst(f: &[&str]) -> GstData {
    GstData {
        time:                  field(f, 1).and_then(parse_hms),
        rms_range_m:           field_f64(f, 2),
        semi_major_m:          field_f64(f, 3),
        semi_minor_m:          field_f64(f, 4),
        semi_major_orient_deg: field_f64(f, 5),
        latitude_error_m:      field_f64(f, 6),
        longitude_error_m:     field_f64(f, 7),
        altitude_error_m:      field_f64(f, 8),
    }
}

pub fn parse_vtg(f: &[&str]) -> VtgData {
    VtgData {
        course_true_deg: field_f64(f, 1),
        course_mag_deg:  field_f64(f, 3),
        speed_knots:     field_f64(f, 5),
        speed_kmh:       field_f64(f, 7),
        mode:            field_char(f, 9),
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn field<'a>(f: &[&'a str], i: usize) -> Option<&'a str> {
    match f.get(i) {
        Some(s) if !s.is_empty() => Some(*s),
        _ => None,
    }
}

fn field_f64(f: &[&str], i: usize) -> Option<f64> {
    field(f, i).and_then(|s| s.parse().ok())
}

fn field_u32(f: &[&str], i: usize) -> u32 {
    field(f, i).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn field_char(f: &[&str], i: usize) -> Option<char> {
    field(f, i).and_then(|s| s.chars().next())
}

/// Convert an NMEA coordinate (`DDMM.mmmm` / `DDDMM.mmmm`) plus hemisphere
/// indicator to signed decimal degrees: `deg + min/60`, negative for S/W.
pub(crate) fn coord_to_decimal(coord: &str, hemi: &str) -> Option<f64> {
    let dot = coord.find('.')?;
    if dot < 2 {
        return None;
    }
    let deg_digits = dot - 2;
    let degrees: f64 = coord[..deg_digits].parse().ok()?;
    let minutes: f64 = coord[deg_digits..].parse().ok()?;
    let mut decimal = degrees + minutes / 60.0;
    if hemi == "S" || hemi == "W" {
        decimal = -decimal;
    }
    Some(decimal)
}

fn parse_lat(coord: Option<&str>, hemi: Option<&str>) -> Option<f64> {
    let v = coord_to_decimal(coord?, hemi.unwrap_or(""))?;
    (-90.0..=90.0).contains(&v).then_some(v)
}

fn parse_lon(coord: Option<&str>, hemi: Option<&str>) -> Option<f64> {
    let v = coord_to_decimal(coord?, hemi.unwrap_or(""))?;
    (-180.0..=180.0).contains(&v).then_some(v)
}

/// Parse `hhmmss` or `hhmmss.sss` UTC time-of-day.
fn parse_hms(s: &str) -> Option<NaiveTime> {
    if s.len() < 6 {
        return None;
    }
    let h: u32 = s[0..2].parse().ok()?;
    let m: u32 = s[2..4].parse().ok()?;
    let sec: f64 = s[4..].parse().ok()?;
    let whole = sec as u32;
    let milli = ((sec - whole as f64) * 1000.0).round() as u32;
    NaiveTime::from_hms_milli_opt(h, m, whole, milli)
}

/// Parse `ddmmyy`, assuming the 20xx century.
fn parse_date_ddmmyy(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 {
        return None;
    }
    let d: u32 = s[0..2].parse().ok()?;
    let m: u32 = s[2..4].parse().ok()?;
    let y: i32 = s[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + y, m, d)
}

/// Map an FAA mode indicator letter (RMC/VTG field) to a fix quality.
pub(crate) fn quality_from_faa_mode(mode: Option<char>) -> FixQuality {
    match mode {
        Some('D') => FixQuality::Differential,
        Some('R') => FixQuality::RtkFixed,
        Some('F') => FixQuality::RtkFloat,
        Some('E') => FixQuality::Estimated,
        Some('M') => FixQuality::Manual,
        Some('S') => FixQuality::Simulator,
        Some('N') => FixQuality::NoFix,
        _ => FixQuality::Autonomous,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn split(body: &str) -> Vec<&str> {
        body.split(',').collect()
    }

    #[test]
    fn gga_fields() {
        let f = split("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let gga = parse_gga(&f);
        assert_relative_eq!(gga.latitude.unwrap(), 48.1173, epsilon = 1e-6);
        assert_relative_eq!(gga.longitude.unwrap(), 11.5166667, epsilon = 1e-6);
        assert_eq!(gga.quality, FixQuality::Autonomous);
        assert_eq!(gga.satellites, 8);
        assert_relative_eq!(gga.hdop, 0.9);
        assert_relative_eq!(gga.altitude_m.unwrap(), 545.4);
        assert_relative_eq!(gga.geoid_separation_m.unwrap(), 46.9);
        assert_eq!(gga.dgps_age_secs, None);
        assert_eq!(gga.dgps_station, None);
    }

    #[test]
    fn gga_empty_fields_default() {
        let f = split("GPGGA,,,,,,,,,,,,,,");
        let gga = parse_gga(&f);
        assert_eq!(gga.latitude, None);
        assert_eq!(gga.quality, FixQuality::NoFix);
        assert_eq!(gga.satellites, 0);
        assert_eq!(gga.hdop, 0.0);
    }

    #[test]
    fn rmc_fields() {
        let f = split("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W");
        let rmc = parse_rmc(&f);
        assert!(rmc.valid);
        assert_relative_eq!(rmc.latitude.unwrap(), 48.1173, epsilon = 1e-6);
        assert_relative_eq!(rmc.sog_knots.unwrap(), 22.4);
        assert_relative_eq!(rmc.cog_deg.unwrap(), 84.4);
        // ddmmyy with 20xx century assumption
        assert_eq!(rmc.date.unwrap(), NaiveDate::from_ymd_opt(2094, 3, 23).unwrap());
        assert_relative_eq!(rmc.mag_variation.unwrap(), -3.1);
    }

    #[test]
    fn rmc_void_status() {
        let f = split("GPRMC,123519,V,4807.038,N,01131.000,E,,,230394,,");
        assert!(!parse_rmc(&f).valid);
    }

    #[test]
    fn gsa_prn_list() {
        let f = split("GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1");
        let gsa = parse_gsa(&f);
        assert_eq!(gsa.mode, Some('A'));
        assert_eq!(gsa.fix_type, 3);
        assert_eq!(gsa.prns, vec![4, 5, 9, 12, 24]);
        assert_relative_eq!(gsa.pdop.unwrap(), 2.5);
        assert_relative_eq!(gsa.vdop.unwrap(), 2.1);
    }

    #[test]
    fn gsv_records() {
        let f = split("GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45");
        let gsv = parse_gsv(&f);
        assert_eq!(gsv.total_messages, 2);
        assert_eq!(gsv.message_index, 1);
        assert_eq!(gsv.satellites_in_view, 8);
        assert_eq!(gsv.satellites.len(), 4);
        assert_eq!(gsv.satellites[0].prn, 1);
        assert_relative_eq!(gsv.satellites[0].elevation_deg.unwrap(), 40.0);
        assert_relative_eq!(gsv.satellites[0].azimuth_deg.unwrap(), 83.0);
        assert_relative_eq!(gsv.satellites[0].snr_db.unwrap(), 46.0);
    }

    #[test]
    fn gsv_skips_prn_zero_and_missing_snr() {
        let f = split("GPGSV,1,1,02,00,10,120,,25,60,210,");
        let gsv = parse_gsv(&f);
        assert_eq!(gsv.satellites.len(), 1);
        assert_eq!(gsv.satellites[0].prn, 25);
        assert_eq!(gsv.satellites[0].snr_db, None);
    }

    #[test]
    fn vtg_speeds() {
        let f = split("GPVTG,054.7,T,034.4,M,005.5,N,010.2,K,A");
        let vtg = parse_vtg(&f);
        assert_relative_eq!(vtg.course_true_deg.unwrap(), 54.7);
        assert_relative_eq!(vtg.course_mag_deg.unwrap(), 34.4);
        assert_relative_eq!(vtg.speed_knots.unwrap(), 5.5);
        assert_relative_eq!(vtg.speed_kmh.unwrap(), 10.2);
        assert_eq!(vtg.mode, Some('A'));
    }

    #[test]
    fn gst_errors() {
        let f = split("GPGST,172814.0,0.006,0.023,0.020,273.6,0.023,0.020,0.031");
        let gst = parse_gst(&f);
        assert_relative_eq!(gst.rms_range_m.unwrap(), 0.006);
        assert_relative_eq!(gst.latitude_error_m.unwrap(), 0.023);
        assert_relative_eq!(gst.altitude_error_m.unwrap(), 0.031);
    }

    #[test]
    fn coord_conversion_sign() {
        assert_relative_eq!(coord_to_decimal("4807.038", "S").unwrap(), -48.1173, epsilon = 1e-6);
        assert_relative_eq!(coord_to_decimal("01131.000", "W").unwrap(), -11.5166667, epsilon = 1e-6);
        assert_eq!(coord_to_decimal("", "N"), None);
        assert_eq!(coord_to_decimal(".5", "N"), None);
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        // 91° latitude cannot come from a sane receiver
        let f = split("GPGGA,123519,9107.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(parse_gga(&f).latitude, None);
    }

    #[test]
    fn hms_with_and_without_fraction() {
        assert_eq!(parse_hms("123519"), NaiveTime::from_hms_opt(12, 35, 19));
        assert_eq!(
            parse_hms("123519.250"),
            NaiveTime::from_hms_milli_opt(12, 35, 19, 250)
        );
        assert_eq!(parse_hms("1235"), None);
    }
}
