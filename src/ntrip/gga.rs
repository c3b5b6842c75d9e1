//! GGA sentence generation for the caster uplink.
//!
//! VRS/MAC casters parse the pushed GGA with fixed-width field expectations,
//! so the sentence is assembled by direct string formatting with explicit
//! digit widths rather than through a general NMEA writer.

use chrono::{DateTime, Timelike, Utc};
use log::{error, warn};

use crate::nmea::{sentence_is_valid, xor_checksum, FixQuality, PositionFix};

/// Known-good sentence substituted when a formatted GGA fails its own
/// validation pass.
pub const FALLBACK_GGA: &str =
    "$GPGGA,000000.000,0000.0000,N,00000.0000,E,1,08,1.0,0.0,M,0.0,M,,*65\r\n";

/// Seed coordinates for the no-fix default GGA.  (0, 0) is rejected by some
/// casters; if one also rejects this seed, the application must supply an
/// approximate position instead.
const DEFAULT_SEED_DEG: f64 = 0.1;

/// A generated sentence plus whether any default field substitution was
/// applied (the caster is being fed placeholder data).
#[derive(Debug, Clone, PartialEq)]
pub struct GgaOutcome {
    pub line:          String,
    pub used_defaults: bool,
}

/// Format a wire-correct GGA from a position fix, stamped with the current
/// UTC time.
///
/// Missing quality/satellites/HDOP are substituted with 1, 8, 1.0 so VRS
/// casters start streaming; the substitution is reported via
/// `used_defaults`.
pub fn generate(fix: &PositionFix, now: DateTime<Utc>) -> GgaOutcome {
    let mut used_defaults = false;

    let quality = if fix.quality == FixQuality::NoFix {
        used_defaults = true;
        1
    } else {
        fix.quality.digit()
    };
    let satellites = if fix.satellites == 0 {
        used_defaults = true;
        8
    } else {
        fix.satellites.min(99)
    };
    let hdop = if fix.hdop == 0.0 {
        used_defaults = true;
        1.0
    } else {
        fix.hdop
    };

    let time = format!(
        "{:02}{:02}{:02}.{:03}",
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    );
    let lat_hemi = if fix.latitude < 0.0 { 'S' } else { 'N' };
    let lon_hemi = if fix.longitude < 0.0 { 'W' } else { 'E' };

    let body = format!(
        "GPGGA,{},{},{},{},{},{},{:02},{:.1},{:.1},M,{:.1},M,,",
        time,
        format_coord(fix.latitude, 2),
        lat_hemi,
        format_coord(fix.longitude, 3),
        lon_hemi,
        quality,
        satellites,
        hdop,
        fix.altitude_m.unwrap_or(0.0),
        0.0, // geoid separation: not tracked in the fix record
    );
    let line = format!("${}*{:02X}\r\n", body, xor_checksum(body.as_bytes()));

    // Self-check through the same validator applied to inbound sentences.
    if !sentence_is_valid(line.trim_end()) {
        error!("generated GGA failed validation, substituting fallback: {line:?}");
        return GgaOutcome { line: FALLBACK_GGA.to_string(), used_defaults: true };
    }

    GgaOutcome { line, used_defaults }
}

/// The GGA pushed when no position has ever been seen: seed coordinates,
/// default quality/satellites/HDOP.
pub fn default_gga(now: DateTime<Utc>) -> GgaOutcome {
    warn!("no position fix available, pushing default seed GGA");
    let seed = PositionFix {
        latitude:   DEFAULT_SEED_DEG,
        longitude:  DEFAULT_SEED_DEG,
        altitude_m: None,
        quality:    FixQuality::NoFix,
        satellites: 0,
        hdop:       0.0,
        timestamp:  now,
    };
    generate(&seed, now)
}

/// `DDMM.mmmmmmm` with the degree part zero-padded to `deg_width` and the
/// minutes carrying exactly 7 fractional digits.
fn format_coord(value: f64, deg_width: usize) -> String {
    let abs = value.abs();
    let mut deg = abs.trunc() as u32;
    let mut minutes = (abs - deg as f64) * 60.0;
    // A value like 59.99999996 would round to 60.0000000; carry it.
    if minutes >= 60.0 - 5e-8 {
        deg += 1;
        minutes = 0.0;
    }
    format!("{deg:0width$}{minutes:010.7}", width = deg_width)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    use super::*;
    use crate::nmea::{NmeaParser, ParserEvent};

    fn fix(lat: f64, lon: f64) -> PositionFix {
        PositionFix {
            latitude:   lat,
            longitude:  lon,
            altitude_m: Some(545.4),
            quality:    FixQuality::Autonomous,
            satellites: 8,
            hdop:       0.9,
            timestamp:  Utc::now(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 35, 19).unwrap()
    }

    #[test]
    fn field_widths_match_wire_contract() {
        let out = generate(&fix(48.1173, 11.5166667), noon());
        assert!(!out.used_defaults);
        assert!(
            out.line
                .starts_with("$GPGGA,123519.000,4807.0380000,N,01131.0000020,E,1,08,0.9,545.4,M,0.0,M,,*"),
            "unexpected line: {}",
            out.line
        );
        assert!(out.line.ends_with("\r\n"));
    }

    #[test]
    fn southern_western_hemispheres() {
        let out = generate(&fix(-33.8688, -151.2093), noon());
        assert!(out.line.contains(",S,"), "{}", out.line);
        assert!(out.line.contains(",W,"), "{}", out.line);
        assert!(out.line.contains("15112."), "{}", out.line);
    }

    #[test]
    fn generated_sentence_round_trips_within_tolerance() {
        let source = fix(48.1173, 11.5166667);
        let out = generate(&source, noon());

        let mut parser = NmeaParser::new();
        let events = parser.feed(out.line.as_bytes());
        let pos = events
            .iter()
            .find_map(|e| match e {
                ParserEvent::Position(p) => Some(p.clone()),
                _ => None,
            })
            .expect("generated GGA must parse");

        assert_relative_eq!(pos.latitude, source.latitude, epsilon = 1e-6);
        assert_relative_eq!(pos.longitude, source.longitude, epsilon = 1e-6);
        assert_eq!(pos.quality, FixQuality::Autonomous);
        assert_eq!(pos.satellites, 8);
    }

    #[test]
    fn missing_fields_substituted_and_flagged() {
        let mut f = fix(48.0, 11.0);
        f.quality = FixQuality::NoFix;
        f.satellites = 0;
        f.hdop = 0.0;
        let out = generate(&f, noon());
        assert!(out.used_defaults);
        assert!(out.line.contains(",1,08,1.0,"), "{}", out.line);
    }

    #[test]
    fn default_gga_uses_seed_coordinates() {
        let out = default_gga(noon());
        assert!(out.used_defaults);
        // 0.1° = 6 minutes
        assert!(out.line.contains(",0006.0000000,N,"), "{}", out.line);
        assert!(out.line.contains(",00006.0000000,E,"), "{}", out.line);
    }

    #[test]
    fn fallback_sentence_is_itself_valid() {
        assert!(sentence_is_valid(FALLBACK_GGA.trim_end()));
    }

    #[test]
    fn minute_rounding_carries_into_degrees() {
        // 47.9999999999° would naively format as 47°60.0000000'
        let out = generate(&fix(47.999_999_999_9, 11.0), noon());
        assert!(out.line.contains(",4800.0000000,N,"), "{}", out.line);
    }
}
