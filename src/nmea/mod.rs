//! NMEA 0183 framer and parser.
//!
//! Turns the raw byte stream from the receiver into validated, typed
//! sentences.  [`NmeaParser::feed`] appends bytes to an internal line buffer,
//! frames on CR-LF, checks the XOR checksum, and dispatches on the
//! three-letter formatter (the two-letter talker ID is ignored, so GPGGA and
//! GNGGA parse identically).  The parser also maintains the last-known
//! position and the satellite view assembled from GSV sets.

pub mod sentences;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use self::sentences::{
    parse_gga, parse_gsa, parse_gst, parse_gsv, parse_rmc, parse_vtg,
    quality_from_faa_mode, GgaData, GsaData, GstData, GsvData, RmcData, VtgData,
};

/// An unterminated line longer than this is dropped at the next feed.
const MAX_PENDING_LINE: usize = 1024;

// ── Core types ────────────────────────────────────────────────────────────────

/// NMEA fix quality (GGA field 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    NoFix,
    Autonomous,
    Differential,
    Pps,
    RtkFixed,
    RtkFloat,
    Estimated,
    Manual,
    Simulator,
}

impl FixQuality {
    pub fn from_digit(d: u32) -> Self {
        match d {
            1 => FixQuality::Autonomous,
            2 => FixQuality::Differential,
            3 => FixQuality::Pps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulator,
            _ => FixQuality::NoFix,
        }
    }

    pub fn digit(self) -> u8 {
        match self {
            FixQuality::NoFix        => 0,
            FixQuality::Autonomous   => 1,
            FixQuality::Differential => 2,
            FixQuality::Pps          => 3,
            FixQuality::RtkFixed     => 4,
            FixQuality::RtkFloat     => 5,
            FixQuality::Estimated    => 6,
            FixQuality::Manual       => 7,
            FixQuality::Simulator    => 8,
        }
    }
}

/// A position fix extracted from GGA or RMC.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    /// Signed decimal degrees, in [-90, 90].
    pub latitude:   f64,
    /// Signed decimal degrees, in [-180, 180].
    pub longitude:  f64,
    pub altitude_m: Option<f64>,
    pub quality:    FixQuality,
    pub satellites: u32,
    pub hdop:       f64,
    pub timestamp:  DateTime<Utc>,
}

/// One satellite from the GSV view.
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteInfo {
    pub prn:           u16,
    pub elevation_deg: Option<f64>,
    pub azimuth_deg:   Option<f64>,
    pub snr_db:        Option<f64>,
}

/// A checksum-validated sentence with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NmeaSentence {
    /// The full line as received, without the CR-LF terminator.
    pub raw:         String,
    pub received_at: DateTime<Utc>,
    pub data:        SentenceData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentenceData {
    Gga(GgaData),
    Gsa(GsaData),
    Gsv(GsvData),
    Rmc(RmcData),
    Gst(GstData),
    Vtg(VtgData),
    /// A valid sentence with a formatter this parser does not type.
    Unknown { formatter: String },
}

/// Everything a call to [`NmeaParser::feed`] can produce, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    Sentence(NmeaSentence),
    Position(PositionFix),
    Satellites(Vec<SatelliteInfo>),
    FrameOverflow { dropped: usize },
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// XOR of all bytes between `$` and `*`, exclusive.
pub fn xor_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Split a candidate sentence into its body and declared checksum.
///
/// Requirements: leading `$`, exactly one `*`, followed by exactly two
/// uppercase hex digits.
fn split_checksum(line: &str) -> Option<(&str, u8)> {
    let rest = line.strip_prefix('$')?;
    if rest.matches('*').count() != 1 {
        return None;
    }
    let star = rest.find('*')?;
    let (body, tail) = (&rest[..star], &rest[star + 1..]);
    if tail.len() != 2
        || !tail.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        return None;
    }
    let declared = u8::from_str_radix(tail, 16).ok()?;
    Some((body, declared))
}

/// Structural + checksum validation as applied to every inbound sentence.
/// Also used by the GGA generator to self-check its own output.
pub fn sentence_is_valid(line: &str) -> bool {
    match split_checksum(line.trim_end()) {
        Some((body, declared)) => xor_checksum(body.as_bytes()) == declared,
        None => false,
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Streaming NMEA parser.  Single-writer: one feed path owns it.
#[derive(Debug, Default)]
pub struct NmeaParser {
    buffer:        String,
    last_position: Option<PositionFix>,
    pending_sats:  BTreeMap<u16, SatelliteInfo>,
    satellites:    Vec<SatelliteInfo>,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last fix seen from GGA/RMC, if any.
    pub fn last_position(&self) -> Option<&PositionFix> {
        self.last_position.as_ref()
    }

    /// The satellite view published by the most recent complete GSV set.
    pub fn satellite_view(&self) -> &[SatelliteInfo] {
        &self.satellites
    }

    /// Feed raw bytes; returns parser events in stream order.
    ///
    /// At most one partial (unterminated) line is carried across calls.  A
    /// carried line that has grown past 1 KiB without terminating is dropped
    /// here, before the new bytes are appended.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParserEvent> {
        let mut events = Vec::new();

        if self.buffer.len() >= MAX_PENDING_LINE {
            let dropped = self.buffer.len();
            warn!("NMEA frame overflow: dropping {dropped} unterminated bytes");
            self.buffer.clear();
            events.push(ParserEvent::FrameOverflow { dropped });
        }

        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        while let Some(nl) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=nl).collect();
            let line = line.trim_matches(['\r', '\n', ' ']);
            if line.is_empty() {
                continue;
            }
            self.process_line(line, &mut events);
        }

        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<ParserEvent>) {
        let (body, declared) = match split_checksum(line) {
            Some(parts) => parts,
            None => {
                debug!("NMEA: malformed sentence dropped: {line}");
                return;
            }
        };
        if xor_checksum(body.as_bytes()) != declared {
            debug!("NMEA: checksum mismatch, sentence dropped: {line}");
            return;
        }

        let fields: Vec<&str> = body.split(',').collect();
        let address = fields[0];
        let formatter = if address.len() >= 5 { &address[2..5] } else { address };
        let received_at = Utc::now();

        let data = match formatter {
            "GGA" => SentenceData::Gga(parse_gga(&fields)),
            "GSA" => SentenceData::Gsa(parse_gsa(&fields)),
            "GSV" => SentenceData::Gsv(parse_gsv(&fields)),
            "RMC" => SentenceData::Rmc(parse_rmc(&fields)),
            "GST" => SentenceData::Gst(parse_gst(&fields)),
            "VTG" => SentenceData::Vtg(parse_vtg(&fields)),
            other => SentenceData::Unknown { formatter: other.to_string() },
        };

        let sentence = NmeaSentence {
            raw: line.to_string(),
            received_at,
            data: data.clone(),
        };
        events.push(ParserEvent::Sentence(sentence));

        match data {
            SentenceData::Gga(gga) => self.update_from_gga(&gga, received_at, events),
            SentenceData::Rmc(rmc) => self.update_from_rmc(&rmc, received_at, events),
            SentenceData::Gsv(gsv) => self.update_satellites(&gsv, events),
            _ => {}
        }
    }

    fn update_from_gga(
        &mut self,
        gga:         &GgaData,
        received_at: DateTime<Utc>,
        events:      &mut Vec<ParserEvent>,
    ) {
        let (lat, lon) = match (gga.latitude, gga.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return,
        };
        let fix = PositionFix {
            latitude:   lat,
            longitude:  lon,
            altitude_m: gga.altitude_m,
            quality:    gga.quality,
            satellites: gga.satellites,
            hdop:       gga.hdop,
            timestamp:  received_at,
        };
        self.last_position = Some(fix.clone());
        events.push(ParserEvent::Position(fix));
    }

    fn update_from_rmc(
        &mut self,
        rmc:         &RmcData,
        received_at: DateTime<Utc>,
        events:      &mut Vec<ParserEvent>,
    ) {
        if !rmc.valid {
            return;
        }
        let (lat, lon) = match (rmc.latitude, rmc.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return,
        };
        // RMC carries no altitude / satellite count / HDOP: keep the values
        // from the previous fix so the feed stays continuous.
        let prev = self.last_position.as_ref();
        let fix = PositionFix {
            latitude:   lat,
            longitude:  lon,
            altitude_m: prev.and_then(|p| p.altitude_m),
            quality:    quality_from_faa_mode(rmc.mode),
            satellites: prev.map(|p| p.satellites).unwrap_or(0),
            hdop:       prev.map(|p| p.hdop).unwrap_or(0.0),
            timestamp:  received_at,
        };
        self.last_position = Some(fix.clone());
        events.push(ParserEvent::Position(fix));
    }

    /// GSV set assembly: k=1 clears the map, every message adds its records,
    /// k=N publishes the view.  A truncated set is published incomplete when
    /// the next set starts.
    fn update_satellites(&mut self, gsv: &GsvData, events: &mut Vec<ParserEvent>) {
        if gsv.message_index == 0 || gsv.total_messages == 0 {
            return;
        }
        if gsv.message_index == 1 {
            self.pending_sats.clear();
        }
        for sat in &gsv.satellites {
            self.pending_sats.insert(sat.prn, sat.clone());
        }
        if gsv.message_index == gsv.total_messages {
            self.satellites = self.pending_sats.values().cloned().collect();
            events.push(ParserEvent::Satellites(self.satellites.clone()));
        }
    }
}
