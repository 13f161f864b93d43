//! Bit level decoding of 112 bit Mode S extended squitter (DF17/18) frames.
//!
//! Only the fields the surveillance processor consumes are decoded. See
//! "The 1090 Megahertz Riddle" (Sun, 2021) for the field layouts.
use crate::state::Position;
use std::f64::consts::PI;

const FRAME_BITS: u32 = 112;
const CPR_SCALE: f64 = 131072.0;
const FEET_PER_METER: f64 = 3.28084;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 14 bytes, got {0}")]
    Length(usize),
    #[error("downlink format {0} is not an extended squitter")]
    NotExtendedSquitter(u8),
    #[error("type code {0} carries no {1}")]
    WrongTypeCode(u8, &'static str),
    #[error("{0} not available")]
    Unavailable(&'static str),
    #[error("{0} not supported")]
    Unsupported(&'static str),
}

/// Decoding collaborator of the surveillance processor.
pub trait Decoder: Send + Sync + 'static {
    /// Six uppercase hex digits.
    fn icao(&self, msg: &str) -> Result<String, DecodeError>;

    fn typecode(&self, msg: &str) -> Result<u8, DecodeError>;

    /// `true` for odd CPR frames.
    fn odd_frame(&self, msg: &str) -> Result<bool, DecodeError>;

    /// Ground speed (or airspeed when that is all the frame carries) in knots.
    fn velocity(&self, msg: &str) -> Result<f64, DecodeError>;

    fn altitude(&self, msg: &str) -> Result<f64, DecodeError>;

    /// Global airborne position from an even/odd frame pair. `Ok(None)` when
    /// the pair straddles a longitude zone boundary and cannot be resolved.
    fn airborne_position(
        &self,
        even: &str,
        odd: &str,
        t_even: i64,
        t_odd: i64,
    ) -> Result<Option<Position>, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModeS;

struct Frame(u128);

impl Frame {
    fn parse(msg: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(msg)?;
        let bytes: [u8; 14] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::Length(bytes.len()))?;

        let mut buf = [0u8; 16];
        buf[2..].copy_from_slice(&bytes);
        let frame = Self(u128::from_be_bytes(buf));

        match frame.df() {
            17 | 18 => Ok(frame),
            df => Err(DecodeError::NotExtendedSquitter(df)),
        }
    }

    /// `len` bits starting at bit `start`, counted from the first bit sent.
    fn bits(&self, start: u32, len: u32) -> u32 {
        let shift = FRAME_BITS - start - len;
        ((self.0 >> shift) & ((1u128 << len) - 1)) as u32
    }

    fn bit(&self, n: u32) -> bool {
        self.bits(n, 1) == 1
    }

    fn df(&self) -> u8 {
        self.bits(0, 5) as u8
    }

    fn tc(&self) -> u8 {
        self.bits(32, 5) as u8
    }

    fn cpr(&self) -> (f64, f64) {
        (
            f64::from(self.bits(54, 17)) / CPR_SCALE,
            f64::from(self.bits(71, 17)) / CPR_SCALE,
        )
    }
}

impl Decoder for ModeS {
    fn icao(&self, msg: &str) -> Result<String, DecodeError> {
        let frame = Frame::parse(msg)?;
        Ok(format!("{:06X}", frame.bits(8, 24)))
    }

    fn typecode(&self, msg: &str) -> Result<u8, DecodeError> {
        Ok(Frame::parse(msg)?.tc())
    }

    fn odd_frame(&self, msg: &str) -> Result<bool, DecodeError> {
        Ok(Frame::parse(msg)?.bit(53))
    }

    fn velocity(&self, msg: &str) -> Result<f64, DecodeError> {
        let frame = Frame::parse(msg)?;
        match frame.tc() {
            5..=8 => surface_speed(frame.bits(37, 7)),
            19 => airborne_speed(&frame),
            tc => Err(DecodeError::WrongTypeCode(tc, "velocity")),
        }
    }

    fn altitude(&self, msg: &str) -> Result<f64, DecodeError> {
        let frame = Frame::parse(msg)?;
        match frame.tc() {
            9..=18 if frame.bit(47) => {
                let n = (frame.bits(40, 7) << 4) | frame.bits(48, 4);
                Ok(f64::from(n) * 25.0 - 1000.0)
            }
            9..=18 => gillham_altitude(frame.bits(40, 12)),
            20..=22 => Ok(f64::from(frame.bits(40, 12)) * FEET_PER_METER),
            tc => Err(DecodeError::WrongTypeCode(tc, "altitude")),
        }
    }

    fn airborne_position(
        &self,
        even: &str,
        odd: &str,
        t_even: i64,
        t_odd: i64,
    ) -> Result<Option<Position>, DecodeError> {
        let (lat0, lon0) = Frame::parse(even)?.cpr();
        let (lat1, lon1) = Frame::parse(odd)?.cpr();

        Ok(global_position(lat0, lon0, lat1, lon1, t_even > t_odd))
    }
}

/// 100 ft Gillham altitude. `code` holds the field as sent:
/// C1 A1 C2 A2 C4 A4 B1 Q B2 D2 B4 D4.
fn gillham_altitude(code: u32) -> Result<f64, DecodeError> {
    let pick = |bits: &[u32]| {
        bits.iter()
            .fold(0u32, |acc, i| (acc << 1) | ((code >> (11 - i)) & 1))
    };
    let from_gray = |mut n: u32| {
        let mut shift = n >> 1;
        while shift != 0 {
            n ^= shift;
            shift >>= 1;
        }
        n
    };

    // D2 D4 A1 A2 A4 B1 B2 B4, then C1 C2 C4
    let n500 = from_gray(pick(&[9, 11, 1, 3, 5, 6, 8, 10]));
    let mut n100 = match from_gray(pick(&[0, 2, 4])) {
        0 | 5 | 6 => return Err(DecodeError::Unavailable("gillham altitude")),
        7 => 5,
        n => n,
    };
    if n500 % 2 == 1 {
        n100 = 6 - n100;
    }

    Ok(f64::from(n500 * 500 + n100 * 100) - 1300.0)
}

fn airborne_speed(frame: &Frame) -> Result<f64, DecodeError> {
    let subtype = frame.bits(37, 3);
    let scale = if matches!(subtype, 2 | 4) { 4.0 } else { 1.0 };

    match subtype {
        1 | 2 => {
            let v_ew = frame.bits(46, 10);
            let v_ns = frame.bits(57, 10);
            if v_ew == 0 || v_ns == 0 {
                return Err(DecodeError::Unavailable("ground speed"));
            }

            let sign = |negative: bool| if negative { -1.0 } else { 1.0 };
            let v_we = sign(frame.bit(45)) * f64::from(v_ew - 1) * scale;
            let v_sn = sign(frame.bit(56)) * f64::from(v_ns - 1) * scale;

            Ok(v_we.hypot(v_sn).trunc())
        }
        3 | 4 => {
            let airspeed = frame.bits(57, 10);
            if airspeed == 0 {
                return Err(DecodeError::Unavailable("airspeed"));
            }

            Ok(f64::from(airspeed - 1) * scale)
        }
        _ => Err(DecodeError::Unsupported("velocity subtype")),
    }
}

fn surface_speed(mov: u32) -> Result<f64, DecodeError> {
    const MOVS: [u32; 7] = [2, 9, 13, 39, 94, 109, 124];
    const KTS: [f64; 7] = [0.125, 1.0, 2.0, 15.0, 70.0, 100.0, 175.0];
    const STEPS: [f64; 6] = [0.125, 0.25, 0.5, 1.0, 2.0, 5.0];

    match mov {
        0 | 125.. => Err(DecodeError::Unavailable("ground movement")),
        1 => Ok(0.0),
        124 => Ok(175.0),
        _ => {
            let i = MOVS.iter().rposition(|m| *m <= mov).unwrap_or(0);
            Ok(KTS[i] + f64::from(mov - MOVS[i]) * STEPS[i])
        }
    }
}

/// Number of longitude zones at `lat`.
fn nl(lat: f64) -> u32 {
    if lat == 0.0 {
        return 59;
    }
    if lat.abs() == 87.0 {
        return 2;
    }
    if lat.abs() > 87.0 {
        return 1;
    }

    let a = 1.0 - (PI / 30.0).cos();
    let b = (PI / 180.0 * lat.abs()).cos().powi(2);
    (2.0 * PI / (1.0 - a / b).acos()).floor() as u32
}

fn round5(v: f64) -> f64 {
    (v * 1e5).round() / 1e5
}

fn global_position(
    lat0: f64,
    lon0: f64,
    lat1: f64,
    lon1: f64,
    even_is_newer: bool,
) -> Option<Position> {
    let j = (59.0 * lat0 - 60.0 * lat1 + 0.5).floor();

    let wrap = |lat: f64| if lat >= 270.0 { lat - 360.0 } else { lat };
    let lat_even = wrap(360.0 / 60.0 * (j.rem_euclid(60.0) + lat0));
    let lat_odd = wrap(360.0 / 59.0 * (j.rem_euclid(59.0) + lat1));

    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let (lat, ni, lon_cpr) = if even_is_newer {
        (lat_even, nl(lat_even).max(1), lon0)
    } else {
        (lat_odd, nl(lat_odd).saturating_sub(1).max(1), lon1)
    };

    let zones = f64::from(nl(lat));
    let ni = f64::from(ni);
    let m = (lon0 * (zones - 1.0) - lon1 * zones + 0.5).floor();
    let mut lon = 360.0 / ni * (m.rem_euclid(ni) + lon_cpr);
    if lon > 180.0 {
        lon -= 360.0;
    }

    Some(Position {
        lat: round5(lat),
        lon: round5(lon),
    })
}
