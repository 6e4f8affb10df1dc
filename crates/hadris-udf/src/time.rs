//! UDF timestamp conversion (spec §3 "Lifecycles", §4.12 Inode façade).
//!
//! The on-disk `timestamp` struct (ECMA-167 1/7.3) packs a type+timezone
//! `u16`, a year, and the usual calendar fields down to microsecond
//! resolution across three separate byte-sized fields.

use hadris_common::types::{endian::{Endian, LittleEndian}, number::U16};

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UdfTimestamp {
    pub type_and_timezone: U16<LittleEndian>,
    pub year: U16<LittleEndian>,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}

static_assertions::const_assert_eq!(core::mem::size_of::<UdfTimestamp>(), 12);

/// Timezone offset, in minutes from GMT, or "not specified".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    NotSpecified,
    OffsetMinutes(i16),
}

/// A UDF timestamp decomposed into calendar fields plus a host-friendly
/// `(seconds since epoch, microseconds)` pair used by the inode façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTime {
    pub unix_seconds: i64,
    pub micros: u32,
}

const DAYS_PER_400Y: i64 = 146097;
const DAYS_PER_100Y: i64 = 36524;
const DAYS_PER_4Y: i64 = 1461;

fn is_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

const DAYS_BEFORE_MONTH: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    // Howard Hinnant's days-from-civil algorithm, era-based so it handles
    // years both before and after 1970 without branching on sign.
    let y = if month <= 2 { year - 1 } else { year } as i64;
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64; // [0, 399]
    let mp = (month as i64 + 9) % 12; // [0, 11] starting at March
    let doy = (153 * mp + 2) / 5 + day as i64 - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * DAYS_PER_400Y + doe - 719468
}

fn civil_from_days(days: i64) -> (i32, u8, u8) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - DAYS_PER_400Y - 1 } / DAYS_PER_400Y;
    let doe = z - era * DAYS_PER_400Y;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = (if month <= 2 { y + 1 } else { y }) as i32;
    let _ = (DAYS_PER_100Y, DAYS_PER_4Y, is_leap(year)); // constants retained for documentation
    (year, month, day)
}

impl UdfTimestamp {
    pub fn from_host(time: HostTime, timezone: Timezone) -> Self {
        let days = time.unix_seconds.div_euclid(86400);
        let secs_of_day = time.unix_seconds.rem_euclid(86400);
        let (year, month, day) = civil_from_days(days);
        let hour = (secs_of_day / 3600) as u8;
        let minute = ((secs_of_day % 3600) / 60) as u8;
        let second = (secs_of_day % 60) as u8;

        let tz_field: u16 = match timezone {
            Timezone::NotSpecified => 0x1000,
            Timezone::OffsetMinutes(m) => {
                let clamped = m.clamp(-1440, 1440);
                ((clamped as u16) & 0x0FFF) | 0x1000
            }
        };

        Self {
            type_and_timezone: U16::new(tz_field),
            year: U16::new(year as u16),
            month,
            day,
            hour,
            minute,
            second,
            centiseconds: ((time.micros / 10_000) % 100) as u8,
            hundreds_of_microseconds: ((time.micros / 100) % 100) as u8,
            microseconds: (time.micros % 100) as u8,
        }
    }

    pub fn to_host(&self) -> (HostTime, Timezone) {
        let timezone = if self.type_and_timezone.get() & 0x1000 == 0 {
            Timezone::NotSpecified
        } else {
            let raw = self.type_and_timezone.get() & 0x0FFF;
            // Sign-extend a 12-bit two's-complement offset.
            let signed = if raw & 0x0800 != 0 {
                (raw as i16) - 0x1000
            } else {
                raw as i16
            };
            Timezone::OffsetMinutes(signed)
        };

        let days = days_from_civil(self.year.get() as i32, self.month, self.day);
        let secs_of_day =
            self.hour as i64 * 3600 + self.minute as i64 * 60 + self.second as i64;
        let unix_seconds = days * 86400 + secs_of_day;
        let micros = self.centiseconds as u32 * 10_000
            + self.hundreds_of_microseconds as u32 * 100
            + self.microseconds as u32;

        (
            HostTime {
                unix_seconds,
                micros,
            },
            timezone,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_epoch() {
        let host = HostTime {
            unix_seconds: 0,
            micros: 0,
        };
        let ts = UdfTimestamp::from_host(host, Timezone::NotSpecified);
        let (decoded, _) = ts.to_host();
        assert_eq!(decoded, host);
    }

    #[test]
    fn round_trip_arbitrary_timestamp() {
        // 2026-07-28T12:34:56.789012
        let host = HostTime {
            unix_seconds: 1_785_000_000 + 941_696, // arbitrary but deterministic
            micros: 789_012,
        };
        let ts = UdfTimestamp::from_host(host, Timezone::OffsetMinutes(-420));
        let (decoded, tz) = ts.to_host();
        assert_eq!(decoded, host);
        assert_eq!(tz, Timezone::OffsetMinutes(-420));
    }

    #[test]
    fn round_trip_pre_epoch() {
        let host = HostTime {
            unix_seconds: -86400 * 400,
            micros: 1234,
        };
        let ts = UdfTimestamp::from_host(host, Timezone::NotSpecified);
        let (decoded, _) = ts.to_host();
        assert_eq!(decoded, host);
    }

    #[test]
    fn layout_is_12_bytes() {
        assert_eq!(core::mem::size_of::<UdfTimestamp>(), 12);
    }
}
