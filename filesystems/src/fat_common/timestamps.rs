// Timestamp handling for FAT directory entries
// FAT stores MS-DOS packed dates and times; these helpers keep the packing explicit

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

/// Calendar date as stored in a FAT entry (year 1980..=2107).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// Time of day; FAT keeps seconds at 2s granularity plus optional tenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millis: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatDateTime {
    pub date: FatDate,
    pub time: FatTime,
}

impl FatDate {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// bits 15-9: year - 1980, bits 8-5: month, bits 4-0: day
    pub fn encode(&self) -> u16 {
        let year = self.year.clamp(1980, 2107) - 1980;
        ((year & 0x7F) << 9) | (((self.month & 0x0F) as u16) << 5) | ((self.day & 0x1F) as u16)
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            year: ((raw >> 9) & 0x7F) + 1980,
            month: ((raw >> 5) & 0x0F) as u8,
            day: (raw & 0x1F) as u8,
        }
    }
}

impl FatTime {
    pub const fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self { hour, minute, second, millis: 0 }
    }

    /// bits 15-11: hours, bits 10-5: minutes, bits 4-0: seconds/2
    pub fn encode(&self) -> u16 {
        (((self.hour & 0x1F) as u16) << 11)
            | (((self.minute & 0x3F) as u16) << 5)
            | (((self.second / 2) & 0x1F) as u16)
    }

    /// Sub-2-second remainder in 10ms units, as kept in the creation-time byte.
    pub fn encode_tenths(&self) -> u8 {
        let extra = (self.second % 2) as u16 * 1000 + self.millis.min(999);
        (extra / 10).min(199) as u8
    }

    pub fn decode(raw: u16) -> Self {
        Self {
            hour: ((raw >> 11) & 0x1F) as u8,
            minute: ((raw >> 5) & 0x3F) as u8,
            second: ((raw & 0x1F) * 2) as u8,
            millis: 0,
        }
    }

    pub fn decode_with_tenths(raw: u16, tenths: u8) -> Self {
        let mut time = Self::decode(raw);
        let extra = (tenths as u16).min(199) * 10;
        time.second += (extra / 1000) as u8;
        time.millis = extra % 1000;
        time
    }
}

impl FatDateTime {
    pub const fn new(date: FatDate, time: FatTime) -> Self {
        Self { date, time }
    }

    pub fn from_chrono(dt: &NaiveDateTime) -> Self {
        Self {
            date: FatDate {
                year: dt.year().clamp(1980, 2107) as u16,
                month: dt.month() as u8,
                day: dt.day() as u8,
            },
            time: FatTime {
                hour: dt.hour() as u8,
                minute: dt.minute() as u8,
                second: dt.second() as u8,
                millis: (dt.nanosecond() / 1_000_000).min(999) as u16,
            },
        }
    }

    pub fn to_chrono(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.date.year as i32, self.date.month as u32, self.date.day as u32)?
            .and_hms_milli_opt(
                self.time.hour as u32,
                self.time.minute as u32,
                self.time.second as u32,
                self.time.millis as u32,
            )
    }

    /// Local wall clock of the host.
    pub fn now() -> Self {
        Self::from_chrono(&Local::now().naive_local())
    }
}

impl Default for FatDateTime {
    /// The clock a fresh mount starts with until the host sets one.
    fn default() -> Self {
        Self {
            date: FatDate::new(2026, 1, 1),
            time: FatTime::new(12, 0, 0),
        }
    }
}

impl std::fmt::Display for FatDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.date.year, self.date.month, self.date.day,
            self.time.hour, self.time.minute, self.time.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_packing() {
        let date = FatDate::new(2024, 1, 15);
        let raw = date.encode();
        assert_eq!(raw, (44 << 9) | (1 << 5) | 15);
        assert_eq!(FatDate::decode(raw), date);
    }

    #[test]
    fn test_date_clamps_to_fat_range() {
        assert_eq!(FatDate::decode(FatDate::new(1970, 6, 1).encode()).year, 1980);
        assert_eq!(FatDate::decode(FatDate::new(2200, 6, 1).encode()).year, 2107);
    }

    #[test]
    fn test_time_halves_seconds() {
        let raw = FatTime::new(14, 30, 59).encode();
        let back = FatTime::decode(raw);
        assert_eq!((back.hour, back.minute, back.second), (14, 30, 58));
    }

    #[test]
    fn test_tenths_restore_odd_second() {
        let time = FatTime { hour: 9, minute: 5, second: 7, millis: 250 };
        let back = FatTime::decode_with_tenths(time.encode(), time.encode_tenths());
        assert_eq!(back.second, 7);
        assert_eq!(back.millis, 250);
    }

    #[test]
    fn test_chrono_conversion() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap().and_hms_opt(8, 7, 6).unwrap();
        let fat = FatDateTime::from_chrono(&dt);
        assert_eq!(fat.to_string(), "2024-03-09 08:07:06");
        assert_eq!(fat.to_chrono(), Some(dt));
    }

    #[test]
    fn test_default_clock() {
        assert_eq!(FatDateTime::default().to_string(), "2026-01-01 12:00:00");
    }
}
