// FAT-packed 16-bit date/time pairs
// date: bits 15-9 year since 1980, 8-5 month, 4-0 day
// time: bits 15-11 hour, 10-5 minute, 4-0 seconds/2

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

/// Encode a timestamp into the packed (date, time) pair.
pub fn encode_datetime(dt: NaiveDateTime) -> (u16, u16) {
    let year = dt.year().clamp(1980, 2107) as u16;
    let date = ((year - 1980) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, time)
}

/// Decode a packed date; zero (and any out-of-range value) decodes to `None`.
pub fn decode_date(date: u16) -> Option<NaiveDate> {
    if date == 0 {
        return None;
    }
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decode a packed (date, time) pair.
pub fn decode_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let day = decode_date(date)?;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    day.and_hms_opt(hour, minute, second)
}

/// Current local time, at the resolution FAT can store.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
