//! Day timelines rebuilt from the scan record history.
//!
//! A day is the local calendar day `[midnight, next midnight)` converted to
//! UTC, cut at "now" for today. The state a device carried into the day is
//! taken from the last record before midnight and passed in as the seed.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use lanwatch_core::types::{
    DayTimeline, DeviceId, DeviceTimeline, OnlinePeriod, ScanRecord, TimeRange,
};
use lanwatch_store::{Store, StoreError};

/// Online periods from records ordered by time.
///
/// `seed` is the online state carried into the window (`None` when the
/// device has no earlier record). A period still open after the last record
/// has no end.
pub fn build_periods(seed: Option<bool>, records: &[ScanRecord], window: &TimeRange) -> Vec<OnlinePeriod> {
    let mut periods = Vec::new();
    let mut open = (seed == Some(true)).then_some(window.start);

    for record in records.iter().filter(|r| window.contains(&r.scan_time)) {
        match (open, record.is_online) {
            (None, true) => open = Some(record.scan_time),
            (Some(start), false) => {
                periods.push(OnlinePeriod {
                    start_time: start,
                    end_time: Some(record.scan_time),
                });
                open = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        periods.push(OnlinePeriod {
            start_time: start,
            end_time: None,
        });
    }
    periods
}

/// UTC window of a local calendar day, cut at `now`. `None` for days that
/// have not started yet.
pub fn day_window<Tz: TimeZone>(date: NaiveDate, tz: &Tz, now: DateTime<Utc>) -> Option<TimeRange> {
    let start = local_midnight(date, tz);
    if start > now {
        return None;
    }
    let next = date
        .succ_opt()
        .map(|d| local_midnight(d, tz))
        .unwrap_or(start + Duration::days(1));
    Some(TimeRange::new(start, next.min(now)))
}

/// First instant of `date` in `tz`. Where midnight falls in a DST gap the
/// day starts at the first valid hour.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    (0..3)
        .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
        .find_map(|time| {
            date.and_time(time)
                .and_local_timezone(tz.clone())
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

/// Timeline of one day for every device, or a single one.
pub fn build_day<Tz: TimeZone>(
    store: &dyn Store,
    date: NaiveDate,
    tz: &Tz,
    now: DateTime<Utc>,
    device: Option<&DeviceId>,
) -> Result<DayTimeline, StoreError> {
    let mut devices = store.query_devices()?;
    if let Some(id) = device {
        devices.retain(|d| d.id == *id);
        if devices.is_empty() {
            return Err(StoreError::DeviceNotFound(id.to_string()));
        }
    }

    let window = day_window(date, tz, now);
    let mut timelines = Vec::with_capacity(devices.len());
    for device in devices {
        let online_periods = match &window {
            Some(window) => {
                let seed = store
                    .last_record_before(&device.id, window.start)?
                    .map(|r| r.is_online);
                let records = store.query_records(&device.id, window)?;
                build_periods(seed, &records, window)
            }
            None => Vec::new(),
        };
        timelines.push(DeviceTimeline {
            device_id: device.id,
            device_name: device.display_name(),
            ip_address: device.ip.to_string(),
            online_periods,
        });
    }

    Ok(DayTimeline {
        date,
        devices: timelines,
    })
}
