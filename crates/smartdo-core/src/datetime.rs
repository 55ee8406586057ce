use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Timelike,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "smartdo-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "SMARTDO_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "SMARTDO_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>
}

/// Timezone used to interpret calendar
/// days and bare dates. Resolved once per
/// process from `SMARTDO_TIMEZONE`, then
/// `smartdo-time.toml`, falling back to
/// UTC.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_project_date(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(project_timezone())
    .format("%d/%m/%Y")
    .to_string()
}

#[must_use]
pub fn format_project_day_title(
  date: NaiveDate
) -> String {
  date.format("%A, %b %d, %Y").to_string()
}

/// Drops sub-millisecond precision so a
/// value survives the epoch-millis wire
/// format unchanged.
#[must_use]
pub fn truncate_millis(
  dt: DateTime<Utc>
) -> DateTime<Utc> {
  let nanos = dt.nanosecond()
    % 1_000_000_000
    / 1_000_000
    * 1_000_000;
  dt.with_nanosecond(nanos).unwrap_or(dt)
}

/// Inclusive `[00:00:00.000,
/// 23:59:59.999]` bounds of a calendar
/// day in the project timezone.
pub fn day_bounds(
  date: NaiveDate
) -> anyhow::Result<(
  DateTime<Utc>,
  DateTime<Utc>
)> {
  day_bounds_in(project_timezone(), date)
}

/// Repeated wall-clock times resolve
/// outward so the bounds cover both
/// copies. A midnight or end of day that
/// falls in a gap moves to the nearest
/// instant that exists on that day.
fn day_bounds_in(
  tz: &Tz,
  date: NaiveDate
) -> anyhow::Result<(
  DateTime<Utc>,
  DateTime<Utc>
)> {
  let first_instant =
    NaiveTime::from_hms_opt(0, 0, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct start \
           of day"
        )
      })?;
  let last_instant =
    NaiveTime::from_hms_milli_opt(
      23, 59, 59, 999
    )
    .ok_or_else(|| {
      anyhow!(
        "failed to construct end of \
         day"
      )
    })?;
  let start = local_to_utc(
    tz,
    date.and_time(first_instant),
    Edge::Start,
    "start-of-day"
  )?;
  let end = local_to_utc(
    tz,
    date.and_time(last_instant),
    Edge::End,
    "end-of-day"
  )?;
  Ok((start, end))
}

fn resolve_project_timezone() -> Tz {
  let from_env =
    std::env::var(TIMEZONE_ENV_VAR)
      .ok()
      .map(|raw| {
        (
          TIMEZONE_ENV_VAR.to_string(),
          raw
        )
      });

  for (source, raw) in
    from_env.into_iter().chain(
      timezone_from_file()
    )
  {
    let id = raw.trim();
    if id.is_empty() {
      continue;
    }
    match id.parse::<Tz>() {
      | Ok(tz) => {
        tracing::info!(
          source,
          timezone = id,
          "configured project timezone"
        );
        return tz;
      }
      | Err(err) => {
        tracing::error!(
          source,
          timezone = id,
          error = %err,
          "unknown timezone id"
        );
      }
    }
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

/// `(source, raw id)` from
/// `SMARTDO_TIME_CONFIG` or
/// `./smartdo-time.toml`.
fn timezone_from_file()
-> Option<(String, String)> {
  let path =
    std::env::var(TIMEZONE_CONFIG_ENV_VAR)
      .ok()
      .filter(|raw| !raw.trim().is_empty())
      .map(|raw| {
        PathBuf::from(raw.trim())
      })
      .or_else(|| {
        std::env::current_dir().ok().map(
          |dir| {
            dir.join(TIMEZONE_CONFIG_FILE)
          }
        )
      })?;
  if !path.is_file() {
    return None;
  }

  let source =
    format!("file:{}", path.display());
  match read_timezone_file(&path) {
    | Ok(Some(id)) => Some((source, id)),
    | Ok(None) => {
      tracing::warn!(
        source,
        "timezone config has no \
         timezone key"
      );
      None
    }
    | Err(err) => {
      tracing::error!(
        source,
        error = %format!("{err:#}"),
        "ignoring timezone config"
      );
      None
    }
  }
}

fn read_timezone_file(
  path: &Path
) -> anyhow::Result<Option<String>> {
  let raw = fs::read_to_string(path)
    .with_context(|| {
      format!(
        "failed to read {}",
        path.display()
      )
    })?;
  let parsed: TimezoneConfig =
    toml::from_str(&raw)
      .context("invalid TOML")?;
  Ok(parsed.timezone)
}

/// Longest stretch of skipped local
/// time worth searching past. Covers
/// zones that dropped a whole day.
const MAX_GAP_MINUTES: i64 = 25 * 60;

/// Which instant a repeated or skipped
/// local time resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
  /// Earlier repeat, or the first
  /// valid time after a gap.
  Start,
  /// Later repeat, or the last valid
  /// time before a gap.
  End
}

fn local_to_utc(
  tz: &Tz,
  local_naive: NaiveDateTime,
  edge: Edge,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let step = match edge {
    | Edge::Start => Duration::minutes(1),
    | Edge::End => -Duration::minutes(1)
  };
  let mut candidate = local_naive;
  for _ in 0..=MAX_GAP_MINUTES {
    match tz.from_local_datetime(&candidate)
    {
      | LocalResult::Single(local_dt) => {
        if candidate != local_naive {
          tracing::debug!(
            context,
            requested = %local_naive,
            resolved = %candidate,
            "local datetime falls in a gap"
          );
        }
        return Ok(
          local_dt.with_timezone(&Utc)
        );
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        let chosen = match edge {
          | Edge::Start => first.min(second),
          | Edge::End => first.max(second)
        };
        tracing::debug!(
          context,
          ?edge,
          chosen = %chosen,
          "ambiguous local datetime"
        );
        return Ok(
          chosen.with_timezone(&Utc)
        );
      }
      | LocalResult::None => {
        candidate = candidate
          .checked_add_signed(step)
          .ok_or_else(|| {
            anyhow!(
              "local datetime out of \
               range: {context}"
            )
          })?;
      }
    }
  }
  Err(anyhow!(
    "local datetime does not exist in \
     configured timezone: {context}"
  ))
}

fn to_utc_from_project_local(
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  local_to_utc(
    project_timezone(),
    local_naive,
    Edge::Start,
    context
  )
}

fn local_midnight(
  date: NaiveDate,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct midnight \
         for {date}"
      )
    })?;
  to_utc_from_project_local(
    midnight, context
  )
}

/// Parses the date expressions accepted
/// by `due:` and `calendar`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_now =
    now.with_timezone(project_timezone());
  let today = local_now.date_naive();

  match lower.as_str() {
    | "now" => {
      return Ok(truncate_millis(now));
    }
    | "today" => {
      return local_midnight(
        today, "today"
      );
    }
    | "tomorrow" => {
      return local_midnight(
        today + Duration::days(1),
        "tomorrow"
      );
    }
    | "yesterday" => {
      return local_midnight(
        today - Duration::days(1),
        "yesterday"
      );
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return local_midnight(
      next_weekday_date(today, weekday),
      "weekday-name"
    );
  }

  if let Some(month) =
    parse_month_name(&lower)
  {
    let mut year = today.year();
    if month <= today.month() {
      year = year.saturating_add(1);
    }
    let first =
      NaiveDate::from_ymd_opt(
        year, month, 1
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid month/year \
           candidate"
        )
      })?;
    return local_midnight(
      first,
      "month-name"
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let time =
      NaiveTime::from_hms_opt(
        hour, minute, 0
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid clock time: {token}"
        )
      })?;
    let mut day = today;
    if day.and_time(time)
      <= local_now.naive_local()
    {
      day += Duration::days(1);
    }
    return to_utc_from_project_local(
      day.and_time(time),
      "clock-time"
    );
  }

  if let Some(offset) =
    parse_relative_offset(token)?
  {
    let shifted = now
      .checked_add_signed(offset)
      .ok_or_else(|| {
        anyhow!(
          "relative offset out of \
           range: {token}"
        )
      })?;
    return Ok(truncate_millis(shifted));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(truncate_millis(
      dt.with_timezone(&Utc)
    ));
  }

  for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, fmt
      )
    {
      return local_midnight(date, fmt);
    }
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_project_local(
        ndt, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     month names (e.g. march), clock \
     times (e.g. 3:30pm or 15:30), \
     +Nd/+Nh/+Nm, RFC3339, YYYY-MM-DD, \
     DD/MM/YYYY, YYYY-MM-DD HH:MM"
  })
}

/// Resolves a date expression to the
/// calendar day it falls on.
pub fn parse_day_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  parse_date_expr(input, now)
    .map(to_project_date)
}

const WEEKDAY_NAMES: [(&str, Weekday);
  7] = [
  ("monday", Weekday::Mon),
  ("tuesday", Weekday::Tue),
  ("wednesday", Weekday::Wed),
  ("thursday", Weekday::Thu),
  ("friday", Weekday::Fri),
  ("saturday", Weekday::Sat),
  ("sunday", Weekday::Sun)
];

const MONTH_NAMES: [&str; 12] = [
  "january",
  "february",
  "march",
  "april",
  "may",
  "june",
  "july",
  "august",
  "september",
  "october",
  "november",
  "december"
];

fn cached_regex(
  cell: &'static OnceLock<Option<Regex>>,
  pattern: &str
) -> Option<&'static Regex> {
  cell
    .get_or_init(|| Regex::new(pattern).ok())
    .as_ref()
}

/// `+3d`, `-2w`, `+90m`.
fn parse_relative_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  static RELATIVE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  let Some(caps) = cached_regex(
    &RELATIVE,
    r"^([+-])(\d+)([wdhm])$"
  )
  .and_then(|re| re.captures(token))
  else {
    return Ok(None);
  };

  let mut amount: i64 = caps[2]
    .parse()
    .context("relative offset is too large")?;
  if &caps[1] == "-" {
    amount = -amount;
  }
  let offset = match &caps[3] {
    | "w" => Duration::try_weeks(amount),
    | "d" => Duration::try_days(amount),
    | "h" => Duration::try_hours(amount),
    | _ => Duration::try_minutes(amount)
  };
  offset.map(Some).ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })
}

/// Full names or any prefix of at least
/// three letters.
fn is_name_prefix(
  token: &str,
  name: &str
) -> bool {
  token.len() >= 3
    && name.starts_with(token)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  WEEKDAY_NAMES
    .iter()
    .find(|(name, _)| {
      is_name_prefix(token, name)
    })
    .map(|(_, day)| *day)
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  let index = MONTH_NAMES
    .iter()
    .position(|name| {
      is_name_prefix(token, name)
    })?;
  u32::try_from(index + 1).ok()
}

/// Strictly after `from`: naming today's
/// weekday means a week from now.
fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let ahead = (target
    .num_days_from_monday()
    + 6
    - from.weekday().num_days_from_monday())
    % 7
    + 1;
  from
    .checked_add_signed(Duration::days(
      i64::from(ahead)
    ))
    .unwrap_or(from)
}

/// `15:30`, `3:30pm`, `3:30 PM`.
fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  static CLOCK: OnceLock<Option<Regex>> =
    OnceLock::new();
  let caps = cached_regex(
    &CLOCK,
    r"(?i)^(\d{1,2}):(\d{2})\s*([ap]m)?$"
  )?
  .captures(token.trim())?;

  let hour: u32 = caps[1].parse().ok()?;
  let minute: u32 = caps[2].parse().ok()?;
  let hour = match caps
    .get(3)
    .map(|m| m.as_str().to_ascii_lowercase())
  {
    | None => hour,
    | Some(_)
      if !(1..=12).contains(&hour) =>
    {
      return None;
    }
    | Some(suffix) if suffix == "pm" => {
      hour % 12 + 12
    }
    | Some(_) => hour % 12
  };
  (hour < 24 && minute < 60)
    .then_some((hour, minute))
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    day_bounds,
    day_bounds_in,
    parse_date_expr,
    parse_day_expr,
    to_project_date,
    truncate_millis
  };

  fn fixed_now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn parses_weekday_name() {
    let parsed = parse_date_expr(
      "wednesday",
      fixed_now()
    )
    .expect("parse weekday");
    assert_eq!(
      to_project_date(parsed)
        .format("%Y-%m-%d")
        .to_string(),
      "2026-02-18"
    );
  }

  #[test]
  fn month_name_rolls_to_next_year_once_passed()
   {
    let march = parse_date_expr(
      "march",
      fixed_now()
    )
    .expect("parse march");
    assert_eq!(
      to_project_date(march)
        .format("%Y-%m-%d")
        .to_string(),
      "2026-03-01"
    );

    let february = parse_date_expr(
      "feb",
      fixed_now()
    )
    .expect("parse feb");
    assert_eq!(
      to_project_date(february)
        .format("%Y-%m-%d")
        .to_string(),
      "2027-02-01"
    );
  }

  #[test]
  fn parses_slash_date_and_relative_days()
   {
    let day = parse_day_expr(
      "05/01/2026",
      fixed_now()
    )
    .expect("parse dd/mm/yyyy");
    assert_eq!(
      day,
      NaiveDate::from_ymd_opt(2026, 1, 5)
        .expect("valid date")
    );

    let later = parse_date_expr(
      "+3d",
      fixed_now()
    )
    .expect("parse relative");
    assert_eq!(
      later - fixed_now(),
      chrono::Duration::days(3)
    );

    let err = parse_date_expr(
      "+99999999999d",
      fixed_now()
    )
    .expect_err("past the calendar");
    assert!(
      err
        .to_string()
        .contains("out of range")
    );
  }

  #[test]
  fn clock_times_and_name_prefixes() {
    let afternoon = parse_date_expr(
      "3:30pm",
      fixed_now()
    )
    .expect("parse 12h clock");
    assert_eq!(
      afternoon,
      Utc
        .with_ymd_and_hms(
          2026, 2, 17, 15, 30, 0
        )
        .single()
        .expect("valid")
    );

    let morning = parse_date_expr(
      "09:00",
      fixed_now()
    )
    .expect("parse 24h clock");
    assert_eq!(
      to_project_date(morning),
      NaiveDate::from_ymd_opt(2026, 2, 18)
        .expect("valid date")
    );

    assert!(
      parse_date_expr("13:00pm", fixed_now())
        .is_err()
    );
    assert_eq!(
      parse_day_expr("thurs", fixed_now())
        .expect("weekday prefix"),
      NaiveDate::from_ymd_opt(2026, 2, 19)
        .expect("valid date")
    );
    assert!(
      parse_date_expr("fr", fixed_now())
        .is_err()
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_date_expr(
        "someday",
        fixed_now()
      )
      .is_err()
    );
  }

  #[test]
  fn day_bounds_cover_whole_day_inclusive()
   {
    let date =
      NaiveDate::from_ymd_opt(2026, 1, 5)
        .expect("valid date");
    let (start, end) = day_bounds(date)
      .expect("bounds");
    assert_eq!(
      (end - start).num_milliseconds(),
      24 * 60 * 60 * 1000 - 1
    );
    assert_eq!(to_project_date(start), date);
    assert_eq!(to_project_date(end), date);
  }

  fn utc_millis(
    y: i32,
    mo: u32,
    d: u32,
    h: u32,
    mi: u32,
    sec: u32,
    ms: u32
  ) -> chrono::DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, mo, d)
      .and_then(|date| {
        date.and_hms_milli_opt(
          h, mi, sec, ms
        )
      })
      .expect("valid utc")
      .and_utc()
  }

  #[test]
  fn day_bounds_survive_dst_edges() {
    let santiago = chrono_tz::America::Santiago;

    // 2019-09-08 skips from 00:00 to 01:00.
    let spring =
      NaiveDate::from_ymd_opt(2019, 9, 8)
        .expect("valid date");
    let (start, end) =
      day_bounds_in(&santiago, spring)
        .expect("bounds across a gap");
    assert_eq!(
      start,
      utc_millis(2019, 9, 8, 4, 0, 0, 0)
    );
    assert_eq!(
      end,
      utc_millis(2019, 9, 9, 2, 59, 59, 999)
    );

    // 2019-04-06 repeats 23:00 to 23:59.
    let autumn =
      NaiveDate::from_ymd_opt(2019, 4, 6)
        .expect("valid date");
    let (start, end) =
      day_bounds_in(&santiago, autumn)
        .expect("bounds across a repeat");
    assert_eq!(
      start,
      utc_millis(2019, 4, 6, 3, 0, 0, 0)
    );
    assert_eq!(
      end,
      utc_millis(2019, 4, 7, 3, 59, 59, 999)
    );
  }

  #[test]
  fn truncation_keeps_whole_millis() {
    let dt = Utc
      .timestamp_opt(1_700_000_000, 123_456_789)
      .single()
      .expect("valid timestamp");
    assert_eq!(
      truncate_millis(dt)
        .timestamp_subsec_nanos(),
      123_000_000
    );
  }
}

/// Serializes timestamps as integer
/// milliseconds since the Unix epoch, the
/// format task documents use on the wire.
pub mod epoch_millis_serde {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer
      .serialize_i64(dt.timestamp_millis())
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let millis =
      i64::deserialize(deserializer)?;
    DateTime::<Utc>::from_timestamp_millis(
      millis
    )
    .ok_or_else(|| {
      serde::de::Error::custom(format!(
        "timestamp out of range: \
         {millis}"
      ))
    })
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      match Option::<i64>::deserialize(
        deserializer
      )? {
        | Some(millis) => {
          DateTime::<Utc>::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| {
              serde::de::Error::custom(format!(
                "timestamp out of range: {millis}"
              ))
            })
        }
        | None => Ok(None)
      }
    }
  }
}
