//! ISO-8601 durations as used by the time entry API ("PT1H30M").

/// Decimal hours to an ISO-8601 duration, rounded to whole minutes.
pub fn to_iso8601(hours: f64) -> String {
  let total_minutes = (hours * 60.0).round().max(0.0) as u64;
  let (h, m) = (total_minutes / 60, total_minutes % 60);

  match (h, m) {
    (h, 0) => format!("PT{}H", h),
    (0, m) => format!("PT{}M", m),
    (h, m) => format!("PT{}H{}M", h, m),
  }
}

/// ISO-8601 duration to decimal hours. Only the time part is read;
/// anything unparseable counts as zero.
pub fn from_iso8601(duration: &str) -> f64 {
  let Some((_, time)) = duration.split_once('T') else {
    return 0.0;
  };

  let mut hours = 0.0;
  let mut number = String::new();
  for c in time.chars() {
    match c {
      '0'..='9' | '.' => number.push(c),
      'H' | 'M' | 'S' => {
        let value: f64 = number.parse().unwrap_or(0.0);
        hours += match c {
          'H' => value,
          'M' => value / 60.0,
          _ => value / 3600.0,
        };
        number.clear();
      }
      _ => number.clear(),
    }
  }
  hours
}

/// Decimal hours as "Xh Ym".
pub fn format_hours(hours: f64) -> String {
  let total_minutes = (hours * 60.0).round().max(0.0) as u64;
  let (h, m) = (total_minutes / 60, total_minutes % 60);

  match (h, m) {
    (0, m) => format!("{}m", m),
    (h, 0) => format!("{}h", h),
    (h, m) => format!("{}h {}m", h, m),
  }
}

/// Seconds as "HH:MM:SS", the timer display format.
pub fn format_clock(seconds: u64) -> String {
  format!(
    "{:02}:{:02}:{:02}",
    seconds / 3600,
    (seconds % 3600) / 60,
    seconds % 60
  )
}
