use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_LOG_FILE: &str = "hotswap.log";

/// Relative log paths live next to the project, not the caller's cwd.
pub fn resolve_log_path(project_dir: &Path, file: &Path) -> PathBuf {
	if file.is_absolute() {
		file.to_path_buf()
	} else {
		project_dir.join(file)
	}
}

pub fn epoch_secs(time: SystemTime) -> u64 {
	time.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// `YYYY-MM-DD HH:MM:SS`, UTC.
pub fn format_timestamp(time: SystemTime) -> String {
	let (year, month, day, hour, minute, second) = secs_to_datetime(epoch_secs(time));
	format!(
		"{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
		year, month, day, hour, minute, second
	)
}

pub fn format_line(time: SystemTime, message: &str) -> String {
	format!("[{}] {}", format_timestamp(time), message)
}

pub fn secs_to_datetime(secs: u64) -> (u32, u32, u32, u32, u32, u32) {
	let days = (secs / 86400) as i64;
	let time_of_day = secs % 86400;
	let hour = (time_of_day / 3600) as u32;
	let minute = ((time_of_day % 3600) / 60) as u32;
	let second = (time_of_day % 60) as u32;

	let z = days + 719468;
	let era = if z >= 0 { z } else { z - 146096 } / 146097;
	let doe = (z - era * 146097) as u32;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let y = yoe as i64 + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = doy - (153 * mp + 2) / 5 + 1;
	let m = if mp < 10 { mp + 3 } else { mp - 9 };
	let y = if m <= 2 { y + 1 } else { y };

	(y as u32, m, d, hour, minute, second)
}
