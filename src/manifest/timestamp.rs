//! Chronological sort keys.
//!
//! Capture time is read in-process (EXIF for photos, the QuickTime/MP4
//! `mvhd` box for videos) so the result never depends on which date tools
//! the host has installed.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::media::MediaKind;

/// Seconds between 1904-01-01 (QuickTime epoch) and 1970-01-01.
const QUICKTIME_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Where a sort key came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Embedded,
    Modified,
    Fallback,
}

/// Sort key for `path` as Unix seconds: embedded capture time, else file
/// mtime, else 0.
pub fn sort_timestamp(path: &Path, kind: MediaKind) -> (i64, TimestampSource) {
    let embedded = match kind {
        MediaKind::Photo => exif_capture_time(path),
        MediaKind::Video => mvhd_creation_time(path),
        MediaKind::Unsupported => None,
    };
    if let Some(ts) = embedded {
        return (ts, TimestampSource::Embedded);
    }
    if let Some(ts) = modified_time(path) {
        return (ts, TimestampSource::Modified);
    }
    (0, TimestampSource::Fallback)
}

/// Read `DateTimeOriginal` (with `OffsetTimeOriginal` when present).
/// Times without an offset are taken as UTC.
pub fn exif_capture_time(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(&file);
    let exif_data = match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            return None;
        }
    };
    let field = exif_data.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let raw = ascii_value(&field.value)?;
    let offset = exif_data
        .get_field(exif::Tag::OffsetTimeOriginal, exif::In::PRIMARY)
        .and_then(|f| ascii_value(&f.value));
    parse_exif_datetime(&raw, offset.as_deref())
}

fn ascii_value(value: &exif::Value) -> Option<String> {
    match value {
        exif::Value::Ascii(parts) => parts
            .first()
            .map(|b| String::from_utf8_lossy(b).trim_end_matches('\0').trim().to_string()),
        _ => None,
    }
}

/// Parse `"YYYY:MM:DD HH:MM:SS"` with an optional `"+HH:MM"` offset.
pub fn parse_exif_datetime(raw: &str, offset: Option<&str>) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    if let Some(offset) = offset.and_then(parse_offset) {
        return offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp());
    }
    Some(Utc.from_utc_datetime(&naive).timestamp())
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    let (sign, rest) = match s.as_bytes().first().copied()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':')?;
    let secs = h.parse::<i32>().ok()? * 3600 + m.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * secs)
}

/// Read the movie header creation time from an MP4/QuickTime file.
pub fn mvhd_creation_time(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    let mut reader = BufReader::new(file);
    let (moov_start, moov_end) = find_box(&mut reader, 0, len, b"moov")?;
    let (mvhd_start, _) = find_box(&mut reader, moov_start, moov_end, b"mvhd")?;

    reader.seek(SeekFrom::Start(mvhd_start)).ok()?;
    let mut version_flags = [0u8; 4];
    reader.read_exact(&mut version_flags).ok()?;
    let creation = if version_flags[0] == 1 {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).ok()?;
        u64::from_be_bytes(buf)
    } else {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).ok()?;
        u64::from(u32::from_be_bytes(buf))
    };
    // Zero means "unset"; anything before 1970 is not a real capture time.
    if creation <= QUICKTIME_EPOCH_OFFSET {
        return None;
    }
    i64::try_from(creation - QUICKTIME_EPOCH_OFFSET).ok()
}

/// Scan sibling boxes in `[start, end)` for `kind`, returning the payload
/// range of the first match.
fn find_box<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    kind: &[u8; 4],
) -> Option<(u64, u64)> {
    let mut pos = start;
    while pos + 8 <= end {
        reader.seek(SeekFrom::Start(pos)).ok()?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).ok()?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let box_type = &header[4..8];
        let (header_len, size) = match size32 {
            0 => (8, end - pos),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large).ok()?;
                (16, u64::from_be_bytes(large))
            }
            n => (8, u64::from(n)),
        };
        if size < header_len {
            return None;
        }
        let box_end = pos.checked_add(size)?.min(end);
        if box_type == kind {
            return Some((pos + header_len, box_end));
        }
        pos = box_end;
    }
    None
}

fn modified_time(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).ok(),
        // Pre-1970 mtimes are treated as missing.
        Err(_) => None,
    }
}
