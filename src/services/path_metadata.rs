//! Metadata inferred from where a file sits in the watched tree
//!
//! Teachers drop exports into `root/<entity>/<date>/<file>`, sometimes with
//! topic folders in between (`root/<entity>/<topic>/<sub>/<date>/<file>`).
//! Nothing but the path is available, so every field here is a guess.

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid regex"));
static LOOSE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[._\- ]?(\d{2})[._\- ]?(\d{2})").expect("valid regex"));
static DIGITS_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d._\- ]+$").expect("valid regex"));

/// A file picked up from the watched tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub basename: String,
}

impl WatchedFile {
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let basename = path.file_name()?.to_str()?.to_string();
        Some(Self { path, basename })
    }

    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Lowercased extension, empty when there is none
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }
}

/// Where the session date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// `YYYY-MM-DD` in the folder directly below the entity folder
    DateFolder,
    /// Looser pattern found somewhere else in the path
    PathSegment,
    /// Nothing date-like in the path; the processing date was used
    Today,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMetadata {
    pub entity_folder: String,
    pub date: NaiveDate,
    pub date_source: DateSource,
    pub topic_candidate: String,
    /// Segments below the root, filename last
    pub path_segments: Vec<String>,
}

/// A named test for "this folder name is a date, not a topic"
pub struct DateShapeRule {
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
}

fn has_iso_date(segment: &str) -> bool {
    ISO_DATE.is_match(segment)
}

fn has_loose_date(segment: &str) -> bool {
    find_date(&LOOSE_DATE, segment).is_some()
}

fn is_digits_only(segment: &str) -> bool {
    DIGITS_ONLY.is_match(segment)
}

/// Checked in order; the first match names the shape
pub const DATE_SHAPE_RULES: &[DateShapeRule] = &[
    DateShapeRule { name: "iso-date", matches: has_iso_date },
    DateShapeRule { name: "loose-date", matches: has_loose_date },
    DateShapeRule { name: "digits-only", matches: is_digits_only },
];

/// Name of the first date-shape rule the segment satisfies
pub fn date_shape(segment: &str) -> Option<&'static str> {
    DATE_SHAPE_RULES
        .iter()
        .find(|rule| (rule.matches)(segment))
        .map(|rule| rule.name)
}

pub fn is_date_shaped(segment: &str) -> bool {
    date_shape(segment).is_some()
}

/// First match of `pattern` in `text` that is a real calendar date
fn find_date(pattern: &Regex, text: &str) -> Option<NaiveDate> {
    pattern.captures_iter(text).find_map(|caps| {
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = caps.get(2)?.as_str().parse().ok()?;
        let day = caps.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Segments of `path` below `root`, or None when the path is outside it
pub fn relative_segments(path: &Path, root: &Path) -> Option<Vec<String>> {
    let relative = path.strip_prefix(root).ok()?;
    Some(
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect(),
    )
}

/// Infer entity, date and topic from a path.
///
/// Returns None when there are fewer than three segments below `root`
/// (entity folder, date folder, file). `today` is used when the path holds
/// no date at all.
pub fn extract(path: &Path, root: &Path, today: NaiveDate) -> Option<ParsedMetadata> {
    let segments = relative_segments(path, root)?;
    if segments.len() < 3 {
        debug!(path = %path.display(), segments = segments.len(), "Path too shallow to parse");
        return None;
    }

    let (date, date_source) = if let Some(date) = find_date(&ISO_DATE, &segments[1]) {
        (date, DateSource::DateFolder)
    } else if let Some(date) = segments.iter().find_map(|s| find_date(&LOOSE_DATE, s)) {
        (date, DateSource::PathSegment)
    } else {
        (today, DateSource::Today)
    };

    let entity_folder = segments[0].clone();
    let folders = &segments[..segments.len() - 1];
    let topic_candidate = folders
        .iter()
        .rev()
        .find(|segment| !is_date_shaped(segment))
        .cloned()
        .unwrap_or_else(|| entity_folder.clone());

    Some(ParsedMetadata {
        entity_folder,
        date,
        date_source,
        topic_candidate,
        path_segments: segments,
    })
}
