//! URI-style address codec.
//!
//! Bidirectional mapping between a `(resource_id, Location)` pair and a
//! canonical address string — the one stable citation format surfaced to
//! callers:
//!
//! ```text
//! doc://calculus_book#pages=12-13
//! video://lecture1#t=03:12-03:50
//! audio://podcast#t=60-120
//! image://diagram#bbox=0.2,0.3,0.8,0.7
//! text://module#lines=10-20
//! ```
//!
//! [`parse_address`] and [`build_address`] are inverses for every valid
//! location, up to page-list sorting and time formatting (both `t=192-230`
//! and `t=03:12-03:50` parse to the same numeric seconds).

use thiserror::Error;

use crate::models::{Location, Modality};

/// Address parsing failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("unknown address scheme '{0}' (expected doc, video, audio, image, text, virtual)")]
    UnknownScheme(String),
    #[error("malformed address fragment: {0}")]
    MalformedFragment(String),
}

fn scheme_for(modality: Modality) -> &'static str {
    match modality {
        Modality::Document => "doc",
        Modality::Video => "video",
        Modality::Audio => "audio",
        Modality::Image => "image",
        Modality::Text => "text",
        Modality::Virtual => "virtual",
    }
}

fn modality_for(scheme: &str) -> Option<Modality> {
    match scheme {
        "doc" => Some(Modality::Document),
        "video" => Some(Modality::Video),
        "audio" => Some(Modality::Audio),
        "image" => Some(Modality::Image),
        "text" => Some(Modality::Text),
        "virtual" => Some(Modality::Virtual),
        _ => None,
    }
}

/// Build the canonical address for a location within a resource.
///
/// Contiguous page runs collapse to `pages=start-end`; sparse page sets are
/// comma-separated. Whole-second timestamps format as `HH:MM:SS` / `MM:SS`.
/// Virtual addresses pass through verbatim (an empty one falls back to
/// `virtual://{resource_id}`).
pub fn build_address(resource_id: &str, location: &Location) -> String {
    match location {
        Location::Virtual { virtual_address } => {
            if virtual_address.is_empty() {
                format!("virtual://{}", resource_id)
            } else {
                virtual_address.clone()
            }
        }
        Location::Document { pages } => {
            let mut sorted = pages.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let fragment = if is_contiguous(&sorted) {
                format!("pages={}-{}", sorted[0], sorted[sorted.len() - 1])
            } else {
                let parts: Vec<String> = sorted.iter().map(|p| p.to_string()).collect();
                format!("pages={}", parts.join(","))
            };
            format!("doc://{}#{}", resource_id, fragment)
        }
        Location::Video { start, end } | Location::Audio { start, end } => {
            format!(
                "{}://{}#t={}-{}",
                scheme_for(location.modality()),
                resource_id,
                format_time(*start),
                format_time(*end)
            )
        }
        Location::Text { lines: (start, end) } => {
            format!("text://{}#lines={}-{}", resource_id, start, end)
        }
        Location::Image { bbox: (x1, y1, x2, y2) } => {
            format!("image://{}#bbox={},{},{},{}", resource_id, x1, y1, x2, y2)
        }
    }
}

/// Parse a canonical address into `(resource_id, Location)`.
pub fn parse_address(address: &str) -> Result<(String, Location), AddressError> {
    let (scheme, rest) = address
        .split_once("://")
        .ok_or_else(|| AddressError::MalformedFragment(format!("not an address: {}", address)))?;

    let modality =
        modality_for(scheme).ok_or_else(|| AddressError::UnknownScheme(scheme.to_string()))?;

    let (resource_id, fragment) = match rest.split_once('#') {
        Some((rid, frag)) => (rid, Some(frag)),
        None => (rest, None),
    };
    if resource_id.is_empty() {
        return Err(AddressError::MalformedFragment(
            "missing resource id".to_string(),
        ));
    }

    if modality == Modality::Virtual {
        // Virtual addresses are opaque; the whole string is the location.
        return Ok((
            resource_id.to_string(),
            Location::Virtual { virtual_address: address.to_string() },
        ));
    }

    let fragment = fragment.ok_or_else(|| {
        AddressError::MalformedFragment(format!("{} address requires a fragment", scheme))
    })?;

    let value = fragment_value(fragment, modality)?;

    let location = match modality {
        Modality::Document => Location::Document { pages: parse_pages(value)? },
        Modality::Video | Modality::Audio => {
            let (start, end) = parse_time_range(value)?;
            if modality == Modality::Video {
                Location::Video { start, end }
            } else {
                Location::Audio { start, end }
            }
        }
        Modality::Text => Location::Text { lines: parse_lines(value)? },
        Modality::Image => Location::Image { bbox: parse_bbox(value)? },
        Modality::Virtual => unreachable!("handled above"),
    };

    Ok((resource_id.to_string(), location))
}

/// Pick the fragment parameter this modality expects (`pages=`, `t=`, …).
fn fragment_value(fragment: &str, modality: Modality) -> Result<&str, AddressError> {
    let key = match modality {
        Modality::Document => "pages",
        Modality::Video | Modality::Audio => "t",
        Modality::Text => "lines",
        Modality::Image => "bbox",
        Modality::Virtual => unreachable!(),
    };
    for part in fragment.split('&') {
        if let Some((k, v)) = part.split_once('=') {
            if k == key {
                return Ok(v);
            }
        }
    }
    Err(AddressError::MalformedFragment(format!(
        "expected '{}=' parameter in '{}'",
        key, fragment
    )))
}

fn is_contiguous(sorted: &[u32]) -> bool {
    !sorted.is_empty() && sorted.windows(2).all(|w| w[1] == w[0] + 1)
}

fn parse_u32(s: &str, what: &str) -> Result<u32, AddressError> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| AddressError::MalformedFragment(format!("invalid {}: '{}'", what, s)))
}

fn parse_pages(value: &str) -> Result<Vec<u32>, AddressError> {
    if let Some((start, end)) = value.split_once('-') {
        let start = parse_u32(start, "page number")?;
        let end = parse_u32(end, "page number")?;
        if end < start {
            return Err(AddressError::MalformedFragment(format!(
                "page range end before start: '{}'",
                value
            )));
        }
        Ok((start..=end).collect())
    } else {
        value
            .split(',')
            .map(|p| parse_u32(p, "page number"))
            .collect()
    }
}

fn parse_lines(value: &str) -> Result<(u32, u32), AddressError> {
    let (start, end) = value.split_once('-').ok_or_else(|| {
        AddressError::MalformedFragment(format!("expected 'start-end' line range, got '{}'", value))
    })?;
    let start = parse_u32(start, "line number")?;
    let end = parse_u32(end, "line number")?;
    if end < start {
        return Err(AddressError::MalformedFragment(format!(
            "line range end before start: '{}'",
            value
        )));
    }
    Ok((start, end))
}

fn parse_time_range(value: &str) -> Result<(f64, f64), AddressError> {
    let (start, end) = value.split_once('-').ok_or_else(|| {
        AddressError::MalformedFragment(format!("expected 'start-end' time range, got '{}'", value))
    })?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    if end <= start {
        return Err(AddressError::MalformedFragment(format!(
            "time range end not after start: '{}'",
            value
        )));
    }
    Ok((start, end))
}

fn parse_bbox(value: &str) -> Result<(f64, f64, f64, f64), AddressError> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 4 {
        return Err(AddressError::MalformedFragment(format!(
            "bbox must have 4 values, got {}",
            parts.len()
        )));
    }
    let mut vals = [0.0f64; 4];
    for (i, part) in parts.iter().enumerate() {
        vals[i] = part.trim().parse::<f64>().map_err(|_| {
            AddressError::MalformedFragment(format!("invalid bbox value: '{}'", part))
        })?;
    }
    Ok((vals[0], vals[1], vals[2], vals[3]))
}

/// Parse a timestamp in seconds. Accepts bare numbers (`192`, `192.5`) and
/// colon-delimited forms (`MM:SS`, `HH:MM:SS`).
pub fn parse_time(value: &str) -> Result<f64, AddressError> {
    let value = value.trim();
    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        let (h, m, s) = match parts.len() {
            3 => (parts[0], parts[1], parts[2]),
            2 => ("0", parts[0], parts[1]),
            _ => {
                return Err(AddressError::MalformedFragment(format!(
                    "invalid timestamp: '{}'",
                    value
                )))
            }
        };
        let hours = parse_u32(h, "hours")? as f64;
        let minutes = parse_u32(m, "minutes")? as f64;
        let seconds = s.trim().parse::<f64>().map_err(|_| {
            AddressError::MalformedFragment(format!("invalid seconds: '{}'", s))
        })?;
        Ok(hours * 3600.0 + minutes * 60.0 + seconds)
    } else {
        value
            .parse::<f64>()
            .map_err(|_| AddressError::MalformedFragment(format!("invalid timestamp: '{}'", value)))
    }
}

/// Format seconds compactly: whole seconds become `HH:MM:SS` above an hour,
/// `MM:SS` above a minute, a bare integer below; fractional seconds stay as
/// bare numbers.
pub fn format_time(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds >= 0.0 {
        let total = seconds as u64;
        if total >= 3600 {
            return format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60);
        }
        if total >= 60 {
            return format!("{:02}:{:02}", total / 60, total % 60);
        }
        return total.to_string();
    }
    seconds.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_contiguous_pages() {
        let addr = build_address("book", &Location::Document { pages: vec![3, 4, 5] });
        assert_eq!(addr, "doc://book#pages=3-5");
    }

    #[test]
    fn test_build_sparse_pages() {
        let addr = build_address("book", &Location::Document { pages: vec![7, 2, 5] });
        assert_eq!(addr, "doc://book#pages=2,5,7");
    }

    #[test]
    fn test_pages_round_trip() {
        for pages in [vec![1, 2, 3], vec![2, 5, 7], vec![4]] {
            let loc = Location::Document { pages: pages.clone() };
            let (rid, parsed) = parse_address(&build_address("r", &loc)).unwrap();
            assert_eq!(rid, "r");
            assert_eq!(parsed, loc);
        }
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(42.0), "42");
        assert_eq!(format_time(192.0), "03:12");
        assert_eq!(format_time(3661.0), "01:01:01");
        assert_eq!(format_time(12.5), "12.5");
    }

    #[test]
    fn test_time_parse_both_forms() {
        assert_eq!(parse_time("192").unwrap(), 192.0);
        assert_eq!(parse_time("03:12").unwrap(), 192.0);
        assert_eq!(parse_time("01:01:01").unwrap(), 3661.0);
        assert_eq!(parse_time("12.5").unwrap(), 12.5);
    }

    #[test]
    fn test_video_round_trip() {
        for loc in [
            Location::Video { start: 192.0, end: 230.0 },
            Location::Video { start: 12.5, end: 3661.0 },
        ] {
            let (rid, parsed) = parse_address(&build_address("lecture", &loc)).unwrap();
            assert_eq!(rid, "lecture");
            assert_eq!(parsed, loc);
        }
    }

    #[test]
    fn test_audio_scheme() {
        let addr = build_address("pod", &Location::Audio { start: 60.0, end: 120.0 });
        assert_eq!(addr, "audio://pod#t=01:00-02:00");
        let (_, parsed) = parse_address(&addr).unwrap();
        assert_eq!(parsed, Location::Audio { start: 60.0, end: 120.0 });
    }

    #[test]
    fn test_bbox_round_trip() {
        let loc = Location::Image { bbox: (0.2, 0.3, 0.8, 0.7) };
        let addr = build_address("diagram", &loc);
        assert_eq!(addr, "image://diagram#bbox=0.2,0.3,0.8,0.7");
        let (rid, parsed) = parse_address(&addr).unwrap();
        assert_eq!(rid, "diagram");
        assert_eq!(parsed, loc);
    }

    #[test]
    fn test_lines_round_trip() {
        let loc = Location::Text { lines: (10, 20) };
        let addr = build_address("module", &loc);
        assert_eq!(addr, "text://module#lines=10-20");
        assert_eq!(parse_address(&addr).unwrap().1, loc);
    }

    #[test]
    fn test_virtual_passthrough() {
        let loc = Location::Virtual { virtual_address: "virtual://kb#entity_42".to_string() };
        assert_eq!(build_address("kb", &loc), "virtual://kb#entity_42");

        let (rid, parsed) = parse_address("virtual://kb#entity_42").unwrap();
        assert_eq!(rid, "kb");
        assert_eq!(
            parsed,
            Location::Virtual { virtual_address: "virtual://kb#entity_42".to_string() }
        );
    }

    #[test]
    fn test_unknown_scheme() {
        assert_eq!(
            parse_address("ftp://thing#pages=1-2"),
            Err(AddressError::UnknownScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_malformed_fragments() {
        assert!(matches!(
            parse_address("doc://book"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("doc://book#t=1-2"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("image://pic#bbox=0.1,0.2,0.3"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("video://v#t=abc-def"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("doc://book#pages=5-2"),
            Err(AddressError::MalformedFragment(_))
        ));
    }

    // Inverted ranges must fail at parse time, not surface as Locations
    // that fail validation downstream.
    #[test]
    fn test_inverted_ranges_rejected() {
        assert!(matches!(
            parse_address("text://x#lines=5-2"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("video://v#t=30-10"),
            Err(AddressError::MalformedFragment(_))
        ));
        assert!(matches!(
            parse_address("audio://a#t=10-10"),
            Err(AddressError::MalformedFragment(_))
        ));
        // Equal line endpoints are a valid single-line range.
        assert_eq!(
            parse_address("text://x#lines=3-3").unwrap().1,
            Location::Text { lines: (3, 3) }
        );
    }
}
