//! Platform and output-format vocabulary (spec.md §3).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Twitter,
    Facebook,
    Instagram,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Other => "other",
        }
    }

    pub fn all() -> &'static [Platform] {
        &[
            Platform::Youtube,
            Platform::Tiktok,
            Platform::Twitter,
            Platform::Facebook,
            Platform::Instagram,
            Platform::Other,
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Platform::Youtube),
            "tiktok" => Ok(Platform::Tiktok),
            "twitter" | "x" => Ok(Platform::Twitter),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "other" => Ok(Platform::Other),
            other => Err(format!("unrecognized platform: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Mp3,
    Mp4,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Mp3 => "mp3",
            Format::Mp4 => "mp4",
        }
    }

    /// Quality tokens valid for this format (spec.md §3).
    pub fn quality_options(&self) -> &'static [&'static str] {
        match self {
            Format::Mp3 => &["128", "192", "320"],
            Format::Mp4 => &["360", "720", "1080"],
        }
    }

    pub fn is_valid_quality(&self, quality: &str) -> bool {
        self.quality_options().contains(&quality)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(Format::Mp3),
            "mp4" => Ok(Format::Mp4),
            other => Err(format!("unsupported format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_options_match_spec() {
        assert_eq!(Format::Mp3.quality_options(), &["128", "192", "320"]);
        assert_eq!(Format::Mp4.quality_options(), &["360", "720", "1080"]);
        assert!(Format::Mp3.is_valid_quality("192"));
        assert!(!Format::Mp3.is_valid_quality("720"));
    }

    #[test]
    fn platform_round_trips_through_str() {
        for p in Platform::all() {
            let parsed: Platform = p.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), p.as_str());
        }
    }
}
