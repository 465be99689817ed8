//! `file:directory/name` addressing of histogram objects.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ltt_core::{Error, Result};

/// Location of one histogram: a file plus an object path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistogramPath {
    /// File holding the histogram.
    pub file: PathBuf,
    /// Object path inside the file (`directory/name`, directory may be empty).
    pub object: String,
}

impl HistogramPath {
    /// Build a path from its three components.
    pub fn new(file: impl Into<PathBuf>, directory: &str, name: &str) -> Self {
        let directory = directory.trim_matches('/');
        let object =
            if directory.is_empty() { name.to_string() } else { format!("{}/{}", directory, name) };
        Self { file: file.into(), object }
    }

    /// The file component.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Directory part of the object path (empty at top level).
    pub fn directory(&self) -> &str {
        self.object.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
    }

    /// Histogram name (last object path component).
    pub fn name(&self) -> &str {
        self.object.rsplit_once('/').map(|(_, n)| n).unwrap_or(&self.object)
    }
}

impl fmt::Display for HistogramPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.object)
    }
}

impl FromStr for HistogramPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (file, object) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Parse(format!("histogram path '{}' has no ':' separator", s)))?;
        let object = object.trim_matches('/');
        if file.is_empty() || object.is_empty() {
            return Err(Error::Parse(format!("histogram path '{}' is incomplete", s)));
        }
        Ok(Self { file: PathBuf::from(file), object: object.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p: HistogramPath = "inputs/UL17/muo/TTbar.json:Pass_pt_300to400/mass".parse().unwrap();
        assert_eq!(p.file(), Path::new("inputs/UL17/muo/TTbar.json"));
        assert_eq!(p.directory(), "Pass_pt_300to400");
        assert_eq!(p.name(), "mass");
        assert_eq!(p.to_string(), "inputs/UL17/muo/TTbar.json:Pass_pt_300to400/mass");
    }

    #[test]
    fn top_level_object() {
        let p = HistogramPath::new("a.json", "", "data_obs");
        assert_eq!(p.directory(), "");
        assert_eq!(p.name(), "data_obs");
        assert_eq!(p.to_string(), "a.json:data_obs");
    }

    #[test]
    fn missing_separator_is_parse_error() {
        assert!(matches!("a.json".parse::<HistogramPath>(), Err(Error::Parse(_))));
        assert!("a.json:".parse::<HistogramPath>().is_err());
    }
}
