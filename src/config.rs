use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Whether bounding boxes are derived and handed to the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeomProc {
    #[default]
    None,
    BBox,
}

impl FromStr for GeomProc {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Error> {
        match name {
            "none" => Ok(GeomProc::None),
            "bbox" => Ok(GeomProc::BBox),
            _ => Err(Error::UnknownGeomProc(name.to_string())),
        }
    }
}

impl fmt::Display for GeomProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeomProc::None => "none",
            GeomProc::BBox => "bbox",
        })
    }
}

/// What happens to features without tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UntaggedMode {
    Drop,
    #[default]
    Copy,
    /// Hand them to the script like any other feature.
    Process,
}

impl FromStr for UntaggedMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Error> {
        match mode {
            "drop" => Ok(UntaggedMode::Drop),
            "copy" => Ok(UntaggedMode::Copy),
            "process" => Ok(UntaggedMode::Process),
            _ => Err(Error::UnknownUntaggedMode(mode.to_string())),
        }
    }
}

impl fmt::Display for UntaggedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UntaggedMode::Drop => "drop",
            UntaggedMode::Copy => "copy",
            UntaggedMode::Process => "process",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_geom_proc() {
        assert_eq!("none".parse::<GeomProc>().unwrap(), GeomProc::None);
        assert_eq!("bbox".parse::<GeomProc>().unwrap(), GeomProc::BBox);
        assert_eq!(
            "area".parse::<GeomProc>().unwrap_err().to_string(),
            "Unknown geometry processing 'area'. Use 'none' or 'bbox'."
        );
    }

    #[test]
    fn test_parse_untagged_mode() {
        for mode in [UntaggedMode::Drop, UntaggedMode::Copy, UntaggedMode::Process] {
            assert_eq!(mode.to_string().parse::<UntaggedMode>().unwrap(), mode);
        }
        assert_eq!(UntaggedMode::default(), UntaggedMode::Copy);
        assert!("keep".parse::<UntaggedMode>().is_err());
    }
}
