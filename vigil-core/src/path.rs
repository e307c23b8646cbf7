use std::fmt;

/// Errors produced while parsing a sensor path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path '{0}' must contain a product and a sensor segment")]
    TooShort(String),
    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("path {0:?} contains a control character")]
    ControlCharacter(String),
}

/// A validated `/`-delimited sensor path.
///
/// The first segment names the product, the last names the leaf sensor and
/// anything in between is grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorPath {
    raw: Box<str>,
    product_end: usize,
    sensor_start: usize,
}

impl SensorPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        // NUL separates the path from the time suffix in history keys
        if raw.chars().any(char::is_control) {
            return Err(PathError::ControlCharacter(raw.to_owned()));
        }

        let mut segments = raw.split('/');
        let count = segments.clone().count();

        if count < 2 {
            return Err(PathError::TooShort(raw.to_owned()));
        }
        if segments.any(str::is_empty) {
            return Err(PathError::EmptySegment(raw.to_owned()));
        }

        // both separators exist since there are at least two non-empty segments
        let product_end = raw.find('/').unwrap_or(raw.len());
        let sensor_start = raw.rfind('/').map(|i| i + 1).unwrap_or(0);

        Ok(Self {
            raw: raw.into(),
            product_end,
            sensor_start,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn product(&self) -> &str {
        &self.raw[..self.product_end]
    }

    pub fn sensor(&self) -> &str {
        &self.raw[self.sensor_start..]
    }
}

impl fmt::Display for SensorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
