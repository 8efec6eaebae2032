use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

#[allow(clippy::expect_used)]
static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(?:\.\d+)*$").expect("valid version regex"));

/// Server version collapsed to `major.minor`
///
/// Built from the free-text output of `SHOW server_version`, e.g.
/// `"14.2 (Debian 14.2-1.pgdg110+1)"` becomes `14.2` and `"9.6.24"` becomes
/// `9.6`. A first token that is not entirely numeric (`16beta1`, `17devel`)
/// becomes the zero version, which compares below every real release, so
/// capability checks fail closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Version(f64);

impl Version {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let token = raw.split_whitespace().next().unwrap_or_default();

        NUMERIC_TOKEN
            .captures(token)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map_or_else(Self::default, Self)
    }

    #[must_use]
    pub fn gte(&self, threshold: f64) -> bool {
        self.0 >= threshold
    }

    #[must_use]
    pub const fn as_f64(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Version {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
