use crate::ContainerFormat;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for ContainerFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for ContainerFormat {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl ContainerFormat {
    /// Returns the short name for configuration (for displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerFormat::Zip => "zip",
            ContainerFormat::SevenZip => "7z",
            ContainerFormat::Rar => "rar",
        }
    }
}
