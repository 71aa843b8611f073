use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value of the process-wide scraper trigger flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ScraperState {
    Idle,
    Pending,
    Running,
    Done,
    Unknown(String),
}

impl ScraperState {
    pub fn as_str(&self) -> &str {
        match self {
            ScraperState::Idle => "Idle",
            ScraperState::Pending => "Pending",
            ScraperState::Running => "Running",
            ScraperState::Done => "Done",
            ScraperState::Unknown(raw) => raw.as_str(),
        }
    }

    /// Whether this state lets the monitor start a pass when observed.
    pub fn requests_pass(&self) -> bool {
        matches!(self, ScraperState::Pending)
    }
}

impl FromStr for ScraperState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Idle" | "" => ScraperState::Idle,
            "Pending" => ScraperState::Pending,
            // Older controllers wrote these spellings.
            "Running" | "Scraping" => ScraperState::Running,
            "Done" | "Complete" => ScraperState::Done,
            other => ScraperState::Unknown(other.to_string()),
        })
    }
}

impl From<String> for ScraperState {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<ScraperState> for String {
    fn from(state: ScraperState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ScraperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
