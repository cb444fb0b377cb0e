//! Live client counts supplied by the host application.

use serde::{Deserialize, Serialize};

/// Platform classes clients are counted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Every managed client.
    All,
    /// Clients that are neither Linux nor macOS.
    Windows,
    Linux,
    MacOS,
}

/// Number of managed clients, per platform and in total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientNumbers {
    /// All managed clients.
    pub all: u64,
    /// Clients that are neither Linux nor macOS.
    pub windows: u64,
    /// Linux clients.
    pub linux: u64,
    /// macOS clients.
    pub macos: u64,
}

impl ClientNumbers {
    /// Creates client numbers from per-platform counts; `all` is their sum.
    #[must_use]
    pub fn new(windows: u64, linux: u64, macos: u64) -> Self {
        Self {
            all: windows.saturating_add(linux).saturating_add(macos),
            windows,
            linux,
            macos,
        }
    }

    /// Returns the count for one platform class.
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> u64 {
        match platform {
            Platform::All => self.all,
            Platform::Windows => self.windows,
            Platform::Linux => self.linux,
            Platform::MacOS => self.macos,
        }
    }
}

/// Source of live client counts, queried on every module evaluation.
pub trait ClientInfo: Send + Sync {
    /// Returns the current client numbers.
    fn client_numbers(&self) -> ClientNumbers;
}

impl ClientInfo for ClientNumbers {
    fn client_numbers(&self) -> ClientNumbers {
        *self
    }
}

impl<F> ClientInfo for F
where
    F: Fn() -> ClientNumbers + Send + Sync,
{
    fn client_numbers(&self) -> ClientNumbers {
        self()
    }
}
