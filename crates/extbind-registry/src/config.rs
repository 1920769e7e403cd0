//! Extension configuration.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Host initialization levels, in the order the host brings them up.
///
/// Deinitialization runs the same levels in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum InitLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

impl Default for InitLevel {
    fn default() -> Self {
        InitLevel::Scene
    }
}

/// What to do with registry entries still live at termination.
///
/// Live entries at that point are either leaks in extension code or shared
/// handles kept alive by a reference cycle, which the registry does not
/// collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakPolicy {
    /// Say nothing.
    Ignore,
    /// Log each leaked entry at `warn`.
    #[default]
    Warn,
    /// Treat any leak as a contract violation.
    Fatal,
}

/// Builder pattern configuration for an extension.
///
/// ```
/// use extbind_registry::{ExtensionConfig, InitLevel, LeakPolicy};
///
/// let config = ExtensionConfig::new()
///     .with_minimum_level(InitLevel::Core)
///     .with_leak_policy(LeakPolicy::Fatal);
/// assert_eq!(config.registration_level(), InitLevel::Scene);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionConfig {
    minimum_level: InitLevel,
    registration_level: InitLevel,
    leak_policy: LeakPolicy,
}

impl ExtensionConfig {
    pub fn new() -> Self {
        Self {
            minimum_level: InitLevel::Scene,
            registration_level: InitLevel::Scene,
            leak_policy: LeakPolicy::Warn,
        }
    }

    /// Lowest level the host must initialize the extension at.
    pub fn with_minimum_level(mut self, level: InitLevel) -> Self {
        self.minimum_level = level;
        self
    }

    /// Level at which classes are registered and, on the way down, torn down.
    pub fn with_registration_level(mut self, level: InitLevel) -> Self {
        self.registration_level = level;
        self
    }

    pub fn with_leak_policy(mut self, policy: LeakPolicy) -> Self {
        self.leak_policy = policy;
        self
    }

    pub fn minimum_level(&self) -> InitLevel {
        self.minimum_level
    }

    pub fn registration_level(&self) -> InitLevel {
        self.registration_level
    }

    pub fn leak_policy(&self) -> LeakPolicy {
        self.leak_policy
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self::new()
    }
}
