pub mod provider;
pub mod settings;

pub use provider::FileConfigProvider;
pub use settings::{Settings, SettingsOverrides};
