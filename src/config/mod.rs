mod settings;

pub use settings::{
    CronSettings, DatabaseSettings, GitSettings, MirrorSettings, RepositorySettings,
    ServiceSettings, Settings, StorageSettings,
};
