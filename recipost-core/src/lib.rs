pub mod browser;
pub mod config;
pub mod content;
pub mod ledger;
pub mod publish;
pub mod staging;

pub use config::{load_publisher_config, ConfigError, PublisherConfig};
pub use content::{truncate_title, Content, ContentError};
pub use ledger::{LedgerError, RunLedger, RunRecord};
pub use publish::{PublishError, PublishResult, PublishState, PublishStatus, Publisher};
pub use staging::{MediaStager, StagedMedia, StagingError};
