mod auth;
mod automation;
mod error;
mod evidence;
mod metrics;
mod page;
mod selector;
mod session;
mod stealth;

pub use auth::{AuthState, Authenticator};
pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher};
pub use error::{BrowserError, BrowserResult};
pub use evidence::{evidence_file_name, EvidenceCapture};
pub use metrics::PublishMetrics;
pub use page::{BrowserFactory, ComposerPage, PublishBrowser};
pub use selector::{
    Interaction, Matcher, ResolvedElement, SelectorCandidate, SelectorResolver, Target,
    MARKER_ATTRIBUTE, SELECTOR_TABLE,
};
pub use session::{Session, SessionCookie, SessionStore};
pub use stealth::{StealthProfile, STEALTH_FLAGS};
