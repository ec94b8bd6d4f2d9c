pub mod cleaner;
pub mod heuristic;
pub mod http_context;
pub mod platforms;
pub mod price;
pub mod selector;

#[cfg(feature = "browser")]
pub mod browser_context;

pub use cleaner::MarkdownCleaner;
pub use heuristic::HeuristicCapability;
pub use http_context::HttpContextProvider;
pub use platforms::{builtin_profiles, default_registry, load_profiles, merge_profiles, registry_from_profiles};
pub use price::parse_price;
pub use selector::{FieldSelectors, PlatformProfile, SelectorCapability};

#[cfg(feature = "browser")]
pub use browser_context::ChromiumContextProvider;
