// ── dsync-prefs / prefs module ────────────────────────────────────────────────
//
// Preference storage used by every other DirSync component:
//   • One JSON object per file, string keys → string values
//   • Typed getters that fall back to a caller default
//   • Optional AES-256-GCM protection for sensitive entries
//   • Explicit save (sync or async), never autosaved

pub mod types;
pub mod value;
pub mod protect;
pub mod store;
pub mod registry;

pub use types::*;
pub use value::PrefValue;
pub use protect::Protector;
pub use store::JsonPrefs;
pub use registry::PrefsRegistry;
