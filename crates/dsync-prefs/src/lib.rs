//! # dsync-prefs
//!
//! On-disk preference storage for DirSync SFTP.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Error type and result alias |
//! | **value** | Culture-invariant typed conversions (`PrefValue`) |
//! | **protect** | AES-256-GCM at-rest transform for sensitive values |
//! | **store** | `JsonPrefs` – one JSON file of string → string entries |
//! | **registry** | Named-store cache handed to every component |

pub mod prefs;
