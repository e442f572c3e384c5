//! Namespace presets: named shorthands expanding to fixed retention+index
//! options.
//!
//! The preset table is closed; unknown names are a spec validation problem,
//! not an admin one. Presets are named `<resolution>:<retention>`.

use m3db_common::crd::{IndexOptions, NamespaceOptions, RetentionOptions};

/// Preset for 10 second resolution data kept for two days
pub const PRESET_10S_2D: &str = "10s:2d";

/// Preset for one minute resolution data kept for forty days
pub const PRESET_1M_40D: &str = "1m:40d";

const MINUTE: i64 = 60 * 1_000_000_000;
const HOUR: i64 = 60 * MINUTE;

/// Expand a preset name to its canonical options.
///
/// Returns `None` for names outside the closed table.
pub fn expand(preset: &str) -> Option<NamespaceOptions> {
    match preset {
        PRESET_10S_2D => Some(NamespaceOptions {
            retention: RetentionOptions {
                retention_period_nanos: 48 * HOUR,
                block_size_nanos: 2 * HOUR,
                buffer_future_nanos: 10 * MINUTE,
                buffer_past_nanos: 10 * MINUTE,
                block_data_expiry: true,
            },
            index: IndexOptions {
                enabled: true,
                block_size_nanos: 2 * HOUR,
            },
        }),
        PRESET_1M_40D => Some(NamespaceOptions {
            retention: RetentionOptions {
                retention_period_nanos: 960 * HOUR,
                block_size_nanos: 12 * HOUR,
                buffer_future_nanos: 20 * MINUTE,
                buffer_past_nanos: 20 * MINUTE,
                block_data_expiry: true,
            },
            index: IndexOptions {
                enabled: true,
                block_size_nanos: 12 * HOUR,
            },
        }),
        _ => None,
    }
}
