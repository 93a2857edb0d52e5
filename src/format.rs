//! Volume line formatting
//!
//! Turns a device snapshot into the text a status bar block shows: plain
//! (`42%`) or an i3bar JSON block (`{"full_text":"42%"}`).

use std::fmt::Write as _;

use libpulse_binding::volume::{Volume, VolumeDB};
use serde::Serialize;

use crate::config::Config;
use crate::device::DeviceSnapshot;

/// i3bar block, `color` only present while muted
#[derive(Debug, Serialize)]
struct Block<'a> {
    full_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
}

/// Format one output line, without the trailing newline
pub fn format_line(snapshot: &DeviceSnapshot, config: &Config) -> Result<String, serde_json::Error> {
    let text = format_text(snapshot, config);

    if !config.json_output {
        return Ok(text);
    }

    let block = Block {
        full_text: &text,
        color: snapshot.muted.then_some(config.mute_color.as_str()),
    };
    serde_json::to_string(&block)
}

fn format_text(snapshot: &DeviceSnapshot, config: &Config) -> String {
    let mut text = String::new();

    let volume = if snapshot.muted && !config.show_mute_indicator {
        0
    } else {
        config.aggregator.reduce(&snapshot.channel_volumes)
    };

    if snapshot.muted && config.show_mute_indicator {
        text.push_str("M ");
    }

    if config.use_decibel {
        let db = VolumeDB::from(Volume(volume));
        if db.0 > VolumeDB::MINUS_INFINITY.0 {
            let _ = write!(text, "{:.2}", db.0);
        } else {
            text.push_str("-inf");
        }
    } else {
        let percent = f64::from(volume) * 100.0 / f64::from(Volume::NORMAL.0);
        let _ = write!(text, "{percent:.0}");
    }

    if config.show_units {
        text.push_str(if config.use_decibel { " dB" } else { "%" });
    }

    text
}
