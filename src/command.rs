//! Remote command construction
//!
//! `adb shell` hands its argument to the device shell, which mangles quotes,
//! newlines and `$` expansions. Scripts are therefore shipped as a base64
//! payload that the device decodes and pipes into `sh`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::types::Resolution;

/// Options for [`encode_command`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Run the script through `su --`
    pub elevate: bool,
    /// Echo this marker after the script finishes (empty disables)
    pub sentinel: String,
    /// Use `busybox base64` on devices without a working `base64` binary
    pub use_busybox: bool,
}

impl CommandOptions {
    pub fn with_busybox(mut self, use_busybox: bool) -> Self {
        self.use_busybox = use_busybox;
        self
    }

    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }
}

/// Wrap `script` into a single `echo <payload> | base64 -d | sh` line
pub fn encode_command(script: &str, options: &CommandOptions) -> String {
    let mut script = if options.elevate {
        format!("su -- {}", script)
    } else {
        script.to_string()
    };

    if !options.sentinel.is_empty() {
        script = format!("{}\necho {}\n", script.trim_end(), options.sentinel);
    }

    let payload = STANDARD.encode(script.as_bytes());

    let mut parts = vec!["echo", payload.as_str(), "|"];
    if options.use_busybox {
        parts.push("busybox");
    }
    parts.extend(["base64", "-d", "|", "sh"]);

    parts.join(" ") + "\n"
}

/// Recover the script carried by a command built with [`encode_command`]
pub fn decode_payload(command: &str) -> Result<String> {
    let payload = command
        .split_whitespace()
        .nth(1)
        .filter(|_| command.starts_with("echo "))
        .ok_or_else(|| Error::Parse("Not an encoded command line".into()))?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Error::Parse(format!("Invalid base64 payload: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| Error::Parse(format!("Payload is not UTF-8: {}", e)))
}

/// Shell script that keeps `screenrecord` running back to back
///
/// Every segment ends after `time_limit` seconds; the outer loop restarts it so
/// stdout stays one continuous H.264 elementary stream.
pub fn recording_script(time_limit: u32, resolution: Resolution, bitrate: &str) -> String {
    format!(
        r#"#!/bin/bash
startscreenrecord() {{

    screenrecord --output-format=h264 --time-limit "$1" --size "$2" --bit-rate "$3" -
}}

time_interval={time_limit}
size="{resolution}"
bitrate="{bitrate}"
while true; do
    startscreenrecord $time_interval "$size" "$bitrate"
done
"#
    )
}
