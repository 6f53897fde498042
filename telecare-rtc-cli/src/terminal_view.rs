//! Terminal rendering of call progress

use std::sync::Arc;
use std::time::Instant;
use telecare_rtc_core::prelude::*;
use telecare_rtc_core::{LocalTrackInfo, MediaKind, RemoteTrackSet};

/// Prints one line per call event, prefixed with the party label
pub struct TerminalView {
    label: String,
    started: Instant,
    muted: bool,
    video_off: bool,
}

impl TerminalView {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
            muted: false,
            video_off: false,
        }
    }

    pub fn controls(&self) -> String {
        controls_line(self.muted, self.video_off)
    }

    fn print(&self, line: &str) {
        println!(
            "[{:<9} +{:>5.1}s] {line}",
            self.label,
            self.started.elapsed().as_secs_f32()
        );
    }
}

pub fn phase_icon(phase: CallPhase) -> &'static str {
    match phase {
        CallPhase::Idle => "⏸️",
        CallPhase::Initializing => "🎙️",
        CallPhase::Negotiating(_) => "🔄",
        CallPhase::Connected => "✅",
        CallPhase::Ending => "📴",
        CallPhase::Ended => "👋",
        CallPhase::Failed => "❌",
    }
}

pub fn track_summary(tracks: impl IntoIterator<Item = (MediaKind, bool)>) -> String {
    let parts: Vec<String> = tracks
        .into_iter()
        .map(|(kind, enabled)| format!("{kind} ({})", if enabled { "on" } else { "off" }))
        .collect();
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn controls_line(muted: bool, video_off: bool) -> String {
    format!(
        "mic {} | camera {}",
        if muted { "muted" } else { "live" },
        if video_off { "off" } else { "on" }
    )
}

impl CallView for TerminalView {
    fn on_phase(&mut self, from: CallPhase, to: CallPhase) {
        self.print(&format!("{} {from} -> {to}", phase_icon(to)));
    }

    fn on_local_tracks(&mut self, tracks: &[LocalTrackInfo]) {
        let summary = track_summary(tracks.iter().map(|t| (t.kind, t.enabled)));
        self.print(&format!("🎥 local media: {summary}"));
    }

    fn on_remote_tracks(&mut self, tracks: Arc<RemoteTrackSet>) {
        let summary = track_summary(tracks.tracks().into_iter().map(|t| (t.kind, true)));
        self.print(&format!("📺 remote media: {summary}"));
    }

    fn on_error(&mut self, kind: CallErrorKind, detail: &str) {
        let icon = if kind.is_fatal() { "❌" } else { "⚠️" };
        self.print(&format!("{icon} {kind}: {detail}"));
    }

    fn on_toggle(&mut self, muted: Option<bool>, video_off: Option<bool>) {
        if let Some(muted) = muted {
            self.muted = muted;
        }
        if let Some(off) = video_off {
            self.video_off = off;
        }
        self.print(&format!("🎚️ {}", self.controls()));
    }
}
