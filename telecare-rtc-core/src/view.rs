//! Render boundary
//!
//! A [`CallView`] binds call output to whatever draws it (terminal, native
//! window, web bridge). The core never renders; [`drive_view`] only pumps
//! events from a [`SessionHandle`] into the view.

use crate::controller::SessionHandle;
use crate::peer::RemoteTrackSet;
use crate::types::{CallErrorKind, CallEvent, CallPhase, LocalTrackInfo};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Receiver of call output
pub trait CallView: Send {
    /// Phase transition
    fn on_phase(&mut self, from: CallPhase, to: CallPhase);

    /// Local tracks ready to preview
    fn on_local_tracks(&mut self, tracks: &[LocalTrackInfo]);

    /// Remote tracks ready to display
    fn on_remote_tracks(&mut self, tracks: Arc<RemoteTrackSet>);

    /// Recoverable or fatal error
    fn on_error(&mut self, kind: CallErrorKind, detail: &str);

    /// Mute or camera flag changed
    fn on_toggle(&mut self, _muted: Option<bool>, _video_off: Option<bool>) {}
}

/// Forward call events to `view` until the call is over
///
/// Returns the terminal phase. Subscribe happens on entry, so events
/// published before the call is driven are not replayed; callers that need
/// the full sequence should drive the view before calling `start()`.
pub async fn drive_view<V: CallView + ?Sized>(handle: &SessionHandle, view: &mut V) -> CallPhase {
    let mut events = handle.subscribe_events();
    if handle.is_finished() {
        return handle.phase();
    }
    loop {
        match events.recv().await {
            Ok(event) => {
                let terminal = dispatch(view, event);
                if let Some(phase) = terminal {
                    return phase;
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(session_id = %handle.session_id(), missed, "View fell behind call events");
                if handle.is_finished() {
                    return handle.phase();
                }
            }
            Err(RecvError::Closed) => return handle.phase(),
        }
    }
}

fn dispatch<V: CallView + ?Sized>(view: &mut V, event: CallEvent) -> Option<CallPhase> {
    match event {
        CallEvent::PhaseChanged { from, to } => {
            view.on_phase(from, to);
            if to.is_terminal() {
                return Some(to);
            }
        }
        CallEvent::LocalMedia(tracks) => view.on_local_tracks(&tracks),
        CallEvent::RemoteMedia(tracks) => view.on_remote_tracks(tracks),
        CallEvent::Error { kind, detail } => view.on_error(kind, &detail),
        CallEvent::MuteChanged(muted) => view.on_toggle(Some(muted), None),
        CallEvent::VideoOffChanged(off) => view.on_toggle(None, Some(off)),
    }
    None
}
