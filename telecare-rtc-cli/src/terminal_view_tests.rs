//! Tests for terminal view

#[cfg(test)]
mod tests {
    use super::super::terminal_view::*;
    use telecare_rtc_core::prelude::*;
    use telecare_rtc_core::MediaKind;

    #[test]
    fn test_track_summary() {
        assert_eq!(
            track_summary([(MediaKind::Audio, true), (MediaKind::Video, false)]),
            "audio (on), video (off)"
        );
        assert_eq!(track_summary([]), "none");
    }

    #[test]
    fn test_controls_line() {
        assert_eq!(controls_line(false, false), "mic live | camera on");
        assert_eq!(controls_line(true, true), "mic muted | camera off");
    }

    #[test]
    fn test_toggle_updates_controls() {
        let mut view = TerminalView::new("clinician");
        view.on_toggle(Some(true), None);
        assert_eq!(view.controls(), "mic muted | camera on");
        view.on_toggle(None, Some(true));
        assert_eq!(view.controls(), "mic muted | camera off");
    }

    #[test]
    fn test_terminal_phases_have_distinct_icons() {
        assert_ne!(phase_icon(CallPhase::Ended), phase_icon(CallPhase::Failed));
        assert_eq!(
            phase_icon(CallPhase::Negotiating(NegotiationStage::OfferSent)),
            phase_icon(CallPhase::Negotiating(NegotiationStage::AnswerPending))
        );
    }
}
