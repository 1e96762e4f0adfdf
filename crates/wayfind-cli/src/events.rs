//! Guidance event printer.
//!
//! Stands in for the speech front-end: announcements and session changes are
//! printed to the terminal. Cue placements arrive at the guidance tick rate
//! and only go to the debug log. An off-route report triggers a reroute
//! through the assistant.

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{debug, warn};
use wayfind_middleware::GuidanceReceiver;
use wayfind_runtime::Assistant;
use wayfind_types::{GuidanceEvent, SessionEndReason};

/// Terminal line for `event`, or `None` for events that are not spoken.
pub fn render(event: &GuidanceEvent) -> Option<String> {
    let line = match event {
        GuidanceEvent::Placement { .. } => return None,
        GuidanceEvent::Announcement { text } => format!("🔊 {text}").bold().to_string(),
        GuidanceEvent::SessionStarted { target, mode } => {
            format!("▶ Guiding you to your {target} ({mode:?})").green().to_string()
        }
        GuidanceEvent::ModeChanged { from, to } => format!("↔ Switched from {from:?} to {to:?} guidance").cyan().to_string(),
        GuidanceEvent::OffRoute { cross_track_m } => {
            format!("⚠ Off route by {cross_track_m:.0} metres, finding a new route").yellow().to_string()
        }
        GuidanceEvent::Rerouted { waypoints } => format!("↻ New route with {waypoints} waypoint(s)").cyan().to_string(),
        GuidanceEvent::TrackingLost => "⚠ Tracking lost, hold the device steady".yellow().to_string(),
        GuidanceEvent::TrackingRegained => "✓ Tracking regained".green().to_string(),
        GuidanceEvent::SessionEnded { target, reason } => match reason {
            SessionEndReason::Arrived => format!("■ Arrived at your {target}").green().bold().to_string(),
            SessionEndReason::Cancelled => format!("■ Stopped guiding to your {target}").dimmed().to_string(),
            SessionEndReason::TargetLost => format!("■ Gave up guiding to your {target}").red().to_string(),
        },
    };
    Some(line)
}

/// Print guidance events until `shutdown` turns `true` or the bus closes.
pub async fn print_events(mut events: GuidanceReceiver, assistant: Arc<Assistant>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let GuidanceEvent::Placement { placement } = &event {
                    debug!(x = placement.x, z = placement.z, gain = placement.gain, "cue placed");
                }
                if let Some(line) = render(&event) {
                    println!("\n  {line}");
                }
                if matches!(event, GuidanceEvent::OffRoute { .. })
                    && let Err(e) = assistant.handle_off_route().await
                {
                    warn!(error = %e, "reroute failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfind_types::{AudioPlacement, AudioRole, NavMode};

    #[test]
    fn placements_are_not_printed() {
        let placement = AudioPlacement {
            x: 1.0,
            y: 0.0,
            z: -1.0,
            gain: 0.5,
            cadence_hz: 2.0,
            role: AudioRole::Navigation,
        };
        assert!(render(&GuidanceEvent::Placement { placement }).is_none());
    }

    #[test]
    fn announcements_keep_their_text() {
        colored::control::set_override(false);
        let line = render(&GuidanceEvent::Announcement {
            text: "Your keys is 2.2 metres away at 2 o'clock".to_string(),
        })
        .unwrap();
        assert!(line.contains("2.2 metres away"));

        let started = render(&GuidanceEvent::SessionStarted {
            target: "keys".to_string(),
            mode: NavMode::Indoor,
        })
        .unwrap();
        assert!(started.contains("keys") && started.contains("Indoor"));
    }

    #[test]
    fn end_reasons_read_differently() {
        colored::control::set_override(false);
        let end = |reason| {
            render(&GuidanceEvent::SessionEnded {
                target: "bike".to_string(),
                reason,
            })
            .unwrap()
        };
        assert!(end(SessionEndReason::Arrived).contains("Arrived"));
        assert!(end(SessionEndReason::Cancelled).contains("Stopped"));
        assert!(end(SessionEndReason::TargetLost).contains("Gave up"));
    }
}
