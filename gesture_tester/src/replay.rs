// THEORY:
// A recording is a JSON-lines file: one event per line, either a tracker frame or
// a control command the user issued at that moment (start training, toggle
// detection, clear the log, or a bare timer tick). Replaying it through a
// `GesturePipeline` reproduces a live session deterministically, since every
// timestamp comes from the file.
//
// Hands are stored the way trackers usually emit them: a handedness string and a
// list of `[x, y, z]` triples. A malformed hand is dropped with a warning so one bad
// tracker sample does not abort the whole replay.

use anyhow::{Context, bail};
use gesture_vision::core_modules::landmark::{HandFrame, HandObservation, Handedness, Landmark};
use gesture_vision::core_modules::persistence::KeyValueStore;
use gesture_vision::pipeline::{GesturePipeline, Report};
use serde::Deserialize;
use std::io::BufRead;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedHand {
    pub handedness: String,
    pub landmarks: Vec<[f32; 3]>,
}

impl RecordedHand {
    pub fn to_observation(&self) -> gesture_vision::Result<HandObservation> {
        let handedness: Handedness = self.handedness.parse()?;
        let landmarks: Vec<Landmark> = self.landmarks.iter().copied().map(Landmark::from).collect();
        HandObservation::from_slice(&landmarks, handedness)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Frame {
        timestamp_ms: u64,
        #[serde(default)]
        hands: Vec<RecordedHand>,
    },
    StartTraining {
        name: String,
        timestamp_ms: u64,
    },
    ToggleDetecting,
    ClearLog,
    Tick {
        timestamp_ms: u64,
    },
}

/// Parses a recording. Blank lines and lines starting with `#` are ignored.
pub fn parse_recording(reader: impl BufRead) -> anyhow::Result<Vec<ReplayEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not a replay event", idx + 1))?;
        events.push(event);
    }
    if events.is_empty() {
        bail!("recording contains no events");
    }
    Ok(events)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub gesture_events: usize,
    /// Hands dropped either while decoding or by the pipeline.
    pub skipped_hands: usize,
    pub rejected_commands: usize,
    pub last_timestamp_ms: u64,
}

pub fn replay<K: KeyValueStore + 'static>(
    pipeline: &mut GesturePipeline<K>,
    events: &[ReplayEvent],
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for event in events {
        match event {
            ReplayEvent::Frame { timestamp_ms, hands } => {
                let mut observations = Vec::with_capacity(hands.len());
                for hand in hands {
                    match hand.to_observation() {
                        Ok(observation) => observations.push(observation),
                        Err(e) => {
                            warn!("Dropping recorded hand at t={timestamp_ms}ms: {e}");
                            summary.skipped_hands += 1;
                        }
                    }
                }
                let analysis = pipeline.process_frame(&HandFrame::new(*timestamp_ms, observations));
                summary.frames += 1;
                summary.skipped_hands += analysis.skipped_hands;
                if matches!(analysis.report, Report::GestureEvent(_)) {
                    summary.gesture_events += 1;
                }
                summary.last_timestamp_ms = *timestamp_ms;
            }
            ReplayEvent::StartTraining { name, timestamp_ms } => {
                match pipeline.start_training(name, *timestamp_ms) {
                    Ok(deadline) => info!("Training '{name}' until t={deadline}ms"),
                    Err(e) => {
                        warn!("Training request '{name}' rejected: {e}");
                        summary.rejected_commands += 1;
                    }
                }
                summary.last_timestamp_ms = *timestamp_ms;
            }
            ReplayEvent::ToggleDetecting => {
                let detecting = pipeline.toggle_detecting();
                debug!("Detection {}", if detecting { "on" } else { "off" });
            }
            ReplayEvent::ClearLog => pipeline.clear_log(),
            ReplayEvent::Tick { timestamp_ms } => {
                pipeline.tick(*timestamp_ms);
                summary.last_timestamp_ms = *timestamp_ms;
            }
        }
    }

    // A recording that stops mid-window still keeps what it taught.
    let window = pipeline.state().training_deadline_ms;
    if let Some(deadline) = window {
        pipeline.tick(deadline.max(summary.last_timestamp_ms).saturating_add(1));
    }
    if let Err(e) = pipeline.flush() {
        warn!("Gesture model may not be fully saved: {e}");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use gesture_vision::SessionConfig;
    use gesture_vision::core_modules::persistence::MemoryStore;
    use gesture_vision::pipeline::LogEvent;
    use std::sync::Arc;

    fn hand_json(spread: f32) -> String {
        let points: Vec<[f32; 3]> = (0..21)
            .map(|i| {
                let i = i as f32;
                [0.5 + i * 0.01 * spread, 0.5 - i * 0.02, i * 0.005]
            })
            .collect();
        serde_json::json!({ "handedness": "Left", "landmarks": points }).to_string()
    }

    fn frame_line(ts: u64, spread: f32) -> String {
        format!(r#"{{"type":"frame","timestamp_ms":{ts},"hands":[{}]}}"#, hand_json(spread))
    }

    #[test]
    fn parses_commands_and_skips_comments() {
        let text = "# session\n\n{\"type\":\"start_training\",\"name\":\"wave\",\"timestamp_ms\":0}\n{\"type\":\"toggle_detecting\"}\n{\"type\":\"frame\",\"timestamp_ms\":40}\n";
        let events = parse_recording(text.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                ReplayEvent::StartTraining { name: "wave".into(), timestamp_ms: 0 },
                ReplayEvent::ToggleDetecting,
                ReplayEvent::Frame { timestamp_ms: 40, hands: vec![] },
            ]
        );
    }

    #[test]
    fn bad_line_reports_its_number() {
        let text = "{\"type\":\"clear_log\"}\n{\"type\":\"jump\"}\n";
        let err = parse_recording(text.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn empty_recording_is_rejected() {
        assert!(parse_recording("# nothing\n".as_bytes()).is_err());
    }

    #[test]
    fn wrong_landmark_count_is_rejected() {
        let hand = RecordedHand { handedness: "right".into(), landmarks: vec![[0.0; 3]; 20] };
        assert!(hand.to_observation().is_err());
        let hand = RecordedHand { handedness: "both".into(), landmarks: vec![[0.0; 3]; 21] };
        assert!(hand.to_observation().is_err());
    }

    #[test]
    fn train_then_detect_from_a_recording() {
        let mut lines = vec![r#"{"type":"start_training","name":"point","timestamp_ms":0}"#.to_string()];
        for i in 0..5 {
            lines.push(frame_line(i * 100, 1.0));
        }
        lines.push(r#"{"type":"tick","timestamp_ms":3001}"#.to_string());
        lines.push(r#"{"type":"toggle_detecting"}"#.to_string());
        lines.push(frame_line(4_000, 1.0));
        lines.push(frame_line(4_033, 1.0));
        let events = parse_recording(lines.join("\n").as_bytes()).unwrap();

        let kv = Arc::new(MemoryStore::new());
        let mut pipeline = GesturePipeline::new(SessionConfig::default(), kv.clone()).unwrap();
        let summary = replay(&mut pipeline, &events);

        assert_eq!(summary.frames, 7);
        assert_eq!(summary.skipped_hands, 0);
        assert_eq!(pipeline.store().len(), 5);
        let log = pipeline.log();
        assert_eq!(log.len(), 2);
        assert!(matches!(&log[0].event, LogEvent::Trained { examples: 5, .. }));
        assert!(matches!(&log[1].event, LogEvent::Detected { label, .. } if label.as_str() == "point_left"));
        assert!(kv.get("gestureModel").unwrap().is_some());
    }

    #[test]
    fn saturated_deadline_does_not_overflow() {
        let events = vec![
            ReplayEvent::StartTraining { name: "late".into(), timestamp_ms: u64::MAX - 10 },
            ReplayEvent::Tick { timestamp_ms: u64::MAX - 5 },
        ];
        let kv = Arc::new(MemoryStore::new());
        let mut pipeline = GesturePipeline::new(SessionConfig::default(), kv).unwrap();
        replay(&mut pipeline, &events);
        assert!(pipeline.state().training);
        assert_eq!(pipeline.state().training_deadline_ms, Some(u64::MAX));
    }

    #[test]
    fn unfinished_window_is_closed_at_the_end() {
        let lines = [
            r#"{"type":"start_training","name":"open","timestamp_ms":0}"#.to_string(),
            frame_line(50, 2.0),
        ];
        let events = parse_recording(lines.join("\n").as_bytes()).unwrap();
        let kv = Arc::new(MemoryStore::new());
        let mut pipeline = GesturePipeline::new(SessionConfig::default(), kv.clone()).unwrap();
        replay(&mut pipeline, &events);

        assert!(!pipeline.state().training);
        assert!(kv.get("gestureModel").unwrap().is_some());
    }
}
