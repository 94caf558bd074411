//! Turn state machine
//!
//! Pure, clock-injected bookkeeping for one utterance capture. The async
//! detector feeds it frames and classifier verdicts; every decision (forward,
//! submit, finalize) is made here so it can be tested with synthetic time.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use voice_turn_config::DetectorConfig as DetectorSettings;
use voice_turn_core::{AudioFrame, EndOfTurnPrediction, SampleRate};

/// Detector tuning, resolved from settings into durations and sample counts
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Rolling voice window length (frames)
    pub voice_window: usize,
    /// Context buffer capacity (samples)
    pub context_samples: usize,
    /// Hard silence timeout
    pub max_silence: Duration,
    /// Silence before the classifier is consulted
    pub min_silence_for_model_check: Duration,
    /// Minimum spacing between classifier submissions
    pub model_check_interval: Duration,
    /// Consecutive complete verdicts needed to finalize
    pub required_complete_verdicts: u32,
    /// Wait for the final transcript after flushing
    pub final_transcript_timeout: Duration,
    /// Ambient calibration length
    pub calibration: Duration,
    pub energy_margin: f32,
    pub min_energy_threshold: f32,
    /// Threshold used when calibration is skipped
    pub energy_threshold: f32,
}

impl DetectorConfig {
    pub fn from_settings(settings: &DetectorSettings, sample_rate: SampleRate) -> Self {
        Self {
            voice_window: settings.voice_window.max(1),
            context_samples: (settings.context_secs.max(0.0) * sample_rate.as_u32() as f32)
                as usize,
            max_silence: Duration::from_millis(settings.max_silence_ms),
            min_silence_for_model_check: Duration::from_millis(
                settings.min_silence_for_model_check_ms,
            ),
            model_check_interval: Duration::from_millis(settings.model_check_interval_ms),
            required_complete_verdicts: settings.required_complete_verdicts.max(1),
            final_transcript_timeout: Duration::from_millis(settings.final_transcript_timeout_ms),
            calibration: Duration::from_secs_f32(settings.calibration_secs.max(0.0)),
            energy_margin: settings.energy_margin,
            min_energy_threshold: settings.min_energy_threshold,
            energy_threshold: settings.energy_threshold,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_settings(&DetectorSettings::default(), SampleRate::Hz16000)
    }
}

/// Why an utterance was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Silence exceeded the hard timeout
    SilenceTimeout,
    /// Classifier returned enough consecutive complete verdicts
    ModelConsensus,
    /// The audio source ended
    SourceClosed,
}

impl FinalizeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::SilenceTimeout => "silence_timeout",
            FinalizeReason::ModelConsensus => "model_consensus",
            FinalizeReason::SourceClosed => "source_closed",
        }
    }
}

/// Outcome of one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDecision {
    /// Forward this frame to the transcription channel
    pub forward: bool,
    /// First voice frame of the utterance
    pub speech_started: bool,
    /// Submit the context window to the classifier, tagged with this generation
    pub submit: Option<u64>,
    pub finalize: Option<FinalizeReason>,
}

/// Fixed-length ring of voice/silence flags
#[derive(Debug, Clone)]
pub struct VoiceWindow {
    flags: VecDeque<bool>,
    capacity: usize,
}

impl VoiceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            flags: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, is_voice: bool) {
        if self.flags.len() == self.capacity {
            self.flags.pop_front();
        }
        self.flags.push_back(is_voice);
    }

    pub fn voice_count(&self) -> usize {
        self.flags.iter().filter(|&&v| v).count()
    }

    /// Strict majority of the recorded frames are voice
    pub fn is_majority_voice(&self) -> bool {
        !self.flags.is_empty() && self.voice_count() * 2 > self.flags.len()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}

/// Bounded ring of the most recent raw samples
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl ContextBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn extend(&mut self, samples: &[i16]) {
        if self.capacity == 0 {
            return;
        }
        let incoming = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };
        let overflow = (self.samples.len() + incoming.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(incoming.iter().copied());
    }

    pub fn snapshot(&self) -> Vec<i16> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// In-progress utterance capture
#[derive(Debug, Clone)]
pub struct TurnState {
    pub has_spoken: bool,
    /// Timestamp of the first silent frame of the current pause
    pub silence_started: Option<Instant>,
    pub voice_window: VoiceWindow,
    pub context: ContextBuffer,
    pub consecutive_complete: u32,
}

impl TurnState {
    fn new(config: &DetectorConfig) -> Self {
        Self {
            has_spoken: false,
            silence_started: None,
            voice_window: VoiceWindow::new(config.voice_window),
            context: ContextBuffer::new(config.context_samples),
            consecutive_complete: 0,
        }
    }

    /// Silence accumulated so far at `now`
    pub fn silence(&self, now: Instant) -> Duration {
        self.silence_started
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }
}

/// Frame-by-frame end-of-turn decisions
pub struct TurnTracker {
    config: DetectorConfig,
    state: TurnState,
    last_submit: Option<Instant>,
    /// Generation of the submission currently awaiting a verdict
    in_flight: Option<u64>,
    /// Bumped when voice resumes so verdicts about an older pause are dropped
    generation: u64,
    finalized: Option<FinalizeReason>,
}

impl TurnTracker {
    pub fn new(config: DetectorConfig) -> Self {
        let state = TurnState::new(&config);
        Self {
            config,
            state,
            last_submit: None,
            in_flight: None,
            generation: 0,
            finalized: None,
        }
    }

    /// Start a fresh utterance
    pub fn reset(&mut self) {
        self.state = TurnState::new(&self.config);
        self.last_submit = None;
        self.in_flight = None;
        self.generation = self.generation.wrapping_add(1);
        self.finalized = None;
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn finalized(&self) -> Option<FinalizeReason> {
        self.finalized
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Raw audio for the classifier
    pub fn context_snapshot(&self) -> Vec<i16> {
        self.state.context.snapshot()
    }

    /// Process one frame at its capture time
    pub fn on_frame(
        &mut self,
        frame: &AudioFrame,
        is_voice: bool,
        model_available: bool,
    ) -> FrameDecision {
        let mut decision = FrameDecision::default();
        if self.finalized.is_some() {
            return decision;
        }

        let now = frame.timestamp;
        self.state.context.extend(&frame.samples);
        self.state.voice_window.push(is_voice);

        if is_voice {
            if !self.state.has_spoken {
                self.state.has_spoken = true;
                decision.speech_started = true;
            }
            self.state.silence_started = None;
            self.state.consecutive_complete = 0;
            if self.in_flight.is_some() {
                self.generation = self.generation.wrapping_add(1);
            }
        }

        if !self.state.has_spoken {
            return decision;
        }

        decision.forward = is_voice || self.state.voice_window.is_majority_voice();
        if is_voice {
            return decision;
        }

        let started = *self.state.silence_started.get_or_insert(now);
        let silence = now.saturating_duration_since(started);

        if silence > self.config.max_silence {
            self.finalized = Some(FinalizeReason::SilenceTimeout);
            decision.finalize = self.finalized;
            return decision;
        }

        let interval_elapsed = self
            .last_submit
            .map(|t| now.saturating_duration_since(t) >= self.config.model_check_interval)
            .unwrap_or(true);

        if model_available
            && self.in_flight.is_none()
            && silence > self.config.min_silence_for_model_check
            && interval_elapsed
        {
            self.in_flight = Some(self.generation);
            self.last_submit = Some(now);
            decision.submit = Some(self.generation);
        }

        decision
    }

    /// Apply a classifier verdict; `None` means inference failed
    pub fn on_prediction(
        &mut self,
        generation: u64,
        prediction: Option<EndOfTurnPrediction>,
    ) -> Option<FinalizeReason> {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }
        if generation != self.generation || self.finalized.is_some() {
            tracing::trace!(generation, current = self.generation, "Discarding stale verdict");
            return None;
        }

        match prediction {
            Some(p) if p.is_complete => {
                self.state.consecutive_complete += 1;
                if self.state.consecutive_complete >= self.config.required_complete_verdicts {
                    self.finalized = Some(FinalizeReason::ModelConsensus);
                }
            }
            _ => self.state.consecutive_complete = 0,
        }
        self.finalized
    }

    /// The audio source ended mid-utterance
    pub fn close(&mut self) -> FinalizeReason {
        *self.finalized.get_or_insert(FinalizeReason::SourceClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 60;

    fn frame_at(base: Instant, index: u64) -> AudioFrame {
        AudioFrame::with_timestamp(
            vec![0; 960],
            SampleRate::Hz16000,
            index,
            base + Duration::from_millis(index * FRAME_MS),
        )
    }

    fn complete() -> Option<EndOfTurnPrediction> {
        Some(EndOfTurnPrediction::from_probability(0.9, 0.5))
    }

    fn incomplete() -> Option<EndOfTurnPrediction> {
        Some(EndOfTurnPrediction::from_probability(0.1, 0.5))
    }

    /// Feed `voice` voice frames, returning the next frame index
    fn speak(tracker: &mut TurnTracker, base: Instant, voice: u64) -> u64 {
        for i in 0..voice {
            tracker.on_frame(&frame_at(base, i), true, false);
        }
        voice
    }

    #[test]
    fn test_voice_window_majority() {
        let mut window = VoiceWindow::new(4);
        window.push(true);
        window.push(false);
        assert!(!window.is_majority_voice());
        window.push(true);
        assert!(window.is_majority_voice());
        for _ in 0..4 {
            window.push(false);
        }
        assert_eq!(window.len(), 4);
        assert_eq!(window.voice_count(), 0);
    }

    #[test]
    fn test_context_buffer_bounded() {
        let mut context = ContextBuffer::new(5);
        context.extend(&[1, 2, 3]);
        context.extend(&[4, 5, 6, 7]);
        assert_eq!(context.snapshot(), vec![3, 4, 5, 6, 7]);
        context.extend(&[8, 9, 10, 11, 12, 13]);
        assert_eq!(context.snapshot(), vec![9, 10, 11, 12, 13]);
        assert_eq!(context.len(), context.capacity());
    }

    #[test]
    fn test_silence_before_speech_not_forwarded() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        for i in 0..50 {
            let d = tracker.on_frame(&frame_at(base, i), false, true);
            assert!(!d.forward);
            assert!(d.submit.is_none());
            assert!(d.finalize.is_none());
        }
        assert!(!tracker.state().has_spoken);
    }

    #[test]
    fn test_forwarding_tolerates_short_pause() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();

        let first = tracker.on_frame(&frame_at(base, 0), true, false);
        assert!(first.speech_started);
        assert!(first.forward);

        for i in 1..10 {
            tracker.on_frame(&frame_at(base, i), true, false);
        }
        // Window still mostly voice: silent frames are forwarded
        let pause = tracker.on_frame(&frame_at(base, 10), false, false);
        assert!(pause.forward);

        // After enough silence the majority flips and forwarding stops
        let mut last = pause;
        for i in 11..16 {
            last = tracker.on_frame(&frame_at(base, i), false, false);
        }
        assert!(!last.forward);
    }

    #[test]
    fn test_hard_timeout_without_classifier() {
        let config = DetectorConfig::default();
        let max_silence = config.max_silence;
        let mut tracker = TurnTracker::new(config);
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 5);

        let silence_start = base + Duration::from_millis(index * FRAME_MS);
        loop {
            let frame = frame_at(base, index);
            let d = tracker.on_frame(&frame, false, false);
            assert!(d.submit.is_none());
            if let Some(reason) = d.finalize {
                assert_eq!(reason, FinalizeReason::SilenceTimeout);
                let elapsed = frame.timestamp - silence_start;
                assert!(elapsed > max_silence);
                assert!(elapsed <= max_silence + Duration::from_millis(FRAME_MS));
                break;
            }
            index += 1;
            assert!(index < 100, "detector never finalized");
        }
    }

    #[test]
    fn test_two_complete_verdicts_finalize() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 5);

        let mut verdicts = 0;
        loop {
            let d = tracker.on_frame(&frame_at(base, index), false, true);
            assert!(d.finalize.is_none(), "hard timeout reached first");
            if let Some(generation) = d.submit {
                verdicts += 1;
                if let Some(reason) = tracker.on_prediction(generation, complete()) {
                    assert_eq!(reason, FinalizeReason::ModelConsensus);
                    break;
                }
            }
            index += 1;
        }
        assert_eq!(verdicts, 2);
    }

    #[test]
    fn test_incomplete_resets_consensus() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 5);

        let script = [complete(), incomplete(), complete()];
        let mut next = 0;
        while next < script.len() {
            let d = tracker.on_frame(&frame_at(base, index), false, true);
            assert!(d.finalize.is_none());
            if let Some(generation) = d.submit {
                assert!(tracker.on_prediction(generation, script[next]).is_none());
                next += 1;
            }
            index += 1;
        }
        assert_eq!(tracker.state().consecutive_complete, 1);
        assert!(tracker.finalized().is_none());
    }

    #[test]
    fn test_classifier_error_resets_count() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 3);

        let mut submitted = Vec::new();
        while submitted.len() < 2 {
            if let Some(g) = tracker.on_frame(&frame_at(base, index), false, true).submit {
                let verdict = if submitted.is_empty() { complete() } else { None };
                tracker.on_prediction(g, verdict);
                submitted.push(g);
            }
            index += 1;
        }
        assert_eq!(tracker.state().consecutive_complete, 0);
    }

    #[test]
    fn test_voice_discards_in_flight_verdict() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 3);

        let generation = loop {
            if let Some(g) = tracker.on_frame(&frame_at(base, index), false, true).submit {
                break g;
            }
            index += 1;
        };
        index += 1;

        // User resumes before the verdict lands
        tracker.on_frame(&frame_at(base, index), true, true);
        assert!(tracker.on_prediction(generation, complete()).is_none());
        assert_eq!(tracker.state().consecutive_complete, 0);
        assert!(tracker.state().silence_started.is_none());
        assert!(!tracker.has_in_flight());
    }

    #[test]
    fn test_single_submission_in_flight() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 3);

        let mut submissions = 0;
        for _ in 0..20 {
            if tracker.on_frame(&frame_at(base, index), false, true).submit.is_some() {
                submissions += 1;
            }
            index += 1;
        }
        // Never answered, so no second submission
        assert_eq!(submissions, 1);
    }

    #[test]
    fn test_submission_interval() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        let base = Instant::now();
        let mut index = speak(&mut tracker, base, 3);

        let mut times = Vec::new();
        while times.len() < 3 {
            let frame = frame_at(base, index);
            let d = tracker.on_frame(&frame, false, true);
            if let Some(g) = d.submit {
                times.push(frame.timestamp);
                tracker.on_prediction(g, incomplete());
            }
            assert!(d.finalize.is_none());
            index += 1;
        }
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_close_reports_source_closed() {
        let mut tracker = TurnTracker::new(DetectorConfig::default());
        assert_eq!(tracker.close(), FinalizeReason::SourceClosed);
        tracker.reset();
        assert!(tracker.finalized().is_none());
    }
}
