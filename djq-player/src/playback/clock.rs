//! Playback position clock (excludes paused time)

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct PlaybackClock {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from zero
    pub fn reset(&mut self) {
        self.started = Some(Instant::now());
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
    }

    /// Nothing playing
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn pause(&mut self) {
        if self.started.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// Fold the elapsed pause into the accumulator
    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Position excluding pauses; `None` before the first track started
    pub fn position(&self) -> Option<Duration> {
        let started = self.started?;
        let end = self.paused_at.unwrap_or_else(Instant::now);
        Some(
            end.saturating_duration_since(started)
                .saturating_sub(self.paused_total),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_position_excludes_pauses() {
        let mut clock = PlaybackClock::new();
        assert_eq!(clock.position(), None);

        clock.reset();
        advance(Duration::from_secs(10)).await;
        clock.pause();
        advance(Duration::from_secs(30)).await;
        assert_eq!(clock.position(), Some(Duration::from_secs(10)));

        clock.resume();
        advance(Duration::from_secs(5)).await;
        assert_eq!(clock.position(), Some(Duration::from_secs(15)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_clear() {
        let mut clock = PlaybackClock::new();
        clock.reset();
        advance(Duration::from_secs(3)).await;
        clock.pause();
        clock.reset();
        assert!(!clock.is_paused());
        assert_eq!(clock.position(), Some(Duration::ZERO));

        clock.clear();
        assert_eq!(clock.position(), None);
    }
}
