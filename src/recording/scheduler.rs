/*!
 * ============================================================================
 * TIMING SCHEDULER
 * ============================================================================
 *
 * PURPOSE: Turn ascending slide timestamps into waits + advance calls
 *
 * For timings [t1, t2, ...] (seconds from recording start) the scheduler
 * waits t1, advances, waits t2 - t1, advances, ... then holds for the
 * trailing period so the last slide makes it onto the video.
 *
 * Timings are validated at admission. Here a negative difference is
 * clamped to zero rather than treated as an error.
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use crate::recording::backend::SlideDeck;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct TimingScheduler {
    trailing_hold: Duration,
}

impl TimingScheduler {
    pub fn new(trailing_hold: Duration) -> Self {
        Self { trailing_hold }
    }

    pub fn trailing_hold(&self) -> Duration {
        self.trailing_hold
    }

    /// Wait before each advance, relative to the previous one
    /// A wait too large for a Duration is an error, never a panic
    pub fn slide_waits(timings: &[f64]) -> Result<Vec<Duration>, RecorderError> {
        let mut cursor = 0.0_f64;
        let mut waits = Vec::with_capacity(timings.len());
        for (idx, &t) in timings.iter().enumerate() {
            let wait = t - cursor;
            cursor = t;
            if wait.is_nan() || wait <= 0.0 {
                waits.push(Duration::ZERO);
                continue;
            }
            let wait = Duration::try_from_secs_f64(wait).map_err(|_| RecorderError::InvalidRequest {
                message: format!("timings[{}]={} is out of range", idx, t),
            })?;
            waits.push(wait);
        }
        Ok(waits)
    }

    /**
     * Drive `deck` through every timing, then hold
     * `on_advance` receives the number of slides advanced so far
     */
    pub async fn run<D, F>(
        &self,
        timings: &[f64],
        deck: &mut D,
        mut on_advance: F,
    ) -> Result<(), RecorderError>
    where
        D: SlideDeck + ?Sized,
        F: FnMut(u32) + Send,
    {
        let waits = Self::slide_waits(timings)?;
        let total = waits.len();

        for (idx, wait) in waits.into_iter().enumerate() {
            sleep(wait).await;
            deck.advance_slide().await?;
            let advanced = (idx + 1) as u32;
            log::debug!("Advanced slide {}/{}", advanced, total);
            on_advance(advanced);
        }

        sleep(self.trailing_hold).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::time::Instant;

    struct ClockDeck {
        started: Instant,
        advances: Vec<Duration>,
        fail_on: Option<usize>,
    }

    impl ClockDeck {
        fn new() -> Self {
            Self {
                started: Instant::now(),
                advances: Vec::new(),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl SlideDeck for ClockDeck {
        async fn navigate(&mut self, _url: &str) -> Result<(), RecorderError> {
            Ok(())
        }

        async fn prime_for_capture(&mut self) {}

        async fn advance_slide(&mut self) -> Result<(), RecorderError> {
            if self.fail_on == Some(self.advances.len()) {
                return Err(RecorderError::Browser {
                    message: "target closed".to_string(),
                });
            }
            self.advances.push(self.started.elapsed());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn test_slide_waits_are_relative() {
        let waits = TimingScheduler::slide_waits(&[3.0, 6.0, 9.0]).unwrap();
        assert_eq!(waits, vec![Duration::from_secs(3); 3]);

        let waits = TimingScheduler::slide_waits(&[1.5, 4.0]).unwrap();
        assert_eq!(waits, vec![Duration::from_millis(1500), Duration::from_millis(2500)]);
    }

    #[test]
    fn test_slide_waits_clamp_negative_to_zero() {
        let waits = TimingScheduler::slide_waits(&[5.0, 2.0, 4.0]).unwrap();
        assert_eq!(
            waits,
            vec![Duration::from_secs(5), Duration::ZERO, Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_slide_waits_reject_unrepresentable_timing() {
        let err = TimingScheduler::slide_waits(&[1.0, 1e20]).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidRequest { .. }));
        assert!(TimingScheduler::slide_waits(&[f64::INFINITY]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_huge_timing_fails_without_advancing() {
        let scheduler = TimingScheduler::new(Duration::from_secs(3));
        let mut deck = ClockDeck::new();

        let err = scheduler.run(&[1e20], &mut deck, |_| {}).await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidRequest { .. }));
        assert!(deck.advances.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_advances_at_offsets_then_holds() {
        let scheduler = TimingScheduler::new(Duration::from_secs(3));
        let mut deck = ClockDeck::new();
        let mut seen = Vec::new();

        let started = Instant::now();
        scheduler
            .run(&[3.0, 6.0, 9.0], &mut deck, |n| seen.push(n))
            .await
            .unwrap();

        assert_eq!(
            deck.advances,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(9)
            ]
        );
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_advance_failure() {
        let scheduler = TimingScheduler::new(Duration::from_secs(3));
        let mut deck = ClockDeck::new();
        deck.fail_on = Some(1);

        let err = scheduler
            .run(&[1.0, 2.0, 3.0], &mut deck, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::Browser { .. }));
        assert_eq!(deck.advances.len(), 1);
    }
}
