// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::Serialize;
use std::{collections::VecDeque, time::Instant};

/// Most recent frame gaps kept for the percentile figures
pub const MAX_INTERVAL_SAMPLES: usize = 10_000;

/// Capture statistics collected during a run
#[derive(Debug, Clone, Serialize)]
pub struct FrameMetrics {
    /// Total number of frames delivered
    pub frames_captured: u64,
    /// Total payload bytes delivered
    pub bytes_captured: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Minimum gap between consecutive frames in microseconds
    pub interval_min_us: u64,
    /// Maximum gap between consecutive frames in microseconds
    pub interval_max_us: u64,
    /// Average gap between consecutive frames in microseconds
    pub interval_avg_us: u64,
    /// 50th percentile (median) of the most recent gaps in microseconds
    pub interval_p50_us: u64,
    /// 95th percentile frame gap in microseconds
    pub interval_p95_us: u64,
    /// 99th percentile frame gap in microseconds
    pub interval_p99_us: u64,
    /// Smallest payload seen
    pub frame_bytes_min: u64,
    /// Largest payload seen
    pub frame_bytes_max: u64,
    /// Number of frames the driver sequence skipped
    pub dropped_frames: u64,
}

/// Metrics collector for tracking capture throughput
pub struct MetricsCollector {
    start_time: Instant,
    last_frame: Option<Instant>,
    intervals_us: VecDeque<u64>,
    interval_count: u64,
    interval_sum_us: u64,
    interval_min_us: u64,
    interval_max_us: u64,
    frames: u64,
    bytes: u64,
    frame_bytes_min: u64,
    frame_bytes_max: u64,
    prev_sequence: Option<u32>,
    dropped_frames: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_frame: None,
            intervals_us: VecDeque::new(),
            interval_count: 0,
            interval_sum_us: 0,
            interval_min_us: u64::MAX,
            interval_max_us: 0,
            frames: 0,
            bytes: 0,
            frame_bytes_min: 0,
            frame_bytes_max: 0,
            prev_sequence: None,
            dropped_frames: 0,
        }
    }

    /// Record a frame that arrived at `at`
    pub fn record_frame(&mut self, at: Instant, bytes: u64) {
        if let Some(prev) = self.last_frame {
            let gap = at.saturating_duration_since(prev).as_micros() as u64;
            self.record_interval(gap);
        }
        self.last_frame = Some(at);

        if self.frames == 0 {
            self.frame_bytes_min = bytes;
            self.frame_bytes_max = bytes;
        } else {
            self.frame_bytes_min = self.frame_bytes_min.min(bytes);
            self.frame_bytes_max = self.frame_bytes_max.max(bytes);
        }
        self.frames += 1;
        self.bytes += bytes;
    }

    fn record_interval(&mut self, gap_us: u64) {
        self.interval_count += 1;
        self.interval_sum_us = self.interval_sum_us.saturating_add(gap_us);
        self.interval_min_us = self.interval_min_us.min(gap_us);
        self.interval_max_us = self.interval_max_us.max(gap_us);

        // Keep only the newest samples
        if self.intervals_us.len() == MAX_INTERVAL_SAMPLES {
            self.intervals_us.pop_front();
        }
        self.intervals_us.push_back(gap_us);
    }

    /// Track the driver sequence number to detect drops
    /// Returns the number of frames skipped since the previous one
    pub fn track_sequence(&mut self, sequence: u32) -> u64 {
        let drops = match self.prev_sequence {
            Some(prev) => {
                let expected = prev.wrapping_add(1);
                let gap = sequence.wrapping_sub(expected);
                if gap == 0 {
                    0
                } else if gap < u32::MAX / 2 {
                    u64::from(gap)
                } else {
                    // Sequence restarted or went backwards
                    log::warn!("Frame sequence number decreased: {} -> {}", prev, sequence);
                    0
                }
            }
            None => 0,
        };

        self.dropped_frames += drops;
        self.prev_sequence = Some(sequence);
        drops
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Finalize and calculate all metrics
    pub fn finalize(&mut self) -> FrameMetrics {
        let duration = self.start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            self.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        let (min_us, max_us, avg_us) = if self.interval_count > 0 {
            (
                self.interval_min_us,
                self.interval_max_us,
                self.interval_sum_us / self.interval_count,
            )
        } else {
            (0, 0, 0)
        };

        let mut sorted: Vec<u64> = self.intervals_us.iter().copied().collect();
        sorted.sort_unstable();

        FrameMetrics {
            frames_captured: self.frames,
            bytes_captured: self.bytes,
            duration_ms,
            throughput_fps,
            bandwidth_mbps,
            interval_min_us: min_us,
            interval_max_us: max_us,
            interval_avg_us: avg_us,
            interval_p50_us: percentile(&sorted, 50.0),
            interval_p95_us: percentile(&sorted, 95.0),
            interval_p99_us: percentile(&sorted, 99.0),
            frame_bytes_min: self.frame_bytes_min,
            frame_bytes_max: self.frame_bytes_max,
            dropped_frames: self.dropped_frames,
        }
    }
}

/// Calculate percentile from sorted interval data
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }

    let len = sorted.len();
    let idx = ((p / 100.0) * (len - 1) as f64).round() as usize;
    sorted[idx.min(len - 1)]
}

impl FrameMetrics {
    /// Print metrics in human-readable format
    pub fn print_text(&self) {
        println!("\n=== Capture Metrics ===");
        println!("Frames captured:   {}", self.frames_captured);
        println!(
            "Bytes captured:    {} ({:.2} MB)",
            self.bytes_captured,
            self.bytes_captured as f64 / 1_048_576.0
        );
        println!("Duration:          {:.2} s", self.duration_ms as f64 / 1000.0);
        println!("Throughput:        {:.2} fps", self.throughput_fps);
        println!("Bandwidth:         {:.2} Mbps", self.bandwidth_mbps);

        if self.frames_captured > 0 {
            println!(
                "Frame size:        {} - {} bytes",
                self.frame_bytes_min, self.frame_bytes_max
            );
        }

        if self.frames_captured > 1 {
            println!("\nFrame Interval (µs):");
            println!("  Min:    {}", self.interval_min_us);
            println!("  Max:    {}", self.interval_max_us);
            println!("  Avg:    {}", self.interval_avg_us);
            println!("  P50:    {}", self.interval_p50_us);
            println!("  P95:    {}", self.interval_p95_us);
            println!("  P99:    {}", self.interval_p99_us);
        }

        if self.dropped_frames > 0 {
            let expected = self.frames_captured + self.dropped_frames;
            println!(
                "\nDropped frames:    {} ({:.2}%)",
                self.dropped_frames,
                (self.dropped_frames as f64 / expected as f64) * 100.0
            );
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_interval_statistics() {
        let mut collector = MetricsCollector::new();
        let start = Instant::now();

        // Gaps of 0, 10, 20, ..., 100 ms
        let mut at = start;
        collector.record_frame(at, 100);
        for i in 0..=10u64 {
            at += Duration::from_millis(i * 10);
            collector.record_frame(at, 100);
        }

        let metrics = collector.finalize();
        assert_eq!(metrics.frames_captured, 12);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_max_us, 100_000);
        assert_eq!(metrics.interval_avg_us, 50_000);
        assert_eq!(metrics.interval_p50_us, 50_000);
        assert_eq!(metrics.interval_p95_us, 100_000);
    }

    #[test]
    fn test_interval_samples_are_bounded() {
        let mut collector = MetricsCollector::new();
        let mut at = Instant::now();
        collector.record_frame(at, 100);

        // One slow gap, then enough fast ones to push it out of the window
        at += Duration::from_millis(500);
        collector.record_frame(at, 100);
        for _ in 0..MAX_INTERVAL_SAMPLES + 5 {
            at += Duration::from_millis(10);
            collector.record_frame(at, 100);
        }

        assert_eq!(collector.intervals_us.len(), MAX_INTERVAL_SAMPLES);
        let metrics = collector.finalize();
        let gaps = MAX_INTERVAL_SAMPLES as u64 + 6;
        assert_eq!(metrics.frames_captured, gaps + 1);
        assert_eq!(metrics.interval_min_us, 10_000);
        assert_eq!(metrics.interval_max_us, 500_000);
        assert_eq!(
            metrics.interval_avg_us,
            (500_000 + (gaps - 1) * 10_000) / gaps
        );
        assert_eq!(metrics.interval_p99_us, 10_000);
    }

    #[test]
    fn test_frame_size_range() {
        let mut collector = MetricsCollector::new();
        let now = Instant::now();
        collector.record_frame(now, 300);
        collector.record_frame(now, 100);
        collector.record_frame(now, 200);

        let metrics = collector.finalize();
        assert_eq!(metrics.bytes_captured, 600);
        assert_eq!(metrics.frame_bytes_min, 100);
        assert_eq!(metrics.frame_bytes_max, 300);
    }

    #[test]
    fn test_dropped_frames_detection() {
        let mut collector = MetricsCollector::new();

        assert_eq!(collector.track_sequence(100), 0);
        assert_eq!(collector.track_sequence(101), 0);
        assert_eq!(collector.track_sequence(102), 0);

        // Drop 3 frames
        assert_eq!(collector.track_sequence(106), 3);
        assert_eq!(collector.dropped_frames, 3);

        // Backwards is not a drop
        assert_eq!(collector.track_sequence(2), 0);
        assert_eq!(collector.dropped_frames, 3);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut collector = MetricsCollector::new();
        collector.track_sequence(u32::MAX - 1);
        collector.track_sequence(u32::MAX);
        assert_eq!(collector.track_sequence(0), 0);
        assert_eq!(collector.track_sequence(2), 1);
    }

    #[test]
    fn test_throughput_calculation() {
        let mut collector = MetricsCollector::new();
        let now = Instant::now();

        for _ in 0..30 {
            collector.record_frame(now, 100_000);
        }

        std::thread::sleep(std::time::Duration::from_millis(100));

        let metrics = collector.finalize();

        assert_eq!(metrics.frames_captured, 30);
        assert_eq!(metrics.bytes_captured, 3_000_000);

        // Roughly 300 fps (30 frames / 0.1 sec)
        assert!(metrics.throughput_fps > 100.0 && metrics.throughput_fps < 400.0);
    }

    #[test]
    fn test_empty_metrics() {
        let mut collector = MetricsCollector::new();
        let metrics = collector.finalize();

        assert_eq!(metrics.frames_captured, 0);
        assert_eq!(metrics.bytes_captured, 0);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_p99_us, 0);
    }
}
