//! Centered sliding average over a growing series.
use crate::error::{AppResult, MimsError};
use std::collections::VecDeque;

/// Per-consumer smoothing state.
///
/// Output row `j` is the mean of source rows `j - h ..= j + h` for every data
/// column; its time is the time of row `j`. The first and last `h` source
/// rows produce no output. Never shared between consumers.
#[derive(Debug, Clone)]
pub struct MovingAverageWindow {
    half_width: usize,
    buffer: VecDeque<Vec<f64>>,
    consumed: usize,
}

impl MovingAverageWindow {
    /// Empty window averaging `2 * half_width + 1` rows.
    pub fn new(half_width: usize) -> Self {
        Self {
            half_width,
            buffer: VecDeque::with_capacity(2 * half_width + 1),
            consumed: 0,
        }
    }

    /// Rows on each side of the centre.
    pub fn half_width(&self) -> usize {
        self.half_width
    }

    /// Number of source rows consumed so far; the next row to feed.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn span(&self) -> usize {
        2 * self.half_width + 1
    }

    /// Feed one source row; returns an averaged row once the window is full.
    pub fn push(&mut self, row: Vec<f64>) -> Option<Vec<f64>> {
        self.consumed += 1;
        self.buffer.push_back(row);
        if self.buffer.len() > self.span() {
            self.buffer.pop_front();
        }
        if self.buffer.len() < self.span() {
            return None;
        }

        let count = self.buffer.len() as f64;
        let center = &self.buffer[self.half_width];
        let mut avg = vec![0.0; center.len()];
        avg[0] = center[0];
        for row in &self.buffer {
            for (acc, v) in avg.iter_mut().zip(row).skip(1) {
                *acc += v;
            }
        }
        for v in avg.iter_mut().skip(1) {
            *v /= count;
        }
        Some(avg)
    }

    /// Feed new source rows and return the averaged rows they complete.
    pub fn advance(&mut self, rows: impl IntoIterator<Item = Vec<f64>>) -> Vec<Vec<f64>> {
        rows.into_iter().filter_map(|row| self.push(row)).collect()
    }

    /// Start over on a full source series.
    ///
    /// Fails when `2h >= source.len()`, i.e. when not a single averaged row
    /// could be produced.
    pub fn build(&mut self, source: &[Vec<f64>]) -> AppResult<Vec<Vec<f64>>> {
        if 2 * self.half_width >= source.len() {
            return Err(MimsError::WindowTooLarge {
                half_width: self.half_width,
                len: source.len(),
            });
        }
        self.buffer.clear();
        self.consumed = 0;
        Ok(self.advance(source.iter().cloned()))
    }

    /// Change the half-width and rebuild from scratch.
    pub fn rebuild(&mut self, half_width: usize, source: &[Vec<f64>]) -> AppResult<Vec<Vec<f64>>> {
        *self = Self::new(half_width);
        self.build(source)
    }
}
