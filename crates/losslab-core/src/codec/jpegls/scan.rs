//! Scan traversal shared by the encoder and decoder.
//!
//! The traversal walks lines, derives contexts from already-coded neighbours
//! and hands each sample (or run) to a [`SampleCoder`]. The encoder's coder
//! writes bits and returns the sample unchanged; the decoder's coder reads bits
//! and returns the reconstructed sample. Both sides therefore evolve the same
//! context state by construction.

use super::bitstream::{BitReader, BitWriter, StreamError};
use super::context::{
    context_index, error_in_range, predict, reconstruct, reduce_error, ContextSet,
    RegularContext, RunContext, J, LIMIT,
};
use crate::codec::InterleaveMode;

/// Per-sample coding operations.
pub(crate) trait SampleCoder {
    /// True when samples come out of the bitstream rather than the image.
    const DECODING: bool;

    /// Code one regular-mode sample. `px` is the corrected prediction.
    fn regular(
        &mut self,
        ctx: &mut RegularContext,
        px: i32,
        sign: i32,
        sample: i32,
    ) -> Result<i32, StreamError>;

    /// Code a run starting with `remaining` samples left in the line.
    /// `run` is the encoder's measured run length. Returns the run length and
    /// whether it reached the end of the line.
    fn run_length(
        &mut self,
        run_index: &mut usize,
        remaining: usize,
        run: usize,
    ) -> Result<(usize, bool), StreamError>;

    /// Code the sample that interrupted a run. With `ri_type == 1` the sample
    /// must differ from `px`.
    fn interruption(
        &mut self,
        ctx: &mut RunContext,
        ri_type: i32,
        px: i32,
        sign: i32,
        run_index: usize,
        sample: i32,
    ) -> Result<i32, StreamError>;
}

impl SampleCoder for BitWriter {
    const DECODING: bool = false;

    fn regular(
        &mut self,
        ctx: &mut RegularContext,
        px: i32,
        sign: i32,
        sample: i32,
    ) -> Result<i32, StreamError> {
        let errval = reduce_error(sign * (sample - px));
        let k = ctx.k();
        self.write_golomb(ctx.map_error(errval, k), k, LIMIT);
        ctx.update(errval);
        Ok(sample)
    }

    fn run_length(
        &mut self,
        run_index: &mut usize,
        remaining: usize,
        run: usize,
    ) -> Result<(usize, bool), StreamError> {
        let end_of_line = run == remaining;
        let mut left = run;
        while left >= 1 << J[*run_index] {
            self.write_bit(1);
            left -= 1 << J[*run_index];
            if *run_index < J.len() - 1 {
                *run_index += 1;
            }
        }

        if end_of_line {
            if left > 0 {
                self.write_bit(1);
            }
        } else {
            self.write_bit(0);
            self.write_bits(left as u32, J[*run_index]);
        }
        Ok((run, end_of_line))
    }

    fn interruption(
        &mut self,
        ctx: &mut RunContext,
        ri_type: i32,
        px: i32,
        sign: i32,
        run_index: usize,
        sample: i32,
    ) -> Result<i32, StreamError> {
        let errval = reduce_error(sign * (sample - px));
        let k = ctx.k(ri_type);
        let mapped = ctx.map_error(errval, k, ri_type);
        self.write_golomb(mapped, k, LIMIT - J[run_index] - 1);
        ctx.update(errval, mapped, ri_type);
        Ok(sample)
    }
}

impl SampleCoder for BitReader<'_> {
    const DECODING: bool = true;

    fn regular(
        &mut self,
        ctx: &mut RegularContext,
        px: i32,
        sign: i32,
        _sample: i32,
    ) -> Result<i32, StreamError> {
        let k = ctx.k();
        let mapped = self.read_golomb(k, LIMIT)?;
        let errval = ctx.unmap_error(mapped, k);
        if !error_in_range(errval) {
            return Err(StreamError::ErrorOutOfRange);
        }
        ctx.update(errval);
        Ok(reconstruct(px, sign * errval))
    }

    fn run_length(
        &mut self,
        run_index: &mut usize,
        remaining: usize,
        _run: usize,
    ) -> Result<(usize, bool), StreamError> {
        let mut run = 0;
        loop {
            if self.read_bit()? == 1 {
                let block = 1 << J[*run_index];
                let count = block.min(remaining - run);
                run += count;
                if count == block && *run_index < J.len() - 1 {
                    *run_index += 1;
                }
                if run == remaining {
                    return Ok((run, true));
                }
            } else {
                run += self.read_bits(J[*run_index])? as usize;
                if run >= remaining {
                    return Err(StreamError::RunOverflow);
                }
                return Ok((run, false));
            }
        }
    }

    fn interruption(
        &mut self,
        ctx: &mut RunContext,
        ri_type: i32,
        px: i32,
        sign: i32,
        run_index: usize,
        _sample: i32,
    ) -> Result<i32, StreamError> {
        let k = ctx.k(ri_type);
        let mapped = self.read_golomb(k, LIMIT - J[run_index] - 1)?;
        let errval = ctx.unmap_error(mapped, k, ri_type);
        if !error_in_range(errval) {
            return Err(StreamError::ErrorOutOfRange);
        }
        ctx.update(errval, mapped, ri_type);
        Ok(reconstruct(px, sign * errval))
    }
}

/// Previous and current line of one component, padded by one sample on
/// each side. Sample `i` of a line lives at index `i + 1`.
#[derive(Debug)]
struct LinePair {
    width: usize,
    prev: Vec<i32>,
    cur: Vec<i32>,
}

impl LinePair {
    fn new(width: usize) -> Self {
        Self {
            width,
            prev: vec![0; width + 2],
            cur: vec![0; width + 2],
        }
    }

    /// Set up edge neighbours: Ra of the first sample is Rb, and Rd of the
    /// last sample is Rb.
    fn start_line(&mut self) {
        self.cur[0] = self.prev[1];
        self.prev[self.width + 1] = self.prev[self.width];
    }

    fn samples(&self) -> &[i32] {
        &self.cur[1..=self.width]
    }

    fn samples_mut(&mut self) -> &mut [i32] {
        &mut self.cur[1..=self.width]
    }

    fn advance(&mut self) {
        std::mem::swap(&mut self.prev, &mut self.cur);
    }

    fn ra(&self, i: usize) -> i32 {
        self.cur[i]
    }

    fn rb(&self, i: usize) -> i32 {
        self.prev[i + 1]
    }

    fn rc(&self, i: usize) -> i32 {
        self.prev[i]
    }

    fn rd(&self, i: usize) -> i32 {
        self.prev[i + 2]
    }

    fn sample(&self, i: usize) -> i32 {
        self.cur[i + 1]
    }

    fn set(&mut self, i: usize, value: i32) {
        self.cur[i + 1] = value;
    }

    fn context(&self, i: usize) -> (usize, i32) {
        let (ra, rb, rc, rd) = (self.ra(i), self.rb(i), self.rc(i), self.rd(i));
        context_index(rd - rb, rb - rc, rc - ra)
    }

    fn code_regular<C: SampleCoder>(
        &mut self,
        coder: &mut C,
        contexts: &mut ContextSet,
        i: usize,
        q: usize,
        sign: i32,
    ) -> Result<(), StreamError> {
        let ctx = &mut contexts.regular[q];
        let px = ctx.corrected(predict(self.ra(i), self.rb(i), self.rc(i)), sign);
        let x = coder.regular(ctx, px, sign, self.sample(i))?;
        self.set(i, x);
        Ok(())
    }
}

/// Geometry of one scan over an interleaved pixel buffer.
#[derive(Debug, Clone)]
pub(crate) struct ScanGeometry {
    pub(crate) width: usize,
    pub(crate) height: usize,
    /// Channel indices coded by this scan, in order.
    pub(crate) components: Vec<usize>,
    pub(crate) mode: InterleaveMode,
}

/// Code one scan.
///
/// `load(y, component, line)` fills a line before it is coded (the encoder's
/// source). `store(y, component, line)` receives each finished line (the
/// decoder's sink).
pub(crate) fn code_scan<C, L, S>(
    coder: &mut C,
    geometry: &ScanGeometry,
    mut load: L,
    mut store: S,
) -> Result<(), StreamError>
where
    C: SampleCoder,
    L: FnMut(usize, usize, &mut [i32]),
    S: FnMut(usize, usize, &[i32]),
{
    let mut contexts = ContextSet::new();
    let mut lines: Vec<LinePair> = geometry
        .components
        .iter()
        .map(|_| LinePair::new(geometry.width))
        .collect();
    let mut run_index = vec![0usize; lines.len()];
    let pixel_interleaved = geometry.mode == InterleaveMode::Sample && lines.len() > 1;

    for y in 0..geometry.height {
        for (line, &component) in lines.iter_mut().zip(&geometry.components) {
            line.start_line();
            load(y, component, line.samples_mut());
        }

        if pixel_interleaved {
            code_pixel_line(coder, &mut contexts, &mut lines, &mut run_index[0])?;
        } else {
            for (line, index) in lines.iter_mut().zip(run_index.iter_mut()) {
                code_component_line(coder, &mut contexts, line, index)?;
            }
        }

        for (line, &component) in lines.iter_mut().zip(&geometry.components) {
            store(y, component, line.samples());
            line.advance();
        }
    }
    Ok(())
}

fn code_component_line<C: SampleCoder>(
    coder: &mut C,
    contexts: &mut ContextSet,
    line: &mut LinePair,
    run_index: &mut usize,
) -> Result<(), StreamError> {
    let mut i = 0;
    while i < line.width {
        let (q, sign) = line.context(i);
        if q == 0 {
            i = code_run(coder, contexts, std::slice::from_mut(line), run_index, i)?;
        } else {
            line.code_regular(coder, contexts, i, q, sign)?;
            i += 1;
        }
    }
    Ok(())
}

/// Sample-interleaved line: a pixel enters run mode only when every
/// component is flat, and a run continues while the whole pixel repeats.
fn code_pixel_line<C: SampleCoder>(
    coder: &mut C,
    contexts: &mut ContextSet,
    lines: &mut [LinePair],
    run_index: &mut usize,
) -> Result<(), StreamError> {
    let width = lines[0].width;
    let mut i = 0;
    while i < width {
        let flat = lines.iter().all(|line| line.context(i).0 == 0);
        if flat {
            i = code_run(coder, contexts, lines, run_index, i)?;
        } else {
            for line in lines.iter_mut() {
                let (q, sign) = line.context(i);
                line.code_regular(coder, contexts, i, q, sign)?;
            }
            i += 1;
        }
    }
    Ok(())
}

/// Code a run starting at `start` across `lines` plus its interruption
/// sample. Returns the index of the next sample to code.
fn code_run<C: SampleCoder>(
    coder: &mut C,
    contexts: &mut ContextSet,
    lines: &mut [LinePair],
    run_index: &mut usize,
    start: usize,
) -> Result<usize, StreamError> {
    let width = lines[0].width;
    let remaining = width - start;
    let measured = if C::DECODING {
        0
    } else {
        (start..width)
            .take_while(|&j| lines.iter().all(|line| line.sample(j) == line.ra(start)))
            .count()
    };

    let (run, end_of_line) = coder.run_length(run_index, remaining, measured)?;
    for line in lines.iter_mut() {
        let value = line.ra(start);
        for j in start..start + run {
            line.set(j, value);
        }
    }
    if end_of_line {
        return Ok(width);
    }

    // A joint interruption may leave some components equal to Ra, so every
    // component is predicted from Rb with the first interruption context.
    let joint = lines.len() > 1;
    let i = start + run;
    for line in lines.iter_mut() {
        let (ra, rb) = (line.ra(i), line.rb(i));
        let ri_type = i32::from(!joint && ra == rb);
        let px = if ri_type == 1 { ra } else { rb };
        let sign = if ri_type == 0 && ra > rb { -1 } else { 1 };
        let ctx = &mut contexts.run[ri_type as usize];
        let x = coder.interruption(ctx, ri_type, px, sign, *run_index, line.sample(i))?;
        line.set(i, x);
    }
    if *run_index > 0 {
        *run_index -= 1;
    }
    Ok(i + 1)
}
