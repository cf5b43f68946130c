//! Context modeling for 8-bit lossless JPEG-LS.
//!
//! Constants are the T.87 defaults for MAXVAL = 255 and NEAR = 0.

/// Largest sample value.
pub(crate) const MAXVAL: i32 = 255;
/// Size of the prediction error alphabet.
pub(crate) const RANGE: i32 = 256;
/// Bits per sample and per escaped error value.
pub(crate) const QBPP: u32 = 8;
/// Longest Golomb codeword.
pub(crate) const LIMIT: u32 = 32;

const T1: i32 = 3;
const T2: i32 = 7;
const T3: i32 = 21;
const RESET: i32 = 64;
const MIN_C: i32 = -128;
const MAX_C: i32 = 127;

/// Initial value of A: max(2, (RANGE + 32) / 64).
const A_INIT: i32 = (RANGE + 32) / 64;

/// Regular-mode contexts: quantized gradient triples folded by sign.
pub(crate) const REGULAR_CONTEXTS: usize = 365;

/// Run-length order table.
pub(crate) const J: [u32; 32] = [
    0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 9, 10, 11, 12, 13,
    14, 15,
];

fn quantize_gradient(d: i32) -> i32 {
    if d <= -T3 {
        -4
    } else if d <= -T2 {
        -3
    } else if d <= -T1 {
        -2
    } else if d < 0 {
        -1
    } else if d == 0 {
        0
    } else if d < T1 {
        1
    } else if d < T2 {
        2
    } else if d < T3 {
        3
    } else {
        4
    }
}

/// Context index and sign for the local gradients `d1 = Rd - Rb`,
/// `d2 = Rb - Rc`, `d3 = Rc - Ra`. Index 0 means all gradients are flat.
pub(crate) fn context_index(d1: i32, d2: i32, d3: i32) -> (usize, i32) {
    let q = (quantize_gradient(d1) * 9 + quantize_gradient(d2)) * 9 + quantize_gradient(d3);
    if q < 0 {
        ((-q) as usize, -1)
    } else {
        (q as usize, 1)
    }
}

/// Median edge detector.
pub(crate) fn predict(ra: i32, rb: i32, rc: i32) -> i32 {
    if rc >= ra.max(rb) {
        ra.min(rb)
    } else if rc <= ra.min(rb) {
        ra.max(rb)
    } else {
        ra + rb - rc
    }
}

/// Fold an error into [-RANGE/2, RANGE/2).
pub(crate) fn reduce_error(errval: i32) -> i32 {
    let mut e = errval;
    if e < 0 {
        e += RANGE;
    }
    if e >= (RANGE + 1) / 2 {
        e -= RANGE;
    }
    e
}

/// Undo the modular reduction: `px + errval` brought back into sample range.
pub(crate) fn reconstruct(px: i32, errval: i32) -> i32 {
    let x = px + errval;
    if x < 0 {
        x + RANGE
    } else if x > MAXVAL {
        x - RANGE
    } else {
        x
    }
}

pub(crate) fn error_in_range(errval: i32) -> bool {
    (-(RANGE / 2)..RANGE / 2).contains(&errval)
}

fn golomb_k(n: i32, a: i32) -> u32 {
    let mut k = 0;
    while (n << k) < a {
        k += 1;
    }
    k
}

/// Adaptive statistics for one regular-mode context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegularContext {
    a: i32,
    b: i32,
    c: i32,
    n: i32,
}

impl RegularContext {
    fn new() -> Self {
        Self {
            a: A_INIT,
            b: 0,
            c: 0,
            n: 1,
        }
    }

    /// Prediction with this context's bias correction applied.
    pub(crate) fn corrected(&self, px: i32, sign: i32) -> i32 {
        (px + sign * self.c).clamp(0, MAXVAL)
    }

    pub(crate) fn k(&self) -> u32 {
        golomb_k(self.n, self.a)
    }

    /// Whether the error mapping is flipped to favor negative errors.
    fn inverted(&self, k: u32) -> bool {
        k == 0 && 2 * self.b <= -self.n
    }

    pub(crate) fn map_error(&self, errval: i32, k: u32) -> u32 {
        let mapped = if self.inverted(k) {
            if errval >= 0 {
                2 * errval + 1
            } else {
                -2 * (errval + 1)
            }
        } else if errval >= 0 {
            2 * errval
        } else {
            -2 * errval - 1
        };
        mapped as u32
    }

    pub(crate) fn unmap_error(&self, mapped: u32, k: u32) -> i32 {
        let m = mapped as i32;
        if self.inverted(k) {
            if m & 1 == 1 {
                (m - 1) / 2
            } else {
                -(m / 2) - 1
            }
        } else if m & 1 == 0 {
            m / 2
        } else {
            -((m + 1) / 2)
        }
    }

    pub(crate) fn update(&mut self, errval: i32) {
        self.b += errval;
        self.a += errval.abs();
        if self.n == RESET {
            self.a >>= 1;
            self.b >>= 1;
            self.n >>= 1;
        }
        self.n += 1;

        if self.b <= -self.n {
            self.b += self.n;
            if self.c > MIN_C {
                self.c -= 1;
            }
            if self.b <= -self.n {
                self.b = -self.n + 1;
            }
        } else if self.b > 0 {
            self.b -= self.n;
            if self.c < MAX_C {
                self.c += 1;
            }
            if self.b > 0 {
                self.b = 0;
            }
        }
    }
}

/// Statistics for run interruption samples; one per interruption type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunContext {
    a: i32,
    n: i32,
    nn: i32,
}

impl RunContext {
    fn new() -> Self {
        Self {
            a: A_INIT,
            n: 1,
            nn: 0,
        }
    }

    pub(crate) fn k(&self, ri_type: i32) -> u32 {
        let temp = if ri_type == 1 {
            self.a + (self.n >> 1)
        } else {
            self.a
        };
        golomb_k(self.n, temp)
    }

    /// Whether a negative error is signalled by the low bit being set.
    fn negative_flag(&self, k: u32) -> bool {
        k != 0 || 2 * self.nn >= self.n
    }

    /// Map a reduced interruption error to its non-negative code value.
    pub(crate) fn map_error(&self, errval: i32, k: u32, ri_type: i32) -> u32 {
        let map = if errval > 0 {
            k == 0 && 2 * self.nn < self.n
        } else if errval < 0 {
            self.negative_flag(k)
        } else {
            false
        };
        (2 * errval.abs() - ri_type - i32::from(map)) as u32
    }

    pub(crate) fn unmap_error(&self, mapped: u32, k: u32, ri_type: i32) -> i32 {
        let temp = mapped as i32 + ri_type;
        let map = temp & 1 == 1;
        let magnitude = (temp + i32::from(map)) / 2;
        if self.negative_flag(k) == map {
            -magnitude
        } else {
            magnitude
        }
    }

    pub(crate) fn update(&mut self, errval: i32, mapped: u32, ri_type: i32) {
        if errval < 0 {
            self.nn += 1;
        }
        self.a += (mapped as i32 + 1 - ri_type) >> 1;
        if self.n == RESET {
            self.a >>= 1;
            self.n >>= 1;
            self.nn >>= 1;
        }
        self.n += 1;
    }
}

/// All adaptive state of one scan.
#[derive(Debug, Clone)]
pub(crate) struct ContextSet {
    pub(crate) regular: Vec<RegularContext>,
    pub(crate) run: [RunContext; 2],
}

impl ContextSet {
    pub(crate) fn new() -> Self {
        Self {
            regular: vec![RegularContext::new(); REGULAR_CONTEXTS],
            run: [RunContext::new(), RunContext::new()],
        }
    }
}
