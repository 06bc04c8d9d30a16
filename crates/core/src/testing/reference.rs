use rand::Rng;

use crate::stack::{REDUCE, SHIFT};

/// Per-step state of a plain software stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRun {
    /// `tops[b][t]`: top of example `b`'s stack after step `t`.
    pub tops: Vec<Vec<Vec<f32>>>,
    /// Buffer tokens consumed by each example.
    pub cursors: Vec<usize>,
    /// Live stack depth of each example.
    pub depths: Vec<usize>,
}

/// Runs the shift-reduce recurrence with a `Vec` stack per example.
///
/// `buffer[b][p]` is token `p` of example `b`; `compose(left, right)` merges
/// the second-from-top entry with the top. Labels must be well formed.
pub fn reference_forward<F>(buffer: &[Vec<Vec<f32>>], labels: &[Vec<u8>], compose: F) -> ReferenceRun
where
    F: Fn(&[f32], &[f32]) -> Vec<f32>,
{
    let mut run = ReferenceRun {
        tops: Vec::with_capacity(labels.len()),
        cursors: Vec::with_capacity(labels.len()),
        depths: Vec::with_capacity(labels.len()),
    };

    for (tokens, row) in buffer.iter().zip(labels) {
        let mut stack: Vec<Vec<f32>> = Vec::new();
        let mut cursor = 0;
        let mut tops = Vec::with_capacity(row.len());
        for &label in row {
            match label {
                SHIFT => {
                    stack.push(tokens[cursor].clone());
                    cursor += 1;
                }
                REDUCE => {
                    let right = stack.pop().expect("reduce on empty stack");
                    let left = stack.pop().expect("reduce on single entry");
                    stack.push(compose(&left, &right));
                }
                other => panic!("unknown transition label {other}"),
            }
            tops.push(stack.last().cloned().unwrap_or_default());
        }
        run.tops.push(tops);
        run.cursors.push(cursor);
        run.depths.push(stack.len());
    }
    run
}

/// Column-form dense merge: `act(W_l · left + W_r · right + b)`.
pub fn dense_compose(
    w_l: &[Vec<f32>],
    w_r: &[Vec<f32>],
    b: &[f32],
    relu: bool,
    left: &[f32],
    right: &[f32],
) -> Vec<f32> {
    b.iter()
        .enumerate()
        .map(|(i, bias)| {
            let l: f32 = w_l[i].iter().zip(left).map(|(w, x)| w * x).sum();
            let r: f32 = w_r[i].iter().zip(right).map(|(w, x)| w * x).sum();
            let v = l + r + bias;
            if relu {
                v.max(0.0)
            } else {
                v
            }
        })
        .collect()
}

/// A random well-formed transition sequence of length `len`.
///
/// Reduces are only drawn when at least two entries are live, so the first
/// label is always a shift.
pub fn random_transitions<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut depth = 0usize;
    (0..len)
        .map(|_| {
            if depth >= 2 && rng.gen_bool(0.5) {
                depth -= 1;
                REDUCE
            } else {
                depth += 1;
                SHIFT
            }
        })
        .collect()
}
