use candle_core::{Device, Tensor};

use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};

/// Push the next buffer token.
pub const SHIFT: u8 = 0;
/// Pop two entries and push their composition.
pub const REDUCE: u8 = 1;

/// Validated shift/reduce labels for one batch.
///
/// Host labels are kept per example (`[B][T]`); the device mask is stored
/// timestep-major (`[T, B]`) so step `t` reads one contiguous row.
#[derive(Debug, Clone)]
pub struct Transitions {
    labels: Vec<Vec<u8>>,
    mask: Tensor,
}

impl Transitions {
    /// Checks shape, label values and well-formedness, then uploads the mask.
    ///
    /// Well-formed means every reduce finds at least two live stack entries,
    /// so the first transition of every example must be a shift. Rejecting
    /// this up front keeps the step from composing rows no step has written.
    pub fn new(labels: Vec<Vec<u8>>, spec: &ModelSpec, device: &Device) -> Result<Self> {
        let (batch, seq) = (spec.batch_size, spec.seq_length);
        if labels.len() != batch {
            return Err(ThinStackError::InputShape {
                name: "transitions",
                expected: vec![batch, seq],
                found: vec![labels.len(), labels.first().map_or(0, Vec::len)],
            });
        }
        for (example, row) in labels.iter().enumerate() {
            if row.len() != seq {
                return Err(ThinStackError::InputShape {
                    name: "transitions",
                    expected: vec![batch, seq],
                    found: vec![batch, row.len()],
                });
            }
            validate_row(example, row)?;
        }

        let mut data = Vec::with_capacity(batch * seq);
        for t in 0..seq {
            data.extend(labels.iter().map(|row| row[t] as f32));
        }
        let mask = Tensor::from_vec(data, (seq, batch), device)?;
        Ok(Self { labels, mask })
    }

    pub fn batch_size(&self) -> usize {
        self.labels.len()
    }

    pub fn seq_length(&self) -> usize {
        self.labels.first().map_or(0, Vec::len)
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Device mask for step `t`, `[B]` with 1.0 for reduce.
    pub fn row(&self, t: usize) -> Result<Tensor> {
        Ok(self.mask.get(t)?)
    }

    /// Shifts taken by `example` in steps `0..=t`.
    pub fn num_shifts(&self, example: usize, t: usize) -> usize {
        self.labels[example][..=t]
            .iter()
            .filter(|&&label| label == SHIFT)
            .count()
    }
}

fn validate_row(example: usize, row: &[u8]) -> Result<()> {
    let mut depth = 0usize;
    for (timestep, &label) in row.iter().enumerate() {
        match label {
            SHIFT => depth += 1,
            REDUCE => {
                if depth < 2 {
                    return Err(ThinStackError::MalformedTransitions {
                        example,
                        timestep,
                        reason: "reduce with fewer than two stack entries",
                    });
                }
                depth -= 1;
            }
            _ => {
                return Err(ThinStackError::MalformedTransitions {
                    example,
                    timestep,
                    reason: "label must be 0 (shift) or 1 (reduce)",
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(batch: usize, seq: usize) -> ModelSpec {
        ModelSpec::new(batch, 2, seq)
    }

    #[test]
    fn mask_is_timestep_major() {
        let labels = vec![vec![0, 0, 1, 0], vec![0, 0, 0, 0]];
        let tr = Transitions::new(labels, &spec(2, 4), &Device::Cpu).expect("valid");
        assert_eq!(tr.batch_size(), 2);
        assert_eq!(tr.seq_length(), 4);
        assert_eq!(tr.row(2).expect("row").to_vec1::<f32>().expect("vec"), vec![1.0, 0.0]);
        assert_eq!(tr.row(0).expect("row").to_vec1::<f32>().expect("vec"), vec![0.0, 0.0]);
    }

    #[test]
    fn num_shifts_counts_inclusive_prefix() {
        let labels = vec![vec![0, 0, 1, 0, 1]];
        let tr = Transitions::new(labels, &spec(1, 5), &Device::Cpu).expect("valid");
        assert_eq!(tr.num_shifts(0, 0), 1);
        assert_eq!(tr.num_shifts(0, 2), 2);
        assert_eq!(tr.num_shifts(0, 4), 3);
    }

    #[test]
    fn reduce_at_step_zero_rejected() {
        let labels = vec![vec![0, 0, 1], vec![1, 0, 0]];
        match Transitions::new(labels, &spec(2, 3), &Device::Cpu).unwrap_err() {
            ThinStackError::MalformedTransitions {
                example, timestep, ..
            } => {
                assert_eq!(example, 1);
                assert_eq!(timestep, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reduce_with_single_entry_rejected() {
        let labels = vec![vec![0, 0, 1, 1]];
        match Transitions::new(labels, &spec(1, 4), &Device::Cpu).unwrap_err() {
            ThinStackError::MalformedTransitions { timestep, .. } => assert_eq!(timestep, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_label_rejected() {
        let labels = vec![vec![0, 2, 0]];
        let err = Transitions::new(labels, &spec(1, 3), &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("label must be"), "{err}");
    }

    #[test]
    fn wrong_shape_rejected() {
        let err = Transitions::new(vec![vec![0, 0]], &spec(2, 2), &Device::Cpu).unwrap_err();
        assert!(matches!(err, ThinStackError::InputShape { .. }));
        let err = Transitions::new(vec![vec![0, 0, 0]], &spec(1, 2), &Device::Cpu).unwrap_err();
        assert!(matches!(err, ThinStackError::InputShape { .. }));
    }

    #[test]
    fn incomplete_parse_is_allowed() {
        // Leaving several entries on the stack is fine; the final top is the output.
        let labels = vec![vec![0, 0, 0, 1]];
        Transitions::new(labels, &spec(1, 4), &Device::Cpu).expect("valid");
    }
}
