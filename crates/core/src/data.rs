//! Example preparation: crop/pad token and transition sequences to the
//! fixed `seq_length` and pack a batch.
//!
//! Sequences are aligned on the right. Transitions are left-padded with
//! shifts; tokens are left-padded by the same amount so every padding shift
//! consumes exactly one padding token, and right-filled up to `seq_length`
//! (those slots are never read).

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::ModelSpec;
use crate::error::{Result, ThinStackError};
use crate::stack::{Transitions, SHIFT};

/// Token id used for padding slots.
pub const PAD_TOKEN: u32 = 0;

/// One parsed sentence: token ids and its shift/reduce sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub tokens: Vec<u32>,
    pub transitions: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<u32>,
}

impl Example {
    pub fn new(tokens: Vec<u32>, transitions: Vec<u8>) -> Self {
        Self {
            tokens,
            transitions,
            label: None,
        }
    }

    pub fn num_shifts(&self) -> usize {
        self.transitions.iter().filter(|&&l| l == SHIFT).count()
    }
}

/// Left-pads `seq` with `pad` up to `length`, or drops elements from the
/// front when it is longer.
pub fn crop_and_pad<T: Clone>(seq: &[T], length: usize, pad: T) -> Vec<T> {
    if seq.len() >= length {
        if seq.len() > length {
            tracing::debug!(from = seq.len(), to = length, "Cropping sequence");
        }
        return seq[seq.len() - length..].to_vec();
    }
    let mut out = vec![pad; length - seq.len()];
    out.extend_from_slice(seq);
    out
}

/// Crops or pads one example to `seq_length` keeping tokens and shifts aligned.
fn align(example: &Example, index: usize, seq_length: usize) -> Result<(Vec<u32>, Vec<u8>)> {
    let shifts = example.num_shifts();
    if shifts != example.tokens.len() {
        return Err(ThinStackError::MalformedTransitions {
            example: index,
            timestep: example.transitions.len(),
            reason: "shift count does not match token count",
        });
    }

    let len = example.transitions.len();
    if len > seq_length {
        let dropped = len - seq_length;
        let dropped_shifts = example.transitions[..dropped]
            .iter()
            .filter(|&&l| l == SHIFT)
            .count();
        tracing::warn!(
            example = index,
            from = len,
            to = seq_length,
            "Cropping transitions from the left"
        );
        let transitions = crop_and_pad(&example.transitions, seq_length, SHIFT);
        let kept = &example.tokens[dropped_shifts..];
        let mut tokens = kept.to_vec();
        tokens.resize(seq_length, PAD_TOKEN);
        return Ok((tokens, transitions));
    }

    let padding = seq_length - len;
    let transitions = crop_and_pad(&example.transitions, seq_length, SHIFT);
    let mut tokens = vec![PAD_TOKEN; padding];
    tokens.extend_from_slice(&example.tokens);
    tokens.resize(seq_length, PAD_TOKEN);
    Ok((tokens, transitions))
}

/// One fixed-shape batch ready for the buffer encoder and the thin stack.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, T]` u32 token ids.
    pub token_ids: Tensor,
    pub transitions: Transitions,
}

impl Batch {
    /// Packs exactly `spec.batch_size` examples.
    pub fn from_examples(examples: &[Example], spec: &ModelSpec, device: &Device) -> Result<Self> {
        let (batch, seq) = (spec.batch_size, spec.seq_length);
        if examples.len() != batch {
            return Err(ThinStackError::InputShape {
                name: "examples",
                expected: vec![batch],
                found: vec![examples.len()],
            });
        }

        let mut ids = Vec::with_capacity(batch * seq);
        let mut labels = Vec::with_capacity(batch);
        for (index, example) in examples.iter().enumerate() {
            let (tokens, transitions) = align(example, index, seq)?;
            if spec.vocab_size > 0 {
                if let Some(&bad) = tokens.iter().find(|&&id| id as usize >= spec.vocab_size) {
                    return Err(ThinStackError::OffsetOutOfRange {
                        what: "token id",
                        offset: bad as f32,
                        extent: spec.vocab_size,
                    });
                }
            }
            ids.extend(tokens);
            labels.push(transitions);
        }

        let token_ids = Tensor::from_vec(ids, (batch, seq), device)?;
        let transitions = Transitions::new(labels, spec, device)?;
        Ok(Self {
            token_ids,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_and_pad_left_pads() {
        assert_eq!(crop_and_pad(&[1, 2], 4, 0), vec![0, 0, 1, 2]);
    }

    #[test]
    fn crop_and_pad_crops_from_front() {
        assert_eq!(crop_and_pad(&[1, 2, 3, 4, 5], 3, 0), vec![3, 4, 5]);
        assert_eq!(crop_and_pad(&[1, 2, 3], 3, 0), vec![1, 2, 3]);
    }

    #[test]
    fn padding_shifts_consume_padding_tokens() {
        // "a b" -> shift shift reduce, padded to 5.
        let example = Example::new(vec![7, 8], vec![0, 0, 1]);
        let (tokens, transitions) = align(&example, 0, 5).expect("align");
        assert_eq!(transitions, vec![0, 0, 0, 0, 1]);
        assert_eq!(tokens, vec![0, 0, 7, 8, 0]);
    }

    #[test]
    fn crop_drops_tokens_of_dropped_shifts() {
        let example = Example::new(vec![1, 2, 3], vec![0, 0, 1, 0, 1]);
        let (tokens, transitions) = align(&example, 0, 3).expect("align");
        assert_eq!(transitions, vec![1, 0, 1]);
        assert_eq!(tokens, vec![3, 0, 0]);
    }

    #[test]
    fn shift_token_mismatch_rejected() {
        let example = Example::new(vec![1], vec![0, 0, 1]);
        let err = align(&example, 2, 4).unwrap_err();
        assert!(err.to_string().contains("shift count"), "{err}");
    }

    #[test]
    fn batch_requires_exact_size() {
        let spec = ModelSpec::new(2, 4, 3);
        let examples = vec![Example::new(vec![1, 2], vec![0, 0, 1])];
        let err = Batch::from_examples(&examples, &spec, &Device::Cpu).unwrap_err();
        assert!(matches!(err, ThinStackError::InputShape { name: "examples", .. }));
    }

    #[test]
    fn batch_packs_ids_and_transitions() {
        let spec = ModelSpec::new(2, 4, 3);
        let examples = vec![
            Example::new(vec![1, 2], vec![0, 0, 1]),
            Example::new(vec![5, 6, 7], vec![0, 0, 0]),
        ];
        let batch = Batch::from_examples(&examples, &spec, &Device::Cpu).expect("batch");
        let ids: Vec<Vec<u32>> = batch.token_ids.to_vec2().expect("ids");
        assert_eq!(ids, vec![vec![1, 2, 0], vec![5, 6, 7]]);
        assert_eq!(batch.transitions.labels()[0], vec![0, 0, 1]);
    }

    #[test]
    fn out_of_vocab_token_rejected() {
        let mut spec = ModelSpec::new(1, 4, 3);
        spec.vocab_size = 5;
        let examples = vec![Example::new(vec![1, 9], vec![0, 0, 1])];
        let err = Batch::from_examples(&examples, &spec, &Device::Cpu).unwrap_err();
        assert!(matches!(err, ThinStackError::OffsetOutOfRange { what: "token id", .. }));
    }

    #[test]
    fn crop_into_malformed_prefix_rejected() {
        // Dropping the first two shifts leaves a reduce with one entry.
        let spec = ModelSpec::new(1, 4, 3);
        let examples = vec![Example::new(vec![1, 2, 3], vec![0, 0, 0, 1, 1])];
        let err = Batch::from_examples(&examples, &spec, &Device::Cpu).unwrap_err();
        assert!(matches!(err, ThinStackError::MalformedTransitions { .. }));
    }

    #[test]
    fn example_json_label_optional() {
        let ex: Example =
            serde_json::from_str(r#"{"tokens": [3, 4], "transitions": [0, 0, 1]}"#).expect("parse");
        assert_eq!(ex.label, None);
        assert_eq!(ex.num_shifts(), 2);
    }
}
