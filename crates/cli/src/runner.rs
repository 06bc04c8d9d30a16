//! File-level operations behind the `run` and `validate` subcommands.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::Device;
use serde::Serialize;
use thinstack_core::params::load_safetensors;
use thinstack_core::{Batch, BufferEncoder, Example, ModelSpec, ThinStack, ThinStackParameters};

/// Final encoding of one input example.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encoding {
    /// Line index in the input file.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<u32>,
    pub encoding: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    /// `(example index, reason)` for every rejected example.
    pub errors: Vec<(usize, String)>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reads a spec from TOML (`.toml`) or JSON (anything else).
pub fn load_spec(path: &Path) -> anyhow::Result<ModelSpec> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading spec {}", path.display()))?;
    let spec: ModelSpec = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("parsing spec {}", path.display()))?,
        _ => ModelSpec::from_json(&content)?,
    };
    spec.validate()?;
    Ok(spec)
}

/// One JSON example per line; blank lines are skipped.
pub fn read_examples(path: &Path) -> anyhow::Result<Vec<Example>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading input {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid example", path.display(), n + 1))
        })
        .collect()
}

pub fn select_device(cuda: bool) -> anyhow::Result<Device> {
    if cuda {
        Device::new_cuda(0).context("opening CUDA device 0")
    } else {
        Ok(Device::Cpu)
    }
}

/// Checks every example on its own against `spec`.
pub fn validate(spec: &ModelSpec, examples: &[Example]) -> ValidationReport {
    let single = ModelSpec {
        batch_size: 1,
        ..spec.clone()
    };
    let mut report = ValidationReport {
        total: examples.len(),
        ..Default::default()
    };
    for (index, example) in examples.iter().enumerate() {
        match Batch::from_examples(std::slice::from_ref(example), &single, &Device::Cpu) {
            Ok(_) => report.valid += 1,
            Err(e) => report.errors.push((index, e.to_string())),
        }
    }
    report
}

/// Encodes every example. The last batch is filled up to `batch_size` with
/// copies of its final example; only rows of real examples are returned.
pub fn run(
    spec: &ModelSpec,
    weights: &[PathBuf],
    examples: &[Example],
    device: &Device,
) -> anyhow::Result<Vec<Encoding>> {
    if examples.is_empty() {
        bail!("no examples to encode");
    }
    let batch_size = spec.batch_size;

    let vb = load_safetensors(weights, device)?;
    let params = ThinStackParameters::load(spec, &vb)?;
    let encoder = BufferEncoder::load(spec, &vb, params.projection.as_ref())?;
    let mut stack = ThinStack::new(spec.clone(), params, device)?;

    let mut encodings = Vec::with_capacity(examples.len());
    for (n, chunk) in examples.chunks(batch_size).enumerate() {
        let filled = fill_batch(chunk, batch_size);
        let batch = Batch::from_examples(&filled, spec, device)
            .with_context(|| format!("batch {n}"))?;
        let buffer = encoder.encode(&batch.token_ids)?;
        stack.set_buffer(&buffer)?;
        stack.set_transitions(batch.transitions)?;
        let rows: Vec<Vec<f32>> = stack.forward()?.to_vec2()?;

        for (offset, (example, encoding)) in chunk.iter().zip(rows).enumerate() {
            encodings.push(Encoding {
                index: n * batch_size + offset,
                label: example.label,
                encoding,
            });
        }
        tracing::info!(batch = n, examples = chunk.len(), "Encoded batch");
    }
    Ok(encodings)
}

/// Pads a short final chunk with copies of its last example.
fn fill_batch(chunk: &[Example], batch_size: usize) -> Vec<Example> {
    let mut filled = chunk.to_vec();
    if let Some(last) = chunk.last() {
        let missing = batch_size.saturating_sub(chunk.len());
        if missing > 0 {
            tracing::debug!(missing, "Filling final batch");
        }
        filled.extend(std::iter::repeat(last.clone()).take(missing));
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Tensor};
    use std::collections::HashMap;
    use tempfile::tempdir;

    const SPEC_TOML: &str = r#"
batch_size = 2
model_dim = 2
seq_length = 3
vocab_size = 4
compose_activation = "identity"
"#;

    fn write_weights(path: &Path) {
        let mut tensors = HashMap::new();
        tensors.insert(
            "compose_W_l".to_string(),
            Tensor::eye(2, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "compose_W_r".to_string(),
            Tensor::eye(2, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "compose_b".to_string(),
            Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
        );
        // Row v is [v, 10 * v].
        let table: Vec<f32> = (0..4).flat_map(|v| [v as f32, 10.0 * v as f32]).collect();
        tensors.insert(
            "embeddings".to_string(),
            Tensor::from_vec(table, (4, 2), &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, path).unwrap();
    }

    #[test]
    fn load_spec_toml_and_json() {
        let dir = tempdir().unwrap();
        let toml_path = dir.path().join("spec.toml");
        fs::write(&toml_path, SPEC_TOML).unwrap();
        let spec = load_spec(&toml_path).unwrap();
        assert_eq!(spec.vocab_size, 4);

        let json_path = dir.path().join("spec.json");
        fs::write(&json_path, serde_json::to_string(&spec).unwrap()).unwrap();
        assert_eq!(load_spec(&json_path).unwrap(), spec);
    }

    #[test]
    fn load_spec_rejects_zero_dims() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.toml");
        fs::write(&path, "batch_size = 0\nmodel_dim = 2\nseq_length = 3\n").unwrap();
        assert!(load_spec(&path).is_err());
    }

    #[test]
    fn read_examples_reports_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        fs::write(
            &path,
            "{\"tokens\": [1, 2], \"transitions\": [0, 0, 1]}\n\nnot json\n",
        )
        .unwrap();
        let err = read_examples(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":3: invalid example"), "{err:#}");
    }

    #[test]
    fn validate_collects_per_example_errors() {
        let spec = load_spec_from_str();
        let examples = vec![
            Example::new(vec![1, 2], vec![0, 0, 1]),
            Example::new(vec![1, 2], vec![0, 1, 0]),
            Example::new(vec![1, 7], vec![0, 0, 1]),
        ];
        let report = validate(&spec, &examples);
        assert_eq!(report.total, 3);
        assert_eq!(report.valid, 1);
        assert!(!report.is_ok());
        let indices: Vec<usize> = report.errors.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn run_encodes_every_example() {
        let dir = tempdir().unwrap();
        let weights = dir.path().join("w.safetensors");
        write_weights(&weights);
        let spec = load_spec_from_str();

        let mut labelled = Example::new(vec![1, 2], vec![0, 0, 1]);
        labelled.label = Some(2);
        let examples = vec![
            labelled,
            Example::new(vec![3], vec![0]),
            Example::new(vec![1, 1], vec![0, 0, 1]),
        ];
        let out = run(&spec, &[weights], &examples, &Device::Cpu).unwrap();

        // The third example runs in a batch filled with a copy of itself.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].encoding, vec![3.0, 30.0]);
        assert_eq!(out[0].label, Some(2));
        assert_eq!(out[1].encoding, vec![3.0, 30.0]);
        assert_eq!(out[2].index, 2);
        assert_eq!(out[2].encoding, vec![2.0, 20.0]);
    }

    #[test]
    fn run_accepts_input_shorter_than_one_batch() {
        let dir = tempdir().unwrap();
        let weights = dir.path().join("w.safetensors");
        write_weights(&weights);
        let spec = ModelSpec {
            batch_size: 4,
            ..load_spec_from_str()
        };
        let examples = vec![Example::new(vec![1, 2], vec![0, 0, 1]); 7];
        let out = run(&spec, &[weights.clone()], &examples, &Device::Cpu).unwrap();

        assert_eq!(out.len(), 7);
        let indices: Vec<usize> = out.iter().map(|e| e.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert!(out.iter().all(|e| e.encoding == vec![3.0, 30.0]));

        let single = run(&spec, &[weights], &examples[..1], &Device::Cpu).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn run_rejects_empty_input() {
        let spec = load_spec_from_str();
        let err = run(&spec, &[], &[], &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("no examples"), "{err}");
    }

    #[test]
    fn fill_batch_repeats_last_example() {
        let chunk = vec![
            Example::new(vec![1], vec![0]),
            Example::new(vec![2], vec![0]),
        ];
        let filled = fill_batch(&chunk, 4);
        assert_eq!(filled.len(), 4);
        assert_eq!(filled[3], chunk[1]);
        assert_eq!(fill_batch(&chunk, 2), chunk);
    }

    fn load_spec_from_str() -> ModelSpec {
        toml::from_str(SPEC_TOML).unwrap()
    }
}
