mod cli;
mod tensor_json;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use modelport_core::{Device, IOName, RuntimeOptions};
use modelport_runtime::ModelHandle;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect {
            model_path,
            device,
            log,
        } => {
            init_logging(&log);
            let options = RuntimeOptions {
                device: parse_device(&device)?,
                ..RuntimeOptions::default()
            };
            inspect(Path::new(&model_path), options)
        }
        Command::Run {
            model_path,
            inputs,
            device,
            strict_dtypes,
            log,
        } => {
            init_logging(&log);
            let options = RuntimeOptions {
                device: parse_device(&device)?,
                float32_accepts_any: !strict_dtypes,
            };
            run(Path::new(&model_path), Path::new(&inputs), options)
        }
    }
}

fn init_logging(log: &str) {
    std::env::set_var("RUST_LOG", log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn parse_device(raw: &str) -> Result<Device> {
    if raw.eq_ignore_ascii_case("cpu") {
        return Ok(Device::Cpu);
    }
    if let Some(rest) = raw.strip_prefix("gpu:") {
        let device_id: u32 = rest.parse().context("invalid gpu device id")?;
        return Ok(Device::Gpu { device_id });
    }
    if let Some(rest) = raw.strip_prefix("opencl:") {
        let device_id: u32 = rest.parse().context("invalid opencl device id")?;
        return Ok(Device::OpenCl { device_id });
    }
    anyhow::bail!("unsupported device: {raw} (expected cpu, gpu:N or opencl:N)");
}

fn inspect(model_path: &Path, options: RuntimeOptions) -> Result<()> {
    let handle = ModelHandle::load_with(model_path, options)
        .with_context(|| format!("failed to load {}", model_path.display()))?;

    let spec = handle.spec();
    let describe = |specs: &[modelport_core::TensorSpec]| -> Vec<serde_json::Value> {
        specs
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name.as_str(),
                    "dtype": s.dtype.name(),
                    "shape": s.shape.as_ref().map(|sh| sh.dims().to_vec()),
                })
            })
            .collect()
    };
    let report = serde_json::json!({
        "backend": handle.backend_name(),
        "inputs": describe(&spec.inputs),
        "weights": describe(&spec.weights),
        "outputs": describe(&spec.outputs),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(model_path: &Path, inputs_path: &Path, options: RuntimeOptions) -> Result<()> {
    let raw = std::fs::read_to_string(inputs_path)
        .with_context(|| format!("failed to read {}", inputs_path.display()))?;
    let bindings: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&raw).context("inputs file must be a JSON object")?;

    let mut handle = ModelHandle::load_with(model_path, options)
        .with_context(|| format!("failed to load {}", model_path.display()))?;

    let mut inputs = Vec::with_capacity(bindings.len());
    for (name, value) in bindings {
        let tensor = tensor_json::tensor_from_json(&value)
            .with_context(|| format!("invalid tensor for input '{name}'"))?;
        inputs.push((IOName(name), tensor));
    }

    let outputs = handle.run(&inputs)?;
    let mut report = serde_json::Map::new();
    for (name, tensor) in outputs {
        report.insert(name.0, tensor_json::tensor_to_json(&tensor)?);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(report))?
    );
    Ok(())
}
