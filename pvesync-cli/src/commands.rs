use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use pvesync_engine::{DesiredVm, Engine, EngineError, VmRef};
use serde::Serialize;
use tracing::{info, warn};

fn load(path: &Path) -> Result<DesiredVm> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse desired state in {}", path.display()))
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    match output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

pub async fn plan(engine: &Engine, file: &Path) -> Result<()> {
    let desired = load(file)?;
    let batch = engine.plan(&desired).await.context("Plan failed")?;
    if batch.is_empty() {
        info!("no changes");
    }
    emit(&batch, None)
}

pub async fn apply(
    engine: &Engine,
    file: &Path,
    create: bool,
    output: Option<&Path>,
) -> Result<()> {
    let desired = load(file)?;
    let result = if create || desired.id.is_none() {
        engine.create(&desired).await
    } else {
        engine.reconcile(&desired, false).await
    };

    match result {
        Ok(reconciled) => {
            info!(
                set = reconciled.batch.sets().len(),
                clear = reconciled.batch.clears().len(),
                grown = reconciled.growth.grown.len(),
                "applied"
            );
            emit(&reconciled.state, output)
        }
        Err(EngineError::PartialApply { report, state }) => {
            match state {
                Some(state) => emit(&state, output)?,
                None => warn!("state could not be read back after partial apply"),
            }
            bail!("Apply stopped part way: {report}")
        }
        Err(e) => Err(e).context("Apply failed"),
    }
}

pub async fn read(engine: &Engine, file: &Path) -> Result<()> {
    let desired = load(file)?;
    match engine.read(&desired).await.context("Read failed")? {
        Some(state) => emit(&state, None),
        None => {
            let vm = desired.vm_ref().map(|vm| vm.to_string()).unwrap_or_default();
            bail!("VM {vm} no longer exists")
        }
    }
}

pub async fn import(engine: &Engine, vm: &VmRef) -> Result<()> {
    let state = engine
        .import(vm)
        .await
        .with_context(|| format!("Failed to import {vm}"))?;
    emit(&state, None)
}

pub async fn destroy(engine: &Engine, file: &Path) -> Result<()> {
    let desired = load(file)?;
    engine.destroy(&desired).await.context("Destroy failed")?;
    info!("destroyed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = std::env::temp_dir().join(format!("pvesync-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("vm.json");
        fs::write(&path, r#"{ "node_name": "pve1", "cpus": 4 }"#).unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("vm.json"));

        fs::write(&path, r#"{ "node_name": "pve1", "cpu": { "cores": 4 } }"#).unwrap();
        let vm = load(&path).unwrap();
        assert_eq!(vm.node_name, "pve1");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/pvesync/vm.json")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read"));
    }
}
