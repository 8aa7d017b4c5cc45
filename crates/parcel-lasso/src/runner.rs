//! Headless run: load both datasets, replay a command script, write the exports

use crate::AppError;
use crate::loader::{LoadProgress, spawn_loader};
use crate::settings::Settings;
use parcel_lasso_lib::{
    Command, DEFAULT_EXPORT_STEM, DatasetKind, Effect, ExportOutcome, ExportPayload,
    OverlayIntent, Session, SessionInfo,
};
use serde::Serialize;
use std::path::Path;
use tokio::sync::mpsc;

/// Snapshots buffered between the loaders and the session
const LOAD_CHANNEL_CAPACITY: usize = 4;

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub info: SessionInfo,
    pub exports: usize,
    pub failed_commands: usize,
}

/// One exported workbook
#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    file_stem: String,
    #[serde(flatten)]
    payload: &'a ExportPayload,
    removed_ids: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct ExportFile<'a> {
    exports: Vec<ExportRecord<'a>>,
}

/// Run the driver to completion
pub async fn run(settings: Settings) -> Result<RunSummary, AppError> {
    let mut session = Session::try_new(settings.config())?;
    load_datasets(&settings, &mut session).await?;

    if let Some(center) = session.center() {
        tracing::info!("Data centered on {:.5}, {:.5}", center.lat, center.lng);
    }

    let commands = match &settings.script {
        Some(path) => read_script(path)?,
        None => Vec::new(),
    };

    let mut exports = Vec::new();
    let mut failed_commands = 0;
    for (i, command) in commands.into_iter().enumerate() {
        match session.apply(command) {
            Ok(effects) => effects
                .into_iter()
                .for_each(|effect| report(effect, &mut exports)),
            Err(e) => {
                tracing::warn!("Command {} failed: {}", i + 1, e);
                failed_commands += 1;
            }
        }
    }

    if !exports.is_empty() {
        write_exports(&settings.output, &exports)?;
        tracing::info!(
            "Wrote {} export(s) to {}",
            exports.len(),
            settings.output.display()
        );
    }

    let info = session.info();
    tracing::info!("Session: {:?}", info);
    Ok(RunSummary {
        info,
        exports: exports.len(),
        failed_commands,
    })
}

/// Load the configured files concurrently, handing every snapshot to the session
async fn load_datasets(settings: &Settings, session: &mut Session) -> Result<(), AppError> {
    let (tx, mut rx) = mpsc::channel::<LoadProgress>(LOAD_CHANNEL_CAPACITY);
    let mut handles = Vec::new();
    for (kind, path) in [
        (DatasetKind::Comps, &settings.comps),
        (DatasetKind::Pricing, &settings.pricing),
    ] {
        if let Some(path) = path {
            handles.push(spawn_loader(
                kind,
                path.clone(),
                settings.chunk_size(),
                tx.clone(),
            ));
        }
    }
    drop(tx);

    while let Some(progress) = rx.recv().await {
        tracing::debug!(
            "Loaded {} {} records ({:.0}%)",
            progress.dataset.len(),
            progress.kind,
            progress.fraction() * 100.0
        );
        if progress.done {
            tracing::info!(
                "Loaded {} {} records, {} rows rejected",
                progress.stats.accepted,
                progress.kind,
                progress.stats.rejected()
            );
        }
        session.replace_dataset(progress.dataset);
    }

    for handle in handles {
        handle.await??;
    }
    Ok(())
}

fn read_script(path: &Path) -> Result<Vec<Command>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| AppError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn report(effect: Effect, exports: &mut Vec<ExportOutcome>) {
    match effect {
        Effect::Overlay(OverlayIntent::Add { handle, shape }) => {
            tracing::debug!("Overlay: add {} ({})", handle, shape.name())
        }
        Effect::Overlay(OverlayIntent::Remove { handle }) => {
            tracing::debug!("Overlay: remove {}", handle)
        }
        Effect::VisiblePricing(visible) => tracing::debug!(
            "Visible pricing: {} records ({:?})",
            visible.len(),
            visible.source
        ),
        Effect::FilterResult(result) => tracing::info!(
            "Selection: {} pricing, {} comps",
            result.pricing_matches().len(),
            result.comps_matches().len()
        ),
        Effect::Export(outcome) => {
            tracing::info!(
                "Exported {} rows, removed {} pricing and {} comps records",
                outcome.payload.len(),
                outcome.removed_pricing,
                outcome.removed_comps
            );
            exports.push(outcome);
        }
    }
}

/// File stem of the n-th export of a run, counting from 0
fn export_stem(n: usize) -> String {
    if n == 0 {
        DEFAULT_EXPORT_STEM.to_string()
    } else {
        format!("{}_{}", DEFAULT_EXPORT_STEM, n + 1)
    }
}

fn write_exports(path: &Path, exports: &[ExportOutcome]) -> Result<(), AppError> {
    let file = ExportFile {
        exports: exports
            .iter()
            .enumerate()
            .map(|(n, outcome)| {
                let mut removed_ids: Vec<&str> =
                    outcome.removed_ids.iter().map(String::as_str).collect();
                removed_ids.sort_unstable();
                ExportRecord {
                    file_stem: export_stem(n),
                    payload: &outcome.payload,
                    removed_ids,
                }
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&file).map_err(|source| AppError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| AppError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use parcel_lasso_lib::{COMPS_SHEET_NAME, PRICING_SHEET_NAME};
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scratch directory removed on drop
    struct Scratch(PathBuf);

    impl Scratch {
        fn new() -> Self {
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            let dir = std::env::temp_dir().join(format!(
                "parcel-lasso-{}-{}",
                std::process::id(),
                COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, name: &str, value: &Value) -> PathBuf {
            let path = self.0.join(name);
            std::fs::write(&path, value.to_string()).unwrap();
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn settings(args: &[&str]) -> Settings {
        let mut argv = vec!["parcel-lasso"];
        argv.extend_from_slice(args);
        Settings::parse_from(argv)
    }

    #[test]
    fn test_export_stems() {
        assert_eq!(export_stem(0), "filtered_data");
        assert_eq!(export_stem(1), "filtered_data_2");
        assert_eq!(export_stem(2), "filtered_data_3");
    }

    #[tokio::test]
    async fn test_run_without_inputs() {
        let summary = run(settings(&[])).await.unwrap();
        assert_eq!(summary.exports, 0);
        assert_eq!(summary.info, SessionInfo::default());
    }

    #[tokio::test]
    async fn test_run_draw_and_export() {
        let scratch = Scratch::new();
        let pricing = scratch.write(
            "pricing.json",
            &json!([
                {"APN - FORMATTED": "A1", "LATITUDE": 40.0, "LONGITUDE": -77.0, "LOT ACREAGE": 2.0},
                {"APN - FORMATTED": "A2", "LATITUDE": 40.001, "LONGITUDE": -77.0, "LOT ACREAGE": 5.0},
                {"APN - FORMATTED": "A3", "LATITUDE": 41.0, "LONGITUDE": -77.0, "LOT ACREAGE": 1.0},
                {"APN - FORMATTED": "A4", "LATITUDE": "", "LONGITUDE": -77.0, "LOT ACREAGE": 1.0}
            ]),
        );
        let comps = scratch.write(
            "comps.json",
            &json!([
                {"LATITUDE": 40.0005, "LONGITUDE": -77.0, "PRICE": 125000, "ACRES": 3.5},
                {"LATITUDE": 45.0, "LONGITUDE": -70.0, "PRICE": 90000, "ACRES": 1.0}
            ]),
        );
        let script = scratch.write(
            "script.json",
            &json!([
                {"command": "viewport_changed",
                 "bounds": {"north": 40.1, "south": 39.9, "east": -76.9, "west": -77.1},
                 "zoom": 13.0},
                {"command": "draw",
                 "shape": {"kind": "circle", "center": {"lat": 40.0, "lng": -77.0}, "radius_m": 1000.0}},
                {"command": "export"},
                {"command": "export"},
                {"command": "select", "handle": 99}
            ]),
        );
        let output = scratch.0.join("out.json");

        let summary = run(settings(&[
            "--pricing",
            pricing.to_str().unwrap(),
            "--comps",
            comps.to_str().unwrap(),
            "--script",
            script.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--chunk-size",
            "2",
        ]))
        .await
        .unwrap();

        assert_eq!(summary.exports, 1);
        // Second export has nothing selected, the unknown handle is rejected
        assert_eq!(summary.failed_commands, 2);
        assert_eq!(summary.info.pricing_count, 1);
        assert_eq!(summary.info.comps_count, 2);
        assert_eq!(summary.info.shape_count, 1);
        assert_eq!(summary.info.result_count, 0);

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        let export = &written["exports"][0];
        assert_eq!(export["file_stem"], "filtered_data");
        assert_eq!(export[PRICING_SHEET_NAME].as_array().unwrap().len(), 2);
        assert_eq!(export[COMPS_SHEET_NAME].as_array().unwrap().len(), 1);
        assert_eq!(export[PRICING_SHEET_NAME][0]["APN"], "A1");
        assert_eq!(export["removed_ids"], json!(["A1", "A2"]));
    }

    #[tokio::test]
    async fn test_run_rejects_bad_script() {
        let scratch = Scratch::new();
        let script = scratch.write("script.json", &json!([{"command": "teleport"}]));
        let err = run(settings(&["--script", script.to_str().unwrap()]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_run_reports_missing_file() {
        let err = run(settings(&["--pricing", "/nonexistent/pricing.json"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Read { .. }));
    }
}
