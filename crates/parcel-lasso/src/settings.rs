use clap::Parser;
use parcel_lasso_lib::Config;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Parcel Lasso - Select comps and pricing parcels with drawn regions and export them
pub struct Settings {
    /// Comps ("main") rows: a JSON array of objects or JSON lines
    #[clap(short, long, value_name = "FILE")]
    pub comps: Option<PathBuf>,

    /// Pricing parcel rows: a JSON array of objects or JSON lines
    #[clap(short, long, value_name = "FILE")]
    pub pricing: Option<PathBuf>,

    /// JSON array of commands to replay once both datasets are loaded
    #[clap(short, long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Where to write the exported sheets
    #[clap(short, long, value_name = "FILE", default_value = "filtered_data.json")]
    pub output: PathBuf,

    /// Rows ingested between two published snapshots
    #[clap(long, default_value = "10000")]
    pub chunk_size: usize,

    /// Maximum points per quadtree leaf before subdivision
    #[clap(long, default_value = "16")]
    pub leaf_capacity: usize,

    /// Smallest pricing set that gets a spatial index (smaller sets are scanned)
    #[clap(long, default_value = "1")]
    pub min_points_for_index: usize,

    /// Re-apply the acreage filter to the remaining parcels after each export
    #[clap(long, default_value = "false")]
    pub reapply_acreage_after_export: bool,
}

impl Settings {
    /// Session configuration derived from the command line
    pub fn config(&self) -> Config {
        Config {
            leaf_capacity: self.leaf_capacity,
            min_points_for_index: self.min_points_for_index,
            reapply_acreage_after_export: self.reapply_acreage_after_export,
            ..Config::default()
        }
    }

    /// Chunk size, never zero
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse_from(["parcel-lasso"]);
        assert!(settings.comps.is_none());
        assert_eq!(settings.output, PathBuf::from("filtered_data.json"));
        assert_eq!(settings.chunk_size(), 10_000);
        assert_eq!(settings.config(), Config::default());
    }

    #[test]
    fn test_flags() {
        let settings = Settings::parse_from([
            "parcel-lasso",
            "--pricing",
            "pricing.json",
            "-c",
            "comps.jsonl",
            "--chunk-size",
            "0",
            "--leaf-capacity",
            "4",
            "--reapply-acreage-after-export",
        ]);
        assert_eq!(settings.pricing, Some(PathBuf::from("pricing.json")));
        assert_eq!(settings.comps, Some(PathBuf::from("comps.jsonl")));
        assert_eq!(settings.chunk_size(), 1);
        let config = settings.config();
        assert_eq!(config.leaf_capacity, 4);
        assert!(config.reapply_acreage_after_export);
    }
}
