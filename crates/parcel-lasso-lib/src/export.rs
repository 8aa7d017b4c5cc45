//! Export of the combined result and removal of exported parcels
//!
//! An export is prepared as a whole before anything changes: the payload, the set of removed
//! parcel identifiers and the next pricing and comps snapshots are all computed from the
//! current snapshots. The caller then swaps both snapshots in at once, so no reader ever sees a
//! partially removed dataset.

use crate::{AttributeValue, DataError, Dataset, ExtractedFields, FilterResult, Result};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sheet holding the pricing rows
pub const PRICING_SHEET_NAME: &str = "Pricing Data";

/// Sheet holding the comps rows
pub const COMPS_SHEET_NAME: &str = "Comps Data";

/// Default file name (without extension) for the exported workbook
pub const DEFAULT_EXPORT_STEM: &str = "filtered_data";

/// One exported pricing parcel
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PricingExportRow {
    #[cfg_attr(feature = "serde", serde(rename = "APN"))]
    pub apn: String,
    #[cfg_attr(feature = "serde", serde(rename = "LOT ACREAGE"))]
    pub lot_acreage: Option<f64>,
    #[cfg_attr(feature = "serde", serde(rename = "Latitude"))]
    pub latitude: f64,
    #[cfg_attr(feature = "serde", serde(rename = "Longitude"))]
    pub longitude: f64,
}

/// One exported comparable sale
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompsExportRow {
    #[cfg_attr(feature = "serde", serde(rename = "PRICE"))]
    pub price: AttributeValue,
    #[cfg_attr(feature = "serde", serde(rename = "ACRES"))]
    pub acres: AttributeValue,
    #[cfg_attr(feature = "serde", serde(rename = "Latitude"))]
    pub latitude: f64,
    #[cfg_attr(feature = "serde", serde(rename = "Longitude"))]
    pub longitude: f64,
}

/// Rows handed to the spreadsheet writer, one table per dataset
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExportPayload {
    #[cfg_attr(feature = "serde", serde(rename = "Pricing Data"))]
    pub pricing_rows: Vec<PricingExportRow>,
    #[cfg_attr(feature = "serde", serde(rename = "Comps Data"))]
    pub comps_rows: Vec<CompsExportRow>,
}

impl ExportPayload {
    /// Build the payload from a combined result
    pub fn from_result(result: &FilterResult) -> Self {
        let mut payload = Self::default();
        for m in result.matches() {
            match &m.fields {
                ExtractedFields::Pricing {
                    apn,
                    lot_acreage,
                    lat,
                    lng,
                } => payload.pricing_rows.push(PricingExportRow {
                    apn: apn.clone(),
                    lot_acreage: *lot_acreage,
                    latitude: *lat,
                    longitude: *lng,
                }),
                ExtractedFields::Comps {
                    price,
                    acres,
                    lat,
                    lng,
                } => payload.comps_rows.push(CompsExportRow {
                    price: price.clone(),
                    acres: acres.clone(),
                    latitude: *lat,
                    longitude: *lng,
                }),
            }
        }
        payload
    }

    pub fn len(&self) -> usize {
        self.pricing_rows.len() + self.comps_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pricing_rows.is_empty() && self.comps_rows.is_empty()
    }
}

/// What an export produced and removed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportOutcome {
    pub payload: ExportPayload,
    /// Parcel identifiers removed from the live data
    pub removed_ids: HashSet<String>,
    pub removed_pricing: usize,
    pub removed_comps: usize,
}

/// A fully prepared export, ready to be swapped in
#[derive(Debug)]
pub struct ExportTransaction {
    outcome: ExportOutcome,
    next_pricing: Arc<Dataset>,
    next_comps: Arc<Dataset>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ExportTransaction {
    /// Prepare the export of `result` against the current live snapshots
    ///
    /// Pricing records whose APN appears among the pricing matches are removed, and so are
    /// comps rows carrying one of those APNs. Fails with [`DataError::EmptySelection`] when
    /// there is nothing to export. Nothing is mutated.
    pub fn prepare(
        result: &FilterResult,
        pricing: &Arc<Dataset>,
        comps: &Arc<Dataset>,
    ) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("ExportTransaction::prepare");

        if result.is_empty() {
            return Err(DataError::EmptySelection);
        }

        let payload = ExportPayload::from_result(result);
        let removed_ids: HashSet<String> = result
            .pricing_matches()
            .iter()
            .map(|m| m.record.id().to_string())
            .collect();

        let next_pricing = pricing
            .without_keys(&removed_ids)
            .unwrap_or_else(|| pricing.clone());
        let next_comps = comps
            .without_keys(&removed_ids)
            .unwrap_or_else(|| comps.clone());

        let outcome = ExportOutcome {
            payload,
            removed_ids,
            removed_pricing: pricing.len() - next_pricing.len(),
            removed_comps: comps.len() - next_comps.len(),
        };
        Ok(Self {
            outcome,
            next_pricing,
            next_comps,
        })
    }

    #[inline]
    pub fn outcome(&self) -> &ExportOutcome {
        &self.outcome
    }

    /// Pricing snapshot to publish once the export is committed
    #[inline]
    pub fn next_pricing(&self) -> &Arc<Dataset> {
        &self.next_pricing
    }

    /// Comps snapshot to publish once the export is committed
    #[inline]
    pub fn next_comps(&self) -> &Arc<Dataset> {
        &self.next_comps
    }

    pub fn into_parts(self) -> (ExportOutcome, Arc<Dataset>, Arc<Dataset>) {
        (self.outcome, self.next_pricing, self.next_comps)
    }
}
