//! Lane fanout: one work item per barcode, or one per lane when the lane
//! is not multiplexed.
//!
//! Pure and deterministic (lane order, then barcode order). Downstream
//! stages must not depend on that order.

use crate::payload::LaneItem;
use crate::types::{FlowcellId, LaneInfo};

/// Expand lanes into `process_lane` inputs.
///
/// Every produced item carries a non-empty sample identifier: a barcode
/// without a name is labelled `<lane>_<barcode_id>`, and a lane without
/// barcodes uses [`LaneInfo::default_sample`].
pub fn expand(flowcell: &FlowcellId, lanes: &[LaneInfo]) -> Vec<LaneItem> {
    let mut items = Vec::with_capacity(lanes.iter().map(|l| l.barcodes.len().max(1)).sum());

    for lane in lanes {
        if lane.barcodes.is_empty() {
            items.push(LaneItem {
                flowcell: flowcell.clone(),
                lane: lane.lane.clone(),
                barcode_id: None,
                barcode_sequence: None,
                sample: lane.default_sample(),
                genome_build: lane.genome_build.clone(),
                project: None,
                description: lane.description.clone(),
            });
            continue;
        }

        for barcode in &lane.barcodes {
            let sample = match barcode.name.trim() {
                "" => format!("{}_{}", lane.lane, barcode.barcode_id),
                name => name.to_string(),
            };
            items.push(LaneItem {
                flowcell: flowcell.clone(),
                lane: lane.lane.clone(),
                barcode_id: Some(barcode.barcode_id.clone()),
                barcode_sequence: Some(barcode.sequence.clone()).filter(|s| !s.is_empty()),
                sample,
                genome_build: barcode
                    .genome_build
                    .clone()
                    .unwrap_or_else(|| lane.genome_build.clone()),
                project: barcode.project.clone(),
                description: lane.description.clone(),
            });
        }
    }

    tracing::debug!(lanes = lanes.len(), items = items.len(), "Expanded lanes into work items");
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BarcodeEntry;

    fn flowcell() -> FlowcellId {
        FlowcellId::new("FC70BUKAAXX", "110106")
    }

    fn barcode(id: &str, name: &str) -> BarcodeEntry {
        BarcodeEntry {
            barcode_id: id.to_string(),
            barcode_type: None,
            name: name.to_string(),
            sequence: "ATCACG".to_string(),
            genome_build: None,
            project: None,
        }
    }

    fn lane(id: &str, barcodes: Vec<BarcodeEntry>) -> LaneInfo {
        LaneInfo {
            lane: id.to_string(),
            name: None,
            description: None,
            analysis: None,
            genome_build: "hg19".to_string(),
            barcodes,
        }
    }

    #[test]
    fn multiplexed_lanes_yield_one_item_per_barcode() {
        let lanes = vec![
            lane("1", vec![barcode("1", "a"), barcode("2", "b")]),
            lane("2", vec![barcode("1", "c"), barcode("2", "d"), barcode("3", "e")]),
        ];
        assert_eq!(expand(&flowcell(), &lanes).len(), 5);
    }

    #[test]
    fn plain_lanes_yield_one_item_each() {
        let lanes = vec![lane("1", vec![]), lane("2", vec![]), lane("3", vec![])];
        let items = expand(&flowcell(), &lanes);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].sample, "lane3");
        assert!(items.iter().all(|i| i.barcode_id.is_none()));
    }

    #[test]
    fn output_order_is_lane_then_barcode() {
        let lanes = vec![
            lane("2", vec![barcode("7", "x"), barcode("3", "y")]),
            lane("1", vec![]),
        ];
        let samples: Vec<_> = expand(&flowcell(), &lanes)
            .into_iter()
            .map(|i| i.sample)
            .collect();
        assert_eq!(samples, ["x", "y", "lane1"]);
    }

    #[test]
    fn unnamed_barcode_gets_lane_qualified_sample() {
        let items = expand(&flowcell(), &[lane("4", vec![barcode("9", " ")])]);
        assert_eq!(items[0].sample, "4_9");
    }

    #[test]
    fn barcode_genome_overrides_lane_genome() {
        let mut bc = barcode("1", "mouse");
        bc.genome_build = Some("mm9".to_string());
        bc.project = Some("projA".to_string());
        let items = expand(&flowcell(), &[lane("1", vec![bc, barcode("2", "human")])]);
        assert_eq!(items[0].genome_build, "mm9");
        assert_eq!(items[0].project.as_deref(), Some("projA"));
        assert_eq!(items[1].genome_build, "hg19");
        assert_eq!(items[0].file_prefix(), "1_110106_FC70BUKAAXX_1");
    }
}
