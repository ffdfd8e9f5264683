//! Grouping of overlapping raw detections into one detection per face.
//!
//! Detections are visited from most to least confident. Each detection not
//! yet claimed seeds a cluster and claims every unclaimed detection whose
//! window overlaps the seed's with an IoU strictly above the threshold.
//!
//! A representative's confidence is the sum over its members, so faces hit
//! by many windows score higher than isolated false positives. Its geometry
//! is the rounded mean of the members whose confidence is within
//! `geometry_tolerance` of the best member.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Minimum IoU, exclusive, for a detection to join a seed's cluster.
    pub iou_threshold: f32,
    /// Members this close to the best confidence share in the geometry.
    pub geometry_tolerance: f32,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            iou_threshold: 0.2,
            geometry_tolerance: 0.0,
        }
    }
}

impl ClusterParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(Error::Config(format!(
                "IoU threshold must be in [0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !(self.geometry_tolerance >= 0.0) {
            return Err(Error::Config(format!(
                "geometry tolerance must be non-negative, got {}",
                self.geometry_tolerance
            )));
        }
        Ok(())
    }
}

/// Most confident first; ties prefer larger windows, then top-left positions.
fn by_confidence(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.scale.cmp(&a.scale))
        .then_with(|| a.row.cmp(&b.row))
        .then_with(|| a.col.cmp(&b.col))
}

/// Merge detections that cover the same face.
pub fn cluster_detections(detections: &[Detection], params: &ClusterParams) -> Result<Vec<Detection>> {
    params.validate()?;

    let mut sorted = detections.to_vec();
    sorted.sort_by(by_confidence);

    let mut assigned = vec![false; sorted.len()];
    let mut clusters = Vec::new();

    for i in 0..sorted.len() {
        if assigned[i] {
            continue;
        }

        let seed = sorted[i];
        let seed_box = seed.bbox();
        let mut members = Vec::new();

        for j in i..sorted.len() {
            if assigned[j] {
                continue;
            }
            if j == i || seed_box.iou(&sorted[j].bbox()) > params.iou_threshold {
                assigned[j] = true;
                members.push(sorted[j]);
            }
        }

        clusters.push(representative(&members, params.geometry_tolerance));
    }

    tracing::debug!(
        "Clustered {} detections into {} faces",
        detections.len(),
        clusters.len()
    );
    Ok(clusters)
}

/// `members` is non-empty and sorted most confident first.
fn representative(members: &[Detection], tolerance: f32) -> Detection {
    let best = members[0].confidence;
    let confidence = members.iter().map(|d| d.confidence).sum();

    let leaders: Vec<&Detection> = members
        .iter()
        .filter(|d| d.confidence >= best - tolerance)
        .collect();
    let n = leaders.len() as f64;
    let mean = |f: fn(&Detection) -> u32| {
        (leaders.iter().map(|d| f(*d) as f64).sum::<f64>() / n).round() as u32
    };

    Detection {
        row: mean(|d| d.row),
        col: mean(|d| d.col),
        scale: mean(|d| d.scale),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_empty_output() {
        let clusters = cluster_detections(&[], &ClusterParams::default()).unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn heavily_overlapping_detections_merge() {
        // Shifted by one pixel: IoU = 49*50 / (2*2500 - 49*50) ≈ 0.96
        let detections = [
            Detection::new(100, 100, 50, 3.0),
            Detection::new(100, 101, 50, 5.0),
        ];
        let clusters = cluster_detections(&detections, &ClusterParams::default()).unwrap();

        assert_eq!(clusters.len(), 1);
        let face = clusters[0];
        assert!((face.confidence - 8.0).abs() < 1e-6);
        // Geometry of the most confident member
        assert_eq!((face.row, face.col, face.scale), (100, 101, 50));
    }

    #[test]
    fn disjoint_detections_never_merge() {
        let detections = [
            Detection::new(50, 50, 40, 2.0),
            Detection::new(50, 150, 40, 2.0),
        ];
        for iou_threshold in [0.0, 0.2, 0.5, 1.0] {
            let params = ClusterParams {
                iou_threshold,
                ..ClusterParams::default()
            };
            let clusters = cluster_detections(&detections, &params).unwrap();
            assert_eq!(clusters.len(), 2, "threshold {}", iou_threshold);
        }
    }

    #[test]
    fn touching_detections_do_not_merge_at_zero_threshold() {
        let detections = [
            Detection::new(50, 50, 40, 2.0),
            Detection::new(50, 90, 40, 1.0),
        ];
        let params = ClusterParams {
            iou_threshold: 0.0,
            ..ClusterParams::default()
        };
        assert_eq!(cluster_detections(&detections, &params).unwrap().len(), 2);
    }

    #[test]
    fn threshold_controls_partial_overlap() {
        // Half-shifted windows: IoU = 1/3
        let detections = [
            Detection::new(50, 50, 40, 2.0),
            Detection::new(50, 70, 40, 1.0),
        ];
        let loose = ClusterParams {
            iou_threshold: 0.2,
            ..ClusterParams::default()
        };
        let strict = ClusterParams {
            iou_threshold: 0.5,
            ..ClusterParams::default()
        };
        assert_eq!(cluster_detections(&detections, &loose).unwrap().len(), 1);
        assert_eq!(cluster_detections(&detections, &strict).unwrap().len(), 2);
    }

    #[test]
    fn tolerance_band_averages_leading_members() {
        let detections = [
            Detection::new(100, 100, 40, 4.0),
            Detection::new(104, 102, 44, 3.9),
            Detection::new(98, 96, 36, 1.0),
        ];

        let tight = cluster_detections(&detections, &ClusterParams::default()).unwrap();
        assert_eq!(tight.len(), 1);
        assert_eq!((tight[0].row, tight[0].col, tight[0].scale), (100, 100, 40));

        let banded = ClusterParams {
            geometry_tolerance: 0.5,
            ..ClusterParams::default()
        };
        let banded = cluster_detections(&detections, &banded).unwrap();
        assert_eq!((banded[0].row, banded[0].col, banded[0].scale), (102, 101, 42));
        assert!((banded[0].confidence - 8.9).abs() < 1e-5);
    }

    #[test]
    fn cluster_scale_never_below_member_minimum() {
        let detections = [
            Detection::new(60, 60, 30, 1.0),
            Detection::new(61, 61, 33, 1.0),
            Detection::new(60, 62, 36, 1.0),
        ];
        let params = ClusterParams {
            geometry_tolerance: f32::INFINITY,
            ..ClusterParams::default()
        };
        let clusters = cluster_detections(&detections, &params).unwrap();
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].scale >= 30 && clusters[0].scale <= 36);
    }

    #[test]
    fn result_does_not_depend_on_input_order() {
        let mut detections = vec![
            Detection::new(50, 50, 40, 2.0),
            Detection::new(52, 51, 40, 2.5),
            Detection::new(200, 200, 60, 1.5),
            Detection::new(203, 198, 66, 1.0),
        ];
        let params = ClusterParams::default();
        let forward = cluster_detections(&detections, &params).unwrap();
        detections.reverse();
        let backward = cluster_detections(&detections, &params).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let params = ClusterParams {
            iou_threshold: 1.5,
            ..ClusterParams::default()
        };
        assert!(matches!(
            cluster_detections(&[], &params),
            Err(Error::Config(_))
        ));
    }
}
