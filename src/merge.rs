//! Proximity clustering of placement rectangles.
//!
//! Scientific figures are often stored as many image objects: one per panel, per legend, or
//! per tile of a large bitmap. Clustering their placement rectangles recovers one region per
//! logical figure. The threshold is the precision/recall knob: small values leave figures
//! fragmented, large values fuse neighbouring figures.

use crate::geometry::PlacementRect;
use crate::source::RawImageObject;

/// Default distance for merging regions before rasterization, in page units.
pub const DEFAULT_MERGE_THRESHOLD: f32 = 80.0;

/// Default distance for grouping raw fragments.
pub const DEFAULT_GROUP_THRESHOLD: f32 = 50.0;

/// A union of placement rectangles judged to be one figure, with the objects inside it.
#[derive(Debug, Clone)]
pub struct MergedRegion {
    pub bounds: PlacementRect,
    pub members: Vec<RawImageObject>,
}

/// A cluster under construction: its running union and the input indices it absorbed.
struct Cluster {
    bounds: PlacementRect,
    members: Vec<usize>,
}

/// Cluster `rects` until no two clusters are within `threshold` of each other.
///
/// Each pass walks the clusters in order; a cluster that has not been absorbed yet swallows
/// every later unabsorbed cluster near its running union. Passes repeat until one absorbs
/// nothing, so the output is a fixed point of the merge relation. Cluster order follows the
/// first member's input position.
fn cluster(rects: &[PlacementRect], threshold: f32) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = rects
        .iter()
        .enumerate()
        .map(|(idx, rect)| Cluster {
            bounds: *rect,
            members: vec![idx],
        })
        .collect();

    loop {
        let mut changed = false;
        let mut absorbed = vec![false; clusters.len()];
        let mut next = Vec::with_capacity(clusters.len());

        for i in 0..clusters.len() {
            if absorbed[i] {
                continue;
            }
            let mut bounds = clusters[i].bounds;
            let mut members = std::mem::take(&mut clusters[i].members);
            for j in (i + 1)..clusters.len() {
                if absorbed[j] || !bounds.is_near(&clusters[j].bounds, threshold) {
                    continue;
                }
                bounds = bounds.union(&clusters[j].bounds);
                members.append(&mut clusters[j].members);
                absorbed[j] = true;
                changed = true;
            }
            absorbed[i] = true;
            next.push(Cluster { bounds, members });
        }

        clusters = next;
        if !changed {
            return clusters;
        }
    }
}

/// Merge nearby rectangles into region bounds.
pub fn merge_rects(rects: &[PlacementRect], threshold: f32) -> Vec<PlacementRect> {
    cluster(rects, threshold)
        .into_iter()
        .map(|c| c.bounds)
        .collect()
}

/// Merge image objects into regions, keeping the objects that make up each region.
///
/// Members keep their input order inside a region.
pub fn merge_objects(objects: Vec<RawImageObject>, threshold: f32) -> Vec<MergedRegion> {
    let rects: Vec<PlacementRect> = objects.iter().map(|o| o.rect).collect();
    let clusters = cluster(&rects, threshold);

    let mut slots: Vec<Option<RawImageObject>> = objects.into_iter().map(Some).collect();
    clusters
        .into_iter()
        .map(|c| {
            let mut indices = c.members;
            indices.sort_unstable();
            let members = indices
                .into_iter()
                .filter_map(|idx| slots[idx].take())
                .collect();
            MergedRegion {
                bounds: c.bounds,
                members,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageFormat;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> PlacementRect {
        PlacementRect::new(x0, y0, x1, y1).expect("valid rect")
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(merge_rects(&[], DEFAULT_MERGE_THRESHOLD).is_empty());
        assert!(merge_objects(Vec::new(), DEFAULT_MERGE_THRESHOLD).is_empty());
    }

    #[test]
    fn adjacent_panels_merge_into_one_region() {
        // A 2x2 grid of panels separated by 10-unit gutters.
        let rects = vec![
            rect(50.0, 100.0, 250.0, 250.0),
            rect(260.0, 100.0, 460.0, 250.0),
            rect(50.0, 260.0, 250.0, 410.0),
            rect(260.0, 260.0, 460.0, 410.0),
        ];
        let merged = merge_rects(&rects, 20.0);
        assert_eq!(merged, vec![rect(50.0, 100.0, 460.0, 410.0)]);
    }

    #[test]
    fn distant_figures_stay_apart() {
        let rects = vec![rect(50.0, 50.0, 300.0, 200.0), rect(50.0, 500.0, 300.0, 700.0)];
        assert_eq!(merge_rects(&rects, 80.0).len(), 2);
    }

    #[test]
    fn chained_union_absorbs_late_neighbours() {
        // The second rect only becomes near once the third has joined the first, which
        // happens after the second was checked; a later pass has to pick it up.
        let rects = vec![
            rect(0.0, 0.0, 100.0, 100.0),
            rect(300.0, 0.0, 400.0, 100.0),
            rect(110.0, 0.0, 290.0, 40.0),
        ];
        assert_eq!(merge_rects(&rects, 15.0), vec![rect(0.0, 0.0, 400.0, 100.0)]);
    }

    #[test]
    fn merged_objects_keep_their_members() {
        let object = |x0: f32, page_bytes: usize| RawImageObject {
            page: 1,
            rect: rect(x0, 0.0, x0 + 100.0, 100.0),
            bytes: vec![0; page_bytes],
            format: ImageFormat::Png,
        };
        let regions = merge_objects(
            vec![object(0.0, 10), object(500.0, 20), object(110.0, 30)],
            20.0,
        );
        assert_eq!(regions.len(), 2);
        let sizes: Vec<usize> = regions[0].members.iter().map(|m| m.byte_size()).collect();
        assert_eq!(sizes, vec![10, 30]);
        assert_eq!(regions[0].bounds, rect(0.0, 0.0, 210.0, 100.0));
        assert_eq!(regions[1].members.len(), 1);
    }
}
