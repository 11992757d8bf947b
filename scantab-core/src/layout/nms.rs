use crate::entities::DetectedRegion;

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.5;

/// Greedy non-max suppression, ignoring region kinds.
///
/// Regions are visited by decreasing confidence (stable for ties); a region is dropped
/// when its IoU with an already kept one reaches `iou_threshold`. The survivors come out
/// by decreasing confidence.
pub fn suppress(mut regions: Vec<DetectedRegion>, iou_threshold: f64) -> Vec<DetectedRegion> {
    regions.sort_by(|r1, r2| r2.confidence.total_cmp(&r1.confidence));
    let mut current_index = 0;
    for index in 0..regions.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = regions[prev_index].bbox.iou(&regions[index].bbox);
            if iou >= iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            regions.swap(current_index, index);
            current_index += 1;
        }
    }
    // Everything after has been swapped
    regions.truncate(current_index);
    regions
}

/// Canonical table reading order: top to bottom, then left to right.
pub fn sort_reading_order(regions: &mut [DetectedRegion]) {
    regions.sort_by_key(|r| (r.bbox.y1, r.bbox.x1));
}

/// Removes overlapping detections and returns the rest in reading order.
#[tracing::instrument(skip_all, fields(input = regions.len()))]
pub fn filter_overlapping(regions: Vec<DetectedRegion>, iou_threshold: f64) -> Vec<DetectedRegion> {
    let mut kept = suppress(regions, iou_threshold);
    sort_reading_order(&mut kept);
    tracing::debug!("{} regions kept after overlap filtering", kept.len());
    kept
}
