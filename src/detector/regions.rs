use image::{GrayImage, Luma};
use imageproc::{
    distance_transform::Norm,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use std::collections::BTreeMap;

/// A connected set of foreground pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub label: u32,
    /// Pixel count
    pub area: u32,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Region {
    /// Only regions strictly smaller than `min_area` are rejected
    pub fn qualifies(&self, min_area: u32) -> bool {
        self.area >= min_area
    }

    pub fn bounding_size(&self) -> (u32, u32) {
        (self.max_x - self.min_x + 1, self.max_y - self.min_y + 1)
    }
}

/// Morphological opening (erosion then dilation) with a square kernel
pub fn open_mask(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    dilate(&erode(mask, Norm::LInf, radius), Norm::LInf, radius)
}

/// Label 8-connected foreground regions, largest first
pub fn connected_regions(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        regions
            .entry(label)
            .and_modify(|region| {
                region.area += 1;
                region.min_x = region.min_x.min(x);
                region.min_y = region.min_y.min(y);
                region.max_x = region.max_x.max(x);
                region.max_y = region.max_y.max(y);
            })
            .or_insert(Region {
                label,
                area: 1,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            });
    }

    let mut regions: Vec<Region> = regions.into_values().collect();
    regions.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));
    regions
}
