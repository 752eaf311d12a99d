/// Local adjustment masks
///
/// Mask geometry is stored in normalized image coordinates (0..1, origin at
/// the top-left), so one definition renders identically at preview and
/// export resolution. Radii are measured in units of image height; the
/// horizontal axis is stretched by the aspect ratio before any distance is
/// taken, which keeps circles circular on non-square frames.

use cgmath::{vec2, InnerSpace, Vector2};
use serde::{Deserialize, Serialize};

use crate::color::smoothstep;
use crate::state::adjustments::PartialAdjustments;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MaskShape {
    /// Full effect at the center, fading out around `radius`
    Radial { center: [f32; 2], radius: f32 },
    /// Full effect behind `start`, fading out as the projection reaches `end`
    Linear { start: [f32; 2], end: [f32; 2] },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mask {
    pub id: u32,
    pub shape: MaskShape,
    /// Half-width of the soft edge, relative to the shape extent
    #[serde(default = "default_feather")]
    pub feather: f32,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Adjustments applied only inside the coverage field
    #[serde(default)]
    pub adjustments: PartialAdjustments,
}

fn default_feather() -> f32 {
    0.2
}

fn default_enabled() -> bool {
    true
}

impl Mask {
    pub fn new(id: u32, shape: MaskShape) -> Self {
        Self {
            id,
            shape,
            feather: default_feather(),
            invert: false,
            enabled: true,
            adjustments: PartialAdjustments::new(),
        }
    }

    /// Coverage (0..1) at normalized position `uv` on a frame with the given aspect ratio
    pub fn coverage_at(&self, uv: [f32; 2], aspect: f32) -> f32 {
        let p = vec2(uv[0] * aspect, uv[1]);
        let corrected = |q: [f32; 2]| -> Vector2<f32> { vec2(q[0] * aspect, q[1]) };

        let t = match self.shape {
            MaskShape::Radial { center, radius } => {
                let dist = (p - corrected(center)).magnitude();
                dist / (radius + 1e-4)
            }
            MaskShape::Linear { start, end } => {
                let s = corrected(start);
                let line = corrected(end) - s;
                let len = line.magnitude();
                let dir = line / (len + 1e-4);
                (p - s).dot(dir) / (len + 1e-4)
            }
        };

        let feather = self.feather.max(0.01);
        let coverage = (1.0 - smoothstep(1.0 - feather, 1.0 + feather, t)).clamp(0.0, 1.0);
        if self.invert {
            1.0 - coverage
        } else {
            coverage
        }
    }
}

/// Ordered masks plus the one the UI is editing
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaskList {
    masks: Vec<Mask>,
    active: Option<u32>,
}

impl MaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mask with a fresh id and make it active
    pub fn add(&mut self, shape: MaskShape) -> u32 {
        let id = self.masks.iter().map(|m| m.id + 1).max().unwrap_or(1);
        self.masks.push(Mask::new(id, shape));
        self.active = Some(id);
        id
    }

    /// Replace the whole list, keeping the active id only if it still exists
    pub fn replace(&mut self, masks: Vec<Mask>) {
        self.masks = masks;
        if let Some(id) = self.active {
            if self.get(id).is_none() {
                self.active = None;
            }
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<Mask> {
        let index = self.masks.iter().position(|m| m.id == id)?;
        let removed = self.masks.remove(index);
        if self.active == Some(id) {
            self.active = self.masks.last().map(|m| m.id);
        }
        Some(removed)
    }

    pub fn get(&self, id: u32) -> Option<&Mask> {
        self.masks.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Mask> {
        self.masks.iter_mut().find(|m| m.id == id)
    }

    /// Select the mask the UI edits. Returns false for unknown ids.
    pub fn set_active(&mut self, id: Option<u32>) -> bool {
        match id {
            Some(id) if self.get(id).is_none() => false,
            _ => {
                self.active = id;
                true
            }
        }
    }

    pub fn active(&self) -> Option<&Mask> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<u32> {
        self.active
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mask> {
        self.masks.iter()
    }

    /// Masks that take part in rendering, in order
    pub fn enabled(&self) -> impl Iterator<Item = &Mask> {
        self.masks.iter().filter(|m| m.enabled)
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn radial(radius: f32, feather: f32) -> Mask {
        let mut mask = Mask::new(
            1,
            MaskShape::Radial {
                center: [0.5, 0.5],
                radius,
            },
        );
        mask.feather = feather;
        mask
    }

    #[test]
    fn test_radial_center_and_outside() {
        let mask = radial(0.3, 0.2);
        assert_abs_diff_eq!(mask.coverage_at([0.5, 0.5], 4.0 / 3.0), 1.0);
        assert_eq!(mask.coverage_at([0.0, 0.0], 4.0 / 3.0), 0.0);
    }

    #[test]
    fn test_radial_is_round_on_wide_frames() {
        let mask = radial(0.3, 0.1);
        let aspect = 2.0;
        // 0.25 in height units is 0.125 of the width on a 2:1 frame
        let vertical = mask.coverage_at([0.5, 0.75], aspect);
        let horizontal = mask.coverage_at([0.625, 0.5], aspect);
        assert_abs_diff_eq!(vertical, horizontal, epsilon = 1e-5);
    }

    #[test]
    fn test_invert_complements_coverage() {
        let mut mask = radial(0.3, 0.2);
        let plain = mask.coverage_at([0.62, 0.55], 1.5);
        mask.invert = true;
        assert_abs_diff_eq!(mask.coverage_at([0.62, 0.55], 1.5), 1.0 - plain);
    }

    #[test]
    fn test_linear_gradient_direction() {
        let mut mask = Mask::new(
            2,
            MaskShape::Linear {
                start: [0.0, 0.0],
                end: [0.0, 1.0],
            },
        );
        mask.feather = 0.3;
        assert_eq!(mask.coverage_at([0.5, 0.1], 1.0), 1.0);
        assert_eq!(mask.coverage_at([0.5, 1.0 + 0.35], 1.0), 0.0);
        let edge = mask.coverage_at([0.5, 1.0], 1.0);
        assert!(edge > 0.4 && edge < 0.6);
    }

    #[test]
    fn test_coverage_independent_of_resolution() {
        let mask = radial(0.3, 0.2);
        let (pw, ph) = (400u32, 300u32);
        let scale = 4u32;
        let aspect = pw as f32 / ph as f32;

        let coverage_fraction = |w: u32, h: u32| {
            let mut inside = 0u64;
            for y in 0..h {
                for x in 0..w {
                    let uv = [(x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32];
                    if mask.coverage_at(uv, aspect) > 0.5 {
                        inside += 1;
                    }
                }
            }
            inside as f64 / (w as f64 * h as f64)
        };

        let preview = coverage_fraction(pw, ph);
        let export = coverage_fraction(pw * scale, ph * scale);
        assert!((preview - export).abs() < 0.005, "{preview} vs {export}");

        // Same normalized location samples the same coverage at both sizes
        for (x, y) in [(200u32, 150u32), (260, 150), (300, 220)] {
            let a = mask.coverage_at(
                [(x as f32 + 0.5) / pw as f32, (y as f32 + 0.5) / ph as f32],
                aspect,
            );
            let (ex, ey) = (x * scale + scale / 2, y * scale + scale / 2);
            let b = mask.coverage_at(
                [ex as f32 / (pw * scale) as f32, ey as f32 / (ph * scale) as f32],
                aspect,
            );
            assert_abs_diff_eq!(a, b, epsilon = 0.02);
        }
    }

    #[test]
    fn test_mask_list_crud() {
        let mut list = MaskList::new();
        let a = list.add(MaskShape::Radial {
            center: [0.5, 0.5],
            radius: 0.2,
        });
        let b = list.add(MaskShape::Linear {
            start: [0.0, 0.0],
            end: [1.0, 1.0],
        });
        assert_ne!(a, b);
        assert_eq!(list.active_id(), Some(b));

        assert!(!list.set_active(Some(99)));
        assert!(list.set_active(Some(a)));
        list.get_mut(b).unwrap().enabled = false;
        assert_eq!(list.enabled().count(), 1);

        list.remove(a);
        assert_eq!(list.active_id(), Some(b));
        list.replace(Vec::new());
        assert!(list.is_empty());
        assert_eq!(list.active_id(), None);
    }

    #[test]
    fn test_mask_json_shape() {
        let json = r#"{
            "id": 3,
            "shape": { "kind": "radial", "center": [0.5, 0.5], "radius": 0.3 },
            "feather": 0.2,
            "adjustments": { "exposure": -1.0 }
        }"#;
        let mask: Mask = serde_json::from_str(json).unwrap();
        assert!(mask.enabled);
        assert!(!mask.invert);
        assert_eq!(mask.adjustments["exposure"], serde_json::json!(-1.0));
    }
}
