use crate::descriptor::Descriptors;
use nalgebra::Point2;

/// A detected interest point in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f64,
    pub y: f64,
    /// Diameter of the described patch, in full-resolution pixels.
    pub size: f64,
    /// Orientation in degrees, `[0, 360)`.
    pub angle: f64,
    pub response: f64,
    /// Pyramid level the point was detected on.
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            size: 1.0,
            angle: 0.0,
            response: 0.0,
            octave: 0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response;
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.octave = octave;
        self
    }

    pub fn pt(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

impl Default for KeyPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Correspondence between keypoint `query_idx` of image A and `train_idx` of image B.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl FeatureMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matches {
    pub matches: Vec<FeatureMatch>,
}

impl Matches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            matches: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, m: FeatureMatch) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter()
    }

    pub fn filter_by_distance(&mut self, max_distance: f32) {
        self.matches.retain(|m| m.distance <= max_distance);
    }

    /// Keeps the matches whose mask entry is set. `mask` must be parallel to `self`.
    pub fn select(&self, mask: &[bool]) -> Matches {
        Matches {
            matches: self
                .matches
                .iter()
                .zip(mask)
                .filter(|(_, &keep)| keep)
                .map(|(m, _)| *m)
                .collect(),
        }
    }
}

impl FromIterator<FeatureMatch> for Matches {
    fn from_iter<I: IntoIterator<Item = FeatureMatch>>(iter: I) -> Self {
        Matches {
            matches: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyPoints {
    pub keypoints: Vec<KeyPoint>,
}

impl KeyPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keypoints: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, kp: KeyPoint) {
        self.keypoints.push(kp);
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyPoint> {
        self.keypoints.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&KeyPoint> {
        self.keypoints.get(idx)
    }
}

impl FromIterator<KeyPoint> for KeyPoints {
    fn from_iter<I: IntoIterator<Item = KeyPoint>>(iter: I) -> Self {
        KeyPoints {
            keypoints: iter.into_iter().collect(),
        }
    }
}

/// Keypoints and their parallel descriptors, tagged with the image they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeatures {
    pub image_idx: usize,
    pub width: u32,
    pub height: u32,
    pub keypoints: KeyPoints,
    pub descriptors: Descriptors,
}

impl ImageFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn with_image_idx(mut self, image_idx: usize) -> Self {
        self.image_idx = image_idx;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypoint_builder() {
        let kp = KeyPoint::new(3.0, 4.0)
            .with_size(31.0)
            .with_angle(90.0)
            .with_response(12.5)
            .with_octave(2);
        assert_eq!(kp.pt(), Point2::new(3.0, 4.0));
        assert_eq!(kp.size, 31.0);
        assert_eq!(kp.angle, 90.0);
        assert_eq!(kp.octave, 2);
    }

    #[test]
    fn matches_select_and_filter() {
        let mut matches: Matches = (0..5)
            .map(|i| FeatureMatch::new(i, 4 - i, i as f32 * 10.0))
            .collect();
        let kept = matches.select(&[true, false, true, false, true]);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.matches[1].query_idx, 2);

        matches.filter_by_distance(20.0);
        assert_eq!(matches.len(), 3);
        assert!(matches.iter().all(|m| m.distance <= 20.0));
    }
}
