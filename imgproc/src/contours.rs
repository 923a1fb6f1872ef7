//! Connected-component labelling of binary masks.

use image::GrayImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl Connectivity {
    /// Neighbours already visited in a raster scan.
    fn backward_offsets(self) -> &'static [(i64, i64)] {
        match self {
            Connectivity::Four => &[(-1, 0), (0, -1)],
            Connectivity::Eight => &[(-1, 0), (-1, -1), (0, -1), (1, -1)],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedComponentStats {
    pub label: u32,
    pub area: u32,
    /// `(x, y, width, height)`
    pub bbox: (u32, u32, u32, u32),
    pub centroid: (f64, f64),
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        let grand = parent[parent[x as usize] as usize];
        parent[x as usize] = grand;
        x = grand;
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) -> u32 {
    let (ra, rb) = (find(parent, a), find(parent, b));
    let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
    parent[hi as usize] = lo;
    lo
}

/// Two-pass labelling of the non-zero pixels of `binary`.
///
/// Returns the row-major label map (0 is background), the number of labels
/// including the background, and the stats of every foreground component.
/// Labels follow the raster order of each component's first pixel.
pub fn connected_components_with_stats(
    binary: &GrayImage,
    connectivity: Connectivity,
) -> (Vec<u32>, u32, Vec<ConnectedComponentStats>) {
    let (w, h) = (binary.width() as usize, binary.height() as usize);
    let data = binary.as_raw();
    let mut labels = vec![0u32; w * h];
    // parent[0] is the background.
    let mut parent: Vec<u32> = vec![0];

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if data[idx] == 0 {
                continue;
            }
            let mut current = 0u32;
            for &(dx, dy) in connectivity.backward_offsets() {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                if nx < 0 || ny < 0 || nx >= w as i64 {
                    continue;
                }
                let neighbour = labels[ny as usize * w + nx as usize];
                if neighbour == 0 {
                    continue;
                }
                current = if current == 0 {
                    neighbour
                } else {
                    union(&mut parent, current, neighbour)
                };
            }
            if current == 0 {
                current = parent.len() as u32;
                parent.push(current);
            }
            labels[idx] = current;
        }
    }

    let mut compact = vec![0u32; parent.len()];
    let mut next_label = 1u32;
    for provisional in 1..parent.len() as u32 {
        let root = find(&mut parent, provisional);
        if root == provisional {
            compact[root as usize] = next_label;
            next_label += 1;
        }
    }

    struct Acc {
        area: u32,
        min: (usize, usize),
        max: (usize, usize),
        sum: (f64, f64),
    }
    let mut acc: Vec<Acc> = (1..next_label)
        .map(|_| Acc {
            area: 0,
            min: (usize::MAX, usize::MAX),
            max: (0, 0),
            sum: (0.0, 0.0),
        })
        .collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if labels[idx] == 0 {
                continue;
            }
            let label = compact[find(&mut parent, labels[idx]) as usize];
            labels[idx] = label;
            let a = &mut acc[label as usize - 1];
            a.area += 1;
            a.min = (a.min.0.min(x), a.min.1.min(y));
            a.max = (a.max.0.max(x), a.max.1.max(y));
            a.sum = (a.sum.0 + x as f64, a.sum.1 + y as f64);
        }
    }

    let stats = acc
        .into_iter()
        .enumerate()
        .map(|(i, a)| ConnectedComponentStats {
            label: i as u32 + 1,
            area: a.area,
            bbox: (
                a.min.0 as u32,
                a.min.1 as u32,
                (a.max.0 - a.min.0 + 1) as u32,
                (a.max.1 - a.min.1 + 1) as u32,
            ),
            centroid: (a.sum.0 / a.area as f64, a.sum.1 / a.area as f64),
        })
        .collect();

    (labels, next_label, stats)
}

/// The component with the largest area; ties go to the lowest label.
pub fn largest_component(binary: &GrayImage, connectivity: Connectivity) -> Option<ConnectedComponentStats> {
    let (_, _, stats) = connected_components_with_stats(binary, connectivity);
    stats
        .into_iter()
        .reduce(|best, s| if s.area > best.area { s } else { best })
}
