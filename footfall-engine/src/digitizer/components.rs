//! Connected-component filtering of binary masks

/// Row-major binary mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }
}

/// Keep only 8-connected components with at least `min_area` pixels
///
/// Returns the filtered mask and the number of components found.
pub fn filter_small_components(mask: &Mask, min_area: usize) -> (Mask, usize) {
    let mut out = Mask::new(mask.width, mask.height);
    let mut seen = vec![false; mask.data.len()];
    let mut stack = Vec::new();
    let mut component = Vec::new();
    let mut found = 0;

    for start in 0..mask.data.len() {
        if !mask.data[start] || seen[start] {
            continue;
        }
        found += 1;
        component.clear();
        seen[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            component.push(idx);
            let (x, y) = ((idx % mask.width) as isize, (idx / mask.width) as isize);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= mask.width as isize || ny >= mask.height as isize {
                        continue;
                    }
                    let n = ny as usize * mask.width + nx as usize;
                    if mask.data[n] && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if component.len() >= min_area {
            for &idx in &component {
                out.data[idx] = true;
            }
        }
    }

    (out, found)
}
