use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::frame::LabelConfig;
use super::target::Color;

/// Named colours handed out before falling back to random ones: yellow,
/// magenta, cyan, orange, purple, navy, dark green.
pub const DEFAULT_COLOR_POOL: [Color; 7] = [
    Color(0, 255, 255),
    Color(255, 0, 255),
    Color(255, 255, 0),
    Color(0, 165, 255),
    Color(128, 0, 128),
    Color(128, 0, 0),
    Color(0, 128, 0),
];

/// Stable label to colour assignment for one pipeline instance.
#[derive(Debug)]
pub struct LabelPalette {
    assigned: HashMap<String, Color>,
    pool: Vec<Color>,
    excluded: HashSet<Color>,
    rng: StdRng,
}

impl LabelPalette {
    pub fn new(pool: Vec<Color>) -> Self {
        Self {
            assigned: HashMap::new(),
            pool,
            excluded: HashSet::from([Color::ALERT, Color::NORMAL, Color::MARKER]),
            rng: StdRng::seed_from_u64(1),
        }
    }

    /// Colour for `label`: previously assigned, else the model's configured
    /// colour, else the first unused pool colour, else a random colour that
    /// clashes with nothing reserved or configured.
    pub fn resolve(&mut self, labels: &LabelConfig, label: &str) -> Color {
        if let Some(color) = self.assigned.get(label) {
            return *color;
        }
        if let Some(&[b, g, r]) = labels.label2color.get(label).map(Vec::as_slice) {
            let color = Color(b, g, r);
            self.assigned.insert(label.to_owned(), color);
            return color;
        }

        self.excluded.extend(self.assigned.values().copied());
        self.excluded.extend(
            labels
                .label2color
                .values()
                .filter_map(|c| <[u8; 3]>::try_from(c.as_slice()).ok())
                .map(Color::from),
        );
        let color = self.next_color();
        self.assigned.insert(label.to_owned(), color);
        color
    }

    fn next_color(&mut self) -> Color {
        let used: HashSet<Color> = self.assigned.values().copied().collect();
        if let Some(color) = self.pool.iter().find(|c| !used.contains(c)) {
            return *color;
        }
        loop {
            let color = Color(
                self.rng.gen_range(0..=255),
                self.rng.gen_range(0..=255),
                self.rng.gen_range(0..=255),
            );
            if !self.excluded.contains(&color) {
                return color;
            }
        }
    }
}

impl Default for LabelPalette {
    fn default() -> Self {
        Self::new(DEFAULT_COLOR_POOL.to_vec())
    }
}
