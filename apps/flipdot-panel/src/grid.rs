use flipdot_proto::bitmap::{self, HEIGHT, PixelGrid, WIDTH};
use flipdot_proto::ProtoResult;

/// Canonical pixel buffer of the panel.
///
/// Written by operator edits and by accepted inbound pictures, read when a
/// picture is sent. The store lives inside the panel task, which serialises
/// all three access paths.
#[derive(Debug, Default)]
pub struct GridStore {
    grid: PixelGrid,
}

impl GridStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, x: usize, y: usize) -> Option<bool> {
        self.grid.get(x, y)
    }

    pub fn set(&mut self, x: usize, y: usize, on: bool) -> ProtoResult<()> {
        self.grid.set(x, y, on)
    }

    pub fn toggle(&mut self, x: usize, y: usize) -> ProtoResult<bool> {
        self.grid.toggle(x, y)
    }

    pub fn fill(&mut self, on: bool) {
        self.grid.fill(on);
    }

    /// Replaces the whole buffer with rasteriser output given as rows
    /// (`rows[y][x]`). Anything beyond the grid is clipped, anything missing
    /// is dark.
    pub fn blit(&mut self, rows: &[Vec<bool>]) {
        let mut next = PixelGrid::new();
        for (y, row) in rows.iter().take(HEIGHT).enumerate() {
            for (x, on) in row.iter().take(WIDTH).enumerate() {
                if *on {
                    // x and y are bounded by take() above
                    let _ = next.set(x, y, true);
                }
            }
        }
        self.grid = next;
    }

    pub fn replace(&mut self, grid: PixelGrid) {
        self.grid = grid;
    }

    pub fn snapshot(&self) -> PixelGrid {
        self.grid.clone()
    }

    /// Packed bytes for the send path.
    pub fn encode(&self) -> Vec<u8> {
        bitmap::encode(&self.grid)
    }

    pub fn render(&self, invert: bool) -> String {
        self.grid.render(invert)
    }

    pub fn lit_count(&self) -> usize {
        self.grid.lit_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_are_visible_in_encoding() {
        let mut store = GridStore::new();
        store.set(0, 0, true).unwrap();
        store.set(83, 15, true).unwrap();
        let packed = store.encode();
        assert_eq!(packed[0], 0x80);
        assert_eq!(packed[167], 0x01);
        assert!(store.set(84, 0, true).is_err());
    }

    #[test]
    fn blit_clips_and_clears() {
        let mut store = GridStore::new();
        store.fill(true);

        let mut rows = vec![vec![false; WIDTH + 10]; HEIGHT + 4];
        rows[1][2] = true;
        rows[HEIGHT + 1][0] = true;
        rows[0][WIDTH + 3] = true;
        store.blit(&rows);

        assert_eq!(store.lit_count(), 1);
        assert_eq!(store.get(2, 1), Some(true));

        store.blit(&[vec![true, true]]);
        assert_eq!(store.lit_count(), 2);
        assert_eq!(store.get(1, 0), Some(true));
    }

    #[test]
    fn fill_and_replace() {
        let mut store = GridStore::new();
        store.fill(true);
        assert_eq!(store.lit_count(), WIDTH * HEIGHT);
        store.replace(PixelGrid::new());
        assert_eq!(store.lit_count(), 0);
        assert!(store.toggle(4, 4).unwrap());
        assert_eq!(store.snapshot().get(4, 4), Some(true));
    }
}
